//! Engine error taxonomy.
//!
//! Everything the engine can fail with is caught at the controller boundary
//! and turned into a status notification; none of these are fatal to the
//! hosting process.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A pipeline element could not be created or configured
    #[error("Construction failed: {0}")]
    Construction(String),
    /// Two elements or pads could not be linked
    #[error("Link failed: {0}")]
    Link(String),
    /// The pipeline refused a state transition
    #[error("State change failed: {0}")]
    StateChange(String),
    /// The backend rejected a seek
    #[error("Seek failed: {0}")]
    Seek(String),
    /// A transport command arrived with nothing loaded
    #[error("No media loaded")]
    NoMedia,
    /// Backend unavailable or misbehaving
    #[error("Backend error: {0}")]
    Backend(String),
}

impl EngineError {
    /// Construction failures leave transport stopped; everything else is recoverable.
    pub fn is_construction(&self) -> bool {
        matches!(self, Self::Construction(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
