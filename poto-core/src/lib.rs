//! # Pot-O Core
//!
//! Playback and buffering engine for the Pot-O video player: element graph
//! construction, dynamic pad routing, bounded buffering queues, transport
//! control, seek reconciliation and stall recovery.

// ============================================================================
// Foundation
// ============================================================================
pub mod config;
pub mod error;
pub mod media;
pub mod position;

// ============================================================================
// Element Graph
// ============================================================================
pub mod graph;
pub mod queue;

// ============================================================================
// Playback Engines
// ============================================================================
pub mod engine;

// ============================================================================
// Control
// ============================================================================
pub mod controller;
pub mod playlist;
pub mod reconcile;
pub mod recovery;

pub use config::EngineConfig;
pub use controller::{
    Command, ControllerHandle, Notification, PlaybackController, TransportAffordances,
    TransportState,
};
pub use engine::{EngineEvent, EngineKind, EngineMessage, PlaybackEngine};
pub use error::{EngineError, EngineResult};
pub use media::MediaReference;
pub use playlist::Playlist;

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
