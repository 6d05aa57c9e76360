//! Playback engines
//!
//! Every backend sits behind [`PlaybackEngine`]. Engines never call back into
//! the controller: pad discovery, bus traffic and clock ticks happen on their
//! own threads and are posted as [`EngineMessage`]s on a single-consumer
//! queue which the controller drains on the UI thread.

mod buffered;
#[cfg(feature = "gstreamer")]
mod gst;
pub mod source;

pub use buffered::BufferedEngine;
#[cfg(feature = "gstreamer")]
pub use gst::GstEngine;
pub use source::{FileSource, MediaInfo, MediaSource, StreamInfo, SyntheticSource};

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::graph::{ElementRegistry, ElementState, GraphBuilder};
use crate::media::MediaReference;

// ============================================================================
// Messages
// ============================================================================

/// Something that happened inside the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged(ElementState),
    /// Clock position, tagged with the generation of the last applied seek
    PositionChanged { position_ms: u64, generation: u64 },
    DurationChanged(u64),
    Error {
        message: String,
        debug: Option<String>,
    },
    Warning {
        message: String,
        debug: Option<String>,
    },
    EndOfStream,
}

/// An event plus the session it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct EngineMessage {
    pub session: u64,
    pub event: EngineEvent,
}

/// Posting side of the engine message queue
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<EngineMessage>,
}

impl EventSender {
    pub fn new(tx: Sender<EngineMessage>) -> Self {
        Self { tx }
    }

    /// Post an event. Returns false once the controller is gone.
    pub fn post(&self, session: u64, event: EngineEvent) -> bool {
        self.tx.send(EngineMessage { session, event }).is_ok()
    }
}

// ============================================================================
// Engine trait
// ============================================================================

/// A playback backend driving one pipeline at a time
pub trait PlaybackEngine: Send {
    fn name(&self) -> &str;

    /// Tear down whatever is loaded, build a pipeline for `media` and leave
    /// it paused. Returns the new session id.
    fn load(&mut self, media: &MediaReference) -> EngineResult<u64>;

    fn play(&mut self) -> EngineResult<()>;

    fn pause(&mut self) -> EngineResult<()>;

    /// Tear down the pipeline. Idempotent.
    fn stop(&mut self);

    /// Drop the pipeline to Null and back to Paused, keeping the media.
    fn reset(&mut self) -> EngineResult<()>;

    /// Request a flushing seek. Returns the seek generation that later
    /// position reports will carry.
    fn seek(&mut self, position_ms: u64) -> EngineResult<u64>;

    fn position_ms(&self) -> Option<u64>;

    fn duration_ms(&self) -> Option<u64>;

    /// Linear volume, 0.0 - 1.0
    fn set_volume(&mut self, volume: f64);

    fn set_muted(&mut self, muted: bool);

    fn is_loaded(&self) -> bool;

    /// Id stamped on every message the current pipeline posts
    fn session(&self) -> u64;
}

// ============================================================================
// Engine selection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EngineKind {
    /// GStreamer when available, otherwise buffered
    #[default]
    Auto,
    Buffered,
    Gstreamer,
}

impl EngineKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Buffered => "buffered",
            Self::Gstreamer => "gstreamer",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "buffered" => Some(Self::Buffered),
            "gstreamer" | "gst" => Some(Self::Gstreamer),
            _ => None,
        }
    }

    /// Concrete engine `Auto` stands for on this build.
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto if gstreamer_available() => Self::Gstreamer,
            Self::Auto => Self::Buffered,
            other => other,
        }
    }
}

#[cfg(feature = "gstreamer")]
fn gstreamer_available() -> bool {
    gst::init().is_ok()
}

#[cfg(not(feature = "gstreamer"))]
fn gstreamer_available() -> bool {
    false
}

/// Engines usable in this build
pub fn available_engines() -> Vec<EngineKind> {
    let mut list = vec![EngineKind::Buffered];
    if gstreamer_available() {
        list.push(EngineKind::Gstreamer);
    }
    list
}

/// Construct the engine `config` asks for, plus the receiving end of its
/// message queue.
pub fn create_engine(
    config: &EngineConfig,
) -> EngineResult<(Box<dyn PlaybackEngine>, Receiver<EngineMessage>)> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let events = EventSender::new(tx);
    let kind = config.engine.resolve();
    tracing::info!("Using {} engine", kind.name());

    let engine: Box<dyn PlaybackEngine> = match kind {
        EngineKind::Gstreamer => gstreamer_engine(config, events)?,
        _ => Box::new(BufferedEngine::new(
            GraphBuilder::new(ElementRegistry::standard(), config.queue_limits()),
            events,
            config.position_interval(),
        )),
    };
    Ok((engine, rx))
}

#[cfg(feature = "gstreamer")]
fn gstreamer_engine(
    config: &EngineConfig,
    events: EventSender,
) -> EngineResult<Box<dyn PlaybackEngine>> {
    Ok(Box::new(GstEngine::new(config, events)?))
}

#[cfg(not(feature = "gstreamer"))]
fn gstreamer_engine(
    _config: &EngineConfig,
    _events: EventSender,
) -> EngineResult<Box<dyn PlaybackEngine>> {
    Err(EngineError::Backend(
        "built without the gstreamer feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(EngineKind::from_name("Buffered"), Some(EngineKind::Buffered));
        assert_eq!(EngineKind::from_name("gst"), Some(EngineKind::Gstreamer));
        assert_eq!(EngineKind::from_name("vlc"), None);
        assert_eq!(EngineKind::Buffered.resolve(), EngineKind::Buffered);
    }

    #[test]
    fn test_buffered_always_available() {
        assert!(available_engines().contains(&EngineKind::Buffered));
    }

    #[test]
    fn test_create_buffered() {
        let config = EngineConfig {
            engine: EngineKind::Buffered,
            ..Default::default()
        };
        let (engine, _rx) = create_engine(&config).unwrap();
        assert_eq!(engine.name(), "buffered");
        assert!(!engine.is_loaded());
    }

    #[cfg(not(feature = "gstreamer"))]
    #[test]
    fn test_gstreamer_missing() {
        let config = EngineConfig {
            engine: EngineKind::Gstreamer,
            ..Default::default()
        };
        assert!(matches!(
            create_engine(&config),
            Err(EngineError::Backend(_))
        ));
        assert_eq!(EngineKind::Auto.resolve(), EngineKind::Buffered);
    }
}
