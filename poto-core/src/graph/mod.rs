//! Element graph for buffered playback
//!
//! ```text
//! file-source ──► decode-bin ─┬─(dynamic)─► video-queue ──► video-convert ──► video-sink
//!                             └─(dynamic)─► audio-queue ──► audio-convert ──► audio-sink
//! ```
//!
//! Static links are made at build time. Demuxer outputs appear later, on the
//! streaming thread, and are linked by the [`PadRouter`]. The graph is shared
//! between the engine and its streaming thread, so the link table and state
//! live behind locks; teardown is safe at any point.

mod builder;
pub mod registry;
mod router;

pub use builder::GraphBuilder;
pub use registry::ElementRegistry;
pub use router::{PadInfo, PadRouter, RouteOutcome};

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{EngineError, EngineResult};

// ============================================================================
// Element names
// ============================================================================

pub const PIPELINE_NAME: &str = "buffered-player";
pub const FILE_SOURCE: &str = "file-source";
pub const DEMUXER: &str = "decode-bin";
pub const VIDEO_QUEUE: &str = "video-queue";
pub const VIDEO_CONVERT: &str = "video-convert";
pub const VIDEO_SINK: &str = "video-sink";
pub const AUDIO_QUEUE: &str = "audio-queue";
pub const AUDIO_CONVERT: &str = "audio-convert";
pub const AUDIO_SINK: &str = "audio-sink";

// ============================================================================
// States
// ============================================================================

/// Pipeline state ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ElementState {
    Null,
    Ready,
    Paused,
    Playing,
}

impl fmt::Display for ElementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Ready => "ready",
            Self::Paused => "paused",
            Self::Playing => "playing",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Elements
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementRole {
    Source,
    Demuxer,
    Queue,
    Converter,
    Sink,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Str(String),
    UInt(u64),
    Bool(bool),
}

/// A named processing element instantiated from a factory
#[derive(Debug, Clone)]
pub struct Element {
    name: String,
    factory: String,
    role: ElementRole,
    properties: BTreeMap<String, PropertyValue>,
}

impl Element {
    pub(crate) fn new(name: &str, factory: &str, role: ElementRole) -> Self {
        Self {
            name: name.to_string(),
            factory: factory.to_string(),
            role,
            properties: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn factory(&self) -> &str {
        &self.factory
    }

    pub fn role(&self) -> ElementRole {
        self.role
    }

    pub fn set_property(&mut self, key: &str, value: PropertyValue) {
        self.properties.insert(key.to_string(), value);
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Directed pad-to-pad connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    pub from: String,
    pub src_pad: String,
    pub to: String,
    pub sink_pad: String,
}

impl Link {
    fn new(from: &str, src_pad: &str, to: &str, sink_pad: &str) -> Self {
        Self {
            from: from.to_string(),
            src_pad: src_pad.to_string(),
            to: to.to_string(),
            sink_pad: sink_pad.to_string(),
        }
    }
}

// ============================================================================
// Pipeline Graph
// ============================================================================

#[derive(Debug, Default)]
struct GraphTopology {
    elements: Vec<Element>,
    static_links: Vec<Link>,
}

/// Demuxer pad name → link, filled in from the streaming thread.
///
/// `released` lives under the same lock so a link can never land after
/// teardown.
#[derive(Debug, Default)]
struct DynamicLinks {
    links: HashMap<String, Link>,
    released: bool,
}

/// Elements plus the links between them
pub struct PipelineGraph {
    name: String,
    topology: RwLock<GraphTopology>,
    dynamic: Mutex<DynamicLinks>,
    state: RwLock<ElementState>,
}

impl PipelineGraph {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            topology: RwLock::new(GraphTopology::default()),
            dynamic: Mutex::new(DynamicLinks::default()),
            state: RwLock::new(ElementState::Null),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn add(&self, element: Element) -> EngineResult<()> {
        let mut topology = self.topology.write();
        if topology.elements.iter().any(|e| e.name == element.name) {
            return Err(EngineError::Construction(format!(
                "duplicate element name {}",
                element.name
            )));
        }
        topology.elements.push(element);
        Ok(())
    }

    /// Link `from`'s `src` pad to `to`'s `sink` pad.
    pub(crate) fn link(&self, from: &str, to: &str) -> EngineResult<()> {
        let mut topology = self.topology.write();
        for name in [from, to] {
            if !topology.elements.iter().any(|e| e.name == name) {
                return Err(EngineError::Link(format!("{} is not in {}", name, self.name)));
            }
        }
        topology.static_links.push(Link::new(from, "src", to, "sink"));
        Ok(())
    }

    /// Link every consecutive pair.
    pub(crate) fn link_many(&self, chain: &[&str]) -> EngineResult<()> {
        for pair in chain.windows(2) {
            self.link(pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Connect a demuxer output pad to an element's sink pad.
    ///
    /// Returns `false` when the pad is already linked, the target sink pad is
    /// taken, or the graph is torn down.
    pub(crate) fn link_dynamic(&self, pad_name: &str, to: &str) -> bool {
        let mut dynamic = self.dynamic.lock();
        if dynamic.released
            || dynamic.links.contains_key(pad_name)
            || dynamic.links.values().any(|l| l.to == to)
        {
            return false;
        }
        dynamic
            .links
            .insert(pad_name.to_string(), Link::new(DEMUXER, pad_name, to, "sink"));
        true
    }

    pub fn element(&self, name: &str) -> Option<Element> {
        self.topology
            .read()
            .elements
            .iter()
            .find(|e| e.name == name)
            .cloned()
    }

    pub fn element_names(&self) -> Vec<String> {
        self.topology
            .read()
            .elements
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn elements(&self) -> Vec<Element> {
        self.topology.read().elements.clone()
    }

    pub fn static_links(&self) -> Vec<Link> {
        self.topology.read().static_links.clone()
    }

    pub fn dynamic_link_count(&self) -> usize {
        self.dynamic.lock().links.len()
    }

    pub fn is_pad_linked(&self, pad_name: &str) -> bool {
        self.dynamic.lock().links.contains_key(pad_name)
    }

    /// Whether anything is linked into `element`'s sink pad from the demuxer.
    pub fn is_sink_linked(&self, element: &str) -> bool {
        self.dynamic.lock().links.values().any(|l| l.to == element)
    }

    pub fn state(&self) -> ElementState {
        *self.state.read()
    }

    /// Request a state change.
    ///
    /// Dropping to Ready or Null removes the demuxer's dynamic pads, so their
    /// links go with them and are re-discovered on the way back up.
    pub fn set_state(&self, target: ElementState) -> EngineResult<()> {
        if target > ElementState::Null && self.is_released() {
            return Err(EngineError::StateChange(format!(
                "{} was torn down, cannot go to {}",
                self.name, target
            )));
        }
        let previous = std::mem::replace(&mut *self.state.write(), target);
        if target <= ElementState::Ready {
            self.dynamic.lock().links.clear();
        }
        if previous != target {
            tracing::debug!("{}: {} -> {}", self.name, previous, target);
        }
        Ok(())
    }

    /// Go to Null and release every element. Safe to call repeatedly.
    pub(crate) fn release(&self) {
        *self.state.write() = ElementState::Null;
        let first = {
            let mut dynamic = self.dynamic.lock();
            dynamic.links.clear();
            !std::mem::replace(&mut dynamic.released, true)
        };
        if first {
            let mut topology = self.topology.write();
            topology.elements.clear();
            topology.static_links.clear();
            tracing::debug!("{}: released", self.name);
        }
    }

    pub fn is_released(&self) -> bool {
        self.dynamic.lock().released
    }
}

impl fmt::Debug for PipelineGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineGraph")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("elements", &self.element_names())
            .field("dynamic_links", &self.dynamic_link_count())
            .finish()
    }
}
