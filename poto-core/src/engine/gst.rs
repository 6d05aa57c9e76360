//! GStreamer engine
//!
//! Validates the layout through [`GraphBuilder`] against the factories the
//! installed GStreamer actually provides, then materialises the same graph
//! from real elements. Demuxer pads go through the shared [`PadRouter`];
//! bus traffic is forwarded from a dedicated thread.

use gstreamer as gst;
use gstreamer::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{EngineEvent, EventSender, PlaybackEngine};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::graph::{
    ElementRegistry, ElementState, GraphBuilder, PadInfo, PadRouter, PipelineGraph,
    PropertyValue, RouteOutcome, AUDIO_CONVERT, AUDIO_QUEUE, AUDIO_SINK, DEMUXER, VIDEO_QUEUE,
};
use crate::media::{MediaReference, StreamKind};

const AUDIO_VOLUME: &str = "audio-volume";
const BUS_POLL: u64 = 50;

static INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialise GStreamer once per process.
pub(super) fn init() -> EngineResult<()> {
    INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(EngineError::Backend)
}

fn element_state(state: gst::State) -> ElementState {
    match state {
        gst::State::Playing => ElementState::Playing,
        gst::State::Paused => ElementState::Paused,
        gst::State::Ready => ElementState::Ready,
        _ => ElementState::Null,
    }
}

fn gst_state(state: ElementState) -> gst::State {
    match state {
        ElementState::Playing => gst::State::Playing,
        ElementState::Paused => gst::State::Paused,
        ElementState::Ready => gst::State::Ready,
        ElementState::Null => gst::State::Null,
    }
}

// ============================================================================
// Session
// ============================================================================

/// A materialised pipeline plus its bus thread
struct GstSession {
    pipeline: gst::Pipeline,
    graph: Arc<PipelineGraph>,
    volume: Option<gst::Element>,
    stop: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    bus_thread: Option<JoinHandle<()>>,
}

impl GstSession {
    fn set_state(&self, state: ElementState) -> EngineResult<()> {
        self.pipeline
            .set_state(gst_state(state))
            .map_err(|e| EngineError::StateChange(format!("{state}: {e}")))?;
        self.graph.set_state(state)
    }

    fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            tracing::warn!("Pipeline refused Null: {}", e);
        }
        if let Some(handle) = self.bus_thread.take() {
            if handle.join().is_err() {
                tracing::error!("Bus thread panicked");
            }
        }
        GraphBuilder::teardown(&self.graph);
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct GstEngine {
    builder: GraphBuilder,
    events: EventSender,
    position_interval: Duration,
    session_id: Arc<AtomicU64>,
    seek_generation: u64,
    media: Option<MediaReference>,
    current: Option<GstSession>,
    volume: f64,
    muted: bool,
}

impl GstEngine {
    pub fn new(config: &EngineConfig, events: EventSender) -> EngineResult<Self> {
        init()?;
        let registry = ElementRegistry::probe(|factory| gst::ElementFactory::find(factory).is_some());
        Ok(Self {
            builder: GraphBuilder::new(registry, config.queue_limits()),
            events,
            position_interval: config.position_interval(),
            session_id: Arc::new(AtomicU64::new(0)),
            seek_generation: 0,
            media: None,
            current: None,
            volume: 1.0,
            muted: false,
        })
    }

    fn materialize(&self, graph: &Arc<PipelineGraph>) -> EngineResult<GstSession> {
        let pipeline = gst::Pipeline::with_name(graph.name());
        let mut made: HashMap<String, gst::Element> = HashMap::new();

        for element in graph.elements() {
            let gst_element = gst::ElementFactory::make(element.factory())
                .name(element.name())
                .build()
                .map_err(|e| {
                    EngineError::Construction(format!("Failed to create {}: {}", element.name(), e))
                })?;
            for (key, value) in element.properties() {
                match value {
                    PropertyValue::Str(s) => gst_element.set_property(key, s.as_str()),
                    PropertyValue::UInt(n) => {
                        gst_element.set_property(key, u32::try_from(*n).unwrap_or(u32::MAX))
                    }
                    PropertyValue::Bool(b) => gst_element.set_property(key, *b),
                }
            }
            made.insert(element.name().to_string(), gst_element);
        }

        let volume = gst::ElementFactory::make("volume")
            .name(AUDIO_VOLUME)
            .build()
            .ok();

        pipeline
            .add_many(made.values())
            .map_err(|e| EngineError::Construction(e.to_string()))?;
        if let Some(volume) = &volume {
            pipeline
                .add(volume)
                .map_err(|e| EngineError::Construction(e.to_string()))?;
        }

        let get = |name: &str| {
            made.get(name)
                .ok_or_else(|| EngineError::Link(format!("{name} missing from pipeline")))
        };
        for link in graph.static_links() {
            let from = get(&link.from)?;
            let to = get(&link.to)?;
            let result = match (&volume, link.from.as_str(), link.to.as_str()) {
                (Some(volume), AUDIO_CONVERT, AUDIO_SINK) => {
                    gst::Element::link_many([from, volume, to])
                }
                _ => from.link(to),
            };
            result.map_err(|e| {
                EngineError::Link(format!("{} -> {}: {}", link.from, link.to, e))
            })?;
        }

        let router = PadRouter::new(graph.clone());
        let video_queue = get(VIDEO_QUEUE)?.downgrade();
        let audio_queue = get(AUDIO_QUEUE)?.downgrade();
        get(DEMUXER)?.connect_pad_added(move |_, pad| {
            let Some(caps) = pad
                .current_caps()
                .and_then(|c| c.structure(0).map(|s| s.name().to_string()))
            else {
                return;
            };
            let info = PadInfo::new(pad.name().to_string(), caps);
            let queue = match router.on_pad_added(&info) {
                RouteOutcome::Linked(StreamKind::Video) => video_queue.upgrade(),
                RouteOutcome::Linked(StreamKind::Audio) => audio_queue.upgrade(),
                _ => None,
            };
            if let Some(sink) = queue.and_then(|q| q.static_pad("sink")) {
                if let Err(e) = pad.link(&sink) {
                    tracing::warn!("Failed to link {}: {:?}", info.name, e);
                }
            }
        });

        Ok(GstSession {
            pipeline,
            graph: graph.clone(),
            volume,
            stop: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(self.seek_generation)),
            bus_thread: None,
        })
    }

    fn spawn_bus_thread(&self, session: &mut GstSession) -> EngineResult<()> {
        let bus = session
            .pipeline
            .bus()
            .ok_or_else(|| EngineError::Backend("pipeline has no bus".to_string()))?;
        let watcher = BusWatcher {
            bus,
            pipeline: session.pipeline.downgrade(),
            events: self.events.clone(),
            session_id: self.session_id.clone(),
            stop: session.stop.clone(),
            generation: session.generation.clone(),
            position_interval: self.position_interval,
        };
        let handle = thread::Builder::new()
            .name("poto-bus".into())
            .spawn(move || watcher.run())
            .map_err(|e| EngineError::Backend(format!("Failed to spawn bus thread: {e}")))?;
        session.bus_thread = Some(handle);
        Ok(())
    }

    fn apply_volume(&self) {
        if let Some(volume) = self.current.as_ref().and_then(|s| s.volume.as_ref()) {
            volume.set_property("volume", self.volume);
            volume.set_property("mute", self.muted);
        }
    }

    fn active(&self) -> EngineResult<&GstSession> {
        self.current.as_ref().ok_or(EngineError::NoMedia)
    }

    fn post(&self, event: EngineEvent) {
        self.events.post(self.session_id.load(Ordering::SeqCst), event);
    }
}

impl PlaybackEngine for GstEngine {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn load(&mut self, media: &MediaReference) -> EngineResult<u64> {
        self.stop();

        let graph = self.builder.build(media)?;
        let mut session = match self.materialize(&graph) {
            Ok(session) => session,
            Err(e) => {
                GraphBuilder::teardown(&graph);
                return Err(e);
            }
        };
        let id = self.session_id.fetch_add(1, Ordering::SeqCst) + 1;
        if let Err(e) = self
            .spawn_bus_thread(&mut session)
            .and_then(|_| session.set_state(ElementState::Paused))
        {
            session.shutdown();
            return Err(e);
        }

        self.current = Some(session);
        self.media = Some(media.clone());
        self.apply_volume();
        tracing::info!("Loaded {} with GStreamer (session {})", media, id);
        Ok(id)
    }

    fn play(&mut self) -> EngineResult<()> {
        self.active()?.set_state(ElementState::Playing)
    }

    fn pause(&mut self) -> EngineResult<()> {
        self.active()?.set_state(ElementState::Paused)
    }

    fn stop(&mut self) {
        let Some(session) = self.current.take() else {
            return;
        };
        session.shutdown();
        self.media = None;
        let id = self.session_id.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!("Stopped, session now {}", id);
    }

    fn reset(&mut self) -> EngineResult<()> {
        let session = self.active()?;
        session.set_state(ElementState::Null)?;
        self.session_id.fetch_add(1, Ordering::SeqCst);
        session.set_state(ElementState::Paused)?;
        self.post(EngineEvent::StateChanged(ElementState::Paused));
        Ok(())
    }

    fn seek(&mut self, position_ms: u64) -> EngineResult<u64> {
        let session = self.active()?;
        session
            .pipeline
            .seek_simple(
                gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE,
                gst::ClockTime::from_mseconds(position_ms),
            )
            .map_err(|e| EngineError::Seek(e.to_string()))?;
        let generation = self.seek_generation + 1;
        session.generation.store(generation, Ordering::SeqCst);
        self.seek_generation = generation;
        Ok(generation)
    }

    fn position_ms(&self) -> Option<u64> {
        self.current
            .as_ref()?
            .pipeline
            .query_position::<gst::ClockTime>()
            .map(|t| t.mseconds())
    }

    fn duration_ms(&self) -> Option<u64> {
        self.current
            .as_ref()?
            .pipeline
            .query_duration::<gst::ClockTime>()
            .map(|t| t.mseconds())
    }

    fn set_volume(&mut self, volume: f64) {
        self.volume = volume.clamp(0.0, 1.0);
        self.apply_volume();
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.apply_volume();
    }

    fn is_loaded(&self) -> bool {
        self.current.is_some()
    }

    fn session(&self) -> u64 {
        self.session_id.load(Ordering::SeqCst)
    }
}

impl Drop for GstEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Bus
// ============================================================================

struct BusWatcher {
    bus: gst::Bus,
    pipeline: gst::glib::WeakRef<gst::Pipeline>,
    events: EventSender,
    session_id: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    position_interval: Duration,
}

impl BusWatcher {
    fn run(self) {
        let mut last_report: Option<Instant> = None;
        let mut last_duration: Option<u64> = None;

        while !self.stop.load(Ordering::SeqCst) {
            let Some(pipeline) = self.pipeline.upgrade() else {
                break;
            };

            if let Some(msg) = self.bus.timed_pop(gst::ClockTime::from_mseconds(BUS_POLL)) {
                self.forward(&msg, &pipeline);
            }

            let now = Instant::now();
            if last_report.map_or(true, |t| now.duration_since(t) >= self.position_interval) {
                last_report = Some(now);
                if let Some(duration) = pipeline.query_duration::<gst::ClockTime>() {
                    let duration = duration.mseconds();
                    if last_duration != Some(duration) {
                        last_duration = Some(duration);
                        self.post(EngineEvent::DurationChanged(duration));
                    }
                }
                if let Some(position) = pipeline.query_position::<gst::ClockTime>() {
                    self.post(EngineEvent::PositionChanged {
                        position_ms: position.mseconds(),
                        generation: self.generation.load(Ordering::SeqCst),
                    });
                }
            }
        }
    }

    fn post(&self, event: EngineEvent) {
        self.events
            .post(self.session_id.load(Ordering::SeqCst), event);
    }

    fn forward(&self, msg: &gst::Message, pipeline: &gst::Pipeline) {
        use gst::MessageView;

        match msg.view() {
            MessageView::Eos(..) => self.post(EngineEvent::EndOfStream),
            MessageView::Error(err) => {
                tracing::error!(
                    "Error from {:?}: {} ({:?})",
                    err.src().map(|s| s.path_string()),
                    err.error(),
                    err.debug()
                );
                self.post(EngineEvent::Error {
                    message: err.error().to_string(),
                    debug: err.debug().map(|d| d.to_string()),
                });
            }
            MessageView::Warning(warning) => {
                tracing::warn!("{} ({:?})", warning.error(), warning.debug());
                self.post(EngineEvent::Warning {
                    message: warning.error().to_string(),
                    debug: warning.debug().map(|d| d.to_string()),
                });
            }
            MessageView::StateChanged(changed) => {
                if msg.src() == Some(pipeline.upcast_ref::<gst::Object>()) {
                    self.post(EngineEvent::StateChanged(element_state(changed.current())));
                }
            }
            _ => {}
        }
    }
}
