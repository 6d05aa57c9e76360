//! Buffered engine
//!
//! Drives the element graph with an in-process streaming thread:
//!
//! ```text
//! MediaSource ──probe──► PadRouter ──► video/audio BufferQueue ──► clock
//!                                        (bytes ≤ limit)            │
//!                                                                   ▼
//!                                                        EngineMessage queue
//! ```
//!
//! The clock only advances over data that is actually queued, so a source
//! that stops delivering freezes the reported position the way a starved
//! sink does.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::source::{open_source, MediaSource, StreamInfo};
use super::{EngineEvent, EventSender, PlaybackEngine};
use crate::error::{EngineError, EngineResult};
use crate::graph::{
    ElementState, GraphBuilder, PadInfo, PadRouter, PipelineGraph, RouteOutcome, AUDIO_QUEUE,
    VIDEO_QUEUE,
};
use crate::media::{MediaReference, StreamKind};
use crate::queue::{BufferQueue, QueueLimits, StreamBuffer};

const TICK: Duration = Duration::from_millis(10);
const VIDEO_CHUNK_MS: u64 = 40;
const AUDIO_CHUNK_MS: u64 = 20;
/// Upper bound on buffers pushed per stream per tick
const MAX_PUSH_PER_TICK: usize = 256;

// ============================================================================
// Shared streaming state
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct SeekCommand {
    target_ms: u64,
    generation: u64,
}

/// State shared between the engine and its streaming thread
struct Stream {
    video: BufferQueue,
    audio: BufferQueue,
    stop: AtomicBool,
    playing: AtomicBool,
    position_ms: AtomicU64,
    /// 0 until probed
    duration_ms: AtomicU64,
    seek: Mutex<Option<SeekCommand>>,
}

impl Stream {
    fn new(limits: QueueLimits) -> Self {
        Self {
            video: BufferQueue::new(VIDEO_QUEUE, limits),
            audio: BufferQueue::new(AUDIO_QUEUE, limits),
            stop: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            position_ms: AtomicU64::new(0),
            duration_ms: AtomicU64::new(0),
            seek: Mutex::new(None),
        }
    }

    fn queue(&self, kind: StreamKind) -> Option<&BufferQueue> {
        match kind {
            StreamKind::Video => Some(&self.video),
            StreamKind::Audio => Some(&self.audio),
            StreamKind::Other => None,
        }
    }

    fn flush(&self) {
        self.video.flush();
        self.audio.flush();
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct BufferedEngine {
    builder: GraphBuilder,
    events: EventSender,
    position_interval: Duration,
    session: u64,
    seek_generation: u64,
    media: Option<MediaReference>,
    graph: Option<Arc<PipelineGraph>>,
    stream: Option<Arc<Stream>>,
    worker: Option<JoinHandle<()>>,
    volume: f64,
    muted: bool,
}

impl BufferedEngine {
    pub fn new(builder: GraphBuilder, events: EventSender, position_interval: Duration) -> Self {
        Self {
            builder,
            events,
            position_interval,
            session: 0,
            seek_generation: 0,
            media: None,
            graph: None,
            stream: None,
            worker: None,
            volume: 1.0,
            muted: false,
        }
    }

    /// Graph of the current session, if loaded
    pub fn graph(&self) -> Option<&Arc<PipelineGraph>> {
        self.graph.as_ref()
    }

    pub fn volume(&self) -> f64 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }

    fn start_streaming(
        &mut self,
        source: Box<dyn MediaSource>,
        graph: Arc<PipelineGraph>,
    ) -> EngineResult<()> {
        let stream = Arc::new(Stream::new(self.builder.limits()));
        let worker = StreamWorker {
            source,
            graph,
            stream: stream.clone(),
            events: self.events.clone(),
            session: self.session,
            generation: self.seek_generation,
            position_interval: self.position_interval,
        };

        let handle = thread::Builder::new()
            .name("poto-stream".into())
            .spawn(move || worker.run())
            .map_err(|e| EngineError::Backend(format!("Failed to spawn streaming thread: {e}")))?;

        self.stream = Some(stream);
        self.worker = Some(handle);
        Ok(())
    }

    fn halt_worker(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop.store(true, Ordering::SeqCst);
            stream.flush();
        }
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("Streaming thread panicked");
            }
        }
    }

    fn post(&self, event: EngineEvent) {
        self.events.post(self.session, event);
    }

    fn loaded(&self) -> EngineResult<(&Arc<PipelineGraph>, &Arc<Stream>)> {
        match (&self.graph, &self.stream) {
            (Some(graph), Some(stream)) => Ok((graph, stream)),
            _ => Err(EngineError::NoMedia),
        }
    }
}

impl PlaybackEngine for BufferedEngine {
    fn name(&self) -> &str {
        "buffered"
    }

    fn load(&mut self, media: &MediaReference) -> EngineResult<u64> {
        self.stop();

        let source = open_source(media)?;
        let graph = self.builder.build(media)?;

        self.session += 1;
        if let Err(e) = self.start_streaming(source, graph.clone()) {
            GraphBuilder::teardown(&graph);
            return Err(e);
        }
        self.media = Some(media.clone());
        self.graph = Some(graph);
        tracing::info!("Loaded {} (session {})", media, self.session);
        Ok(self.session)
    }

    fn play(&mut self) -> EngineResult<()> {
        let (graph, stream) = self.loaded()?;
        graph.set_state(ElementState::Playing)?;
        stream.playing.store(true, Ordering::SeqCst);
        self.post(EngineEvent::StateChanged(ElementState::Playing));
        Ok(())
    }

    fn pause(&mut self) -> EngineResult<()> {
        let (graph, stream) = self.loaded()?;
        graph.set_state(ElementState::Paused)?;
        stream.playing.store(false, Ordering::SeqCst);
        self.post(EngineEvent::StateChanged(ElementState::Paused));
        Ok(())
    }

    fn stop(&mut self) {
        if self.graph.is_none() && self.worker.is_none() {
            return;
        }
        self.halt_worker();
        if let Some(graph) = self.graph.take() {
            GraphBuilder::teardown(&graph);
        }
        self.media = None;
        self.session += 1;
        tracing::info!("Stopped, session now {}", self.session);
    }

    fn reset(&mut self) -> EngineResult<()> {
        let media = self.media.clone().ok_or(EngineError::NoMedia)?;
        let graph = self.graph.clone().ok_or(EngineError::NoMedia)?;

        self.halt_worker();
        graph.set_state(ElementState::Null)?;
        graph.set_state(ElementState::Paused)?;

        self.session += 1;
        let source = open_source(&media)?;
        self.start_streaming(source, graph)?;
        self.post(EngineEvent::StateChanged(ElementState::Paused));
        tracing::info!("Reset {} (session {})", media, self.session);
        Ok(())
    }

    fn seek(&mut self, position_ms: u64) -> EngineResult<u64> {
        let generation = self.seek_generation + 1;
        let (_, stream) = self.loaded()?;
        *stream.seek.lock() = Some(SeekCommand {
            target_ms: position_ms,
            generation,
        });
        self.seek_generation = generation;
        tracing::debug!("Seek to {}ms (generation {})", position_ms, generation);
        Ok(generation)
    }

    fn position_ms(&self) -> Option<u64> {
        self.stream
            .as_ref()
            .map(|s| s.position_ms.load(Ordering::SeqCst))
    }

    fn duration_ms(&self) -> Option<u64> {
        self.stream
            .as_ref()
            .map(|s| s.duration_ms.load(Ordering::SeqCst))
            .filter(|&d| d > 0)
    }

    fn set_volume(&mut self, volume: f64) {
        self.volume = volume.clamp(0.0, 1.0);
        tracing::debug!("Volume {:.2}", self.volume);
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        tracing::debug!("Muted: {}", muted);
    }

    fn is_loaded(&self) -> bool {
        self.graph.is_some()
    }

    fn session(&self) -> u64 {
        self.session
    }
}

impl Drop for BufferedEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Streaming thread
// ============================================================================

/// One routed elementary stream and how far it has been read
struct Lane {
    kind: StreamKind,
    info: StreamInfo,
    cursor_ms: u64,
}

impl Lane {
    fn chunk_ms(&self) -> u64 {
        match self.kind {
            StreamKind::Audio => AUDIO_CHUNK_MS,
            _ => VIDEO_CHUNK_MS,
        }
    }
}

struct StreamWorker {
    source: Box<dyn MediaSource>,
    graph: Arc<PipelineGraph>,
    stream: Arc<Stream>,
    events: EventSender,
    session: u64,
    generation: u64,
    position_interval: Duration,
}

impl StreamWorker {
    fn run(mut self) {
        let info = match self.source.probe() {
            Ok(info) => info,
            Err(e) => {
                tracing::error!("Probe failed: {}", e);
                self.post(EngineEvent::Error {
                    message: e.to_string(),
                    debug: Some(format!("{}: probe failed", self.graph.name())),
                });
                return;
            }
        };
        let duration = info.duration_ms;
        self.stream.duration_ms.store(duration, Ordering::SeqCst);
        self.post(EngineEvent::DurationChanged(duration));

        let router = PadRouter::new(self.graph.clone());
        let mut lanes = Vec::new();
        for stream in info.streams {
            let pad = PadInfo::new(stream.pad_name.as_str(), stream.caps.as_str());
            if let RouteOutcome::Linked(kind) = router.on_pad_added(&pad) {
                lanes.push(Lane {
                    kind,
                    info: stream,
                    cursor_ms: 0,
                });
            }
        }
        if lanes.is_empty() {
            self.post(EngineEvent::Error {
                message: "No playable streams".to_string(),
                debug: None,
            });
            return;
        }

        let mut last_tick = Instant::now();
        let mut last_report: Option<Instant> = None;
        let mut eos_posted = false;

        while !self.stream.stop.load(Ordering::SeqCst) && !self.graph.is_released() {
            let mut report_now = false;
            let seek = self.stream.seek.lock().take();
            if let Some(seek) = seek {
                self.apply_seek(seek, &mut lanes, duration);
                eos_posted = false;
                report_now = true;
            }

            self.fill(&mut lanes, duration);

            let now = Instant::now();
            let elapsed = now.duration_since(last_tick).as_millis() as u64;
            last_tick = now;

            let mut position = self.stream.position_ms.load(Ordering::SeqCst);
            if self.stream.playing.load(Ordering::SeqCst) {
                let limit = self.playable_until(&lanes, duration);
                position = position.max((position + elapsed).min(limit));
                self.stream.position_ms.store(position, Ordering::SeqCst);
            }
            self.stream.video.consume_until(position);
            self.stream.audio.consume_until(position);

            let report_due = last_report.map_or(true, |t| now.duration_since(t) >= self.position_interval);
            if report_now || report_due {
                self.post(EngineEvent::PositionChanged {
                    position_ms: position,
                    generation: self.generation,
                });
                last_report = Some(now);
            }

            if !eos_posted && position >= duration && self.drained(&lanes) {
                self.stream.playing.store(false, Ordering::SeqCst);
                self.post(EngineEvent::EndOfStream);
                eos_posted = true;
            }

            thread::sleep(TICK);
        }
        tracing::debug!("Streaming thread for session {} exiting", self.session);
    }

    fn post(&self, event: EngineEvent) {
        self.events.post(self.session, event);
    }

    /// Flush and restart reading at the target. The clock only moves there
    /// when data at the target can actually be read.
    fn apply_seek(&mut self, seek: SeekCommand, lanes: &mut [Lane], duration: u64) {
        let target = seek.target_ms.min(duration);
        self.stream.flush();
        for lane in lanes.iter_mut() {
            lane.cursor_ms = target;
        }
        self.generation = seek.generation;
        if target >= duration || self.source.can_read(target) {
            self.stream.position_ms.store(target, Ordering::SeqCst);
        } else {
            tracing::debug!("Seek to {}ms landed in unreadable data", target);
        }
    }

    fn fill(&self, lanes: &mut [Lane], duration: u64) {
        for lane in lanes.iter_mut() {
            let Some(queue) = self.stream.queue(lane.kind) else {
                continue;
            };
            let mut pushed = 0;
            while lane.cursor_ms < duration && pushed < MAX_PUSH_PER_TICK {
                if !self.source.can_read(lane.cursor_ms) {
                    break;
                }
                let chunk = lane.chunk_ms().min(duration - lane.cursor_ms);
                let buffer = StreamBuffer {
                    stream: lane.kind,
                    pts_ms: lane.cursor_ms,
                    duration_ms: chunk,
                    size: lane.info.bytes_for(chunk),
                };
                if queue.try_push(buffer).is_err() {
                    tracing::trace!("{} full at {} bytes", queue.name(), queue.bytes());
                    break;
                }
                lane.cursor_ms += chunk;
                pushed += 1;
            }
            if lane.cursor_ms >= duration && !queue.is_eos() {
                queue.set_eos();
            }
        }
    }

    /// Furthest point every routed stream has data for.
    fn playable_until(&self, lanes: &[Lane], duration: u64) -> u64 {
        lanes
            .iter()
            .filter_map(|lane| self.stream.queue(lane.kind))
            .map(|queue| {
                if queue.is_eos() {
                    duration
                } else {
                    queue.buffered_until().unwrap_or(0)
                }
            })
            .min()
            .unwrap_or(0)
    }

    fn drained(&self, lanes: &[Lane]) -> bool {
        lanes
            .iter()
            .filter_map(|lane| self.stream.queue(lane.kind))
            .all(BufferQueue::is_drained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineMessage;
    use crate::graph::registry::DECODEBIN;
    use crate::graph::ElementRegistry;
    use crossbeam_channel::Receiver;

    fn engine() -> (BufferedEngine, Receiver<EngineMessage>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let engine = BufferedEngine::new(
            GraphBuilder::default(),
            EventSender::new(tx),
            Duration::from_millis(20),
        );
        (engine, rx)
    }

    fn wait_for(
        rx: &Receiver<EngineMessage>,
        mut matches: impl FnMut(&EngineMessage) -> bool,
    ) -> Option<EngineMessage> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match rx.recv_timeout(remaining) {
                Ok(msg) if matches(&msg) => return Some(msg),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
        None
    }

    #[test]
    fn test_plays_to_end_of_stream() {
        let (mut engine, rx) = engine();
        let session = engine.load(&MediaReference::new("synthetic:300")).unwrap();
        engine.play().unwrap();

        let duration = wait_for(&rx, |m| matches!(m.event, EngineEvent::DurationChanged(_)));
        assert_eq!(
            duration.map(|m| m.event),
            Some(EngineEvent::DurationChanged(300))
        );
        let eos = wait_for(&rx, |m| m.event == EngineEvent::EndOfStream).unwrap();
        assert_eq!(eos.session, session);
        assert_eq!(engine.position_ms(), Some(300));
    }

    #[test]
    fn test_routes_both_streams() {
        let (mut engine, rx) = engine();
        engine.load(&MediaReference::new("synthetic:5000")).unwrap();
        wait_for(&rx, |m| matches!(m.event, EngineEvent::PositionChanged { .. })).unwrap();

        let graph = engine.graph().unwrap();
        assert!(graph.is_sink_linked(VIDEO_QUEUE));
        assert!(graph.is_sink_linked(AUDIO_QUEUE));
        assert_eq!(graph.state(), ElementState::Paused);
    }

    #[test]
    fn test_text_streams_left_unrouted() {
        let (mut engine, rx) = engine();
        engine
            .load(&MediaReference::new("synthetic:400?text=1"))
            .unwrap();
        engine.play().unwrap();
        wait_for(&rx, |m| m.event == EngineEvent::EndOfStream).unwrap();

        let graph = engine.graph().unwrap();
        assert_eq!(graph.dynamic_link_count(), 2);
        assert!(graph.is_pad_linked("src_0"));
        assert!(graph.is_pad_linked("src_1"));
        assert!(!graph.is_pad_linked("src_2"));
    }

    #[test]
    fn test_seek_while_paused_reports_generation() {
        let (mut engine, rx) = engine();
        engine.load(&MediaReference::new("synthetic:10000")).unwrap();
        let generation = engine.seek(4000).unwrap();

        let landed = wait_for(&rx, |m| {
            matches!(m.event, EngineEvent::PositionChanged { generation: g, .. } if g == generation)
        })
        .unwrap();
        assert_eq!(
            landed.event,
            EngineEvent::PositionChanged {
                position_ms: 4000,
                generation
            }
        );
    }

    #[test]
    fn test_seek_into_stall_does_not_land() {
        let (mut engine, rx) = engine();
        engine
            .load(&MediaReference::new("synthetic:10000?stall=2000"))
            .unwrap();
        let generation = engine.seek(6000).unwrap();

        let reported = wait_for(&rx, |m| {
            matches!(m.event, EngineEvent::PositionChanged { generation: g, .. } if g == generation)
        })
        .unwrap();
        assert_eq!(
            reported.event,
            EngineEvent::PositionChanged {
                position_ms: 0,
                generation
            }
        );
    }

    #[test]
    fn test_missing_demuxer_is_construction_error() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut engine = BufferedEngine::new(
            GraphBuilder::new(
                ElementRegistry::standard().without(DECODEBIN),
                QueueLimits::default(),
            ),
            EventSender::new(tx),
            Duration::from_millis(20),
        );
        let err = engine.load(&MediaReference::new("synthetic:1000")).unwrap_err();
        assert!(err.is_construction());
        assert!(!engine.is_loaded());
        assert!(engine.graph().is_none());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (mut engine, _rx) = engine();
        let session = engine.load(&MediaReference::new("synthetic:1000")).unwrap();
        let graph = engine.graph().cloned().unwrap();

        engine.stop();
        engine.stop();
        assert_eq!(engine.session(), session + 1);
        assert!(!engine.is_loaded());
        assert!(graph.is_released());
        assert_eq!(engine.play(), Err(EngineError::NoMedia));
        assert_eq!(engine.seek(10), Err(EngineError::NoMedia));
    }

    #[test]
    fn test_reset_keeps_media() {
        let (mut engine, _rx) = engine();
        let session = engine.load(&MediaReference::new("synthetic:1000")).unwrap();
        engine.play().unwrap();
        engine.reset().unwrap();

        assert!(engine.is_loaded());
        assert!(engine.session() > session);
        assert_eq!(engine.graph().unwrap().state(), ElementState::Paused);
    }

    #[test]
    fn test_unreadable_file_posts_error() {
        let (mut engine, rx) = engine();
        engine.load(&MediaReference::new("/nonexistent/clip.mp4")).unwrap();
        let error = wait_for(&rx, |m| matches!(m.event, EngineEvent::Error { .. }));
        assert!(error.is_some());
    }

    #[test]
    fn test_volume_and_mute() {
        let (mut engine, _rx) = engine();
        engine.set_volume(1.5);
        assert_eq!(engine.volume(), 1.0);
        engine.set_volume(0.5);
        engine.set_muted(true);
        assert_eq!(engine.volume(), 0.0);
        engine.set_muted(false);
        assert_eq!(engine.volume(), 0.5);
    }
}
