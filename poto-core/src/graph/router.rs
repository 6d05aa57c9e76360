//! Dynamic pad routing
//!
//! The demuxer announces each elementary stream once, from the streaming
//! thread, some time after data starts flowing. The router inspects the pad's
//! media type and links it to the matching queue. It never blocks and only
//! touches the graph's link table.

use std::sync::Arc;

use super::{PipelineGraph, AUDIO_QUEUE, VIDEO_QUEUE};
use crate::media::StreamKind;

/// A demuxer output pad as announced by pad-added
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PadInfo {
    /// Pad name, unique per demuxer (`src_0`, `src_1`, ...)
    pub name: String,
    /// Negotiated media-type name (`video/x-raw`, `audio/x-raw`, ...)
    pub caps: String,
}

impl PadInfo {
    pub fn new(name: impl Into<String>, caps: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            caps: caps.into(),
        }
    }

    pub fn kind(&self) -> StreamKind {
        StreamKind::from_caps(&self.caps)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Linked into the queue for this stream kind
    Linked(StreamKind),
    /// This pad was linked earlier
    AlreadyLinked,
    /// Another pad of the same kind already feeds the queue
    Occupied(StreamKind),
    /// Not video or audio (subtitles, metadata); left unlinked
    Ignored,
    /// Graph torn down while the pad was being announced
    Detached,
}

/// Routes demuxer pads into the video/audio queues of one graph
#[derive(Debug, Clone)]
pub struct PadRouter {
    graph: Arc<PipelineGraph>,
}

impl PadRouter {
    pub fn new(graph: Arc<PipelineGraph>) -> Self {
        Self { graph }
    }

    /// Queue element a stream kind feeds, if any.
    pub fn target_for(kind: StreamKind) -> Option<&'static str> {
        match kind {
            StreamKind::Video => Some(VIDEO_QUEUE),
            StreamKind::Audio => Some(AUDIO_QUEUE),
            StreamKind::Other => None,
        }
    }

    pub fn on_pad_added(&self, pad: &PadInfo) -> RouteOutcome {
        let kind = pad.kind();
        let Some(target) = Self::target_for(kind) else {
            tracing::debug!("Ignoring pad {} ({})", pad.name, pad.caps);
            return RouteOutcome::Ignored;
        };

        if self.graph.is_pad_linked(&pad.name) {
            return RouteOutcome::AlreadyLinked;
        }

        if self.graph.link_dynamic(&pad.name, target) {
            tracing::debug!("Linked pad {} ({}) -> {}", pad.name, pad.caps, target);
            RouteOutcome::Linked(kind)
        } else if self.graph.is_released() {
            RouteOutcome::Detached
        } else if self.graph.is_pad_linked(&pad.name) {
            RouteOutcome::AlreadyLinked
        } else {
            tracing::debug!("Pad {} not linked: {} already fed", pad.name, target);
            RouteOutcome::Occupied(kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ElementState, GraphBuilder};
    use crate::media::MediaReference;

    fn router() -> (PadRouter, Arc<PipelineGraph>) {
        let graph = GraphBuilder::default()
            .build(&MediaReference::new("/media/a.mp4"))
            .unwrap();
        (PadRouter::new(graph.clone()), graph)
    }

    #[test]
    fn test_routes_by_media_type() {
        let (router, graph) = router();
        assert_eq!(
            router.on_pad_added(&PadInfo::new("src_0", "video/x-raw")),
            RouteOutcome::Linked(StreamKind::Video)
        );
        assert_eq!(
            router.on_pad_added(&PadInfo::new("src_1", "audio/x-raw")),
            RouteOutcome::Linked(StreamKind::Audio)
        );
        assert!(graph.is_sink_linked(VIDEO_QUEUE));
        assert!(graph.is_sink_linked(AUDIO_QUEUE));
    }

    #[test]
    fn test_same_pad_twice_links_once() {
        let (router, graph) = router();
        let pad = PadInfo::new("src_0", "video/x-raw");
        assert_eq!(
            router.on_pad_added(&pad),
            RouteOutcome::Linked(StreamKind::Video)
        );
        assert_eq!(router.on_pad_added(&pad), RouteOutcome::AlreadyLinked);
        assert_eq!(graph.dynamic_link_count(), 1);
    }

    #[test]
    fn test_unknown_types_ignored() {
        let (router, graph) = router();
        assert_eq!(
            router.on_pad_added(&PadInfo::new("src_2", "text/x-raw")),
            RouteOutcome::Ignored
        );
        assert_eq!(graph.dynamic_link_count(), 0);
    }

    #[test]
    fn test_second_video_stream_occupied() {
        let (router, graph) = router();
        router.on_pad_added(&PadInfo::new("src_0", "video/x-raw"));
        assert_eq!(
            router.on_pad_added(&PadInfo::new("src_3", "video/x-raw")),
            RouteOutcome::Occupied(StreamKind::Video)
        );
        assert_eq!(graph.dynamic_link_count(), 1);
    }

    #[test]
    fn test_any_arrival_order() {
        let (router, graph) = router();
        router.on_pad_added(&PadInfo::new("src_1", "audio/x-raw"));
        router.on_pad_added(&PadInfo::new("src_2", "text/x-raw"));
        router.on_pad_added(&PadInfo::new("src_0", "video/x-raw"));
        router.on_pad_added(&PadInfo::new("src_1", "audio/x-raw"));
        assert_eq!(graph.dynamic_link_count(), 2);
    }

    #[test]
    fn test_after_teardown() {
        let (router, graph) = router();
        GraphBuilder::teardown(&graph);
        assert_eq!(
            router.on_pad_added(&PadInfo::new("src_0", "video/x-raw")),
            RouteOutcome::Detached
        );
        assert_eq!(graph.state(), ElementState::Null);
    }

    #[test]
    fn test_concurrent_announcements() {
        let (router, graph) = router();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let router = router.clone();
                std::thread::spawn(move || {
                    let caps = if i % 2 == 0 { "video/x-raw" } else { "audio/x-raw" };
                    router.on_pad_added(&PadInfo::new(format!("src_{}", i % 2), caps))
                })
            })
            .collect();
        let linked = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| matches!(o, RouteOutcome::Linked(_)))
            .count();
        assert_eq!(linked, 2);
        assert_eq!(graph.dynamic_link_count(), 2);
    }
}
