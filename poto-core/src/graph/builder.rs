//! Graph construction and teardown

use std::sync::Arc;

use super::registry::{
    AUDIOCONVERT, AUTOAUDIOSINK, AUTOVIDEOSINK, DECODEBIN, FILESRC, QUEUE, VIDEOCONVERT,
};
use super::{
    Element, ElementRegistry, ElementState, PipelineGraph, PropertyValue, AUDIO_CONVERT,
    AUDIO_QUEUE, AUDIO_SINK, DEMUXER, FILE_SOURCE, PIPELINE_NAME, VIDEO_CONVERT, VIDEO_QUEUE,
    VIDEO_SINK,
};
use crate::error::{EngineError, EngineResult};
use crate::media::MediaReference;
use crate::queue::QueueLimits;

/// Factory and instance name for every element, in build order
const LAYOUT: [(&str, &str); 8] = [
    (FILESRC, FILE_SOURCE),
    (DECODEBIN, DEMUXER),
    (QUEUE, VIDEO_QUEUE),
    (VIDEOCONVERT, VIDEO_CONVERT),
    (AUTOVIDEOSINK, VIDEO_SINK),
    (QUEUE, AUDIO_QUEUE),
    (AUDIOCONVERT, AUDIO_CONVERT),
    (AUTOAUDIOSINK, AUDIO_SINK),
];

/// Builds the buffered playback graph for one media reference
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    registry: ElementRegistry,
    limits: QueueLimits,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new(ElementRegistry::standard(), QueueLimits::default())
    }
}

impl GraphBuilder {
    pub fn new(registry: ElementRegistry, limits: QueueLimits) -> Self {
        Self { registry, limits }
    }

    pub fn registry(&self) -> &ElementRegistry {
        &self.registry
    }

    pub fn limits(&self) -> QueueLimits {
        self.limits
    }

    /// Build the graph for `media` and leave it Paused.
    ///
    /// All elements are instantiated before anything is assembled, so a
    /// missing factory leaves nothing behind.
    pub fn build(&self, media: &MediaReference) -> EngineResult<Arc<PipelineGraph>> {
        if media.locator().trim().is_empty() {
            return Err(EngineError::Construction("empty media locator".to_string()));
        }

        let mut elements = LAYOUT
            .iter()
            .map(|(factory, name)| self.registry.make(factory, name))
            .collect::<EngineResult<Vec<Element>>>()?;

        for element in &mut elements {
            match element.name() {
                FILE_SOURCE => {
                    let location = media
                        .local_path()
                        .map(|p| p.to_string_lossy().into_owned())
                        .unwrap_or_else(|| media.locator().to_string());
                    element.set_property("location", PropertyValue::Str(location));
                }
                VIDEO_QUEUE | AUDIO_QUEUE => {
                    element.set_property(
                        "max-size-buffers",
                        PropertyValue::UInt(self.limits.max_buffers as u64),
                    );
                    element.set_property(
                        "max-size-bytes",
                        PropertyValue::UInt(self.limits.max_bytes),
                    );
                }
                _ => {}
            }
        }

        let graph = PipelineGraph::new(PIPELINE_NAME);
        for element in elements {
            graph.add(element)?;
        }

        let assembled = graph
            .link(FILE_SOURCE, DEMUXER)
            .and_then(|_| graph.link_many(&[VIDEO_QUEUE, VIDEO_CONVERT, VIDEO_SINK]))
            .and_then(|_| graph.link_many(&[AUDIO_QUEUE, AUDIO_CONVERT, AUDIO_SINK]))
            .and_then(|_| graph.set_state(ElementState::Paused));
        if let Err(e) = assembled {
            graph.release();
            return Err(e);
        }

        tracing::info!("Built {} for {}", PIPELINE_NAME, media);
        Ok(Arc::new(graph))
    }

    /// Stop the graph and release its elements. Safe to repeat.
    pub fn teardown(graph: &PipelineGraph) {
        if graph.is_released() {
            return;
        }
        graph.release();
        tracing::debug!("Tore down {}", graph.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_layout() {
        let graph = GraphBuilder::default()
            .build(&MediaReference::new("/media/clip.mp4"))
            .unwrap();

        assert_eq!(graph.state(), ElementState::Paused);
        assert_eq!(graph.elements().len(), 8);
        assert_eq!(graph.static_links().len(), 5);
        assert_eq!(graph.dynamic_link_count(), 0);

        let source = graph.element(FILE_SOURCE).unwrap();
        assert_eq!(
            source.property("location"),
            Some(&PropertyValue::Str("/media/clip.mp4".to_string()))
        );
        let queue = graph.element(AUDIO_QUEUE).unwrap();
        assert_eq!(
            queue.property("max-size-bytes"),
            Some(&PropertyValue::UInt(5_000_000))
        );
        assert_eq!(
            queue.property("max-size-buffers"),
            Some(&PropertyValue::UInt(0))
        );
    }

    #[test]
    fn test_file_uri_location() {
        let graph = GraphBuilder::default()
            .build(&MediaReference::new("file:///tmp/movie.mkv"))
            .unwrap();
        let source = graph.element(FILE_SOURCE).unwrap();
        assert_eq!(
            source.property("location"),
            Some(&PropertyValue::Str("/tmp/movie.mkv".to_string()))
        );
    }

    #[test]
    fn test_missing_demuxer_builds_nothing() {
        let builder = GraphBuilder::new(
            ElementRegistry::standard().without(DECODEBIN),
            QueueLimits::default(),
        );
        let err = builder
            .build(&MediaReference::new("/media/clip.mp4"))
            .unwrap_err();
        assert!(err.is_construction());
        assert!(err.to_string().contains(DECODEBIN));
    }

    #[test]
    fn test_empty_locator() {
        let err = GraphBuilder::default()
            .build(&MediaReference::new(""))
            .unwrap_err();
        assert!(err.is_construction());
    }

    #[test]
    fn test_teardown_twice() {
        let graph = GraphBuilder::default()
            .build(&MediaReference::new("/media/clip.mp4"))
            .unwrap();
        GraphBuilder::teardown(&graph);
        GraphBuilder::teardown(&graph);
        assert!(graph.is_released());
        assert_eq!(graph.state(), ElementState::Null);
        assert!(graph.elements().is_empty());
    }
}
