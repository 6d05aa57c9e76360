//! Element factory registry
//!
//! Models which element factories the backend can instantiate. A missing
//! factory is how "backend feature not installed" shows up at build time.

use std::collections::HashMap;

use super::{Element, ElementRole};
use crate::error::{EngineError, EngineResult};

pub const FILESRC: &str = "filesrc";
pub const DECODEBIN: &str = "decodebin";
pub const QUEUE: &str = "queue";
pub const VIDEOCONVERT: &str = "videoconvert";
pub const AUDIOCONVERT: &str = "audioconvert";
pub const AUTOVIDEOSINK: &str = "autovideosink";
pub const AUTOAUDIOSINK: &str = "autoaudiosink";

#[derive(Debug, Clone, Default)]
pub struct ElementRegistry {
    factories: HashMap<String, ElementRole>,
}

impl ElementRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Every factory the buffered pipeline needs
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(FILESRC, ElementRole::Source);
        registry.register(DECODEBIN, ElementRole::Demuxer);
        registry.register(QUEUE, ElementRole::Queue);
        registry.register(VIDEOCONVERT, ElementRole::Converter);
        registry.register(AUDIOCONVERT, ElementRole::Converter);
        registry.register(AUTOVIDEOSINK, ElementRole::Sink);
        registry.register(AUTOAUDIOSINK, ElementRole::Sink);
        registry
    }

    /// Standard factories, keeping only those `available` accepts.
    pub fn probe(available: impl Fn(&str) -> bool) -> Self {
        let mut registry = Self::standard();
        registry.factories.retain(|name, _| available(name));
        registry
    }

    pub fn register(&mut self, factory: &str, role: ElementRole) {
        self.factories.insert(factory.to_string(), role);
    }

    /// Copy of this registry without `factory`.
    pub fn without(mut self, factory: &str) -> Self {
        self.factories.remove(factory);
        self
    }

    pub fn contains(&self, factory: &str) -> bool {
        self.factories.contains_key(factory)
    }

    /// Instantiate `factory` as an element called `name`.
    pub fn make(&self, factory: &str, name: &str) -> EngineResult<Element> {
        let role = self.factories.get(factory).ok_or_else(|| {
            EngineError::Construction(format!(
                "Failed to create {name}: no element factory {factory}"
            ))
        })?;
        Ok(Element::new(name, factory, *role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make() {
        let registry = ElementRegistry::standard();
        let element = registry.make(QUEUE, "video-queue").unwrap();
        assert_eq!(element.name(), "video-queue");
        assert_eq!(element.factory(), QUEUE);
        assert_eq!(element.role(), ElementRole::Queue);
    }

    #[test]
    fn test_missing_factory() {
        let registry = ElementRegistry::standard().without(DECODEBIN);
        assert!(!registry.contains(DECODEBIN));
        let err = registry.make(DECODEBIN, "decode-bin").unwrap_err();
        assert!(err.is_construction());
        assert!(err.to_string().contains("decodebin"));
    }

    #[test]
    fn test_probe() {
        let registry = ElementRegistry::probe(|f| f != AUTOAUDIOSINK);
        assert!(registry.contains(FILESRC));
        assert!(!registry.contains(AUTOAUDIOSINK));
    }
}
