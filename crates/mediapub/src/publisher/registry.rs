use std::collections::HashMap;
use std::sync::Arc;

use super::{GenericSitePublisher, PublisherOptions, SitePublisher};
use crate::config::Config;

pub const STORYMAKER: &str = "storymaker";

/// Builds a fresh publisher for one publish job.
pub type PublisherFactory = Arc<dyn Fn() -> Box<dyn SitePublisher> + Send + Sync>;

/// Maps site keys to publisher factories.
#[derive(Clone, Default)]
pub struct PublisherRegistry {
    factories: HashMap<String, PublisherFactory>,
}

impl PublisherRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `storymaker` publisher.
    pub fn with_defaults(options: PublisherOptions) -> Self {
        let mut registry = Self::new();
        registry.register(STORYMAKER, move || {
            Box::new(GenericSitePublisher::new(STORYMAKER, options.clone()))
        });
        registry
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_defaults(PublisherOptions {
            render_spec: config.publishers.storymaker.render_spec.clone(),
            encrypt_at_rest: config.encryption.encrypt_at_rest,
            retry: config.retry.clone(),
        })
    }

    pub fn register<F>(&mut self, site_key: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn SitePublisher> + Send + Sync + 'static,
    {
        self.factories.insert(site_key.into(), Arc::new(factory));
    }

    pub fn contains(&self, site_key: &str) -> bool {
        self.factories.contains_key(site_key)
    }

    /// Scans `site_keys` in order and builds the publisher of the first key
    /// that has one registered.
    pub fn resolve(&self, site_keys: &[String]) -> Option<(String, Box<dyn SitePublisher>)> {
        site_keys.iter().find_map(|key| {
            self.factories
                .get(key)
                .map(|factory| (key.clone(), factory()))
        })
    }

    pub fn site_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

impl std::fmt::Debug for PublisherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherRegistry")
            .field("site_keys", &self.site_keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults_know_storymaker() {
        let registry = PublisherRegistry::with_defaults(PublisherOptions::default());
        assert!(registry.contains(STORYMAKER));
        assert_eq!(registry.site_keys(), vec![STORYMAKER]);
    }

    #[test]
    fn test_resolve_scans_keys_in_order() {
        let mut registry = PublisherRegistry::with_defaults(PublisherOptions::default());
        registry.register("archive", || {
            Box::new(GenericSitePublisher::new("archive", PublisherOptions::default()))
        });

        let (key, publisher) = registry
            .resolve(&keys(&["youtube", "archive", "storymaker"]))
            .unwrap();
        assert_eq!(key, "archive");
        assert_eq!(publisher.name(), "archive");
    }

    #[test]
    fn test_resolve_unknown_keys() {
        let registry = PublisherRegistry::with_defaults(PublisherOptions::default());
        assert!(registry.resolve(&keys(&["unknown_site"])).is_none());
        assert!(PublisherRegistry::new()
            .resolve(&keys(&["storymaker"]))
            .is_none());
    }

    #[test]
    fn test_each_resolve_builds_a_new_instance() {
        let registry = PublisherRegistry::with_defaults(PublisherOptions::default());
        let (_, a) = registry.resolve(&keys(&["storymaker"])).unwrap();
        let (_, b) = registry.resolve(&keys(&["storymaker"])).unwrap();
        let a_ptr = &*a as *const dyn SitePublisher as *const ();
        let b_ptr = &*b as *const dyn SitePublisher as *const ();
        assert_ne!(a_ptr, b_ptr);
    }
}
