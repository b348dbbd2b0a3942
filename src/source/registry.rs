//! Adapter registry keyed by stable source id.

use std::sync::Arc;

use tracing::{debug, warn};

use super::Source;
use crate::runtime::SourceRuntime;
use crate::sources::{Baozimanhua, ComX, Desu, MangaAlarab, Newbie};

/// Adapters in registration order.
#[derive(Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn Source>>,
}

impl SourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter, replacing an earlier one with the same id.
    #[tracing::instrument(skip(self, source), fields(source_id = source.id()))]
    pub fn register(&mut self, source: Arc<dyn Source>) {
        if let Some(slot) = self.sources.iter_mut().find(|s| s.id() == source.id()) {
            warn!("Source id registered twice; replacing earlier adapter");
            *slot = source;
            return;
        }
        debug!(name = source.name(), lang = source.lang(), "Registering source");
        self.sources.push(source);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn Source>> {
        self.sources.iter().find(|s| s.id() == id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Source>> {
        self.sources.iter()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.id()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Builds the registry of shipped adapters and installs their rate budgets
/// into `runtime`'s limiter.
///
/// An adapter that cannot be constructed is skipped with a warning.
#[must_use]
pub fn build_default_source_registry(runtime: &SourceRuntime) -> SourceRegistry {
    let mut registry = SourceRegistry::new();

    let candidates: Vec<Result<Arc<dyn Source>, _>> = vec![
        Desu::new().map(|s| Arc::new(s) as Arc<dyn Source>),
        Newbie::new().map(|s| Arc::new(s) as Arc<dyn Source>),
        ComX::new().map(|s| Arc::new(s) as Arc<dyn Source>),
        MangaAlarab::new().map(|s| Arc::new(s) as Arc<dyn Source>),
        Baozimanhua::new().map(|s| Arc::new(s) as Arc<dyn Source>),
    ];

    for candidate in candidates {
        match candidate {
            Ok(source) => {
                runtime.register_budgets(source.as_ref());
                registry.register(source);
            }
            Err(error) => warn!(
                error = %error,
                "Source unavailable; continuing with remaining sources"
            ),
        }
    }
    registry
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ratelimit::{RateBudget, RateLimiter};
    use crate::runtime::SourceRuntime;
    use crate::session::SessionStore;
    use crate::transport::{HttpTimeouts, ReqwestTransport};
    use std::time::Duration;

    fn runtime() -> SourceRuntime {
        let transport = ReqwestTransport::new("sourcekit-test", HttpTimeouts::default()).unwrap();
        SourceRuntime::new(
            Arc::new(transport),
            Arc::new(RateLimiter::new(RateBudget::default())),
            Arc::new(SessionStore::new()),
        )
    }

    #[test]
    fn test_default_registry_has_all_sources_in_order() {
        let registry = build_default_source_registry(&runtime());
        assert_eq!(
            registry.ids(),
            vec!["desu", "newbie", "comx", "mangaalarab", "baozimanhua"]
        );
    }

    #[test]
    fn test_default_registry_installs_comx_budget() {
        let runtime = runtime();
        let _registry = build_default_source_registry(&runtime);
        let budget = runtime.limiter().budget_for("com-x.life");
        assert_eq!(budget.permits(), 3);
        assert_eq!(budget.window(), Duration::from_secs(1));
    }

    #[test]
    fn test_register_replaces_same_id() {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(Desu::new().unwrap()));
        registry.register(Arc::new(Desu::new().unwrap()));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("desu").is_some());
        assert!(registry.get("missing").is_none());
    }
}
