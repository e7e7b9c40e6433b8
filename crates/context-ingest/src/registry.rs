//! Importer registry: maps each source kind to exactly one adapter.
//!
//! Pure lookup — the registry holds no import state and is safe to share
//! read-only across concurrent jobs once populated.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use context_ingest_core::error::IngestError;
use context_ingest_core::models::SourceKind;

use crate::config::Config;
use crate::importer::Importer;
use crate::importer_media::MediaImporter;
use crate::importer_repository::RepositoryImporter;
use crate::importer_vault::VaultImporter;
use crate::importer_web::WebImporter;

/// What [`ImporterRegistry::register`] did.
///
/// Re-registering a kind replaces the prior binding (last write wins);
/// the caller learns about it through this status rather than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registered {
    /// First binding for this kind.
    Bound,
    /// Replaced the prior adapter; carries its description.
    Replaced { previous: String },
}

pub struct ImporterRegistry {
    importers: HashMap<SourceKind, Arc<dyn Importer>>,
}

impl ImporterRegistry {
    pub fn new() -> Self {
        Self {
            importers: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in adapter for every kind.
    pub fn with_builtins(config: &Config) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RepositoryImporter::new(config.repo_cache_dir())));
        registry.register(Arc::new(WebImporter::new()));
        registry.register(Arc::new(MediaImporter::image()));
        registry.register(Arc::new(MediaImporter::video()));
        registry.register(Arc::new(MediaImporter::audio()));
        registry.register(Arc::new(VaultImporter));
        registry
    }

    pub fn register(&mut self, importer: Arc<dyn Importer>) -> Registered {
        let kind = importer.source_kind();
        match self.importers.insert(kind, importer) {
            None => Registered::Bound,
            Some(previous) => {
                warn!(kind = %kind, "replacing registered importer");
                Registered::Replaced {
                    previous: previous.description().to_string(),
                }
            }
        }
    }

    pub fn resolve(&self, kind: SourceKind) -> Result<Arc<dyn Importer>, IngestError> {
        self.importers
            .get(&kind)
            .cloned()
            .ok_or(IngestError::UnknownSourceKind(kind))
    }

    /// Registered adapters in stable kind order, for display.
    pub fn list(&self) -> Vec<(SourceKind, String)> {
        SourceKind::all()
            .into_iter()
            .filter_map(|kind| {
                self.importers
                    .get(&kind)
                    .map(|imp| (kind, imp.description().to_string()))
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.importers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.importers.len()
    }
}

impl Default for ImporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::{ExtractRequest, ItemStream};
    use async_trait::async_trait;

    struct FakeImporter(&'static str);

    #[async_trait]
    impl Importer for FakeImporter {
        fn source_kind(&self) -> SourceKind {
            SourceKind::Web
        }

        fn description(&self) -> &str {
            self.0
        }

        async fn extract(&self, _request: &ExtractRequest) -> Result<ItemStream, IngestError> {
            let (_tx, rx) = crate::importer::channel();
            Ok(rx)
        }
    }

    #[test]
    fn resolve_miss_is_unknown_source_kind() {
        let registry = ImporterRegistry::new();
        let err = registry.resolve(SourceKind::Web).unwrap_err();
        assert!(matches!(err, IngestError::UnknownSourceKind(SourceKind::Web)));
    }

    #[test]
    fn reregistering_replaces_and_reports() {
        let mut registry = ImporterRegistry::new();
        assert_eq!(
            registry.register(Arc::new(FakeImporter("first"))),
            Registered::Bound
        );
        assert_eq!(
            registry.register(Arc::new(FakeImporter("second"))),
            Registered::Replaced {
                previous: "first".to_string()
            }
        );
        assert_eq!(registry.len(), 1);
        let resolved = registry.resolve(SourceKind::Web).unwrap();
        assert_eq!(resolved.description(), "second");
    }
}
