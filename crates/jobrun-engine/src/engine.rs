//! One controller per configured domain.

use std::collections::BTreeMap;
use std::sync::Arc;

use jobrun_core::StatusView;
use tracing::info;

use crate::config::EngineConfig;
use crate::controller::TaskController;
use crate::error::ConfigError;
use crate::provider::ProviderRegistry;

/// The set of independent domain controllers served by one process.
///
/// Domains share only the provider registry and the filesystem; each runs
/// its own single-flight task.
pub struct Engine {
    controllers: BTreeMap<String, Arc<TaskController>>,
    providers: Arc<ProviderRegistry>,
}

impl Engine {
    /// Build a controller for every domain in `config`.
    pub fn new(
        config: EngineConfig,
        providers: Arc<ProviderRegistry>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let controllers = config
            .domains
            .into_iter()
            .map(|domain| {
                info!(
                    domain = %domain.name,
                    roles = domain.roles.len(),
                    staging = %domain.staging_dir().display(),
                    results = %domain.results_dir().display(),
                    "Configured domain"
                );
                let name = domain.name.clone();
                (name, Arc::new(TaskController::new(domain, providers.clone())))
            })
            .collect();

        Ok(Self {
            controllers,
            providers,
        })
    }

    /// Controller of `domain`.
    pub fn controller(&self, domain: &str) -> Option<Arc<TaskController>> {
        self.controllers.get(domain).cloned()
    }

    /// Configured domain names, sorted.
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.controllers.keys().map(String::as_str)
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    /// Status of every domain.
    pub fn statuses(&self) -> Vec<(String, StatusView)> {
        self.controllers
            .iter()
            .map(|(name, controller)| (name.clone(), controller.status_view()))
            .collect()
    }

    /// Shut every controller down: stop accepting starts, cancel running
    /// tasks, and wait for all workers to finish.
    pub async fn shutdown(&self) {
        for controller in self.controllers.values() {
            controller.begin_shutdown();
        }
        for controller in self.controllers.values() {
            controller.wait_for_workers().await;
        }
        info!("Engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainConfig;

    #[test]
    fn test_one_controller_per_domain() {
        let engine =
            Engine::new(EngineConfig::default(), Arc::new(ProviderRegistry::new())).unwrap();
        let domains: Vec<&str> = engine.domains().collect();
        assert_eq!(domains, ["demo", "registry"]);

        let registry = engine.controller("registry").unwrap();
        assert_eq!(registry.domain().min_inputs, 3);
        assert!(engine.controller("jarvis").is_none());
        assert_eq!(engine.statuses().len(), 2);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = EngineConfig {
            domains: vec![DomainConfig::demo(), DomainConfig::demo()],
        };
        assert!(Engine::new(config, Arc::new(ProviderRegistry::new())).is_err());
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_starts() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            domains: vec![DomainConfig::demo()
                .with_staging_dir(dir.path().join("staging"))
                .with_results_dir(dir.path().join("results"))],
        };
        let engine = Engine::new(config, Arc::new(ProviderRegistry::new())).unwrap();
        engine.shutdown().await;

        let demo = engine.controller("demo").unwrap();
        let err = demo
            .start(vec![crate::RawInput::from_bytes("a.csv", b"x".to_vec())])
            .await
            .unwrap_err();
        assert!(matches!(err, crate::StartError::ShuttingDown));
    }
}
