use std::sync::Arc;

use tether_config::ConfigRepository;
use tether_plugin_repo::{PluginRepositoryCatalog, PluginRepositoryClient};
use tether_terminal::Ui;

/// API client factories handed to commands.
#[derive(Clone)]
pub struct RepositoryLocator {
    plugin_repository_client: Arc<dyn PluginRepositoryClient>,
}

impl RepositoryLocator {
    pub fn new(plugin_repository_client: Arc<dyn PluginRepositoryClient>) -> Self {
        Self {
            plugin_repository_client,
        }
    }

    pub fn plugin_repository_client(&self) -> Arc<dyn PluginRepositoryClient> {
        self.plugin_repository_client.clone()
    }
}

/// Shared bundle passed to every command invocation.
#[derive(Clone)]
pub struct Dependency {
    pub ui: Arc<dyn Ui>,
    pub config: Arc<dyn ConfigRepository>,
    pub repo_locator: RepositoryLocator,
}

impl Dependency {
    pub fn new(
        ui: Arc<dyn Ui>,
        config: Arc<dyn ConfigRepository>,
        repo_locator: RepositoryLocator,
    ) -> Self {
        Self {
            ui,
            config,
            repo_locator,
        }
    }

    /// Catalog wired to this invocation's config and repository client.
    pub fn plugin_repository_catalog(&self) -> PluginRepositoryCatalog {
        PluginRepositoryCatalog::new(
            self.config.clone(),
            self.repo_locator.plugin_repository_client(),
        )
    }
}
