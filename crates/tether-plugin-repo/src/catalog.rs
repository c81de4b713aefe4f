use std::sync::Arc;

use tether_config::{ConfigError, ConfigRepository, PluginRepositoryRecord};
use thiserror::Error;
use tracing::info;

use crate::client::{
    current_platform, PluginBinary, PluginRepository, PluginRepositoryClient,
    RepositoryClientError,
};

const DEFAULT_URL_SCHEME: &str = "https://";

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("plugin repository name '{name}' is already taken")]
    RepositoryNameTaken { name: String },
    #[error("plugin repository URL {url} is already registered as '{name}'")]
    RepositoryUrlTaken { name: String, url: String },
    #[error("could not add plugin repository '{name}' from {url}: {message}")]
    AddRepositoryFailed {
        name: String,
        url: String,
        message: String,
    },
    #[error("plugin repository '{name}' not found")]
    RepositoryNotFound { name: String },
    #[error("plugin '{plugin}' not found in repository '{repository}'")]
    PluginNotFound { repository: String, plugin: String },
    #[error("plugin '{plugin}' has no binary for platform '{platform}'")]
    NoCompatibleBinary { plugin: String, platform: String },
    #[error(transparent)]
    Client(#[from] RepositoryClientError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Named plugin sources, persisted through the configuration collaborator.
#[derive(Clone)]
pub struct PluginRepositoryCatalog {
    config: Arc<dyn ConfigRepository>,
    client: Arc<dyn PluginRepositoryClient>,
}

impl PluginRepositoryCatalog {
    pub fn new(config: Arc<dyn ConfigRepository>, client: Arc<dyn PluginRepositoryClient>) -> Self {
        Self { config, client }
    }

    /// Normalizes `url`, enforces name then URL uniqueness, probes the source,
    /// and only then persists the record.
    pub fn add_repository(&self, name: &str, url: &str) -> RepositoryResult<()> {
        let url = normalize_repository_url(url);
        let repositories = self.config.list_plugin_repositories();
        if repositories.iter().any(|repository| repository.name == name) {
            return Err(RepositoryError::RepositoryNameTaken {
                name: name.to_string(),
            });
        }
        if let Some(existing) = repositories
            .iter()
            .find(|repository| repository.url == url)
        {
            return Err(RepositoryError::RepositoryUrlTaken {
                name: existing.name.clone(),
                url: existing.url.clone(),
            });
        }

        self.client
            .get_plugin_repository(&url)
            .map_err(|error| RepositoryError::AddRepositoryFailed {
                name: name.to_string(),
                url: url.clone(),
                message: error.to_string(),
            })?;

        self.config.add_plugin_repository(name, &url)?;
        info!(name, url = %url, "added plugin repository");
        Ok(())
    }

    pub fn list_repositories(&self) -> Vec<PluginRepositoryRecord> {
        self.config.list_plugin_repositories()
    }

    pub fn remove_repository(&self, name: &str) -> RepositoryResult<()> {
        if !self.config.remove_plugin_repository(name)? {
            return Err(RepositoryError::RepositoryNotFound {
                name: name.to_string(),
            });
        }
        info!(name, "removed plugin repository");
        Ok(())
    }

    pub fn find_repository(&self, name: &str) -> RepositoryResult<PluginRepositoryRecord> {
        self.config
            .list_plugin_repositories()
            .into_iter()
            .find(|repository| repository.name == name)
            .ok_or_else(|| RepositoryError::RepositoryNotFound {
                name: name.to_string(),
            })
    }

    /// Fetches the listing of the named repository.
    pub fn repository_plugins(&self, name: &str) -> RepositoryResult<PluginRepository> {
        let repository = self.find_repository(name)?;
        Ok(self.client.get_plugin_repository(&repository.url)?)
    }

    /// Picks the binary for the running platform from the named repository.
    pub fn find_plugin_binary(
        &self,
        repository_name: &str,
        plugin_name: &str,
    ) -> RepositoryResult<PluginBinary> {
        let listing = self.repository_plugins(repository_name)?;
        let plugin = listing
            .plugins
            .into_iter()
            .find(|plugin| plugin.name == plugin_name)
            .ok_or_else(|| RepositoryError::PluginNotFound {
                repository: repository_name.to_string(),
                plugin: plugin_name.to_string(),
            })?;
        let platform = current_platform();
        plugin
            .binaries
            .into_iter()
            .find(|binary| binary.platform == platform)
            .ok_or_else(|| RepositoryError::NoCompatibleBinary {
                plugin: plugin_name.to_string(),
                platform: platform.to_string(),
            })
    }

    pub fn download_plugin_binary(&self, binary: &PluginBinary) -> RepositoryResult<Vec<u8>> {
        Ok(self.client.download_plugin_binary(binary)?)
    }
}

/// Prefixes `https://` when no scheme is present and strips exactly one
/// trailing `/`.
pub fn normalize_repository_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let with_scheme = if has_url_scheme(trimmed) {
        trimmed.to_string()
    } else {
        format!("{DEFAULT_URL_SCHEME}{trimmed}")
    };
    match with_scheme.strip_suffix('/') {
        Some(stripped) => stripped.to_string(),
        None => with_scheme,
    }
}

fn has_url_scheme(url: &str) -> bool {
    let Some((scheme, _)) = url.split_once("://") else {
        return false;
    };
    let mut characters = scheme.chars();
    matches!(characters.next(), Some(first) if first.is_ascii_alphabetic())
        && characters.all(|character| {
            character.is_ascii_alphanumeric() || matches!(character, '+' | '-' | '.')
        })
}
