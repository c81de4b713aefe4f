use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tether_core::write_text_atomic;
use thiserror::Error;
use tracing::debug;

use crate::records::{InstalledPluginRecord, PluginRepositoryRecord, TargetInfo};

pub const TETHER_DIR_NAME: &str = ".tether";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const PLUGINS_DIR_NAME: &str = "plugins";
const CONFIG_SCHEMA_VERSION: u32 = 1;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration {path}: {message}")]
    Load { path: PathBuf, message: String },
    #[error("unsupported configuration schema {found} in {path}: expected {expected}")]
    UnsupportedSchema {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    #[error("failed to persist configuration {path}: {message}")]
    Persist { path: PathBuf, message: String },
}

/// Durable-state operations used by the catalog, plugin host, and callbacks.
pub trait ConfigRepository: Send + Sync {
    fn list_plugin_repositories(&self) -> Vec<PluginRepositoryRecord>;
    fn add_plugin_repository(&self, name: &str, url: &str) -> ConfigResult<()>;
    /// Returns `false` when no repository with `name` exists.
    fn remove_plugin_repository(&self, name: &str) -> ConfigResult<bool>;

    fn installed_plugins(&self) -> Vec<InstalledPluginRecord>;
    fn installed_plugin(&self, name: &str) -> Option<InstalledPluginRecord>;
    fn set_installed_plugin(&self, record: InstalledPluginRecord) -> ConfigResult<()>;
    fn remove_installed_plugin(&self, name: &str) -> ConfigResult<()>;

    fn target(&self) -> TargetInfo;
    fn set_target(&self, org: Option<String>, space: Option<String>) -> ConfigResult<()>;

    /// Directory where installed plugin executables are copied.
    fn plugins_dir(&self) -> PathBuf;
}

fn config_schema_version() -> u32 {
    CONFIG_SCHEMA_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct ConfigData {
    #[serde(default = "config_schema_version")]
    schema_version: u32,
    #[serde(default)]
    target: TargetInfo,
    #[serde(default)]
    plugin_repositories: Vec<PluginRepositoryRecord>,
    #[serde(default)]
    plugins: Vec<InstalledPluginRecord>,
}

impl Default for ConfigData {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            target: TargetInfo::default(),
            plugin_repositories: Vec::new(),
            plugins: Vec::new(),
        }
    }
}

/// JSON-file configuration store rooted at `{home}/.tether`.
#[derive(Debug)]
pub struct JsonConfigStore {
    root: PathBuf,
    data: RwLock<ConfigData>,
}

impl JsonConfigStore {
    /// Opens (or lazily creates on first write) the store under `home`.
    pub fn open(home: &Path) -> ConfigResult<Self> {
        let root = home.join(TETHER_DIR_NAME);
        let path = root.join(CONFIG_FILE_NAME);
        let data = load_config_data(&path)?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(Self {
            root,
            data: RwLock::new(data),
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    fn read(&self) -> RwLockReadGuard<'_, ConfigData> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, ConfigData> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Applies `mutate` to a copy, persists it, then publishes it in memory.
    fn update<F>(&self, mutate: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut ConfigData),
    {
        let mut guard = self.write();
        let mut next = guard.clone();
        mutate(&mut next);
        let path = self.config_path();
        persist_config_data(&path, &next)?;
        *guard = next;
        Ok(())
    }
}

impl ConfigRepository for JsonConfigStore {
    fn list_plugin_repositories(&self) -> Vec<PluginRepositoryRecord> {
        self.read().plugin_repositories.clone()
    }

    fn add_plugin_repository(&self, name: &str, url: &str) -> ConfigResult<()> {
        self.update(|data| {
            data.plugin_repositories.push(PluginRepositoryRecord {
                name: name.to_string(),
                url: url.to_string(),
            })
        })
    }

    fn remove_plugin_repository(&self, name: &str) -> ConfigResult<bool> {
        if !self
            .read()
            .plugin_repositories
            .iter()
            .any(|repository| repository.name == name)
        {
            return Ok(false);
        }
        self.update(|data| {
            data.plugin_repositories
                .retain(|repository| repository.name != name)
        })?;
        Ok(true)
    }

    fn installed_plugins(&self) -> Vec<InstalledPluginRecord> {
        let mut plugins = self.read().plugins.clone();
        plugins.sort_by(|left, right| left.name.cmp(&right.name));
        plugins
    }

    fn installed_plugin(&self, name: &str) -> Option<InstalledPluginRecord> {
        self.read()
            .plugins
            .iter()
            .find(|plugin| plugin.name == name)
            .cloned()
    }

    fn set_installed_plugin(&self, record: InstalledPluginRecord) -> ConfigResult<()> {
        self.update(|data| {
            match data
                .plugins
                .iter_mut()
                .find(|plugin| plugin.name == record.name)
            {
                Some(existing) => *existing = record,
                None => data.plugins.push(record),
            }
        })
    }

    fn remove_installed_plugin(&self, name: &str) -> ConfigResult<()> {
        self.update(|data| data.plugins.retain(|plugin| plugin.name != name))
    }

    fn target(&self) -> TargetInfo {
        self.read().target.clone()
    }

    fn set_target(&self, org: Option<String>, space: Option<String>) -> ConfigResult<()> {
        self.update(|data| {
            if org.is_some() {
                // A new org invalidates the previously targeted space.
                data.target.space = None;
                data.target.org = org;
            }
            if space.is_some() {
                data.target.space = space;
            }
        })
    }

    fn plugins_dir(&self) -> PathBuf {
        self.root.join(PLUGINS_DIR_NAME)
    }
}

fn load_config_data(path: &Path) -> ConfigResult<ConfigData> {
    if !path.exists() {
        return Ok(ConfigData::default());
    }
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))
        .and_then(|raw| {
            serde_json::from_str::<ConfigData>(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))
        })
        .map_err(|error| ConfigError::Load {
            path: path.to_path_buf(),
            message: format!("{error:#}"),
        })?;
    if data.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(ConfigError::UnsupportedSchema {
            path: path.to_path_buf(),
            found: data.schema_version,
            expected: CONFIG_SCHEMA_VERSION,
        });
    }
    Ok(data)
}

fn persist_config_data(path: &Path, data: &ConfigData) -> ConfigResult<()> {
    serde_json::to_string_pretty(data)
        .context("failed to serialize configuration")
        .and_then(|mut payload| {
            payload.push('\n');
            write_text_atomic(path, &payload)
        })
        .map_err(|error| ConfigError::Persist {
            path: path.to_path_buf(),
            message: format!("{error:#}"),
        })
}
