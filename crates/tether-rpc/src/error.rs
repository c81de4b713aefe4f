use std::path::PathBuf;

use tether_config::{ConfigError, PluginVersion};
use tether_registry::RegistryError;
use thiserror::Error;

pub type PluginResult<T> = Result<T, PluginError>;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("failed to launch plugin {}: {message}", .executable.display())]
    Launch { executable: PathBuf, message: String },
    #[error("plugin {} did not announce its address within {timeout_ms} ms", .executable.display())]
    BootstrapTimeout { executable: PathBuf, timeout_ms: u64 },
    #[error("failed to connect to plugin {} at {address}: {message}", .executable.display())]
    Dial {
        executable: PathBuf,
        address: String,
        message: String,
    },
    #[error("handshake with plugin {} failed: {message}", .executable.display())]
    Handshake { executable: PathBuf, message: String },
    #[error("plugin '{plugin}' {installed} is already installed; version {offered} is not newer")]
    AlreadyInstalled {
        plugin: String,
        installed: PluginVersion,
        offered: PluginVersion,
    },
    #[error("plugin '{plugin}' command '{command}' conflicts with {owner}")]
    CommandCollision {
        plugin: String,
        command: String,
        owner: String,
    },
    #[error("plugin '{plugin}' invocation failed: {message}")]
    Invocation { plugin: String, message: String },
    #[error("plugin '{plugin}' reported an error: {message}")]
    PluginReported { plugin: String, message: String },
    #[error("plugin '{plugin}' connection has failed; uninstall and reinstall it")]
    ConnectionFailed { plugin: String },
    #[error("plugin '{plugin}' is not installed")]
    NotInstalled { plugin: String },
    #[error("failed to install plugin '{plugin}': {message}")]
    Install { plugin: String, message: String },
    #[error(transparent)]
    Registry(RegistryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PluginError {
    /// Maps a registry rejection during plugin command installation.
    pub fn from_registry(plugin: &str, error: RegistryError) -> Self {
        match error {
            RegistryError::CommandCollision { command, owner } => Self::CommandCollision {
                plugin: plugin.to_string(),
                command,
                owner: owner.to_string(),
            },
            RegistryError::DuplicateDeclaration { command } => Self::CommandCollision {
                plugin: plugin.to_string(),
                command,
                owner: format!("another command declared by plugin '{plugin}'"),
            },
            other => Self::Registry(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use tether_registry::CommandOwner;

    use super::*;

    #[test]
    fn unit_registry_collision_maps_to_plugin_collision() {
        let error = PluginError::from_registry(
            "Test1",
            RegistryError::CommandCollision {
                command: "help".to_string(),
                owner: CommandOwner::BuiltIn,
            },
        );
        assert_eq!(
            error.to_string(),
            "plugin 'Test1' command 'help' conflicts with built-in command"
        );
    }

    #[test]
    fn unit_dial_error_names_executable_and_address() {
        let error = PluginError::Dial {
            executable: PathBuf::from("plugins/test_1"),
            address: "127.0.0.1:1".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "failed to connect to plugin plugins/test_1 at 127.0.0.1:1: connection refused"
        );
    }

    #[test]
    fn unit_already_installed_names_both_versions() {
        let error = PluginError::AlreadyInstalled {
            plugin: "Test1".to_string(),
            installed: PluginVersion::new(1, 2, 4),
            offered: PluginVersion::new(1, 2, 3),
        };
        assert_eq!(
            error.to_string(),
            "plugin 'Test1' 1.2.4 is already installed; version 1.2.3 is not newer"
        );
    }
}
