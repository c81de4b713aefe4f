//! Host side of the plugin protocol: install, lazy load, dispatch, uninstall.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tether_config::{ConfigRepository, InstalledPluginRecord};
use tether_core::{copy_file_atomic, current_unix_timestamp_ms, sanitized_file_stem};
use tether_registry::{CommandRegistry, Dependency, RemoteDispatch, RemoteTarget};
use tracing::{debug, info, warn};

use crate::callback::CallbackService;
use crate::error::{PluginError, PluginResult};
use crate::metadata::{remote_descriptors, PluginMetadata};

mod connection;

pub use connection::{ConnectionState, PluginConnection};

pub const PLUGIN_BOOTSTRAP_TIMEOUT_MS_DEFAULT: u64 = 5_000;
pub const PLUGIN_DIAL_TIMEOUT_MS_DEFAULT: u64 = 2_000;
pub const PLUGIN_UNINSTALL_GRACE_MS_DEFAULT: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginHostConfig {
    /// Wait for the child's address line.
    pub bootstrap_timeout: Duration,
    pub dial_timeout: Duration,
    /// Wait for a child to exit after `shutdown.request` before killing it.
    pub uninstall_grace: Duration,
}

impl Default for PluginHostConfig {
    fn default() -> Self {
        Self {
            bootstrap_timeout: Duration::from_millis(PLUGIN_BOOTSTRAP_TIMEOUT_MS_DEFAULT),
            dial_timeout: Duration::from_millis(PLUGIN_DIAL_TIMEOUT_MS_DEFAULT),
            uninstall_grace: Duration::from_millis(PLUGIN_UNINSTALL_GRACE_MS_DEFAULT),
        }
    }
}

type SharedConnection = Arc<Mutex<PluginConnection>>;

/// Owns every live plugin connection and keeps the registry in step with
/// installed plugins. Connections are keyed by plugin name.
pub struct PluginHost {
    config: PluginHostConfig,
    registry: Arc<CommandRegistry>,
    connections: Mutex<HashMap<String, SharedConnection>>,
}

impl PluginHost {
    pub fn new(config: PluginHostConfig, registry: Arc<CommandRegistry>) -> Self {
        Self {
            config,
            registry,
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PluginHostConfig {
        &self.config
    }

    /// Registers remote descriptors for every persisted plugin without
    /// starting any process. Returns how many plugins were registered.
    pub fn load_installed_plugins(&self, config: &dyn ConfigRepository) -> usize {
        let mut loaded = 0_usize;
        for record in config.installed_plugins() {
            let descriptors = remote_descriptors(&record.name, &record.commands);
            match self.registry.install_plugin_commands(&record.name, descriptors) {
                Ok(()) => loaded = loaded.saturating_add(1),
                Err(error) => warn!(
                    plugin = %record.name,
                    error = %error,
                    "skipping installed plugin with conflicting commands"
                ),
            }
        }
        debug!(loaded, "registered installed plugins");
        loaded
    }

    /// Launches `executable`, handshakes, and registers its commands.
    ///
    /// A plugin with the same name must carry a strictly higher version; it
    /// is then replaced along with all of its commands.
    pub fn install_plugin(
        &self,
        executable: &Path,
        deps: &Dependency,
    ) -> PluginResult<PluginMetadata> {
        if !executable.is_file() {
            return Err(PluginError::Launch {
                executable: executable.to_path_buf(),
                message: "file not found".to_string(),
            });
        }
        info!(executable = %executable.display(), "installing plugin");

        let grace = self.config.uninstall_grace;
        let mut connection = PluginConnection::launch(executable, &self.config, deps.ui.clone())?;
        let metadata = match connection.handshake() {
            Ok(metadata) => metadata,
            Err(error) => {
                connection.close(grace);
                return Err(error);
            }
        };
        let plugin = metadata.name.clone();

        let previous = deps.config.installed_plugin(&plugin);
        if let Some(previous) = &previous {
            if metadata.version <= previous.version {
                connection.close(grace);
                return Err(PluginError::AlreadyInstalled {
                    plugin,
                    installed: previous.version,
                    offered: metadata.version,
                });
            }
        }

        if let Err(error) = self
            .registry
            .install_plugin_commands(&plugin, metadata.command_descriptors())
        {
            connection.close(grace);
            return Err(PluginError::from_registry(&plugin, error));
        }

        // The old process may be running from the copy about to be replaced.
        if let Some(old) = self.take_connection(&plugin) {
            lock_or_recover(&old).close(grace);
        }

        let plugins_dir = deps.config.plugins_dir();
        let location = match copy_plugin_executable(executable, &plugin, &plugins_dir) {
            Ok(location) => location,
            Err(error) => {
                self.restore_commands(&plugin, previous.as_ref());
                connection.close(grace);
                return Err(PluginError::Install {
                    plugin,
                    message: format!("{error:#}"),
                });
            }
        };
        let record = InstalledPluginRecord {
            name: plugin.clone(),
            location: location.clone(),
            version: metadata.version,
            commands: metadata.commands.clone(),
            installed_unix_ms: current_unix_timestamp_ms(),
        };
        if let Err(error) = deps.config.set_installed_plugin(record) {
            self.restore_commands(&plugin, previous.as_ref());
            connection.close(grace);
            return Err(error.into());
        }
        if let Some(previous) = &previous {
            if previous.location != location {
                remove_plugin_executable(&plugin, &previous.location);
            }
        }

        self.insert_connection(&plugin, connection);
        info!(
            plugin = %plugin,
            version = %metadata.version,
            commands = metadata.commands.len(),
            location = %location.display(),
            "installed plugin"
        );
        Ok(metadata)
    }

    /// Notifies the plugin, stops it, and removes its commands, record, and
    /// copied executable.
    pub fn uninstall_plugin(&self, plugin: &str, deps: &Dependency) -> PluginResult<()> {
        let record = deps
            .config
            .installed_plugin(plugin)
            .ok_or_else(|| PluginError::NotInstalled {
                plugin: plugin.to_string(),
            })?;
        info!(plugin, "uninstalling plugin");

        let callbacks = CallbackService::new(deps.config.clone());
        match self.take_connection(plugin) {
            Some(connection) => {
                let mut connection = lock_or_recover(&connection);
                self.retire(&mut connection, &callbacks, deps);
            }
            None => match self.open_connection(&record, deps) {
                Ok(mut connection) => self.retire(&mut connection, &callbacks, deps),
                Err(error) => warn!(
                    plugin,
                    error = %error,
                    "could not start plugin to deliver uninstall notice"
                ),
            },
        }

        self.registry.remove_plugin_commands(plugin);
        deps.config.remove_installed_plugin(plugin)?;
        remove_plugin_executable(plugin, &record.location);
        info!(plugin, "uninstalled plugin");
        Ok(())
    }

    /// Runs `args` (command name first) on the plugin's connection, starting
    /// the plugin on first use after a host restart.
    pub fn invoke_plugin(
        &self,
        plugin: &str,
        args: &[String],
        deps: &Dependency,
    ) -> PluginResult<()> {
        let connection = self.connection_for(plugin, deps)?;
        let callbacks = CallbackService::new(deps.config.clone());
        let mut connection = lock_or_recover(&connection);
        connection.invoke(args, &callbacks, deps.ui.as_ref())
    }

    pub fn connection_state(&self, plugin: &str) -> Option<ConnectionState> {
        lock_or_recover(&self.connections)
            .get(plugin)
            .map(|connection| lock_or_recover(connection).state())
    }

    /// Stops every live plugin without uninstalling it.
    pub fn shutdown(&self) {
        let connections = lock_or_recover(&self.connections)
            .drain()
            .collect::<Vec<_>>();
        for (plugin, connection) in connections {
            debug!(plugin = %plugin, "stopping plugin");
            lock_or_recover(&connection).close(self.config.uninstall_grace);
        }
    }

    fn connection_for(&self, plugin: &str, deps: &Dependency) -> PluginResult<SharedConnection> {
        let mut connections = lock_or_recover(&self.connections);
        if let Some(existing) = connections.get(plugin) {
            return Ok(existing.clone());
        }
        let record = deps
            .config
            .installed_plugin(plugin)
            .ok_or_else(|| PluginError::NotInstalled {
                plugin: plugin.to_string(),
            })?;
        info!(plugin, "starting installed plugin on first use");
        match self.open_connection(&record, deps) {
            Ok(connection) => {
                let connection = Arc::new(Mutex::new(connection));
                connections.insert(plugin.to_string(), connection.clone());
                Ok(connection)
            }
            Err(error) => {
                warn!(plugin, error = %error, "plugin failed to start");
                connections.insert(
                    plugin.to_string(),
                    Arc::new(Mutex::new(PluginConnection::failed(plugin, &record.location))),
                );
                Err(error)
            }
        }
    }

    fn open_connection(
        &self,
        record: &InstalledPluginRecord,
        deps: &Dependency,
    ) -> PluginResult<PluginConnection> {
        let mut connection =
            PluginConnection::launch(&record.location, &self.config, deps.ui.clone())?;
        match connection.handshake() {
            Ok(metadata) if metadata.name == record.name => Ok(connection),
            Ok(metadata) => {
                connection.close(self.config.uninstall_grace);
                Err(PluginError::Handshake {
                    executable: record.location.clone(),
                    message: format!(
                        "expected plugin '{}', executable reports '{}'",
                        record.name, metadata.name
                    ),
                })
            }
            Err(error) => {
                connection.close(self.config.uninstall_grace);
                Err(error)
            }
        }
    }

    fn retire(
        &self,
        connection: &mut PluginConnection,
        callbacks: &CallbackService,
        deps: &Dependency,
    ) {
        if connection.state() == ConnectionState::Ready {
            if let Err(error) = connection.notify_uninstall(
                callbacks,
                deps.ui.as_ref(),
                self.config.uninstall_grace,
            ) {
                warn!(
                    plugin = connection.plugin(),
                    error = %error,
                    "plugin uninstall notice failed"
                );
            }
        }
        connection.close(self.config.uninstall_grace);
    }

    fn restore_commands(&self, plugin: &str, previous: Option<&InstalledPluginRecord>) {
        match previous {
            Some(record) => {
                let descriptors = remote_descriptors(&record.name, &record.commands);
                if let Err(error) = self.registry.install_plugin_commands(plugin, descriptors) {
                    warn!(plugin, error = %error, "failed to restore previous plugin commands");
                }
            }
            None => {
                self.registry.remove_plugin_commands(plugin);
            }
        }
    }

    fn take_connection(&self, plugin: &str) -> Option<SharedConnection> {
        lock_or_recover(&self.connections).remove(plugin)
    }

    fn insert_connection(&self, plugin: &str, connection: PluginConnection) {
        lock_or_recover(&self.connections)
            .insert(plugin.to_string(), Arc::new(Mutex::new(connection)));
    }
}

impl RemoteDispatch for PluginHost {
    fn invoke(
        &self,
        target: &RemoteTarget,
        args: &[String],
        deps: &Dependency,
    ) -> anyhow::Result<()> {
        Ok(self.invoke_plugin(&target.connection_id, args, deps)?)
    }
}

/// Copies `source` into `plugins_dir` under a name derived from `plugin`,
/// keeping the source extension.
fn copy_plugin_executable(
    source: &Path,
    plugin: &str,
    plugins_dir: &Path,
) -> anyhow::Result<PathBuf> {
    let mut file_name = sanitized_file_stem(plugin);
    if let Some(extension) = source.extension() {
        file_name.push('.');
        file_name.push_str(&extension.to_string_lossy());
    }
    let destination = plugins_dir.join(&file_name);
    copy_file_atomic(source, &destination)?;
    Ok(destination)
}

fn remove_plugin_executable(plugin: &str, location: &Path) {
    match fs::remove_file(location) {
        Ok(()) => debug!(plugin, location = %location.display(), "removed plugin executable"),
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => warn!(
            plugin,
            location = %location.display(),
            error = %error,
            "failed to remove plugin executable"
        ),
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
