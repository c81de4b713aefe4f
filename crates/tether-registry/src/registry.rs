use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::dependency::Dependency;
use crate::descriptor::{CommandDescriptor, CommandOwner, DispatchTarget, RemoteTarget};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("command '{name}' not found")]
    CommandNotFound { name: String },
    #[error("command '{command}' conflicts with {owner}")]
    CommandCollision { command: String, owner: CommandOwner },
    #[error("command '{command}' is declared more than once")]
    DuplicateDeclaration { command: String },
    #[error("command registry has been shut down")]
    ShutDown,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Lookup(#[from] RegistryError),
    #[error(transparent)]
    Command(#[from] anyhow::Error),
}

/// Executes remote descriptors; implemented by the plugin host.
pub trait RemoteDispatch {
    /// `args` starts with the remote method (command) name.
    fn invoke(&self, target: &RemoteTarget, args: &[String], deps: &Dependency) -> Result<()>;
}

#[derive(Debug, Default)]
struct RegistryInner {
    commands: HashMap<String, Arc<CommandDescriptor>>,
    /// Alias to primary name.
    aliases: HashMap<String, String>,
    shut_down: bool,
}

impl RegistryInner {
    fn resolve(&self, name: &str) -> Option<&Arc<CommandDescriptor>> {
        self.commands.get(name).or_else(|| {
            self.aliases
                .get(name)
                .and_then(|primary| self.commands.get(primary))
        })
    }

    fn remove(&mut self, name: &str) -> Option<Arc<CommandDescriptor>> {
        let removed = self.commands.remove(name)?;
        if let Some(alias) = removed.metadata.alias.as_deref() {
            if self.aliases.get(alias).map(String::as_str) == Some(name) {
                self.aliases.remove(alias);
            }
        }
        Some(removed)
    }

    /// Detaches `alias` from whichever command currently holds it.
    fn strip_alias(&mut self, alias: &str) {
        let Some(owner) = self.aliases.remove(alias) else {
            return;
        };
        if let Some(existing) = self.commands.get_mut(&owner) {
            if existing.metadata.alias.as_deref() == Some(alias) {
                let mut detached = (**existing).clone();
                detached.metadata.alias = None;
                *existing = Arc::new(detached);
            }
        }
        warn!(alias, previous = %owner, "command alias reassigned");
    }

    /// Inserts or replaces by primary name. A name or alias taken from another
    /// command is detached from it; an alias equal to another command's
    /// primary name is dropped.
    fn upsert(&mut self, mut descriptor: CommandDescriptor) {
        let name = descriptor.metadata.name.clone();
        self.remove(&name);
        self.strip_alias(&name);
        if let Some(alias) = descriptor.metadata.alias.clone() {
            if alias == name || self.commands.contains_key(&alias) {
                warn!(alias = %alias, name = %name, "alias shadows a command name; dropped");
                descriptor.metadata.alias = None;
            } else {
                self.strip_alias(&alias);
                self.aliases.insert(alias, name.clone());
            }
        }
        self.commands.insert(name, Arc::new(descriptor));
    }
}

/// Process-wide command table guarded by a read/write lock.
///
/// Descriptors are stored behind `Arc` and swapped whole, so a reader either
/// sees the previous descriptor or the complete new one.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    inner: RwLock<RegistryInner>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_open(&self) -> Result<RwLockWriteGuard<'_, RegistryInner>, RegistryError> {
        let guard = self.write();
        if guard.shut_down {
            return Err(RegistryError::ShutDown);
        }
        Ok(guard)
    }

    /// Adds a first-time command.
    pub fn register(&self, descriptor: CommandDescriptor) -> Result<(), RegistryError> {
        let mut inner = self.write_open()?;
        if inner.commands.contains_key(descriptor.name()) {
            warn!(
                command = descriptor.name(),
                "register replaced an existing command"
            );
        }
        debug!(command = descriptor.name(), "registered command");
        inner.upsert(descriptor);
        Ok(())
    }

    /// Upserts by primary name; visible to every lookup that starts after return.
    pub fn set_command(&self, descriptor: CommandDescriptor) -> Result<(), RegistryError> {
        let mut inner = self.write_open()?;
        debug!(command = descriptor.name(), "set command");
        inner.upsert(descriptor);
        Ok(())
    }

    pub fn command_exists(&self, name: &str) -> bool {
        self.read().resolve(name).is_some()
    }

    pub fn find_command(&self, name: &str) -> Result<Arc<CommandDescriptor>, RegistryError> {
        self.read()
            .resolve(name)
            .cloned()
            .ok_or_else(|| RegistryError::CommandNotFound {
                name: name.to_string(),
            })
    }

    /// Primary names, sorted.
    pub fn command_names(&self) -> Vec<String> {
        let mut names = self.read().commands.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    /// All descriptors sorted by primary name.
    pub fn descriptors(&self) -> Vec<Arc<CommandDescriptor>> {
        let mut descriptors = self.read().commands.values().cloned().collect::<Vec<_>>();
        descriptors.sort_by(|left, right| left.name().cmp(right.name()));
        descriptors
    }

    pub fn plugin_commands(&self, plugin: &str) -> Vec<Arc<CommandDescriptor>> {
        let owner = CommandOwner::Plugin(plugin.to_string());
        self.descriptors()
            .into_iter()
            .filter(|descriptor| descriptor.owner() == owner)
            .collect()
    }

    /// Replaces every command owned by `plugin` with `descriptors` in one write.
    ///
    /// Any name or alias already owned by a built-in or another plugin, or
    /// declared twice in `descriptors`, aborts without touching the table.
    pub fn install_plugin_commands(
        &self,
        plugin: &str,
        descriptors: Vec<CommandDescriptor>,
    ) -> Result<(), RegistryError> {
        let owner = CommandOwner::Plugin(plugin.to_string());
        let mut inner = self.write_open()?;

        let mut declared = HashSet::new();
        for descriptor in &descriptors {
            for name in descriptor.metadata.names() {
                if !declared.insert(name.to_string()) {
                    return Err(RegistryError::DuplicateDeclaration {
                        command: name.to_string(),
                    });
                }
                if let Some(existing) = inner.resolve(name) {
                    let existing_owner = existing.owner();
                    if existing_owner != owner {
                        return Err(RegistryError::CommandCollision {
                            command: name.to_string(),
                            owner: existing_owner,
                        });
                    }
                }
            }
        }

        let previous = inner
            .commands
            .values()
            .filter(|descriptor| descriptor.owner() == owner)
            .map(|descriptor| descriptor.name().to_string())
            .collect::<Vec<_>>();
        for name in &previous {
            inner.remove(name);
        }
        let installed = descriptors.len();
        for descriptor in descriptors {
            inner.upsert(descriptor);
        }
        info!(
            plugin,
            replaced = previous.len(),
            installed,
            "installed plugin commands"
        );
        Ok(())
    }

    /// Removes every command owned by `plugin`; returns how many were removed.
    pub fn remove_plugin_commands(&self, plugin: &str) -> usize {
        let owner = CommandOwner::Plugin(plugin.to_string());
        let mut inner = self.write();
        let names = inner
            .commands
            .values()
            .filter(|descriptor| descriptor.owner() == owner)
            .map(|descriptor| descriptor.name().to_string())
            .collect::<Vec<_>>();
        for name in &names {
            inner.remove(name);
        }
        debug!(plugin, removed = names.len(), "removed plugin commands");
        names.len()
    }

    /// Resolves `name` and runs it. `args` excludes the command name.
    ///
    /// The registry lock is released before the handler runs, so handlers and
    /// plugin callbacks may consult the registry freely.
    pub fn run_command(
        &self,
        name: &str,
        args: &[String],
        deps: &Dependency,
        remote: &dyn RemoteDispatch,
    ) -> Result<(), DispatchError> {
        let descriptor = self.find_command(name)?;
        match &descriptor.target {
            DispatchTarget::Local(handler) => handler.execute(deps, args)?,
            DispatchTarget::Remote(target) => {
                let mut argv = Vec::with_capacity(args.len() + 1);
                argv.push(target.method.clone());
                argv.extend(args.iter().cloned());
                remote.invoke(target, &argv, deps)?;
            }
        }
        Ok(())
    }

    /// Clears the table; later mutations fail with `ShutDown`.
    pub fn shutdown(&self) {
        let mut inner = self.write();
        inner.commands.clear();
        inner.aliases.clear();
        inner.shut_down = true;
        debug!("command registry shut down");
    }
}
