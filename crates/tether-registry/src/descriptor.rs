use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use tether_config::PluginCommand;

use crate::dependency::Dependency;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandMetadata {
    pub name: String,
    pub alias: Option<String>,
    pub help_text: String,
    pub usage: String,
    /// Option flag to description.
    pub options: BTreeMap<String, String>,
}

impl CommandMetadata {
    pub fn new(name: impl Into<String>, help_text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help_text: help_text.into(),
            ..Self::default()
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    pub fn with_option(mut self, flag: impl Into<String>, description: impl Into<String>) -> Self {
        self.options.insert(flag.into(), description.into());
        self
    }

    /// Primary name followed by the alias, when one is set.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.alias.as_deref())
    }
}

impl From<&PluginCommand> for CommandMetadata {
    fn from(command: &PluginCommand) -> Self {
        Self {
            name: command.name.clone(),
            alias: command
                .alias
                .as_ref()
                .filter(|alias| !alias.trim().is_empty())
                .cloned(),
            help_text: command.help_text.clone(),
            usage: command.usage_details.usage.clone(),
            options: command.usage_details.options.clone(),
        }
    }
}

/// Built-in command handler. `args` excludes the command name.
pub trait LocalCommand: Send + Sync {
    fn execute(&self, deps: &Dependency, args: &[String]) -> Result<()>;
}

/// Reference to a method on a loaded plugin connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteTarget {
    pub connection_id: String,
    pub method: String,
}

#[derive(Clone)]
pub enum DispatchTarget {
    Local(Arc<dyn LocalCommand>),
    Remote(RemoteTarget),
}

impl fmt::Debug for DispatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(_) => f.write_str("Local(..)"),
            Self::Remote(target) => f.debug_tuple("Remote").field(target).finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommandOwner {
    BuiltIn,
    Plugin(String),
}

impl fmt::Display for CommandOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuiltIn => f.write_str("built-in command"),
            Self::Plugin(name) => write!(f, "plugin '{name}'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    pub metadata: CommandMetadata,
    pub target: DispatchTarget,
}

impl CommandDescriptor {
    pub fn local(metadata: CommandMetadata, handler: Arc<dyn LocalCommand>) -> Self {
        Self {
            metadata,
            target: DispatchTarget::Local(handler),
        }
    }

    /// Remote descriptor whose method is the declared command name.
    pub fn remote(metadata: CommandMetadata, connection_id: impl Into<String>) -> Self {
        let method = metadata.name.clone();
        Self {
            metadata,
            target: DispatchTarget::Remote(RemoteTarget {
                connection_id: connection_id.into(),
                method,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn owner(&self) -> CommandOwner {
        match &self.target {
            DispatchTarget::Local(_) => CommandOwner::BuiltIn,
            DispatchTarget::Remote(target) => CommandOwner::Plugin(target.connection_id.clone()),
        }
    }
}
