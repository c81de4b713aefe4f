use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tether_config::JsonConfigStore;
use tether_plugin_repo::HttpPluginRepositoryClient;
use tether_registry::{
    CommandRegistry, Dependency, DispatchError, RegistryError, RepositoryLocator,
};
use tether_rpc::PluginHost;
use tether_terminal::{TeePrinter, TerminalOutputSwitch, TerminalUi, Ui};
use tracing::{debug, info};

use crate::bootstrap_helpers::{plugin_host_config, resolve_home};
use crate::cli_args::Cli;
use crate::commands::register_builtin_commands;

const DEFAULT_COMMAND: &str = "help";

/// One process worth of wired collaborators.
pub(crate) struct TetherRuntime {
    deps: Dependency,
    registry: Arc<CommandRegistry>,
    host: Arc<PluginHost>,
}

impl TetherRuntime {
    pub(crate) fn build(cli: &Cli, ui: Arc<dyn Ui>) -> Result<Self> {
        let home = resolve_home(cli.home.as_deref());
        let config = Arc::new(JsonConfigStore::open(&home)?);
        let client = HttpPluginRepositoryClient::new()
            .context("failed to build plugin repository HTTP client")?;
        let deps = Dependency::new(
            ui,
            config.clone(),
            RepositoryLocator::new(Arc::new(client)),
        );

        let registry = Arc::new(CommandRegistry::new());
        let host = Arc::new(PluginHost::new(plugin_host_config(cli), registry.clone()));
        let runtime = Self {
            deps,
            registry,
            host,
        };
        register_builtin_commands(&runtime.registry, &runtime.host)?;
        let loaded = runtime.host.load_installed_plugins(config.as_ref());
        info!(home = %home.display(), plugins = loaded, "tether runtime ready");
        Ok(runtime)
    }

    /// Runs `command` (name first); an empty command shows help.
    pub(crate) fn dispatch(&self, command: &[String]) -> Result<()> {
        let (name, args) = match command.split_first() {
            Some((name, args)) => (name.as_str(), args),
            None => (DEFAULT_COMMAND, &[][..]),
        };
        debug!(command = name, args = args.len(), "dispatching command");
        match self
            .registry
            .run_command(name, args, &self.deps, self.host.as_ref())
        {
            Ok(()) => Ok(()),
            Err(DispatchError::Lookup(RegistryError::CommandNotFound { .. })) => {
                bail!("'{name}' is not a registered command. See 'tether help'.")
            }
            Err(error) => Err(error.into()),
        }
    }
}

impl Drop for TetherRuntime {
    // Built-in handlers hold the host and registry; clearing both breaks
    // those reference cycles and stops live plugins.
    fn drop(&mut self) {
        self.host.shutdown();
        self.registry.shutdown();
    }
}

/// Builds the runtime, runs the requested command, and renders any failure.
pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    let printer = Arc::new(TeePrinter::new());
    printer.disable_terminal_output(cli.quiet);
    let ui: Arc<dyn Ui> = Arc::new(TerminalUi::new(printer));

    let result =
        TetherRuntime::build(&cli, ui.clone()).and_then(|runtime| runtime.dispatch(&cli.command));
    if let Err(error) = &result {
        ui.failed(&format!("{error:#}"));
    }
    result
}
