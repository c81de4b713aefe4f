use std::path::{Path, PathBuf};
use std::time::Duration;

use tether_rpc::PluginHostConfig;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use crate::cli_args::Cli;

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// `--home`, then `HOME`/`USERPROFILE`, then the working directory.
pub(crate) fn resolve_home(explicit: Option<&Path>) -> PathBuf {
    if let Some(home) = explicit {
        return home.to_path_buf();
    }
    ["HOME", "USERPROFILE"]
        .iter()
        .filter_map(|key| std::env::var_os(key))
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub(crate) fn plugin_host_config(cli: &Cli) -> PluginHostConfig {
    PluginHostConfig {
        bootstrap_timeout: Duration::from_millis(cli.plugin_bootstrap_timeout_ms),
        dial_timeout: Duration::from_millis(cli.plugin_dial_timeout_ms),
        uninstall_grace: Duration::from_millis(cli.plugin_uninstall_grace_ms),
    }
}
