use std::path::PathBuf;

use clap::Parser;
use tether_rpc::host::{
    PLUGIN_BOOTSTRAP_TIMEOUT_MS_DEFAULT, PLUGIN_DIAL_TIMEOUT_MS_DEFAULT,
    PLUGIN_UNINSTALL_GRACE_MS_DEFAULT,
};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "tether",
    about = "Command-line host for commands provided by process-isolated plugins",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "TETHER_HOME",
        value_name = "DIR",
        help = "Directory holding the .tether state folder (defaults to the user's home directory)"
    )]
    pub(crate) home: Option<PathBuf>,

    #[arg(
        long = "plugin-bootstrap-timeout-ms",
        env = "TETHER_PLUGIN_BOOTSTRAP_TIMEOUT_MS",
        default_value_t = PLUGIN_BOOTSTRAP_TIMEOUT_MS_DEFAULT,
        value_parser = parse_positive_u64,
        help = "How long to wait for a started plugin to announce its address"
    )]
    pub(crate) plugin_bootstrap_timeout_ms: u64,

    #[arg(
        long = "plugin-dial-timeout-ms",
        env = "TETHER_PLUGIN_DIAL_TIMEOUT_MS",
        default_value_t = PLUGIN_DIAL_TIMEOUT_MS_DEFAULT,
        value_parser = parse_positive_u64,
        help = "Connect timeout for the announced plugin address"
    )]
    pub(crate) plugin_dial_timeout_ms: u64,

    #[arg(
        long = "plugin-uninstall-grace-ms",
        env = "TETHER_PLUGIN_UNINSTALL_GRACE_MS",
        default_value_t = PLUGIN_UNINSTALL_GRACE_MS_DEFAULT,
        value_parser = parse_positive_u64,
        help = "Time a stopping plugin gets to exit before it is killed"
    )]
    pub(crate) plugin_uninstall_grace_ms: u64,

    #[arg(long, help = "Suppress terminal echo of command output; failures are still shown")]
    pub(crate) quiet: bool,

    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        help = "Command to run followed by its arguments (defaults to help)"
    )]
    pub(crate) command: Vec<String>,
}
