//! Plugin used by tether's integration tests.
//!
//! Reports `Test1` 1.2.4 unless a `<executable>.fixture.json` file next to
//! the binary overrides the metadata, delays or replaces the address
//! announcement, or makes the uninstall notice hang.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tether_rpc::plugin::{self, CliConnection, Plugin};
use tether_rpc::{
    PluginCommand, PluginMetadata, PluginUsage, PluginVersion, PLUGIN_UNINSTALL_COMMAND,
};

#[derive(Debug, Default, Deserialize)]
struct FixtureConfig {
    #[serde(default)]
    metadata: Option<PluginMetadata>,
    #[serde(default)]
    bootstrap_delay_ms: u64,
    /// Announced instead of a real listener address.
    #[serde(default)]
    announce_address: Option<String>,
    #[serde(default)]
    hang_on_uninstall: bool,
}

struct FixturePlugin {
    executable: PathBuf,
    metadata: PluginMetadata,
    hang_on_uninstall: bool,
}

fn sleep_forever() -> ! {
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

impl Plugin for FixturePlugin {
    fn metadata(&self) -> PluginMetadata {
        self.metadata.clone()
    }

    fn run(&mut self, cli: &mut CliConnection<'_>, args: &[String]) -> Result<()> {
        let Some(command) = args.first() else {
            bail!("no command given");
        };
        if command == PLUGIN_UNINSTALL_COMMAND {
            let marker = sidecar_path(&self.executable, "uninstalled");
            fs::write(&marker, b"uninstalled")
                .with_context(|| format!("failed to write {}", marker.display()))?;
            if self.hang_on_uninstall {
                sleep_forever();
            }
            return Ok(());
        }

        if command.ends_with("_cmd1") {
            cli.println(command.as_str())?;
            match cli.current_org() {
                Ok(org) => cli.println(format!("Current Org: {org}"))?,
                Err(error) => cli.println(format!("Current Org error: {error}"))?,
            }
            cli.println("You called cmd1 in test_1")
        } else if command.ends_with("_cmd2") {
            cli.println("You called cmd2 in test_1")
        } else if command.ends_with("_echo") {
            cli.println(args[1..].join(" "))
        } else if command.ends_with("_context") {
            let lines = [
                ("org", cli.current_org()),
                ("space", cli.current_space()),
                ("username", cli.username()),
                ("logged_in", cli.is_logged_in().map(|value| value.to_string())),
            ];
            for (label, value) in lines {
                match value {
                    Ok(value) => cli.println(format!("{label}: {value}"))?,
                    Err(error) => cli.println(format!("{label} error: {error}"))?,
                }
            }
            Ok(())
        } else if command.ends_with("_stdout") {
            println!("raw stdout from {command}");
            Ok(())
        } else if command.ends_with("_fail") {
            bail!("{command} failed on purpose")
        } else if command.ends_with("_crash") {
            std::process::exit(3)
        } else {
            bail!("unknown command '{command}'")
        }
    }
}

fn test_1_metadata() -> PluginMetadata {
    PluginMetadata {
        name: "Test1".to_string(),
        version: PluginVersion::new(1, 2, 4),
        commands: vec![
            PluginCommand {
                name: "test_1_cmd1".to_string(),
                alias: Some("test_1_cmd1_alias".to_string()),
                help_text: "help text for test_1_cmd1".to_string(),
                usage_details: PluginUsage {
                    usage: "Test plugin command\n   tether test_1_cmd1 [-a] [-b] [--no-output]"
                        .to_string(),
                    options: BTreeMap::from([
                        ("a".to_string(), "flag to do nothing".to_string()),
                        ("b".to_string(), "another flag to do nothing".to_string()),
                        ("no-output".to_string(), "example option with no use".to_string()),
                    ]),
                },
            },
            PluginCommand {
                name: "test_1_cmd2".to_string(),
                help_text: "help text for test_1_cmd2".to_string(),
                ..PluginCommand::default()
            },
        ],
    }
}

fn sidecar_path(executable: &Path, suffix: &str) -> PathBuf {
    let mut path = executable.as_os_str().to_owned();
    path.push(".");
    path.push(suffix);
    PathBuf::from(path)
}

fn load_fixture_config(executable: &Path) -> Result<FixtureConfig> {
    let path = sidecar_path(executable, "fixture.json");
    if !path.exists() {
        return Ok(FixtureConfig::default());
    }
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn run() -> Result<()> {
    let executable = std::env::current_exe().context("failed to resolve fixture executable")?;
    let config = load_fixture_config(&executable)?;
    if config.bootstrap_delay_ms > 0 {
        thread::sleep(Duration::from_millis(config.bootstrap_delay_ms));
    }
    if let Some(address) = config.announce_address {
        let mut stdout = std::io::stdout();
        writeln!(stdout, "{address}").context("failed to announce address")?;
        stdout.flush().context("failed to flush stdout")?;
        sleep_forever();
    }
    plugin::start(FixturePlugin {
        executable,
        metadata: config.metadata.unwrap_or_else(test_1_metadata),
        hang_on_uninstall: config.hang_on_uninstall,
    })
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{error:#}");
            ExitCode::FAILURE
        }
    }
}
