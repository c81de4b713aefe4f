use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tether_core::{sanitized_file_stem, staging_path};
use tether_registry::{CommandMetadata, Dependency, LocalCommand};
use tether_rpc::PluginHost;
use tracing::{debug, warn};

use super::{parse_command_args, render_table};

const UNTRUSTED_BINARY_NOTICE: &str = "Attention: plugins are binaries written by potentially \
untrusted authors. Install and use plugins at your own risk.";

#[derive(Debug, Parser)]
#[command(name = "plugins", no_binary_name = true, disable_help_flag = true)]
struct PluginsArgs {}

#[derive(Debug, Parser)]
#[command(name = "install-plugin", no_binary_name = true, disable_help_flag = true)]
struct InstallPluginArgs {
    #[arg(value_name = "PATH_OR_NAME")]
    plugin: String,
    #[arg(short = 'r', long = "repo", value_name = "REPO")]
    repo: Option<String>,
    #[arg(short = 'f', long = "force")]
    force: bool,
}

#[derive(Debug, Parser)]
#[command(name = "uninstall-plugin", no_binary_name = true, disable_help_flag = true)]
struct UninstallPluginArgs {
    #[arg(value_name = "PLUGIN_NAME")]
    plugin: String,
}

pub(super) fn plugins_metadata() -> CommandMetadata {
    CommandMetadata::new("plugins", "List installed plugins and the commands they provide")
        .with_usage("tether plugins")
}

pub(super) fn install_plugin_metadata() -> CommandMetadata {
    CommandMetadata::new("install-plugin", "Install a plugin from a local path or a repository")
        .with_usage("tether install-plugin PATH\n   tether install-plugin NAME -r REPO [-f]")
        .with_option("r", "Name of a registered plugin repository to download from")
        .with_option("f", "Skip the untrusted binary notice")
}

pub(super) fn uninstall_plugin_metadata() -> CommandMetadata {
    CommandMetadata::new("uninstall-plugin", "Uninstall a plugin and remove its commands")
        .with_usage("tether uninstall-plugin PLUGIN_NAME")
}

pub(crate) struct PluginsCommand;

impl LocalCommand for PluginsCommand {
    fn execute(&self, deps: &Dependency, args: &[String]) -> Result<()> {
        let _: PluginsArgs = parse_command_args("plugins", args)?;
        deps.ui.say("Listing installed plugins...");
        deps.ui.ok();
        deps.ui.say("");

        let mut records = deps.config.installed_plugins();
        if records.is_empty() {
            deps.ui.say("No plugins installed.");
            return Ok(());
        }
        records.sort_by(|left, right| left.name.cmp(&right.name));
        let rows: Vec<Vec<String>> = records
            .iter()
            .flat_map(|record| {
                record.commands.iter().map(move |command| {
                    vec![
                        record.name.clone(),
                        record.version.to_string(),
                        command.names().collect::<Vec<_>>().join(", "),
                        command.help_text.clone(),
                    ]
                })
            })
            .collect();
        for line in render_table(
            &["plugin name", "version", "command name", "command help"],
            &rows,
        ) {
            deps.ui.say(&line);
        }
        Ok(())
    }
}

pub(crate) struct InstallPluginCommand {
    host: Arc<PluginHost>,
}

impl InstallPluginCommand {
    pub(crate) fn new(host: Arc<PluginHost>) -> Self {
        Self { host }
    }

    fn install_from_path(&self, deps: &Dependency, path: &Path) -> Result<()> {
        deps.ui.say(&format!("Installing plugin {}...", path.display()));
        let metadata = self.host.install_plugin(path, deps)?;
        deps.ui.ok();
        deps.ui.say("");
        deps.ui.say(&format!(
            "Plugin {} v{} successfully installed.",
            metadata.name, metadata.version
        ));
        Ok(())
    }

    fn install_from_repository(
        &self,
        deps: &Dependency,
        repository: &str,
        plugin: &str,
        force: bool,
    ) -> Result<()> {
        if !force {
            deps.ui.warn(UNTRUSTED_BINARY_NOTICE);
        }
        deps.ui.say(&format!(
            "Looking up '{plugin}' from repository '{repository}'"
        ));
        let catalog = deps.plugin_repository_catalog();
        let binary = catalog.find_plugin_binary(repository, plugin)?;
        deps.ui.say(&format!("Downloading {}...", binary.url));
        let bytes = catalog.download_plugin_binary(&binary)?;
        let staged = StagedDownload::write(plugin, &bytes)?;
        self.install_from_path(deps, staged.path())
    }
}

impl LocalCommand for InstallPluginCommand {
    fn execute(&self, deps: &Dependency, args: &[String]) -> Result<()> {
        let args: InstallPluginArgs = parse_command_args("install-plugin", args)?;
        match args.repo.as_deref() {
            Some(repository) => {
                self.install_from_repository(deps, repository, &args.plugin, args.force)
            }
            None => self.install_from_path(deps, Path::new(&args.plugin)),
        }
    }
}

pub(crate) struct UninstallPluginCommand {
    host: Arc<PluginHost>,
}

impl UninstallPluginCommand {
    pub(crate) fn new(host: Arc<PluginHost>) -> Self {
        Self { host }
    }
}

impl LocalCommand for UninstallPluginCommand {
    fn execute(&self, deps: &Dependency, args: &[String]) -> Result<()> {
        let args: UninstallPluginArgs = parse_command_args("uninstall-plugin", args)?;
        deps.ui.say(&format!("Uninstalling plugin {}...", args.plugin));
        self.host.uninstall_plugin(&args.plugin, deps)?;
        deps.ui.ok();
        deps.ui.say("");
        deps.ui
            .say(&format!("Plugin {} successfully uninstalled.", args.plugin));
        Ok(())
    }
}

/// Downloaded binary in a private temp directory, removed on drop.
struct StagedDownload {
    dir: PathBuf,
    path: PathBuf,
}

impl StagedDownload {
    fn write(plugin: &str, bytes: &[u8]) -> Result<Self> {
        let dir = staging_path(&std::env::temp_dir().join("tether-download"));
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(format!(
            "{}{}",
            sanitized_file_stem(plugin),
            std::env::consts::EXE_SUFFIX
        ));
        let staged = Self { dir, path };
        fs::write(&staged.path, bytes)
            .with_context(|| format!("failed to write {}", staged.path.display()))?;
        make_executable(&staged.path)?;
        debug!(path = %staged.path.display(), bytes = bytes.len(), "staged plugin download");
        Ok(staged)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedDownload {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_dir_all(&self.dir) {
            warn!(dir = %self.dir.display(), %error, "failed to remove staged plugin download");
        }
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions)
        .with_context(|| format!("failed to mark {} executable", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
