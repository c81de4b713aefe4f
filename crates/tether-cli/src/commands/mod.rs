//! Built-in commands registered ahead of any plugin command.

mod help;
mod plugins;
mod repos;
mod target;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use tether_registry::{CommandDescriptor, CommandRegistry, RegistryError};
use tether_rpc::PluginHost;

pub(crate) use help::HelpCommand;
pub(crate) use plugins::{InstallPluginCommand, PluginsCommand, UninstallPluginCommand};
pub(crate) use repos::{
    AddPluginRepoCommand, ListPluginReposCommand, RemovePluginRepoCommand, RepoPluginsCommand,
};
pub(crate) use target::TargetCommand;

const TABLE_COLUMN_GAP: &str = "   ";

/// Registers every built-in. Handlers hold the registry and host, so callers
/// must shut both down to release them.
pub(crate) fn register_builtin_commands(
    registry: &Arc<CommandRegistry>,
    host: &Arc<PluginHost>,
) -> Result<(), RegistryError> {
    let builtins = [
        CommandDescriptor::local(
            help::metadata(),
            Arc::new(HelpCommand::new(registry.clone())),
        ),
        CommandDescriptor::local(plugins::plugins_metadata(), Arc::new(PluginsCommand)),
        CommandDescriptor::local(
            plugins::install_plugin_metadata(),
            Arc::new(InstallPluginCommand::new(host.clone())),
        ),
        CommandDescriptor::local(
            plugins::uninstall_plugin_metadata(),
            Arc::new(UninstallPluginCommand::new(host.clone())),
        ),
        CommandDescriptor::local(repos::add_plugin_repo_metadata(), Arc::new(AddPluginRepoCommand)),
        CommandDescriptor::local(
            repos::remove_plugin_repo_metadata(),
            Arc::new(RemovePluginRepoCommand),
        ),
        CommandDescriptor::local(
            repos::list_plugin_repos_metadata(),
            Arc::new(ListPluginReposCommand),
        ),
        CommandDescriptor::local(repos::repo_plugins_metadata(), Arc::new(RepoPluginsCommand)),
        CommandDescriptor::local(target::metadata(), Arc::new(TargetCommand)),
    ];
    for descriptor in builtins {
        registry.register(descriptor)?;
    }
    Ok(())
}

/// Parses built-in arguments (command name already stripped).
pub(crate) fn parse_command_args<T: Parser>(command: &str, args: &[String]) -> Result<T> {
    T::try_parse_from(args).map_err(|error| {
        let rendered = error.to_string();
        let summary = rendered
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default();
        let summary = summary.strip_prefix("error: ").unwrap_or(summary);
        anyhow!("Incorrect usage for '{command}': {summary}\nSee 'tether help {command}'.")
    })
}

/// Left-aligned columns; trailing padding is trimmed.
pub(crate) fn render_table(headers: &[&str], rows: &[Vec<String>]) -> Vec<String> {
    let mut widths: Vec<usize> = headers.iter().map(|header| header.chars().count()).collect();
    for row in rows {
        for (index, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(index) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let header_row: Vec<String> = headers.iter().map(|header| header.to_string()).collect();
    std::iter::once(&header_row)
        .chain(rows.iter())
        .map(|cells| {
            let mut line = String::new();
            for (index, cell) in cells.iter().enumerate() {
                if index > 0 {
                    line.push_str(TABLE_COLUMN_GAP);
                }
                line.push_str(cell);
                let width = widths.get(index).copied().unwrap_or_default();
                let padding = width.saturating_sub(cell.chars().count());
                line.extend(std::iter::repeat(' ').take(padding));
            }
            line.trim_end().to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests;
