use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tether_registry::{
    CommandDescriptor, CommandMetadata, CommandOwner, CommandRegistry, Dependency, LocalCommand,
};

use super::{parse_command_args, render_table};

const HELP_INDENT: &str = "   ";

#[derive(Debug, Parser)]
#[command(name = "help", no_binary_name = true, disable_help_flag = true)]
struct HelpArgs {
    #[arg(value_name = "COMMAND")]
    command: Option<String>,
}

pub(super) fn metadata() -> CommandMetadata {
    CommandMetadata::new("help", "Show help for all commands or a single command")
        .with_alias("h")
        .with_usage("tether help [COMMAND]")
}

pub(crate) struct HelpCommand {
    registry: Arc<CommandRegistry>,
}

impl HelpCommand {
    pub(crate) fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }
}

impl LocalCommand for HelpCommand {
    fn execute(&self, deps: &Dependency, args: &[String]) -> Result<()> {
        let args: HelpArgs = parse_command_args("help", args)?;
        let lines = match args.command {
            Some(name) => render_command_help(&*self.registry.find_command(&name)?),
            None => render_help(&self.registry.descriptors()),
        };
        for line in lines {
            deps.ui.say(&line);
        }
        Ok(())
    }
}

fn command_label(metadata: &CommandMetadata) -> String {
    metadata.names().collect::<Vec<_>>().join(", ")
}

fn command_rows<'a>(descriptors: impl Iterator<Item = &'a Arc<CommandDescriptor>>) -> Vec<String> {
    let mut descriptors: Vec<_> = descriptors.collect();
    descriptors.sort_by(|left, right| left.name().cmp(right.name()));
    let rows: Vec<Vec<String>> = descriptors
        .iter()
        .map(|descriptor| {
            vec![
                command_label(&descriptor.metadata),
                descriptor.metadata.help_text.clone(),
            ]
        })
        .collect();
    render_table(&["", ""], &rows)
        .into_iter()
        .skip(1)
        .map(|line| format!("{HELP_INDENT}{line}"))
        .collect()
}

/// Overview listing built-ins first, then installed plugin commands.
pub(crate) fn render_help(descriptors: &[Arc<CommandDescriptor>]) -> Vec<String> {
    let mut lines = vec![
        "NAME:".to_string(),
        format!("{HELP_INDENT}tether - Command-line host for plugin-provided commands"),
        String::new(),
        "USAGE:".to_string(),
        format!("{HELP_INDENT}tether [global options] command [arguments...]"),
        String::new(),
        "COMMANDS:".to_string(),
    ];
    lines.extend(command_rows(
        descriptors
            .iter()
            .filter(|descriptor| descriptor.owner() == CommandOwner::BuiltIn),
    ));

    let plugin_rows = command_rows(
        descriptors
            .iter()
            .filter(|descriptor| descriptor.owner() != CommandOwner::BuiltIn),
    );
    if !plugin_rows.is_empty() {
        lines.push(String::new());
        lines.push("INSTALLED PLUGIN COMMANDS:".to_string());
        lines.extend(plugin_rows);
    }
    lines
}

fn option_flag(name: &str) -> String {
    if name.chars().count() == 1 {
        format!("-{name}")
    } else {
        format!("--{name}")
    }
}

pub(crate) fn render_command_help(descriptor: &CommandDescriptor) -> Vec<String> {
    let metadata = &descriptor.metadata;
    let mut lines = vec![
        "NAME:".to_string(),
        format!("{HELP_INDENT}{} - {}", metadata.name, metadata.help_text),
    ];
    if let Some(alias) = metadata.alias.as_deref() {
        lines.push(String::new());
        lines.push("ALIAS:".to_string());
        lines.push(format!("{HELP_INDENT}{alias}"));
    }
    if !metadata.usage.trim().is_empty() {
        lines.push(String::new());
        lines.push("USAGE:".to_string());
        lines.extend(
            metadata
                .usage
                .lines()
                .map(|line| format!("{HELP_INDENT}{}", line.trim_start())),
        );
    }
    if !metadata.options.is_empty() {
        lines.push(String::new());
        lines.push("OPTIONS:".to_string());
        let rows: Vec<Vec<String>> = metadata
            .options
            .iter()
            .map(|(name, description)| vec![option_flag(name), description.clone()])
            .collect();
        lines.extend(
            render_table(&["", ""], &rows)
                .into_iter()
                .skip(1)
                .map(|line| format!("{HELP_INDENT}{line}")),
        );
    }
    lines
}
