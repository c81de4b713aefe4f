use anyhow::{bail, Result};
use clap::Parser;
use tether_config::TargetInfo;
use tether_registry::{CommandMetadata, Dependency, LocalCommand};

use super::parse_command_args;

#[derive(Debug, Parser)]
#[command(name = "target", no_binary_name = true, disable_help_flag = true)]
struct TargetArgs {
    #[arg(short = 'o', long = "org", value_name = "ORG")]
    org: Option<String>,
    #[arg(short = 's', long = "space", value_name = "SPACE")]
    space: Option<String>,
}

pub(super) fn metadata() -> CommandMetadata {
    CommandMetadata::new("target", "Set or view the targeted org or space")
        .with_alias("t")
        .with_usage("tether target [-o ORG] [-s SPACE]")
        .with_option("o", "Org to target")
        .with_option("s", "Space to target")
}

pub(crate) struct TargetCommand;

impl LocalCommand for TargetCommand {
    fn execute(&self, deps: &Dependency, args: &[String]) -> Result<()> {
        let args: TargetArgs = parse_command_args("target", args)?;
        if args.org.is_some() || args.space.is_some() {
            if args.org.is_none() && deps.config.target().org.is_none() {
                bail!("No org targeted. Use 'tether target -o ORG' to target an org first.");
            }
            deps.config.set_target(args.org, args.space)?;
            deps.ui.ok();
            deps.ui.say("");
        }
        for line in render_target(&deps.config.target()) {
            deps.ui.say(&line);
        }
        Ok(())
    }
}

fn render_target(target: &TargetInfo) -> Vec<String> {
    vec![
        format!(
            "org:   {}",
            target.org.as_deref().unwrap_or("No org targeted")
        ),
        format!(
            "space: {}",
            target.space.as_deref().unwrap_or("No space targeted")
        ),
        format!(
            "user:  {}",
            target
                .username
                .as_deref()
                .filter(|_| target.is_logged_in())
                .unwrap_or("Not logged in")
        ),
    ]
}
