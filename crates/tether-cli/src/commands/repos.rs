use anyhow::Result;
use clap::Parser;
use tether_plugin_repo::{normalize_repository_url, PluginRepository};
use tether_registry::{CommandMetadata, Dependency, LocalCommand};

use super::{parse_command_args, render_table};

#[derive(Debug, Parser)]
#[command(name = "add-plugin-repo", no_binary_name = true, disable_help_flag = true)]
struct AddPluginRepoArgs {
    #[arg(value_name = "REPO_NAME")]
    name: String,
    #[arg(value_name = "URL")]
    url: String,
}

#[derive(Debug, Parser)]
#[command(name = "remove-plugin-repo", no_binary_name = true, disable_help_flag = true)]
struct RemovePluginRepoArgs {
    #[arg(value_name = "REPO_NAME")]
    name: String,
}

#[derive(Debug, Parser)]
#[command(name = "list-plugin-repos", no_binary_name = true, disable_help_flag = true)]
struct ListPluginReposArgs {}

#[derive(Debug, Parser)]
#[command(name = "repo-plugins", no_binary_name = true, disable_help_flag = true)]
struct RepoPluginsArgs {
    #[arg(short = 'r', long = "repo", value_name = "REPO_NAME")]
    repo: Option<String>,
}

pub(super) fn add_plugin_repo_metadata() -> CommandMetadata {
    CommandMetadata::new("add-plugin-repo", "Add a new plugin repository")
        .with_usage("tether add-plugin-repo REPO_NAME URL")
}

pub(super) fn remove_plugin_repo_metadata() -> CommandMetadata {
    CommandMetadata::new("remove-plugin-repo", "Remove a plugin repository")
        .with_usage("tether remove-plugin-repo REPO_NAME")
}

pub(super) fn list_plugin_repos_metadata() -> CommandMetadata {
    CommandMetadata::new("list-plugin-repos", "List all added plugin repositories")
        .with_usage("tether list-plugin-repos")
}

pub(super) fn repo_plugins_metadata() -> CommandMetadata {
    CommandMetadata::new(
        "repo-plugins",
        "List all available plugins in specified repository or in all added repositories",
    )
    .with_usage("tether repo-plugins [-r REPO_NAME]")
    .with_option("r", "Name of a registered plugin repository")
}

pub(crate) struct AddPluginRepoCommand;

impl LocalCommand for AddPluginRepoCommand {
    fn execute(&self, deps: &Dependency, args: &[String]) -> Result<()> {
        let args: AddPluginRepoArgs = parse_command_args("add-plugin-repo", args)?;
        deps.plugin_repository_catalog()
            .add_repository(&args.name, &args.url)?;
        deps.ui.ok();
        deps.ui.say("");
        deps.ui.say(&format!(
            "{} added as '{}'",
            normalize_repository_url(&args.url),
            args.name
        ));
        Ok(())
    }
}

pub(crate) struct RemovePluginRepoCommand;

impl LocalCommand for RemovePluginRepoCommand {
    fn execute(&self, deps: &Dependency, args: &[String]) -> Result<()> {
        let args: RemovePluginRepoArgs = parse_command_args("remove-plugin-repo", args)?;
        deps.plugin_repository_catalog()
            .remove_repository(&args.name)?;
        deps.ui.ok();
        deps.ui.say("");
        deps.ui.say(&format!(
            "{} has been removed from the list of plugin repositories.",
            args.name
        ));
        Ok(())
    }
}

pub(crate) struct ListPluginReposCommand;

impl LocalCommand for ListPluginReposCommand {
    fn execute(&self, deps: &Dependency, args: &[String]) -> Result<()> {
        let _: ListPluginReposArgs = parse_command_args("list-plugin-repos", args)?;
        deps.ui.say("Listing plugin repositories...");
        deps.ui.ok();
        deps.ui.say("");

        let repositories = deps.plugin_repository_catalog().list_repositories();
        if repositories.is_empty() {
            deps.ui.say("No plugin repositories added.");
            return Ok(());
        }
        let rows: Vec<Vec<String>> = repositories
            .into_iter()
            .map(|repository| vec![repository.name, repository.url])
            .collect();
        for line in render_table(&["repo name", "url"], &rows) {
            deps.ui.say(&line);
        }
        Ok(())
    }
}

pub(crate) struct RepoPluginsCommand;

impl LocalCommand for RepoPluginsCommand {
    fn execute(&self, deps: &Dependency, args: &[String]) -> Result<()> {
        let args: RepoPluginsArgs = parse_command_args("repo-plugins", args)?;
        let catalog = deps.plugin_repository_catalog();

        // A named repository must be reachable; across all repositories an
        // unreachable one only produces a warning.
        let (listings, unreachable) = match args.repo.as_deref() {
            Some(name) => {
                deps.ui
                    .say(&format!("Getting plugins from repository '{name}'..."));
                let listing = catalog.repository_plugins(name)?;
                (vec![(name.to_string(), listing)], Vec::new())
            }
            None => {
                let repositories = catalog.list_repositories();
                if repositories.is_empty() {
                    deps.ui.say("No plugin repositories added.");
                    return Ok(());
                }
                deps.ui.say("Getting plugins from all repositories...");
                let mut listings = Vec::new();
                let mut unreachable = Vec::new();
                for repository in repositories {
                    match catalog.repository_plugins(&repository.name) {
                        Ok(listing) => listings.push((repository.name, listing)),
                        Err(error) => unreachable.push((repository.name, error)),
                    }
                }
                (listings, unreachable)
            }
        };

        deps.ui.ok();
        for (name, listing) in &listings {
            deps.ui.say("");
            deps.ui.say(&format!("repository: {name}"));
            for line in render_listing(listing) {
                deps.ui.say(&line);
            }
        }
        for (name, error) in unreachable {
            deps.ui.warn(&format!(
                "Repository '{name}' could not be reached: {error}"
            ));
        }
        Ok(())
    }
}

fn render_listing(listing: &PluginRepository) -> Vec<String> {
    let rows: Vec<Vec<String>> = listing
        .plugins
        .iter()
        .map(|plugin| {
            vec![
                plugin.name.clone(),
                plugin.version.clone(),
                plugin.description.clone(),
            ]
        })
        .collect();
    render_table(&["plugin name", "version", "description"], &rows)
}
