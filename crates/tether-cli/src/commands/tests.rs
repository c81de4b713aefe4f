//! Tests for the built-in commands against an in-process registry.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::{tempdir, TempDir};
use tether_config::{
    ConfigRepository, InstalledPluginRecord, JsonConfigStore, PluginCommand, PluginUsage,
    PluginVersion,
};
use tether_plugin_repo::{
    PluginBinary, PluginRepository, PluginRepositoryClient, RepositoryClientError,
    RepositoryPlugin,
};
use tether_registry::{CommandRegistry, Dependency, DispatchError, RegistryError, RepositoryLocator};
use tether_rpc::{remote_descriptors, PluginHost, PluginHostConfig};
use tether_terminal::{OutputCapture, TeePrinter, TerminalOutputSwitch, TerminalUi};

use super::{register_builtin_commands, render_table};

/// Serves fixed listings keyed by normalized repository URL.
struct StaticRepositoryClient {
    listings: HashMap<String, PluginRepository>,
}

impl PluginRepositoryClient for StaticRepositoryClient {
    fn get_plugin_repository(&self, url: &str) -> Result<PluginRepository, RepositoryClientError> {
        self.listings
            .get(url)
            .cloned()
            .ok_or_else(|| RepositoryClientError::Status {
                url: format!("{url}/list"),
                status: 404,
            })
    }

    fn download_plugin_binary(
        &self,
        binary: &PluginBinary,
    ) -> Result<Vec<u8>, RepositoryClientError> {
        Err(RepositoryClientError::Request {
            url: binary.url.clone(),
            message: "downloads are not served".to_string(),
        })
    }
}

struct Harness {
    _home: TempDir,
    printer: Arc<TeePrinter>,
    config: Arc<JsonConfigStore>,
    registry: Arc<CommandRegistry>,
    host: Arc<PluginHost>,
    deps: Dependency,
}

impl Harness {
    fn new() -> Self {
        let listing = PluginRepository {
            plugins: vec![RepositoryPlugin {
                name: "echo".to_string(),
                description: "echoes its arguments".to_string(),
                version: "0.2.0".to_string(),
                binaries: Vec::new(),
            }],
        };
        Self::with_listings(HashMap::from([(
            "https://plugins.example.com".to_string(),
            listing,
        )]))
    }

    fn with_listings(listings: HashMap<String, PluginRepository>) -> Self {
        let home = tempdir().expect("tempdir");
        let printer = Arc::new(TeePrinter::with_writer(Box::new(std::io::sink())));
        printer.disable_terminal_output(true);
        let config = Arc::new(JsonConfigStore::open(home.path()).expect("config"));
        let deps = Dependency::new(
            Arc::new(TerminalUi::new(printer.clone())),
            config.clone(),
            RepositoryLocator::new(Arc::new(StaticRepositoryClient { listings })),
        );
        let registry = Arc::new(CommandRegistry::new());
        let host = Arc::new(PluginHost::new(PluginHostConfig::default(), registry.clone()));
        register_builtin_commands(&registry, &host).expect("register built-ins");
        Self {
            _home: home,
            printer,
            config,
            registry,
            host,
            deps,
        }
    }

    fn run(&self, command: &str, args: &[&str]) -> Result<(), DispatchError> {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        self.registry
            .run_command(command, &args, &self.deps, self.host.as_ref())
    }

    fn output(&self) -> Vec<String> {
        self.printer.get_output_and_reset()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.host.shutdown();
        self.registry.shutdown();
    }
}

fn demo_commands() -> Vec<PluginCommand> {
    vec![PluginCommand {
        name: "demo_hello".to_string(),
        alias: Some("dh".to_string()),
        help_text: "say hello".to_string(),
        usage_details: PluginUsage {
            usage: "tether demo_hello [--loud]".to_string(),
            options: BTreeMap::from([("loud".to_string(), "shout".to_string())]),
        },
    }]
}

#[test]
fn unit_render_table_pads_columns_and_trims_trailing_space() {
    let rows = vec![
        vec!["alpha".to_string(), "1".to_string()],
        vec!["b".to_string(), String::new()],
    ];
    assert_eq!(
        render_table(&["name", "n"], &rows),
        vec!["name    n", "alpha   1", "b"]
    );
}

#[test]
fn functional_help_lists_builtins_and_plugin_commands() {
    let harness = Harness::new();
    harness
        .registry
        .install_plugin_commands("Demo", remote_descriptors("Demo", &demo_commands()))
        .expect("install");

    harness.run("help", &[]).expect("help");
    let output = harness.output();
    let builtins = output
        .iter()
        .position(|line| line == "COMMANDS:")
        .expect("commands header");
    let plugins = output
        .iter()
        .position(|line| line == "INSTALLED PLUGIN COMMANDS:")
        .expect("plugin header");
    assert!(builtins < plugins);
    assert!(output[builtins..plugins]
        .iter()
        .any(|line| line.trim_start().starts_with("install-plugin")));
    assert!(output[plugins..]
        .iter()
        .any(|line| line.trim_start().starts_with("demo_hello, dh") && line.ends_with("say hello")));
}

#[test]
fn functional_help_for_single_command_shows_alias_usage_and_options() {
    let harness = Harness::new();
    harness
        .registry
        .install_plugin_commands("Demo", remote_descriptors("Demo", &demo_commands()))
        .expect("install");

    harness.run("h", &["dh"]).expect("help via aliases");
    let output = harness.output();
    assert_eq!(output[0], "NAME:");
    assert_eq!(output[1], "   demo_hello - say hello");
    assert!(output.contains(&"ALIAS:".to_string()));
    assert!(output.contains(&"   dh".to_string()));
    assert!(output.contains(&"   tether demo_hello [--loud]".to_string()));
    assert!(output.contains(&"   --loud   shout".to_string()));
}

#[test]
fn regression_help_for_unknown_command_is_a_lookup_failure() {
    let harness = Harness::new();
    let error = harness.run("help", &["missing"]).expect_err("unknown");
    let DispatchError::Command(error) = error else {
        panic!("expected command failure, got {error:?}");
    };
    assert_eq!(
        error.downcast_ref::<RegistryError>(),
        Some(&RegistryError::CommandNotFound {
            name: "missing".to_string()
        })
    );
}

#[test]
fn functional_plugins_lists_installed_records() {
    let harness = Harness::new();
    harness.run("plugins", &[]).expect("plugins");
    assert!(harness.output().contains(&"No plugins installed.".to_string()));

    harness
        .config
        .set_installed_plugin(InstalledPluginRecord {
            name: "Demo".to_string(),
            location: PathBuf::from("/nonexistent/demo"),
            version: PluginVersion::new(1, 0, 2),
            commands: demo_commands(),
            installed_unix_ms: 0,
        })
        .expect("record");
    harness.run("plugins", &[]).expect("plugins");
    let output = harness.output();
    assert!(output
        .iter()
        .any(|line| line.starts_with("plugin name") && line.contains("command help")));
    assert!(output
        .iter()
        .any(|line| line.starts_with("Demo") && line.contains("1.0.2") && line.contains("demo_hello, dh")));
}

#[test]
fn functional_plugin_repository_commands_round_trip_through_config() {
    let harness = Harness::new();
    harness
        .run("add-plugin-repo", &["community", "plugins.example.com/"])
        .expect("add");
    assert_eq!(
        harness.output(),
        vec!["OK", "", "https://plugins.example.com added as 'community'"]
    );

    harness.run("list-plugin-repos", &[]).expect("list");
    let output = harness.output();
    assert!(output
        .iter()
        .any(|line| line.starts_with("community") && line.ends_with("https://plugins.example.com")));

    harness.run("remove-plugin-repo", &["community"]).expect("remove");
    assert!(harness.config.list_plugin_repositories().is_empty());
    harness.run("list-plugin-repos", &[]).expect("list");
    assert!(harness
        .output()
        .contains(&"No plugin repositories added.".to_string()));
}

#[test]
fn regression_add_plugin_repo_rejects_taken_name_and_unreachable_url() {
    let harness = Harness::new();
    harness
        .run("add-plugin-repo", &["community", "https://plugins.example.com"])
        .expect("add");

    let error = harness
        .run("add-plugin-repo", &["community", "https://other.example.com"])
        .expect_err("name taken");
    assert!(error.to_string().contains("name 'community' is already taken"));

    let error = harness
        .run("add-plugin-repo", &["other", "https://other.example.com"])
        .expect_err("unreachable");
    assert!(error.to_string().contains("could not add plugin repository 'other'"));
    assert_eq!(harness.config.list_plugin_repositories().len(), 1);
}

#[test]
fn functional_repo_plugins_warns_for_unreachable_repositories() {
    let harness = Harness::new();
    harness
        .run("add-plugin-repo", &["community", "https://plugins.example.com"])
        .expect("add");
    harness
        .config
        .add_plugin_repository("gone", "https://gone.example.com")
        .expect("seed unreachable repository");
    harness.output();

    harness.run("repo-plugins", &[]).expect("repo-plugins");
    let output = harness.output();
    assert!(output.contains(&"repository: community".to_string()));
    assert!(output
        .iter()
        .any(|line| line.starts_with("echo") && line.ends_with("echoes its arguments")));
    assert!(output
        .iter()
        .any(|line| line.starts_with("Repository 'gone' could not be reached")));

    let error = harness
        .run("repo-plugins", &["-r", "gone"])
        .expect_err("named repository must be reachable");
    assert!(error.to_string().contains("status 404"));
}

#[test]
fn functional_target_sets_org_then_space() {
    let harness = Harness::new();
    harness.run("target", &[]).expect("show");
    assert_eq!(
        harness.output(),
        vec!["org:   No org targeted", "space: No space targeted", "user:  Not logged in"]
    );

    let error = harness
        .run("target", &["-s", "dev"])
        .expect_err("space needs an org");
    assert!(error.to_string().contains("No org targeted"));

    harness
        .run("target", &["-o", "acme", "-s", "dev"])
        .expect("target");
    assert_eq!(harness.config.target().org.as_deref(), Some("acme"));
    assert_eq!(harness.config.target().space.as_deref(), Some("dev"));

    harness.run("t", &["-o", "globex"]).expect("retarget org");
    assert_eq!(harness.config.target().org.as_deref(), Some("globex"));
    assert_eq!(harness.config.target().space, None);
}

#[test]
fn regression_builtin_usage_errors_point_at_help() {
    let harness = Harness::new();
    let error = harness
        .run("add-plugin-repo", &["only-name"])
        .expect_err("missing url");
    let message = error.to_string();
    assert!(message.starts_with("Incorrect usage for 'add-plugin-repo'"));
    assert!(message.contains("See 'tether help add-plugin-repo'."));
    assert!(harness.config.list_plugin_repositories().is_empty());
}

#[test]
fn regression_install_plugin_missing_file_fails_without_registering() {
    let harness = Harness::new();
    let before = harness.registry.command_names().len();
    let error = harness
        .run("install-plugin", &["/nonexistent/tether-plugin"])
        .expect_err("missing file");
    assert!(error.to_string().contains("file not found"));
    assert_eq!(harness.registry.command_names().len(), before);
    assert!(harness.config.installed_plugins().is_empty());
}

#[test]
fn regression_install_plugin_from_unknown_repository_fails() {
    let harness = Harness::new();
    let error = harness
        .run("install-plugin", &["echo", "-r", "missing", "-f"])
        .expect_err("unknown repository");
    assert!(error
        .to_string()
        .contains("plugin repository 'missing' not found"));
    assert!(!harness
        .output()
        .iter()
        .any(|line| line.starts_with("Attention")));
}
