use serde::{Deserialize, Serialize};
use tether_registry::{CommandDescriptor, CommandMetadata};

pub use tether_config::{PluginCommand, PluginUsage, PluginVersion};

/// What a plugin reports about itself during the handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginMetadata {
    pub name: String,
    #[serde(default)]
    pub version: PluginVersion,
    #[serde(default)]
    pub commands: Vec<PluginCommand>,
}

impl PluginMetadata {
    /// Rejects metadata the host cannot register.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("plugin metadata name must be non-empty".to_string());
        }
        if let Some(command) = self
            .commands
            .iter()
            .find(|command| command.name.trim().is_empty())
        {
            return Err(format!(
                "plugin '{}' declares a command with an empty name (help: '{}')",
                self.name, command.help_text
            ));
        }
        Ok(())
    }

    pub fn command_descriptors(&self) -> Vec<CommandDescriptor> {
        remote_descriptors(&self.name, &self.commands)
    }
}

/// Remote descriptors routed to `plugin`, one per declared command.
pub fn remote_descriptors(plugin: &str, commands: &[PluginCommand]) -> Vec<CommandDescriptor> {
    commands
        .iter()
        .map(|command| CommandDescriptor::remote(CommandMetadata::from(command), plugin))
        .collect()
}

#[cfg(test)]
mod tests {
    use tether_registry::{CommandOwner, DispatchTarget};

    use super::*;

    fn test_1_metadata() -> PluginMetadata {
        PluginMetadata {
            name: "Test1".to_string(),
            version: PluginVersion::new(1, 2, 4),
            commands: vec![
                PluginCommand {
                    name: "test_1_cmd1".to_string(),
                    alias: Some("test_1_cmd1_alias".to_string()),
                    help_text: "help text for test_1_cmd1".to_string(),
                    ..PluginCommand::default()
                },
                PluginCommand {
                    name: "test_1_cmd2".to_string(),
                    alias: Some(" ".to_string()),
                    help_text: "help text for test_1_cmd2".to_string(),
                    ..PluginCommand::default()
                },
            ],
        }
    }

    #[test]
    fn unit_command_descriptors_route_to_plugin_connection() {
        let descriptors = test_1_metadata().command_descriptors();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(
            descriptors[0].owner(),
            CommandOwner::Plugin("Test1".to_string())
        );
        match &descriptors[1].target {
            DispatchTarget::Remote(target) => assert_eq!(target.method, "test_1_cmd2"),
            DispatchTarget::Local(_) => panic!("expected remote target"),
        }
        assert_eq!(descriptors[1].metadata.alias, None);
    }

    #[test]
    fn regression_validate_rejects_empty_names() {
        assert!(test_1_metadata().validate().is_ok());

        let mut unnamed = test_1_metadata();
        unnamed.name = String::new();
        assert!(unnamed.validate().is_err());

        let mut blank_command = test_1_metadata();
        blank_command.commands[0].name = "  ".to_string();
        assert!(blank_command
            .validate()
            .expect_err("blank")
            .contains("empty name"));
    }
}
