//! Process-boundary plugin protocol for tether.
//!
//! The host launches a plugin executable with a bootstrap argument, reads the
//! loopback address it announces on stdout, and exchanges NDJSON frames over
//! TCP: a metadata handshake, command runs with interleaved output and host
//! callbacks, and a shutdown request. `plugin` holds the runtime plugin
//! binaries link against.

pub mod callback;
pub mod error;
pub mod host;
pub mod metadata;
pub mod plugin;
pub mod protocol;
pub mod transport;

pub use callback::{CallbackError, CallbackMethod, CallbackService};
pub use error::{PluginError, PluginResult};
pub use host::{ConnectionState, PluginConnection, PluginHost, PluginHostConfig};
pub use metadata::{remote_descriptors, PluginCommand, PluginMetadata, PluginUsage, PluginVersion};
pub use plugin::{CliConnection, Plugin};
pub use protocol::{PLUGIN_BOOTSTRAP_ARG, PLUGIN_UNINSTALL_COMMAND};
