//! Durable host configuration for tether.
//!
//! Exposes the `ConfigRepository` collaborator interface consumed by the
//! repository catalog, plugin host, and callback service, plus the JSON-file
//! implementation persisted under `{home}/.tether/config.json`.

pub mod config_store;
pub mod records;

pub use config_store::*;
pub use records::*;
