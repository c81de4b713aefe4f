//! Command registry unifying built-in and plugin-provided commands.
//!
//! Each command name (and optional alias) resolves to a `CommandDescriptor`
//! whose dispatch target is either a local handler or a remote plugin
//! method. Handlers receive the `Dependency` bundle per invocation.

pub mod dependency;
pub mod descriptor;
pub mod registry;

pub use dependency::*;
pub use descriptor::*;
pub use registry::*;
