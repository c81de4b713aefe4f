//! Filesystem and clock helpers shared by the tether crates.
//!
//! Configuration writes and plugin executable copies both go through a staged
//! sibling file that is renamed into place.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::{copy_file_atomic, sanitized_file_stem, staging_path, write_text_atomic};
pub use time_utils::current_unix_timestamp_ms;
