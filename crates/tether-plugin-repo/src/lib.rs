//! Plugin repository catalog and HTTP repository client.
//!
//! The catalog owns the uniqueness and URL-normalization rules for named
//! plugin sources and only touches storage through `ConfigRepository`. The
//! client fetches repository listings and downloads checksummed binaries.

pub mod catalog;
pub mod client;

pub use catalog::*;
pub use client::*;
