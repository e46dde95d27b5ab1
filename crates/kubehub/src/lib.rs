//! Glint kubehub: cluster client setup, the discovery-backed resource mapper,
//! and the watcher-backed watch source.

#![forbid(unsafe_code)]

mod client;
mod discovery;
mod source;

pub use client::connect;
pub use discovery::{api_resource_for, entries_from, ordered_versions, DiscoveryMapper};
pub use source::{to_envelope, KubeWatchSource};
