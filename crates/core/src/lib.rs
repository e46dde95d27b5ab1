//! Glint core types: resource identifiers, object envelope, errors, and the
//! seams (metadata resolution, watch subscription) the rest of the workspace
//! plugs into.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod locator;
pub mod mapper;
pub mod object;
pub mod watch;

pub use config::{EngineSettings, GatewaySettings, GlintConfig, KubeSettings};
pub use error::{GlintError, GlintResult, MapperError};
pub use locator::{parse_token, Locator};
pub use mapper::{ApiResourceEntry, MapperSnapshot, ResourceMapper};
pub use object::{ObjectEnvelope, ObjectMeta};
pub use watch::{WatchEvent, WatchSource, WatchStream};

pub mod prelude {
    pub use super::{
        GlintError, GlintResult, Locator, ObjectEnvelope, PartialResourceId, ResourceId, ResourceMapper, Scope,
        WatchEvent, WatchSource,
    };
}

/// Fully-qualified resource kind: group, version and plural resource name.
///
/// The empty group is the core API group and is distinct from any named group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl ResourceId {
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), resource: resource.into() }
    }

    /// `group/version` as used in `apiVersion` (just `version` for the core group).
    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }

    /// Token form accepted by the locator: `resource.version.group`.
    pub fn token(&self) -> String {
        format!("{}.{}.{}", self.resource, self.version, self.group)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

/// A resource guess as typed by a human: the name is always present, group and
/// version may be unknown (`None`). `Some("")` pins the core group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartialResourceId {
    pub group: Option<String>,
    pub version: Option<String>,
    pub resource: String,
}

impl PartialResourceId {
    pub fn named(resource: impl Into<String>) -> Self {
        Self { resource: resource.into(), ..Self::default() }
    }
}

impl fmt::Display for PartialResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.group.as_deref().unwrap_or("*"),
            self.version.as_deref().unwrap_or("*"),
            self.resource
        )
    }
}

/// Whether objects of a kind live inside a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Namespaced,
    Cluster,
}

/// Kind of change delivered to event handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Added,
    Updated,
    Deleted,
}
