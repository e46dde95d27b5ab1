//! Explicit configuration handed to constructors at composition time.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How to reach the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeSettings {
    /// Explicit kubeconfig path; `None` infers (env, `~/.kube/config`, in-cluster).
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    pub in_cluster: bool,
    /// How often the discovery document is refreshed in the background.
    pub discovery_refresh: Duration,
}

impl Default for KubeSettings {
    fn default() -> Self {
        Self { kubeconfig: None, context: None, in_cluster: false, discovery_refresh: Duration::from_secs(300) }
    }
}

/// Watch-cache engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Restrict every watch to one namespace (`None` watches all namespaces).
    pub namespace: Option<String>,
    /// How often pending live events are published to readers.
    pub flush_interval: Duration,
    /// Periodic re-delivery of every cached object to handlers as an update.
    pub resync: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { namespace: None, flush_interval: Duration::from_millis(8), resync: None }
    }
}

/// Query gateway knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    pub listen: SocketAddr,
    /// Routing prefix for cache queries; anything else is a liveness probe.
    pub prefix: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self { listen: SocketAddr::from(([0, 0, 0, 0], 8080)), prefix: "/api".to_string() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlintConfig {
    pub kube: KubeSettings,
    pub engine: EngineSettings,
    pub gateway: GatewaySettings,
    /// Resource tokens to watch (`deploy`, `deployments.v1.apps`, ...).
    pub resources: Vec<String>,
}
