//! Watch subscription seam between the cache engine and a cluster client.

use futures::stream::BoxStream;

use crate::{ObjectEnvelope, ResourceId};

/// One item of a watch stream. Mirrors list+watch semantics: `Restarted`
/// carries a complete listing (initial or after a re-list) and doubles as the
/// readiness signal for the kind.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Applied(ObjectEnvelope),
    Deleted(ObjectEnvelope),
    Restarted(Vec<ObjectEnvelope>),
}

pub type WatchStream = BoxStream<'static, anyhow::Result<WatchEvent>>;

/// Opens long-lived watch streams per resource kind.
///
/// Streams are expected to retry with backoff and re-list on their own;
/// errors they yield are treated as transient by consumers.
pub trait WatchSource: Send + Sync {
    /// Open a stream for `id`, optionally filtered to one namespace. Failing
    /// here means the subscription cannot exist at all (unknown kind, bad
    /// client setup).
    fn subscribe(&self, id: &ResourceId, namespace: Option<&str>) -> anyhow::Result<WatchStream>;
}
