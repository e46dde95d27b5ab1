//! Event handlers invoked by the per-kind writer tasks.

use std::sync::Arc;

use glint_core::{ObjectEnvelope, ResourceId};
use tracing::debug;

use crate::index::Change;

/// Callbacks for changes on any tracked kind. Called synchronously on the
/// kind's writer task, in delivery order for that kind; keep them short.
pub trait EventHandler: Send + Sync {
    fn on_add(&self, _id: &ResourceId, _obj: &ObjectEnvelope) {}
    fn on_update(&self, _id: &ResourceId, _old: &ObjectEnvelope, _new: &ObjectEnvelope) {}
    fn on_delete(&self, _id: &ResourceId, _obj: &ObjectEnvelope) {}
}

type ObjFn = Box<dyn Fn(&ResourceId, &ObjectEnvelope) + Send + Sync>;
type UpdateFn = Box<dyn Fn(&ResourceId, &ObjectEnvelope, &ObjectEnvelope) + Send + Sync>;

/// Closure-based handler; unset callbacks are ignored.
#[derive(Default)]
pub struct HandlerFns {
    add: Option<ObjFn>,
    update: Option<UpdateFn>,
    delete: Option<ObjFn>,
}

impl HandlerFns {
    pub fn new() -> Self { Self::default() }

    pub fn on_add(mut self, f: impl Fn(&ResourceId, &ObjectEnvelope) + Send + Sync + 'static) -> Self {
        self.add = Some(Box::new(f));
        self
    }

    pub fn on_update(mut self, f: impl Fn(&ResourceId, &ObjectEnvelope, &ObjectEnvelope) + Send + Sync + 'static) -> Self {
        self.update = Some(Box::new(f));
        self
    }

    pub fn on_delete(mut self, f: impl Fn(&ResourceId, &ObjectEnvelope) + Send + Sync + 'static) -> Self {
        self.delete = Some(Box::new(f));
        self
    }
}

impl EventHandler for HandlerFns {
    fn on_add(&self, id: &ResourceId, obj: &ObjectEnvelope) {
        if let Some(f) = &self.add { f(id, obj) }
    }

    fn on_update(&self, id: &ResourceId, old: &ObjectEnvelope, new: &ObjectEnvelope) {
        if let Some(f) = &self.update { f(id, old, new) }
    }

    fn on_delete(&self, id: &ResourceId, obj: &ObjectEnvelope) {
        if let Some(f) = &self.delete { f(id, obj) }
    }
}

/// Debug-level trace of every change; registered by default.
pub struct LogHandler;

impl EventHandler for LogHandler {
    fn on_add(&self, id: &ResourceId, obj: &ObjectEnvelope) {
        debug!(resource = %id, key = %obj.cache_key(), "object added");
    }

    fn on_update(&self, id: &ResourceId, _old: &ObjectEnvelope, new: &ObjectEnvelope) {
        debug!(resource = %id, key = %new.cache_key(), rv = ?new.metadata.resource_version, "object updated");
    }

    fn on_delete(&self, id: &ResourceId, obj: &ObjectEnvelope) {
        debug!(resource = %id, key = %obj.cache_key(), "object deleted");
    }
}

pub(crate) fn dispatch(handlers: &[Arc<dyn EventHandler>], id: &ResourceId, change: &Change) {
    for h in handlers {
        match change {
            Change::Added(o) => h.on_add(id, o),
            Change::Updated { old, new } => h.on_update(id, old, new),
            Change::Deleted(o) => h.on_delete(id, o),
        }
    }
}
