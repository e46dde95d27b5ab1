//! In-memory [`WatchSource`] fed through channels. Used by tests and demos
//! in place of a live cluster.

use std::sync::{Mutex, PoisonError};

use anyhow::anyhow;
use futures::{future, stream, StreamExt};
use glint_core::{ObjectEnvelope, ResourceId, WatchEvent, WatchSource, WatchStream};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;

type Item = anyhow::Result<WatchEvent>;

/// Hands out one pre-registered stream per resource id.
#[derive(Default)]
pub struct ChannelSource {
    feeds: Mutex<FxHashMap<ResourceId, mpsc::UnboundedReceiver<Item>>>,
    subscriptions: Mutex<Vec<(ResourceId, Option<String>)>>,
}

/// Sending half for one kind. Dropping every clone ends the stream.
#[derive(Clone)]
pub struct ChannelFeed {
    tx: mpsc::UnboundedSender<Item>,
}

impl ChannelSource {
    pub fn new() -> Self { Self::default() }

    /// Register a feed for `id`, replacing any unsubscribed one.
    pub fn feed(&self, id: ResourceId) -> ChannelFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().unwrap_or_else(PoisonError::into_inner).insert(id, rx);
        ChannelFeed { tx }
    }

    /// `(id, namespace)` of every successful subscribe call, in order.
    pub fn subscriptions(&self) -> Vec<(ResourceId, Option<String>)> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl WatchSource for ChannelSource {
    fn subscribe(&self, id: &ResourceId, namespace: Option<&str>) -> anyhow::Result<WatchStream> {
        let rx = self
            .feeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| anyhow!("no feed registered for {}", id))?;
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id.clone(), namespace.map(str::to_string)));

        let ns = namespace.map(str::to_string);
        let s = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
            .filter_map(move |item| {
                let out = match item {
                    Ok(ev) => in_namespace(ev, ns.as_deref()).map(Ok),
                    Err(e) => Some(Err(e)),
                };
                future::ready(out)
            });
        Ok(s.boxed())
    }
}

fn in_namespace(ev: WatchEvent, ns: Option<&str>) -> Option<WatchEvent> {
    let Some(ns) = ns else { return Some(ev) };
    // cluster-scoped objects have no namespace and are never filtered
    let keep = |o: &ObjectEnvelope| o.namespace().map_or(true, |n| n == ns);
    match ev {
        WatchEvent::Applied(o) => keep(&o).then_some(WatchEvent::Applied(o)),
        WatchEvent::Deleted(o) => keep(&o).then_some(WatchEvent::Deleted(o)),
        WatchEvent::Restarted(list) => Some(WatchEvent::Restarted(list.into_iter().filter(|o| keep(o)).collect())),
    }
}

impl ChannelFeed {
    /// `false` once the subscriber is gone.
    pub fn send(&self, ev: WatchEvent) -> bool {
        self.tx.send(Ok(ev)).is_ok()
    }

    pub fn apply(&self, obj: ObjectEnvelope) -> bool { self.send(WatchEvent::Applied(obj)) }
    pub fn delete(&self, obj: ObjectEnvelope) -> bool { self.send(WatchEvent::Deleted(obj)) }
    pub fn restart(&self, list: Vec<ObjectEnvelope>) -> bool { self.send(WatchEvent::Restarted(list)) }

    /// Inject a transient stream error.
    pub fn fail(&self, msg: &str) -> bool {
        self.tx.send(Err(anyhow!("{}", msg))).is_ok()
    }
}
