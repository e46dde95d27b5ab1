//! Multi-kind watch-cache engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use arc_swap::ArcSwap;
use futures::future::join_all;
use futures::StreamExt;
use glint_core::{EngineSettings, ResourceId, WatchEvent, WatchSource, WatchStream};
use metrics::counter;
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handler::{dispatch, EventHandler, LogHandler};
use crate::index::{index_pair, Change, Index, IndexBuilder, IndexPublisher};

/// Lifecycle of one tracked kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Watching,
    Synced,
    Stopped,
}

type Handlers = Arc<ArcSwap<Vec<Arc<dyn EventHandler>>>>;

struct TrackedKind {
    id: ResourceId,
    index: Index,
    publisher: IndexPublisher,
    phase: watch::Sender<Phase>,
    // one-way: a stopped kind stays synced
    synced: watch::Sender<bool>,
    stream: Mutex<Option<WatchStream>>,
}

/// Keeps a local index per resource kind in step with the cluster.
///
/// Construct with [`WatchCache::new`], drive with [`WatchCache::start`] on a
/// spawned task, and read through [`WatchCache::index`] from anywhere.
pub struct WatchCache {
    kinds: Vec<Arc<TrackedKind>>,
    by_id: FxHashMap<ResourceId, Arc<TrackedKind>>,
    handlers: Handlers,
    settings: EngineSettings,
    started: AtomicBool,
}

impl WatchCache {
    /// Open one subscription per distinct id. Any subscription failure fails
    /// the whole construction.
    pub fn new<S>(source: &S, ids: impl IntoIterator<Item = ResourceId>, settings: EngineSettings) -> anyhow::Result<Self>
    where
        S: WatchSource + ?Sized,
    {
        let mut kinds = Vec::new();
        let mut by_id = FxHashMap::default();
        for id in ids {
            if by_id.contains_key(&id) {
                warn!(resource = %id, "duplicate resource id ignored");
                continue;
            }
            let stream = source
                .subscribe(&id, settings.namespace.as_deref())
                .with_context(|| format!("subscribing to {}", id))?;
            let (publisher, index) = index_pair(id.clone());
            let kind = Arc::new(TrackedKind {
                id: id.clone(),
                index,
                publisher,
                phase: watch::channel(Phase::Created).0,
                synced: watch::channel(false).0,
                stream: Mutex::new(Some(stream)),
            });
            by_id.insert(id, Arc::clone(&kind));
            kinds.push(kind);
        }
        let handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(LogHandler)];
        Ok(Self { kinds, by_id, handlers: Arc::new(ArcSwap::from_pointee(handlers)), settings, started: AtomicBool::new(false) })
    }

    /// Run every writer task until `ctx` is cancelled. Logs once all kinds
    /// have synced. Can be called only once.
    pub async fn start(&self, ctx: CancellationToken) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            bail!("watch cache already started");
        }
        let mut tasks = Vec::with_capacity(self.kinds.len());
        for kind in &self.kinds {
            let stream = kind
                .stream
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or_else(|| anyhow!("subscription for {} already consumed", kind.id))?;
            tasks.push(tokio::spawn(run_kind(
                Arc::clone(kind),
                stream,
                Arc::clone(&self.handlers),
                self.settings.clone(),
                ctx.clone(),
            )));
        }
        info!(kinds = self.kinds.len(), namespace = ?self.settings.namespace, "watch cache started");

        if self.wait_for_sync(&ctx).await {
            info!(kinds = self.kinds.len(), "all kinds synced");
        }
        ctx.cancelled().await;

        for res in join_all(tasks).await {
            if let Err(e) = res {
                warn!(error = %e, "writer task failed");
            }
        }
        for kind in &self.kinds {
            kind.phase.send_replace(Phase::Stopped);
        }
        info!("watch cache stopped");
        Ok(())
    }

    /// `true` once every kind has delivered its initial listing; `false` if
    /// `ctx` is (or becomes) cancelled first.
    pub async fn wait_for_sync(&self, ctx: &CancellationToken) -> bool {
        if ctx.is_cancelled() {
            return false;
        }
        let all = async {
            for kind in &self.kinds {
                let mut rx = kind.synced.subscribe();
                let ok = rx.wait_for(|synced| *synced).await.is_ok();
                if !ok {
                    return false;
                }
            }
            true
        };
        tokio::select! {
            biased;
            _ = ctx.cancelled() => false,
            ok = all => ok,
        }
    }

    pub fn index(&self, id: &ResourceId) -> Option<Index> {
        self.by_id.get(id).map(|k| k.index.clone())
    }

    pub fn phase(&self, id: &ResourceId) -> Option<Phase> {
        self.by_id.get(id).map(|k| *k.phase.borrow())
    }

    pub fn is_synced(&self, id: &ResourceId) -> bool {
        self.by_id.get(id).is_some_and(|k| *k.synced.borrow())
    }

    /// Tracked ids in registration order.
    pub fn resources(&self) -> Vec<ResourceId> {
        self.kinds.iter().map(|k| k.id.clone()).collect()
    }

    /// Register a handler; it sees changes published after this call.
    pub fn add_event_handler(&self, handler: impl EventHandler + 'static) {
        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        self.handlers.rcu(|cur| {
            let mut next: Vec<Arc<dyn EventHandler>> = cur.iter().cloned().collect();
            next.push(Arc::clone(&handler));
            next
        });
    }
}

async fn run_kind(
    kind: Arc<TrackedKind>,
    mut stream: WatchStream,
    handlers: Handlers,
    settings: EngineSettings,
    ctx: CancellationToken,
) {
    let resource = kind.id.to_string();
    let mut builder = IndexBuilder::new();
    let mut flush = interval(settings.flush_interval.max(Duration::from_millis(1)));
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut resync = settings.resync.filter(|p| !p.is_zero()).map(|p| {
        let mut t = interval_at(Instant::now() + p, p);
        t.set_missed_tick_behavior(MissedTickBehavior::Delay);
        t
    });

    let mut pending: Vec<Change> = Vec::new();
    loop {
        tokio::select! {
            _ = ctx.cancelled() => break,
            next = stream.next() => {
                if next.is_some() {
                    kind.phase.send_if_modified(|p| {
                        let first = *p == Phase::Created;
                        if first {
                            *p = Phase::Watching;
                        }
                        first
                    });
                }
                match next {
                    Some(Ok(ev)) => {
                        let relist = matches!(ev, WatchEvent::Restarted(_));
                        let changes = builder.apply(ev);
                        counter!("glint_events_applied_total", changes.len() as u64, "resource" => resource.clone());
                        pending.extend(changes);
                        if relist {
                            publish_pending(&kind, &mut builder, &mut pending, &handlers);
                            kind.synced.send_replace(true);
                            kind.phase.send_replace(Phase::Synced);
                            info!(resource = %kind.id, objects = builder.len(), "listing applied");
                        }
                    }
                    Some(Err(e)) => {
                        counter!("glint_watch_errors_total", 1u64, "resource" => resource.clone());
                        warn!(resource = %kind.id, error = %e, "watch stream error");
                    }
                    None => {
                        warn!(resource = %kind.id, "watch stream ended");
                        break;
                    }
                }
            }
            _ = flush.tick() => publish_pending(&kind, &mut builder, &mut pending, &handlers),
            _ = next_resync(&mut resync) => {
                publish_pending(&kind, &mut builder, &mut pending, &handlers);
                let hs = handlers.load_full();
                for obj in builder.objects() {
                    for h in hs.iter() {
                        h.on_update(&kind.id, obj, obj);
                    }
                }
                debug!(resource = %kind.id, objects = builder.len(), "resync delivered");
            }
        }
    }

    publish_pending(&kind, &mut builder, &mut pending, &handlers);
    kind.phase.send_replace(Phase::Stopped);
    debug!(resource = %kind.id, "writer task stopped");
}

/// Publish the builder, then hand the changes behind it to handlers, so a
/// handler always finds its object (or its absence) in the index.
fn publish_pending(kind: &TrackedKind, builder: &mut IndexBuilder, pending: &mut Vec<Change>, handlers: &Handlers) {
    if builder.is_dirty() {
        kind.publisher.publish(builder.freeze());
    }
    if pending.is_empty() {
        return;
    }
    let hs = handlers.load_full();
    for change in pending.drain(..) {
        dispatch(&hs, &kind.id, &change);
    }
}

async fn next_resync(t: &mut Option<Interval>) {
    match t {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}
