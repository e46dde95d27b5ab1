//! Per-kind local index: a single-writer builder that publishes immutable
//! snapshots for lock-free readers.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use arc_swap::ArcSwap;
use glint_core::{EventKind, GlintError, GlintResult, ObjectEnvelope, ResourceId, WatchEvent};
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use tokio::sync::watch;

/// Effect of one applied event on the index, as seen by handlers.
#[derive(Debug, Clone)]
pub enum Change {
    Added(Arc<ObjectEnvelope>),
    Updated { old: Arc<ObjectEnvelope>, new: Arc<ObjectEnvelope> },
    Deleted(Arc<ObjectEnvelope>),
}

impl Change {
    pub fn kind(&self) -> EventKind {
        match self {
            Change::Added(_) => EventKind::Added,
            Change::Updated { .. } => EventKind::Updated,
            Change::Deleted(_) => EventKind::Deleted,
        }
    }

    pub fn object(&self) -> &ObjectEnvelope {
        match self {
            Change::Added(o) | Change::Deleted(o) | Change::Updated { new: o, .. } => o,
        }
    }
}

const OBJECT_BUCKETS: usize = 256;
const NAMESPACE_BUCKETS: usize = 64;
const KEY_BUCKETS: usize = 64;

type Bucket<V> = FxHashMap<Arc<str>, V>;

/// Hash-bucketed map whose clones share buckets. A write copies only the
/// bucket it lands in, and only while an older clone still holds it.
#[derive(Debug, Clone)]
struct BucketMap<V> {
    buckets: Vec<Arc<Bucket<V>>>,
}

impl<V: Clone> BucketMap<V> {
    fn with_buckets(n: usize) -> Self {
        Self { buckets: vec![Arc::new(Bucket::<V>::default()); n.max(1)] }
    }

    fn slot(&self, key: &str) -> usize {
        let mut h = FxHasher::default();
        key.hash(&mut h);
        (h.finish() as usize) % self.buckets.len()
    }

    fn len(&self) -> usize { self.buckets.iter().map(|b| b.len()).sum() }
    fn is_empty(&self) -> bool { self.buckets.iter().all(|b| b.is_empty()) }

    fn get(&self, key: &str) -> Option<&V> { self.buckets[self.slot(key)].get(key) }

    fn bucket_mut(&mut self, key: &str) -> &mut Bucket<V> {
        let i = self.slot(key);
        Arc::make_mut(&mut self.buckets[i])
    }

    fn insert(&mut self, key: Arc<str>, value: V) -> Option<V> { self.bucket_mut(&key).insert(key, value) }

    fn remove(&mut self, key: &str) -> Option<V> {
        let i = self.slot(key);
        // a miss must not copy a shared bucket
        if !self.buckets[i].contains_key(key) {
            return None;
        }
        Arc::make_mut(&mut self.buckets[i]).remove(key)
    }

    fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &V)> { self.buckets.iter().flat_map(|b| b.iter()) }

    #[cfg(test)]
    fn shared_with(&self, other: &Self) -> usize {
        self.buckets.iter().zip(&other.buckets).filter(|(a, b)| Arc::ptr_eq(a, b)).count()
    }
}

/// Immutable view of one kind's objects at a given epoch.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    epoch: u64,
    objects: BucketMap<Arc<ObjectEnvelope>>,
    /// namespace -> keys; cluster-scoped objects sit under "".
    by_ns: BucketMap<BucketMap<()>>,
}

impl Default for IndexSnapshot {
    fn default() -> Self {
        Self { epoch: 0, objects: BucketMap::with_buckets(OBJECT_BUCKETS), by_ns: BucketMap::with_buckets(NAMESPACE_BUCKETS) }
    }
}

impl IndexSnapshot {
    pub fn epoch(&self) -> u64 { self.epoch }
    pub fn len(&self) -> usize { self.objects.len() }
    pub fn is_empty(&self) -> bool { self.objects.is_empty() }

    pub fn get(&self, key: &str) -> Option<Arc<ObjectEnvelope>> { self.objects.get(key).cloned() }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|(k, _)| k.to_string()).collect();
        keys.sort_unstable();
        keys
    }

    /// All objects, sorted by key.
    pub fn list(&self) -> Vec<Arc<ObjectEnvelope>> {
        let mut items: Vec<(&Arc<str>, &Arc<ObjectEnvelope>)> = self.objects.iter().collect();
        items.sort_unstable_by(|a, b| a.0.cmp(b.0));
        items.into_iter().map(|(_, o)| Arc::clone(o)).collect()
    }

    /// Objects in `namespace` via the secondary index, sorted by key.
    pub fn by_namespace(&self, namespace: &str) -> GlintResult<Vec<Arc<ObjectEnvelope>>> {
        let Some(keys) = self.by_ns.get(namespace) else { return Ok(Vec::new()) };
        let mut keys: Vec<&Arc<str>> = keys.iter().map(|(k, _)| k).collect();
        keys.sort_unstable();
        keys.into_iter()
            .map(|k| {
                self.objects
                    .get(k)
                    .cloned()
                    .ok_or_else(|| GlintError::UpstreamIndex(format!("namespace index for {:?} references missing key {}", namespace, k)))
            })
            .collect()
    }
}

/// Single-writer side of an index. Events are applied in delivery order;
/// `freeze` publishes the current state as a new epoch. Snapshots share
/// storage with the builder, so freezing costs the buckets written since the
/// previous freeze rather than the size of the index.
#[derive(Debug, Default)]
pub struct IndexBuilder {
    state: IndexSnapshot,
    dirty: bool,
}

impl IndexBuilder {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.state.len() }
    pub fn is_empty(&self) -> bool { self.state.is_empty() }
    pub fn is_dirty(&self) -> bool { self.dirty }

    pub fn objects(&self) -> impl Iterator<Item = &Arc<ObjectEnvelope>> { self.state.objects.iter().map(|(_, o)| o) }

    pub fn apply(&mut self, ev: WatchEvent) -> Vec<Change> {
        match ev {
            WatchEvent::Applied(o) => vec![self.upsert(o)],
            WatchEvent::Deleted(o) => self.remove(&o).into_iter().collect(),
            WatchEvent::Restarted(list) => self.replace(list),
        }
    }

    /// Insert or replace by key. Repeated adds for the same key are updates.
    pub fn upsert(&mut self, obj: ObjectEnvelope) -> Change {
        let key: Arc<str> = Arc::from(obj.cache_key());
        let ns: Arc<str> = Arc::from(obj.namespace().unwrap_or(""));
        let new = Arc::new(obj);
        self.dirty = true;
        match self.state.objects.insert(Arc::clone(&key), Arc::clone(&new)) {
            Some(old) => Change::Updated { old, new },
            None => {
                self.link(ns, key);
                Change::Added(new)
            }
        }
    }

    /// Remove by key; deleting an unknown key is a no-op.
    pub fn remove(&mut self, obj: &ObjectEnvelope) -> Option<Change> {
        let key = obj.cache_key();
        let old = self.state.objects.remove(&key)?;
        self.unlink(old.namespace().unwrap_or(""), &key);
        self.dirty = true;
        Some(Change::Deleted(old))
    }

    /// Swap in a complete listing: new keys are adds, surviving keys updates,
    /// and keys missing from the listing deletes.
    pub fn replace(&mut self, list: Vec<ObjectEnvelope>) -> Vec<Change> {
        let incoming: FxHashSet<String> = list.iter().map(ObjectEnvelope::cache_key).collect();
        let vanished: Vec<Arc<ObjectEnvelope>> = self
            .state
            .objects
            .iter()
            .filter(|(k, _)| !incoming.contains::<str>(k))
            .map(|(_, o)| Arc::clone(o))
            .collect();
        let mut changes = Vec::with_capacity(list.len() + vanished.len());
        for o in vanished {
            changes.extend(self.remove(&o));
        }
        for o in list {
            changes.push(self.upsert(o));
        }
        self.dirty = true;
        changes
    }

    pub fn freeze(&mut self) -> Arc<IndexSnapshot> {
        if self.dirty {
            self.state.epoch = self.state.epoch.saturating_add(1);
            self.dirty = false;
        }
        Arc::new(self.state.clone())
    }

    fn link(&mut self, ns: Arc<str>, key: Arc<str>) {
        self.state
            .by_ns
            .bucket_mut(&ns)
            .entry(ns)
            .or_insert_with(|| BucketMap::with_buckets(KEY_BUCKETS))
            .insert(key, ());
    }

    fn unlink(&mut self, ns: &str, key: &str) {
        if self.state.by_ns.get(ns).is_none() {
            return;
        }
        let bucket = self.state.by_ns.bucket_mut(ns);
        if let Some(keys) = bucket.get_mut(ns) {
            keys.remove(key);
            if keys.is_empty() {
                bucket.remove(ns);
            }
        }
    }
}

/// Read handle for one kind's index. Cheap to clone; reads never block the
/// writer and always see a whole epoch.
#[derive(Clone)]
pub struct Index {
    id: ResourceId,
    snap: Arc<ArcSwap<IndexSnapshot>>,
    epoch_rx: watch::Receiver<u64>,
}

impl Index {
    pub fn id(&self) -> &ResourceId { &self.id }
    pub fn current(&self) -> Arc<IndexSnapshot> { self.snap.load_full() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }

    pub fn list(&self) -> Vec<Arc<ObjectEnvelope>> { self.snap.load().list() }
    pub fn get_by_key(&self, key: &str) -> Option<Arc<ObjectEnvelope>> { self.snap.load().get(key) }
    pub fn by_namespace(&self, namespace: &str) -> GlintResult<Vec<Arc<ObjectEnvelope>>> { self.snap.load().by_namespace(namespace) }
    pub fn len(&self) -> usize { self.snap.load().len() }
    pub fn is_empty(&self) -> bool { self.snap.load().is_empty() }
}

/// Writer side paired with an [`Index`].
pub(crate) struct IndexPublisher {
    snap: Arc<ArcSwap<IndexSnapshot>>,
    epoch_tx: watch::Sender<u64>,
}

impl IndexPublisher {
    pub(crate) fn publish(&self, next: Arc<IndexSnapshot>) {
        let epoch = next.epoch;
        self.snap.store(next);
        self.epoch_tx.send_replace(epoch);
    }
}

pub(crate) fn index_pair(id: ResourceId) -> (IndexPublisher, Index) {
    let snap = Arc::new(ArcSwap::from_pointee(IndexSnapshot::default()));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    (IndexPublisher { snap: Arc::clone(&snap), epoch_tx }, Index { id, snap, epoch_rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dangling_namespace_entry_is_an_index_error() {
        let mut snap = IndexSnapshot::default();
        let mut keys = BucketMap::with_buckets(KEY_BUCKETS);
        keys.insert(Arc::from("a/ghost"), ());
        snap.by_ns.insert(Arc::from("a"), keys);
        match snap.by_namespace("a") {
            Err(GlintError::UpstreamIndex(msg)) => assert!(msg.contains("a/ghost")),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(snap.by_namespace("b").unwrap().is_empty());
    }

    fn pod(ns: &str, name: &str) -> ObjectEnvelope { ObjectEnvelope::new("v1", "Pod", Some(ns), name) }

    #[test]
    fn freeze_copies_only_written_buckets() {
        let mut b = IndexBuilder::new();
        for i in 0..10_000 {
            b.upsert(pod("a", &format!("p{}", i)));
        }
        let before = b.freeze();
        b.upsert(pod("a", "p42"));
        b.upsert(pod("b", "fresh"));
        let after = b.freeze();

        assert_eq!(before.len(), 10_000);
        assert_eq!(after.len(), 10_001);
        assert!(before.objects.shared_with(&after.objects) >= OBJECT_BUCKETS - 2);
        assert!(before.by_ns.shared_with(&after.by_ns) >= NAMESPACE_BUCKETS - 1);
        // namespace "a" gained no keys, so its key set is shared whole
        let (a0, a1) = (before.by_ns.get("a").unwrap(), after.by_ns.get("a").unwrap());
        assert_eq!(a0.shared_with(a1), KEY_BUCKETS);
        assert!(before.get("b/fresh").is_none());
    }

    #[test]
    fn removing_a_missing_key_copies_nothing() {
        let mut b = IndexBuilder::new();
        b.upsert(pod("a", "x"));
        let before = b.freeze();
        assert!(b.remove(&pod("a", "ghost")).is_none());
        assert!(!b.is_dirty());
        let after = b.freeze();
        assert_eq!(before.objects.shared_with(&after.objects), OBJECT_BUCKETS);
        assert_eq!(after.epoch(), before.epoch());
    }

    #[tokio::test]
    async fn publish_bumps_epoch_for_readers() {
        let (publisher, index) = index_pair(ResourceId::new("", "v1", "pods"));
        let mut rx = index.subscribe_epoch();
        let mut b = IndexBuilder::new();
        b.upsert(ObjectEnvelope::new("v1", "Pod", Some("ns"), "p"));
        publisher.publish(b.freeze());
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
        assert_eq!(index.get_by_key("ns/p").map(|o| o.name().to_string()).as_deref(), Some("p"));
        // freezing without changes keeps the epoch
        assert_eq!(b.freeze().epoch(), 1);
    }
}
