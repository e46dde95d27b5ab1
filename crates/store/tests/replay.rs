#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use glint_core::{EventKind, ObjectEnvelope, WatchEvent};
use glint_store::IndexBuilder;
use serde_json::json;

fn pod(ns: &str, name: &str, rv: &str) -> ObjectEnvelope {
    let mut o = ObjectEnvelope::new("v1", "Pod", Some(ns), name);
    o.metadata.resource_version = Some(rv.to_string());
    o
}

fn node(name: &str) -> ObjectEnvelope { ObjectEnvelope::new("v1", "Node", None, name) }

fn kinds(changes: &[glint_store::Change]) -> Vec<(EventKind, String)> {
    changes.iter().map(|c| (c.kind(), c.object().cache_key())).collect()
}

#[test]
fn duplicate_adds_are_idempotent() {
    let mut b = IndexBuilder::new();
    let first = b.apply(WatchEvent::Applied(pod("a", "x", "1")));
    let second = b.apply(WatchEvent::Applied(pod("a", "x", "1")));
    assert_eq!(kinds(&first), vec![(EventKind::Added, "a/x".to_string())]);
    assert_eq!(kinds(&second), vec![(EventKind::Updated, "a/x".to_string())]);

    let snap = b.freeze();
    assert_eq!(snap.len(), 1);
    assert_eq!(snap.by_namespace("a").unwrap().len(), 1);
}

#[test]
fn namespace_isolation() {
    let mut b = IndexBuilder::new();
    b.apply(WatchEvent::Applied(pod("a", "x", "1")));
    b.apply(WatchEvent::Applied(pod("b", "y", "1")));
    let snap = b.freeze();

    let in_a: Vec<String> = snap.by_namespace("a").unwrap().iter().map(|o| o.cache_key()).collect();
    assert_eq!(in_a, vec!["a/x"]);
    assert!(snap.get("a/x").is_some());
    assert!(snap.get("a/y").is_none());
    assert!(snap.by_namespace("c").unwrap().is_empty());
}

#[test]
fn update_keeps_latest_and_delete_of_unknown_is_silent() {
    let mut b = IndexBuilder::new();
    b.apply(WatchEvent::Applied(pod("a", "x", "1")));
    b.apply(WatchEvent::Applied(pod("a", "x", "2").with_field("spec", json!({"nodeName": "n1"}))));
    assert!(b.apply(WatchEvent::Deleted(pod("a", "ghost", "1"))).is_empty());

    let snap = b.freeze();
    let x = snap.get("a/x").unwrap();
    assert_eq!(x.metadata.resource_version.as_deref(), Some("2"));
    assert_eq!(x.rest["spec"]["nodeName"], "n1");

    let gone = b.apply(WatchEvent::Deleted(pod("a", "x", "3")));
    assert_eq!(kinds(&gone), vec![(EventKind::Deleted, "a/x".to_string())]);
    let snap = b.freeze();
    assert!(snap.is_empty());
    assert!(snap.by_namespace("a").unwrap().is_empty());
}

#[test]
fn relist_replaces_contents() {
    let mut b = IndexBuilder::new();
    b.apply(WatchEvent::Applied(pod("a", "keep", "1")));
    b.apply(WatchEvent::Applied(pod("a", "stale", "1")));
    let before = b.freeze();

    let mut changes = kinds(&b.apply(WatchEvent::Restarted(vec![pod("a", "keep", "2"), pod("b", "fresh", "1")])));
    changes.sort();
    assert_eq!(
        changes,
        vec![
            (EventKind::Added, "b/fresh".to_string()),
            (EventKind::Updated, "a/keep".to_string()),
            (EventKind::Deleted, "a/stale".to_string()),
        ]
    );

    let after = b.freeze();
    assert_eq!(after.keys(), vec!["a/keep", "b/fresh"]);
    assert!(after.epoch() > before.epoch());
    // earlier snapshots are untouched
    assert_eq!(before.keys(), vec!["a/keep", "a/stale"]);
}

#[test]
fn empty_relist_still_publishes_a_new_epoch() {
    let mut b = IndexBuilder::new();
    assert!(b.apply(WatchEvent::Restarted(Vec::new())).is_empty());
    assert_eq!(b.freeze().epoch(), 1);
}

#[test]
fn cluster_scoped_objects_key_by_name() {
    let mut b = IndexBuilder::new();
    b.apply(WatchEvent::Restarted(vec![node("n2"), node("n1")]));
    let snap = b.freeze();
    assert_eq!(snap.keys(), vec!["n1", "n2"]);
    assert_eq!(snap.list().iter().map(|o| o.name().to_string()).collect::<Vec<_>>(), vec!["n1", "n2"]);
    assert_eq!(snap.by_namespace("").unwrap().len(), 2);
}

#[test]
fn single_event_flushes_stay_cheap_on_a_large_index() {
    let mut b = IndexBuilder::new();
    b.apply(WatchEvent::Restarted((0..50_000).map(|i| pod(&format!("ns{}", i % 50), &format!("p{}", i), "1")).collect()));
    let base = b.freeze();

    let started = Instant::now();
    for round in 0..200 {
        b.apply(WatchEvent::Applied(pod("ns0", &format!("p{}", round * 50), "2")));
        let snap = b.freeze();
        assert_eq!(snap.len(), 50_000);
    }
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_secs(2), "200 flushes took {:?}", elapsed);

    // published snapshots never see later writes
    assert_eq!(base.get("ns0/p0").unwrap().metadata.resource_version.as_deref(), Some("1"));
    assert_eq!(b.freeze().get("ns0/p0").unwrap().metadata.resource_version.as_deref(), Some("2"));
}
