use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use glint_core::{ObjectEnvelope, ResourceId, Scope, WatchEvent, WatchSource, WatchStream};
use kube::api::Api;
use kube::core::{ApiResource, DynamicObject};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::Client;
use tracing::{debug, info};

use crate::DiscoveryMapper;

/// Opens `kube::runtime::watcher` streams for discovered kinds. The watcher
/// handles re-listing; transient errors are retried with the default backoff.
pub struct KubeWatchSource {
    client: Client,
    mapper: Arc<DiscoveryMapper>,
}

impl KubeWatchSource {
    pub fn new(client: Client, mapper: Arc<DiscoveryMapper>) -> Self { Self { client, mapper } }
}

impl WatchSource for KubeWatchSource {
    fn subscribe(&self, id: &ResourceId, namespace: Option<&str>) -> Result<WatchStream> {
        let (ar, scope) = self.mapper.api_resource(id).ok_or_else(|| anyhow!("{} is not served by the cluster", id))?;
        let api: Api<DynamicObject> = match (scope, namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        };
        info!(resource = %id, ns = ?namespace, scope = ?scope, "watcher subscribed");

        let resource = id.to_string();
        let stream = watcher::watcher(api, watcher::Config::default())
            .default_backoff()
            .map(move |ev| {
                let ev = ev.with_context(|| format!("watching {}", resource))?;
                convert_event(ev, &ar)
            });
        Ok(stream.boxed())
    }
}

fn convert_event(ev: Event<DynamicObject>, ar: &ApiResource) -> Result<WatchEvent> {
    Ok(match ev {
        Event::Applied(o) => WatchEvent::Applied(to_envelope(o, ar)?),
        Event::Deleted(o) => WatchEvent::Deleted(to_envelope(o, ar)?),
        Event::Restarted(list) => {
            debug!(kind = %ar.kind, count = list.len(), "watch restart");
            WatchEvent::Restarted(list.into_iter().map(|o| to_envelope(o, ar)).collect::<Result<_>>()?)
        }
    })
}

/// Convert a dynamic object into an envelope without `managedFields`. List
/// items often omit `apiVersion`/`kind`; those are filled from `ar`.
pub fn to_envelope(obj: DynamicObject, ar: &ApiResource) -> Result<ObjectEnvelope> {
    let mut raw = serde_json::to_value(&obj).context("serializing DynamicObject")?;
    strip_managed_fields(&mut raw);
    let mut env = ObjectEnvelope::from_value(raw).context("decoding object envelope")?;
    if env.api_version.is_empty() {
        env.api_version = ar.api_version.clone();
    }
    if env.kind.is_empty() {
        env.kind = ar.kind.clone();
    }
    Ok(env)
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ManagedFieldsEntry;
    use serde_json::json;

    fn deployments() -> ApiResource {
        ApiResource {
            group: "apps".into(),
            version: "v1".into(),
            api_version: "apps/v1".into(),
            kind: "Deployment".into(),
            plural: "deployments".into(),
        }
    }

    #[test]
    fn envelope_drops_managed_fields_and_keeps_body() {
        let ar = deployments();
        let mut obj = DynamicObject::new("web", &ar).within("default").data(json!({"spec": {"replicas": 2}}));
        obj.metadata.managed_fields = Some(vec![ManagedFieldsEntry { manager: Some("kubectl".into()), ..Default::default() }]);
        obj.metadata.resource_version = Some("42".into());

        let env = to_envelope(obj, &ar).unwrap();
        assert_eq!(env.cache_key(), "default/web");
        assert_eq!(env.api_version, "apps/v1");
        assert_eq!(env.metadata.resource_version.as_deref(), Some("42"));
        assert!(!env.metadata.rest.contains_key("managedFields"));
        assert_eq!(env.rest["spec"]["replicas"], 2);
    }

    #[test]
    fn list_items_without_type_meta_get_it_from_the_resource() {
        let ar = deployments();
        let mut obj = DynamicObject::new("web", &ar).within("default");
        obj.types = None;
        let env = to_envelope(obj, &ar).unwrap();
        assert_eq!((env.api_version.as_str(), env.kind.as_str()), ("apps/v1", "Deployment"));
    }

    #[test]
    fn restarted_converts_every_item() {
        let ar = deployments();
        let list = vec![DynamicObject::new("a", &ar).within("x"), DynamicObject::new("b", &ar).within("y")];
        match convert_event(Event::Restarted(list), &ar).unwrap() {
            WatchEvent::Restarted(items) => {
                assert_eq!(items.iter().map(ObjectEnvelope::cache_key).collect::<Vec<_>>(), vec!["x/a", "y/b"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
