//! Discovery-backed [`ResourceMapper`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use glint_core::{ApiResourceEntry, MapperError, MapperSnapshot, PartialResourceId, ResourceId, ResourceMapper, Scope};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIGroup, APIResource, GroupVersionForDiscovery};
use kube::core::ApiResource;
use kube::Client;
use metrics::counter;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Misses trigger at most one extra refresh per this window.
const MISS_REFRESH_COOLDOWN: Duration = Duration::from_secs(10);

/// Resolves resource guesses against the cluster's discovery documents.
///
/// Lookups read an in-memory snapshot; the network is only touched by
/// [`DiscoveryMapper::refresh`] and the background task.
pub struct DiscoveryMapper {
    client: Client,
    snapshot: ArcSwap<MapperSnapshot>,
    missed: Notify,
}

impl DiscoveryMapper {
    /// Fetch discovery once and return a ready mapper.
    pub async fn new(client: Client) -> Result<Arc<Self>> {
        let snapshot = fetch(&client).await?;
        info!(resources = snapshot.len(), "discovery loaded");
        Ok(Arc::new(Self { client, snapshot: ArcSwap::from_pointee(snapshot), missed: Notify::new() }))
    }

    pub fn snapshot(&self) -> Arc<MapperSnapshot> { self.snapshot.load_full() }

    /// Re-read discovery; the previous snapshot stays in place on failure.
    pub async fn refresh(&self) -> Result<usize> {
        match fetch(&self.client).await {
            Ok(next) => {
                let n = next.len();
                self.snapshot.store(Arc::new(next));
                counter!("glint_discovery_refresh_total", 1u64, "outcome" => "ok");
                debug!(resources = n, "discovery refreshed");
                Ok(n)
            }
            Err(e) => {
                counter!("glint_discovery_refresh_total", 1u64, "outcome" => "error");
                Err(e)
            }
        }
    }

    /// Refresh every `every`, and soon after a lookup miss, until `ctx` is
    /// cancelled.
    pub fn spawn_refresh(self: &Arc<Self>, every: Duration, ctx: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let every = every.max(Duration::from_secs(1));
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last = Instant::now();
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = this.missed.notified() => {
                        if last.elapsed() < MISS_REFRESH_COOLDOWN {
                            continue;
                        }
                        debug!("refreshing discovery after lookup miss");
                    }
                }
                if let Err(e) = this.refresh().await {
                    warn!(error = %e, "discovery refresh failed");
                }
                last = Instant::now();
            }
            debug!("discovery refresh stopped");
        })
    }

    /// Dynamic-API descriptor and scope for a served kind.
    pub fn api_resource(&self, id: &ResourceId) -> Option<(ApiResource, Scope)> {
        self.snapshot.load().entry(id).map(|e| (api_resource_for(e), e.scope()))
    }
}

impl ResourceMapper for DiscoveryMapper {
    fn resource_for(&self, partial: &PartialResourceId) -> Result<ResourceId, MapperError> {
        let res = self.snapshot.load().resource_for(partial);
        if matches!(res, Err(MapperError::NoMatch(_))) {
            self.missed.notify_one();
        }
        res
    }

    fn scope_of(&self, id: &ResourceId) -> Option<Scope> {
        self.snapshot.load().scope_of(id)
    }
}

async fn fetch(client: &Client) -> Result<MapperSnapshot> {
    let mut entries = Vec::new();

    let core = client.list_core_api_versions().await.context("listing core api versions")?;
    for version in &core.versions {
        let list = client
            .list_core_api_resources(version)
            .await
            .with_context(|| format!("listing core resources for {}", version))?;
        entries.extend(entries_from("", version, &list.resources));
    }

    let groups = client.list_api_groups().await.context("listing api groups")?;
    for group in &groups.groups {
        for gv in ordered_versions(group) {
            match client.list_api_group_resources(&gv.group_version).await {
                Ok(list) => entries.extend(entries_from(&group.name, &gv.version, &list.resources)),
                // aggregated APIs can be unavailable without breaking the rest
                Err(e) => warn!(group_version = %gv.group_version, error = %e, "skipping group version"),
            }
        }
    }
    Ok(MapperSnapshot::new(entries))
}

/// A group's versions with the preferred one first.
pub fn ordered_versions(group: &APIGroup) -> Vec<&GroupVersionForDiscovery> {
    let preferred = group.preferred_version.as_ref();
    let mut out: Vec<&GroupVersionForDiscovery> = preferred.into_iter().collect();
    out.extend(group.versions.iter().filter(|v| preferred.map_or(true, |p| p.version != v.version)));
    out
}

/// Top-level resources of one group version; subresources (`pods/log`) are
/// dropped.
pub fn entries_from(group: &str, version: &str, resources: &[APIResource]) -> Vec<ApiResourceEntry> {
    resources
        .iter()
        .filter(|r| !r.name.contains('/'))
        .map(|r| ApiResourceEntry {
            group: group.to_string(),
            version: version.to_string(),
            resource: r.name.clone(),
            singular: if r.singular_name.is_empty() { r.kind.to_lowercase() } else { r.singular_name.clone() },
            kind: r.kind.clone(),
            short_names: r.short_names.clone().unwrap_or_default(),
            namespaced: r.namespaced,
        })
        .collect()
}

pub fn api_resource_for(entry: &ApiResourceEntry) -> ApiResource {
    let id = entry.id();
    ApiResource {
        group: entry.group.clone(),
        version: entry.version.clone(),
        api_version: id.api_version(),
        kind: entry.kind.clone(),
        plural: entry.resource.clone(),
    }
}
