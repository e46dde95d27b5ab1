//! Glint apply: manifest reading plus server-side apply, delete and direct
//! list against the live cluster.

#![forbid(unsafe_code)]

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use glint_core::{ObjectEnvelope, PartialResourceId, ResourceId, ResourceMapper, Scope};
use glint_kubehub::{to_envelope, DiscoveryMapper};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::core::{ApiResource, DynamicObject};
use kube::Client;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info};

pub const FIELD_MANAGER: &str = "glint";

/// Namespace used for namespaced objects that name none.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Guards against oversized or pathological manifests.
#[derive(Debug, Clone, Copy)]
pub struct ManifestLimits {
    pub max_bytes: usize,
    pub max_nodes: usize,
}

impl Default for ManifestLimits {
    fn default() -> Self { Self { max_bytes: 1_000_000, max_nodes: 100_000 } }
}

impl ManifestLimits {
    /// Defaults overridden by `GLINT_MAX_MANIFEST_BYTES` / `GLINT_MAX_MANIFEST_NODES`.
    pub fn from_env() -> Self {
        let d = Self::default();
        let var = |k: &str| std::env::var(k).ok().and_then(|s| s.parse::<usize>().ok());
        Self {
            max_bytes: var("GLINT_MAX_MANIFEST_BYTES").unwrap_or(d.max_bytes),
            max_nodes: var("GLINT_MAX_MANIFEST_NODES").unwrap_or(d.max_nodes),
        }
    }
}

/// Read every object from `paths`; `-` (or an empty list) reads stdin.
pub fn read_objects(paths: &[PathBuf], limits: ManifestLimits) -> Result<Vec<ObjectEnvelope>> {
    let stdin = [PathBuf::from("-")];
    let paths = if paths.is_empty() { &stdin[..] } else { paths };
    let mut out = Vec::new();
    for p in paths {
        let (text, source) = read_source(p, limits)?;
        out.extend(parse_manifests(&text, &source, limits)?);
    }
    Ok(out)
}

fn read_source(p: &Path, limits: ManifestLimits) -> Result<(String, String)> {
    let mut text = String::new();
    let source = if p.as_os_str() == "-" {
        std::io::stdin()
            .lock()
            .take(limits.max_bytes as u64 + 1)
            .read_to_string(&mut text)
            .context("reading manifests from stdin")?;
        "<stdin>".to_string()
    } else {
        let meta = std::fs::metadata(p).with_context(|| format!("reading {}", p.display()))?;
        if meta.len() as usize > limits.max_bytes {
            bail!("{}: manifest too large (>{} bytes)", p.display(), limits.max_bytes);
        }
        text = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        p.display().to_string()
    };
    if text.len() > limits.max_bytes {
        bail!("{}: manifest too large (>{} bytes)", source, limits.max_bytes);
    }
    Ok((text, source))
}

/// Split a multi-document YAML (or JSON) stream into objects, skipping empty
/// documents. Every object needs `apiVersion`, `kind` and `metadata.name`.
pub fn parse_manifests(text: &str, source: &str, limits: ManifestLimits) -> Result<Vec<ObjectEnvelope>> {
    if text.len() > limits.max_bytes {
        bail!("{}: manifest too large (>{} bytes)", source, limits.max_bytes);
    }
    let mut out = Vec::new();
    for (i, doc) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let at = || format!("{} document {}", source, i + 1);
        let val = serde_yaml::Value::deserialize(doc).with_context(|| format!("parsing {}", at()))?;
        if val.is_null() {
            continue;
        }
        let json = serde_json::to_value(val).with_context(|| format!("converting {} to JSON", at()))?;
        if node_budget_exceeded(&json, limits.max_nodes) {
            bail!("{}: document too complex (>{} nodes)", at(), limits.max_nodes);
        }
        out.push(envelope_from(json).with_context(at)?);
    }
    debug!(source, objects = out.len(), "manifests parsed");
    Ok(out)
}

fn envelope_from(json: Json) -> Result<ObjectEnvelope> {
    let field = |k: &str| json.get(k).and_then(Json::as_str).map_or(true, str::is_empty);
    if field("apiVersion") {
        bail!("missing apiVersion");
    }
    if field("kind") {
        bail!("missing kind");
    }
    if json.pointer("/metadata/name").and_then(Json::as_str).map_or(true, str::is_empty) {
        bail!("missing metadata.name");
    }
    ObjectEnvelope::from_value(json).context("decoding object")
}

fn node_budget_exceeded(v: &Json, max: usize) -> bool {
    fn walk(v: &Json, count: &mut usize, max: usize) {
        if *count >= max {
            return;
        }
        *count += 1;
        match v {
            Json::Object(map) => map.values().for_each(|c| walk(c, count, max)),
            Json::Array(items) => items.iter().for_each(|c| walk(c, count, max)),
            _ => {}
        }
    }
    let mut count = 0;
    walk(v, &mut count, max);
    count >= max
}

/// Resource for an object: its group and version, with the lower-cased kind
/// matched as the singular name.
pub fn target_for(mapper: &dyn ResourceMapper, obj: &ObjectEnvelope) -> Result<ResourceId> {
    let (group, version) = obj.group_version();
    let guess = PartialResourceId {
        group: Some(group.to_string()),
        version: Some(version.to_string()),
        resource: obj.kind.to_lowercase(),
    };
    mapper.resource_for(&guess).with_context(|| format!("resolving {} {}", obj.api_version, obj.kind))
}

/// Namespace an object is sent to: none for cluster-scoped kinds, otherwise
/// the override, the object's own, or `default`.
pub fn target_namespace(scope: Scope, ns_override: Option<&str>, obj_ns: Option<&str>) -> Option<String> {
    match scope {
        Scope::Cluster => None,
        Scope::Namespaced => Some(ns_override.or(obj_ns).unwrap_or(DEFAULT_NAMESPACE).to_string()),
    }
}

/// Result of one apply or delete call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub resource: ResourceId,
    pub namespace: Option<String>,
    pub name: String,
    pub dry_run: bool,
    pub resource_version: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub namespace: Option<String>,
    pub dry_run: bool,
}

fn dynamic_api(client: &Client, mapper: &DiscoveryMapper, id: &ResourceId, ns: Option<&str>) -> Result<(Api<DynamicObject>, ApiResource, Scope)> {
    let (ar, scope) = mapper.api_resource(id).ok_or_else(|| anyhow!("{} is not served by the cluster", id))?;
    let api = match (scope, ns) {
        (Scope::Namespaced, Some(ns)) => Api::namespaced_with(client.clone(), ns, &ar),
        _ => Api::all_with(client.clone(), &ar),
    };
    Ok((api, ar, scope))
}

fn record(op: &'static str, ok: bool, started: Instant) {
    counter!("glint_apply_total", 1u64, "op" => op, "outcome" => if ok { "ok" } else { "error" });
    histogram!("glint_apply_latency_ms", started.elapsed().as_secs_f64() * 1000.0, "op" => op);
}

/// Server-side apply each object (forced, so it creates or replaces).
/// Stops at the first failure.
pub async fn apply_objects(client: &Client, mapper: &DiscoveryMapper, objects: &[ObjectEnvelope], opts: &BatchOptions) -> Result<Vec<Outcome>> {
    let mut pp = PatchParams::apply(FIELD_MANAGER).force();
    if opts.dry_run {
        pp = pp.dry_run();
    }
    let mut out = Vec::with_capacity(objects.len());
    for obj in objects {
        let started = Instant::now();
        let id = target_for(mapper, obj)?;
        let scope = mapper.scope_of(&id).unwrap_or(Scope::Namespaced);
        let ns = target_namespace(scope, opts.namespace.as_deref(), obj.namespace());
        let (api, _, _) = dynamic_api(client, mapper, &id, ns.as_deref())?;

        let mut body = obj.clone();
        body.metadata.namespace = ns.clone();
        let body = body.to_value().context("encoding object")?;
        let res = api.patch(obj.name(), &pp, &Patch::Apply(&body)).await;
        record("apply", res.is_ok(), started);
        let applied = res.with_context(|| format!("applying {} {}", id, obj.cache_key()))?;

        info!(resource = %id, ns = ?ns, name = obj.name(), dry_run = opts.dry_run, "applied");
        out.push(Outcome {
            resource: id,
            namespace: ns,
            name: obj.name().to_string(),
            dry_run: opts.dry_run,
            resource_version: applied.metadata.resource_version,
        });
    }
    Ok(out)
}

/// Delete the objects named by manifests.
pub async fn delete_objects(client: &Client, mapper: &DiscoveryMapper, objects: &[ObjectEnvelope], opts: &BatchOptions) -> Result<Vec<Outcome>> {
    let mut out = Vec::with_capacity(objects.len());
    for obj in objects {
        let id = target_for(mapper, obj)?;
        let scope = mapper.scope_of(&id).unwrap_or(Scope::Namespaced);
        let ns = target_namespace(scope, opts.namespace.as_deref(), obj.namespace());
        out.push(delete_one(client, mapper, &id, ns, obj.name(), opts.dry_run).await?);
    }
    Ok(out)
}

/// Delete `names` of one kind, in `namespace` (or `default`) when namespaced.
pub async fn delete_named(client: &Client, mapper: &DiscoveryMapper, id: &ResourceId, names: &[String], opts: &BatchOptions) -> Result<Vec<Outcome>> {
    if names.is_empty() {
        bail!("no resource names provided");
    }
    let scope = mapper.scope_of(id).ok_or_else(|| anyhow!("{} is not served by the cluster", id))?;
    let ns = target_namespace(scope, opts.namespace.as_deref(), None);
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        out.push(delete_one(client, mapper, id, ns.clone(), name, opts.dry_run).await?);
    }
    Ok(out)
}

async fn delete_one(client: &Client, mapper: &DiscoveryMapper, id: &ResourceId, ns: Option<String>, name: &str, dry_run: bool) -> Result<Outcome> {
    let started = Instant::now();
    let (api, _, _) = dynamic_api(client, mapper, id, ns.as_deref())?;
    let dp = DeleteParams { dry_run, ..DeleteParams::default() };
    let res = api.delete(name, &dp).await;
    record("delete", res.is_ok(), started);
    let resource_version = res
        .with_context(|| format!("deleting {} {}", id, name))?
        .left()
        .and_then(|o| o.metadata.resource_version);
    info!(resource = %id, ns = ?ns, name, dry_run, "deleted");
    Ok(Outcome { resource: id.clone(), namespace: ns, name: name.to_string(), dry_run, resource_version })
}

/// List straight from the API server (no cache), sorted by key.
pub async fn list_objects(client: &Client, mapper: &DiscoveryMapper, id: &ResourceId, namespace: Option<&str>) -> Result<Vec<ObjectEnvelope>> {
    let started = Instant::now();
    let (api, ar, scope) = dynamic_api(client, mapper, id, namespace)?;
    let res = api.list(&ListParams::default()).await;
    record("list", res.is_ok(), started);
    let list = res.with_context(|| format!("listing {}", id))?;
    let mut out = list.items.into_iter().map(|o| to_envelope(o, &ar)).collect::<Result<Vec<_>>>()?;
    out.sort_by_key(ObjectEnvelope::cache_key);
    debug!(resource = %id, scope = ?scope, count = out.len(), "listed");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glint_core::{ApiResourceEntry, MapperSnapshot};

    fn mapper() -> MapperSnapshot {
        let e = |group: &str, resource: &str, kind: &str, namespaced: bool| ApiResourceEntry {
            group: group.into(),
            version: "v1".into(),
            resource: resource.into(),
            singular: kind.to_lowercase(),
            kind: kind.into(),
            short_names: Vec::new(),
            namespaced,
        };
        MapperSnapshot::new(vec![
            e("", "configmaps", "ConfigMap", true),
            e("", "namespaces", "Namespace", false),
            e("apps", "deployments", "Deployment", true),
        ])
    }

    const MULTI: &str = r#"
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: team-a
spec:
  replicas: 2
---
# only a comment
---
apiVersion: v1
kind: Namespace
metadata:
  name: team-a
"#;

    #[test]
    fn multi_document_streams_skip_empty_documents() {
        let objs = parse_manifests(MULTI, "test.yaml", ManifestLimits::default()).unwrap();
        assert_eq!(objs.iter().map(|o| o.kind.as_str()).collect::<Vec<_>>(), vec!["Deployment", "Namespace"]);
        assert_eq!(objs[0].cache_key(), "team-a/web");
        assert_eq!(objs[0].rest["spec"]["replicas"], 2);
    }

    #[test]
    fn json_documents_are_accepted() {
        let objs = parse_manifests(r#"{"apiVersion":"v1","kind":"ConfigMap","metadata":{"name":"c"},"data":{"k":"v"}}"#, "in.json", ManifestLimits::default()).unwrap();
        assert_eq!(objs.len(), 1);
        assert_eq!(objs[0].namespace(), None);
    }

    #[test]
    fn missing_fields_name_the_document() {
        let cases = [
            ("kind: Foo\nmetadata:\n  name: x\n", "missing apiVersion"),
            ("apiVersion: v1\nmetadata:\n  name: x\n", "missing kind"),
            ("apiVersion: v1\nkind: ConfigMap\nmetadata: {}\n", "missing metadata.name"),
        ];
        for (yaml, want) in cases {
            let err = format!("{:#}", parse_manifests(yaml, "bad.yaml", ManifestLimits::default()).unwrap_err());
            assert!(err.contains(want), "{}", err);
            assert!(err.contains("bad.yaml document 1"), "{}", err);
        }
    }

    #[test]
    fn size_and_node_guards() {
        let tiny = ManifestLimits { max_bytes: 10, max_nodes: 100 };
        assert!(parse_manifests(MULTI, "big.yaml", tiny).unwrap_err().to_string().contains("too large"));
        let shallow = ManifestLimits { max_bytes: 1_000_000, max_nodes: 3 };
        assert!(format!("{:#}", parse_manifests(MULTI, "deep.yaml", shallow).unwrap_err()).contains("too complex"));
    }

    #[test]
    fn targets_resolve_by_lowercased_kind() {
        let m = mapper();
        let objs = parse_manifests(MULTI, "test.yaml", ManifestLimits::default()).unwrap();
        assert_eq!(target_for(&m, &objs[0]).unwrap(), ResourceId::new("apps", "v1", "deployments"));
        assert_eq!(target_for(&m, &objs[1]).unwrap(), ResourceId::new("", "v1", "namespaces"));

        let unknown = ObjectEnvelope::new("example.com/v1", "Widget", None, "w");
        assert!(target_for(&m, &unknown).is_err());
    }

    #[test]
    fn namespace_selection() {
        assert_eq!(target_namespace(Scope::Cluster, Some("x"), Some("y")), None);
        assert_eq!(target_namespace(Scope::Namespaced, Some("x"), Some("y")).as_deref(), Some("x"));
        assert_eq!(target_namespace(Scope::Namespaced, None, Some("y")).as_deref(), Some("y"));
        assert_eq!(target_namespace(Scope::Namespaced, None, None).as_deref(), Some(DEFAULT_NAMESPACE));
    }

    #[test]
    fn reads_manifest_files() {
        let path = std::env::temp_dir().join(format!("glint-apply-{}.yaml", std::process::id()));
        std::fs::write(&path, MULTI).unwrap();
        let objs = read_objects(&[path.clone()], ManifestLimits::default()).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(objs.len(), 2);
        assert!(read_objects(&[PathBuf::from("/nonexistent/glint.yaml")], ManifestLimits::default()).is_err());
    }
}
