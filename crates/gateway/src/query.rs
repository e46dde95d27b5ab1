use std::sync::Arc;

use axum::http::StatusCode;
use glint_core::{GlintError, GlintResult, Locator, ResourceId, ResourceMapper, Scope};
use glint_store::WatchCache;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Decoded `/<kind-token>[/<namespace>[/<name>]]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceReference {
    pub id: ResourceId,
    pub namespace: Option<String>,
    pub name: Option<String>,
}

impl ResourceReference {
    /// Index key for a get-by-name reference.
    pub fn key(&self) -> Option<String> {
        let name = self.name.as_deref()?;
        Some(match self.namespace.as_deref() {
            Some(ns) => format!("{}/{}", ns, name),
            None => name.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Json(Value),
    Text(&'static str),
}

/// Transport-independent response.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: ReplyBody,
}

impl Reply {
    fn json(status: StatusCode, v: Value) -> Self { Self { status, body: ReplyBody::Json(v) } }

    fn error(err: &GlintError) -> Self {
        Self::json(status_for(err), json!({ "error": err.to_string() }))
    }
}

pub(crate) fn status_for(err: &GlintError) -> StatusCode {
    match err {
        GlintError::TokenParse { .. }
        | GlintError::InvalidPath { .. }
        | GlintError::ResourceNotFound(_)
        | GlintError::Resolve { .. } => StatusCode::BAD_REQUEST,
        GlintError::KindNotTracked(_) | GlintError::ObjectNotFound(_) => StatusCode::NOT_FOUND,
        GlintError::UpstreamIndex(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Read-only lookups against the watch cache. Never touches the network.
pub struct QueryGateway {
    cache: Arc<WatchCache>,
    locator: Locator,
    prefix: String,
}

impl QueryGateway {
    /// `prefix` is normalised to a leading slash and no trailing slash.
    pub fn new(cache: Arc<WatchCache>, mapper: Arc<dyn ResourceMapper>, prefix: &str) -> Self {
        let trimmed = prefix.trim_matches('/');
        Self { cache, locator: Locator::new(mapper), prefix: format!("/{}", trimmed) }
    }

    pub fn prefix(&self) -> &str { &self.prefix }

    /// Route a request path. Anything outside the prefix is a liveness probe.
    pub fn handle(&self, path: &str) -> Reply {
        let Some(rest) = self.strip_prefix(path) else {
            return Reply { status: StatusCode::OK, body: ReplyBody::Text("OK") };
        };
        match self.parse_reference(rest).and_then(|r| self.query(&r)) {
            Ok(v) => Reply::json(StatusCode::OK, v),
            Err(e) => {
                warn!(path = %path, error = %e, "query failed");
                Reply::error(&e)
            }
        }
    }

    fn strip_prefix<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.prefix == "/" {
            return Some(path);
        }
        let rest = path.strip_prefix(self.prefix.as_str())?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }

    /// Decode the part of the path after the prefix. Empty segments count as
    /// absent; cluster-scoped kinds take the name in the second segment.
    pub fn parse_reference(&self, rest: &str) -> GlintResult<ResourceReference> {
        let trimmed = rest.strip_prefix('/').unwrap_or(rest);
        let parts: Vec<&str> = trimmed.split('/').collect();
        if parts.len() > 3 {
            return Err(GlintError::invalid_path(rest, "expected /resource[/namespace[/name]]"));
        }
        let id = self.locator.resolve(parts[0])?;
        let seg = |i: usize| parts.get(i).copied().filter(|s| !s.is_empty()).map(str::to_string);

        if self.locator.mapper().scope_of(&id) == Some(Scope::Cluster) {
            if parts.len() > 2 {
                return Err(GlintError::invalid_path(rest, format!("{} is cluster-scoped: expected /resource[/name]", id)));
            }
            return Ok(ResourceReference { id, namespace: None, name: seg(1) });
        }
        let (namespace, name) = (seg(1), seg(2));
        if namespace.is_none() && name.is_some() {
            return Err(GlintError::invalid_path(rest, "name given without a namespace"));
        }
        Ok(ResourceReference { id, namespace, name })
    }

    /// List, list-by-namespace, or get, as the reference shape asks.
    pub fn query(&self, r: &ResourceReference) -> GlintResult<Value> {
        let index = self.cache.index(&r.id).ok_or_else(|| GlintError::KindNotTracked(r.id.clone()))?;
        debug!(resource = %r.id, ns = ?r.namespace, name = ?r.name, "cache query");
        let objects = match (&r.namespace, r.key()) {
            (_, Some(key)) => {
                let obj = index.get_by_key(&key).ok_or(GlintError::ObjectNotFound(key))?;
                return to_json(&*obj);
            }
            (Some(ns), None) => index.by_namespace(ns)?,
            (None, None) => index.list(),
        };
        let items: Vec<&glint_core::ObjectEnvelope> = objects.iter().map(|o| &**o).collect();
        to_json(&items)
    }
}

fn to_json<T: Serialize + ?Sized>(v: &T) -> GlintResult<Value> {
    serde_json::to_value(v).map_err(|e| GlintError::UpstreamIndex(format!("encoding cached object: {}", e)))
}
