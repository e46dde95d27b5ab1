//! Metadata resolution: maps partial resource guesses onto served kinds.

use serde::{Deserialize, Serialize};

use crate::{MapperError, PartialResourceId, ResourceId, Scope};

/// Live-metadata resolution capability (discovery-backed in production).
///
/// Implementations must answer from memory; the query gateway calls this on
/// every request.
pub trait ResourceMapper: Send + Sync {
    fn resource_for(&self, partial: &PartialResourceId) -> Result<ResourceId, MapperError>;

    /// Scope of a served kind, if known.
    fn scope_of(&self, _id: &ResourceId) -> Option<Scope> { None }
}

/// One served resource as reported by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResourceEntry {
    pub group: String,
    pub version: String,
    /// Plural resource name, e.g. `deployments`.
    pub resource: String,
    /// Singular name, e.g. `deployment`.
    pub singular: String,
    pub kind: String,
    pub short_names: Vec<String>,
    pub namespaced: bool,
}

impl ApiResourceEntry {
    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.group.clone(), self.version.clone(), self.resource.clone())
    }

    pub fn scope(&self) -> Scope {
        if self.namespaced { Scope::Namespaced } else { Scope::Cluster }
    }

    fn matches(&self, p: &PartialResourceId) -> bool {
        (self.resource == p.resource || self.singular == p.resource)
            && p.group.as_deref().map_or(true, |g| g == self.group)
            && p.version.as_deref().map_or(true, |v| v == self.version)
    }
}

/// Point-in-time discovery document.
///
/// `entries` is in priority order: the first match wins, so callers insert the
/// core group first and each group's preferred version before the others.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapperSnapshot {
    entries: Vec<ApiResourceEntry>,
}

impl MapperSnapshot {
    pub fn new(entries: Vec<ApiResourceEntry>) -> Self { Self { entries } }

    pub fn entries(&self) -> &[ApiResourceEntry] { &self.entries }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn entry(&self, id: &ResourceId) -> Option<&ApiResourceEntry> {
        self.entries.iter().find(|e| e.group == id.group && e.version == id.version && e.resource == id.resource)
    }

    /// Rewrite a short name (`deploy`) into its plural, keeping the caller's
    /// version. Group-restricted guesses only expand within that group.
    fn expand_short_name(&self, p: &PartialResourceId) -> Option<PartialResourceId> {
        self.entries
            .iter()
            .filter(|e| p.group.as_deref().map_or(true, |g| g == e.group))
            .find(|e| e.short_names.iter().any(|s| *s == p.resource))
            .map(|e| PartialResourceId { group: Some(e.group.clone()), version: p.version.clone(), resource: e.resource.clone() })
    }
}

impl ResourceMapper for MapperSnapshot {
    fn resource_for(&self, partial: &PartialResourceId) -> Result<ResourceId, MapperError> {
        if partial.resource.is_empty() {
            return Err(MapperError::NoMatch(partial.clone()));
        }
        if let Some(e) = self.entries.iter().find(|e| e.matches(partial)) {
            return Ok(e.id());
        }
        self.expand_short_name(partial)
            .and_then(|expanded| self.entries.iter().find(|e| e.matches(&expanded)))
            .map(ApiResourceEntry::id)
            .ok_or_else(|| MapperError::NoMatch(partial.clone()))
    }

    fn scope_of(&self, id: &ResourceId) -> Option<Scope> {
        self.entry(id).map(ApiResourceEntry::scope)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn entry(group: &str, version: &str, resource: &str, kind: &str, short: &[&str], namespaced: bool) -> ApiResourceEntry {
        ApiResourceEntry {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
            singular: kind.to_lowercase(),
            kind: kind.into(),
            short_names: short.iter().map(|s| s.to_string()).collect(),
            namespaced,
        }
    }

    pub(crate) fn sample() -> MapperSnapshot {
        MapperSnapshot::new(vec![
            entry("", "v1", "pods", "Pod", &["po"], true),
            entry("", "v1", "nodes", "Node", &["no"], false),
            entry("", "v1", "events", "Event", &["ev"], true),
            entry("apps", "v1", "deployments", "Deployment", &["deploy"], true),
            entry("events.k8s.io", "v1", "events", "Event", &["ev"], true),
            entry("apps.example.com", "v1", "widgets", "Widget", &["wd"], true),
            entry("apps.example.com", "v1beta1", "widgets", "Widget", &["wd"], true),
        ])
    }

    #[test]
    fn plural_and_singular_match() {
        let m = sample();
        assert_eq!(m.resource_for(&PartialResourceId::named("deployments")).unwrap(), ResourceId::new("apps", "v1", "deployments"));
        assert_eq!(m.resource_for(&PartialResourceId::named("deployment")).unwrap(), ResourceId::new("apps", "v1", "deployments"));
    }

    #[test]
    fn short_names_expand() {
        let m = sample();
        assert_eq!(m.resource_for(&PartialResourceId::named("deploy")).unwrap(), ResourceId::new("apps", "v1", "deployments"));
        assert_eq!(m.resource_for(&PartialResourceId::named("po")).unwrap(), ResourceId::new("", "v1", "pods"));
    }

    #[test]
    fn priority_prefers_earlier_entries() {
        let m = sample();
        assert_eq!(m.resource_for(&PartialResourceId::named("events")).unwrap(), ResourceId::new("", "v1", "events"));
        let pinned = PartialResourceId { group: Some("events.k8s.io".into()), ..PartialResourceId::named("events") };
        assert_eq!(m.resource_for(&pinned).unwrap(), ResourceId::new("events.k8s.io", "v1", "events"));
        let wd = PartialResourceId { group: Some("apps.example.com".into()), version: Some("v1beta1".into()), resource: "wd".into() };
        assert_eq!(m.resource_for(&wd).unwrap(), ResourceId::new("apps.example.com", "v1beta1", "widgets"));
    }

    #[test]
    fn misses_are_no_match() {
        let m = sample();
        assert!(matches!(m.resource_for(&PartialResourceId::named("")), Err(MapperError::NoMatch(_))));
        assert!(matches!(m.resource_for(&PartialResourceId::named("Deployments")), Err(MapperError::NoMatch(_))));
        let wrong_group = PartialResourceId { group: Some("batch".into()), ..PartialResourceId::named("deploy") };
        assert!(matches!(m.resource_for(&wrong_group), Err(MapperError::NoMatch(_))));
    }

    #[test]
    fn scope_lookup() {
        let m = sample();
        assert_eq!(m.scope_of(&ResourceId::new("", "v1", "nodes")), Some(Scope::Cluster));
        assert_eq!(m.scope_of(&ResourceId::new("apps", "v1", "deployments")), Some(Scope::Namespaced));
        assert_eq!(m.scope_of(&ResourceId::new("apps", "v2", "deployments")), None);
    }
}
