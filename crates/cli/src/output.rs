use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use glint_core::{ApiResourceEntry, ObjectEnvelope};
use serde_json::json;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum DiscoverFormat {
    Human,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ListFormat {
    Json,
    Yaml,
    Name,
    Table,
}

pub fn render_discovery(entries: &[ApiResourceEntry], format: DiscoverFormat) -> Result<String> {
    Ok(match format {
        DiscoverFormat::Json => serde_json::to_string_pretty(entries)?,
        DiscoverFormat::Human => entries
            .iter()
            .map(|e| {
                let scope = if e.namespaced { "namespaced" } else { "cluster" };
                let short = if e.short_names.is_empty() { String::new() } else { format!(" ({})", e.short_names.join(",")) };
                format!("{} • {}{} • {} • {}", e.id().api_version(), e.resource, short, e.kind, scope)
            })
            .collect::<Vec<_>>()
            .join("\n"),
    })
}

/// Render a listing the way `kubectl get -o <format>` would, close enough for
/// scripting against.
pub fn render_objects(objects: &[ObjectEnvelope], format: ListFormat, now: DateTime<Utc>) -> Result<String> {
    Ok(match format {
        ListFormat::Json => serde_json::to_string_pretty(&as_list(objects))?,
        ListFormat::Yaml => serde_yaml::to_string(&as_list(objects))?,
        ListFormat::Name => objects.iter().map(qualified_name).collect::<Vec<_>>().join("\n"),
        ListFormat::Table => table(objects, now),
    })
}

fn as_list(objects: &[ObjectEnvelope]) -> serde_json::Value {
    json!({ "apiVersion": "v1", "kind": "List", "items": objects })
}

/// `deployment.apps/web`; the core group has no suffix.
pub fn qualified_name(obj: &ObjectEnvelope) -> String {
    let (group, _) = obj.group_version();
    let kind = obj.kind.to_lowercase();
    if group.is_empty() {
        format!("{}/{}", kind, obj.name())
    } else {
        format!("{}.{}/{}", kind, group, obj.name())
    }
}

fn table(objects: &[ObjectEnvelope], now: DateTime<Utc>) -> String {
    let mut rows = vec![["NAMESPACE".to_string(), "NAME".to_string(), "AGE".to_string(), "LABELS".to_string()]];
    for o in objects {
        let labels = o.metadata.labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",");
        rows.push([
            o.namespace().unwrap_or("").to_string(),
            qualified_name(o),
            render_age(o.metadata.creation_timestamp.as_deref(), now),
            if labels.is_empty() { "<none>".to_string() } else { labels },
        ]);
    }
    let mut widths = [0usize; 4];
    for r in &rows {
        for (w, c) in widths.iter_mut().zip(r.iter()) {
            *w = (*w).max(c.chars().count());
        }
    }
    rows.iter()
        .map(|r| {
            let cells: Vec<String> = r.iter().zip(widths.iter()).map(|(c, w)| format!("{:<width$}", c, width = w)).collect();
            cells.join("   ").trim_end().to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Compact age (`3d4h`, `2h5m`, `7m`, `12s`); `-` when unknown.
pub fn render_age(created: Option<&str>, now: DateTime<Utc>) -> String {
    let Some(ts) = created.and_then(|s| DateTime::parse_from_rfc3339(s).ok()) else { return "-".to_string() };
    let mut secs = (now - ts.with_timezone(&Utc)).num_seconds().max(0) as u64;
    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3600;
    secs %= 3600;
    let mins = secs / 60;
    secs %= 60;
    if days > 0 {
        format!("{}d{}h", days, hours)
    } else if hours > 0 {
        format!("{}h{}m", hours, mins)
    } else if mins > 0 {
        format!("{}m", mins)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-10T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn web() -> ObjectEnvelope {
        let mut o = ObjectEnvelope::new("apps/v1", "Deployment", Some("default"), "web");
        o.metadata.creation_timestamp = Some("2024-05-08T09:30:00Z".into());
        o.metadata.labels.insert("app".into(), "web".into());
        o
    }

    #[test]
    fn ages() {
        assert_eq!(render_age(Some("2024-05-08T09:30:00Z"), now()), "2d2h");
        assert_eq!(render_age(Some("2024-05-10T10:55:00Z"), now()), "1h5m");
        assert_eq!(render_age(Some("2024-05-10T11:53:00Z"), now()), "7m");
        assert_eq!(render_age(Some("2024-05-10T11:59:48Z"), now()), "12s");
        assert_eq!(render_age(Some("2024-05-11T00:00:00Z"), now()), "0s");
        assert_eq!(render_age(Some("yesterday"), now()), "-");
        assert_eq!(render_age(None, now()), "-");
    }

    #[test]
    fn names_carry_the_group() {
        assert_eq!(qualified_name(&web()), "deployment.apps/web");
        assert_eq!(qualified_name(&ObjectEnvelope::new("v1", "ConfigMap", Some("a"), "c")), "configmap/c");
    }

    #[test]
    fn table_has_header_and_aligned_rows() {
        let out = render_objects(&[web()], ListFormat::Table, now()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("NAMESPACE"));
        assert_eq!(lines[0].find("NAME "), lines[1].find("deployment.apps/web"));
        assert!(lines[1].ends_with("app=web"));
    }

    #[test]
    fn json_and_yaml_wrap_items_in_a_list() {
        let out = render_objects(&[web()], ListFormat::Json, now()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["kind"], "List");
        assert_eq!(v["items"][0]["metadata"]["name"], "web");

        let y = render_objects(&[web()], ListFormat::Yaml, now()).unwrap();
        assert!(y.contains("kind: List"));
        assert!(y.contains("name: web"));
    }

    #[test]
    fn discovery_lines() {
        let e = ApiResourceEntry {
            group: "apps".into(),
            version: "v1".into(),
            resource: "deployments".into(),
            singular: "deployment".into(),
            kind: "Deployment".into(),
            short_names: vec!["deploy".into()],
            namespaced: true,
        };
        assert_eq!(render_discovery(&[e], DiscoverFormat::Human).unwrap(), "apps/v1 • deployments (deploy) • Deployment • namespaced");
    }
}
