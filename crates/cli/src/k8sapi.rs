use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use glint_apply::{BatchOptions, ManifestLimits, Outcome};
use glint_core::{KubeSettings, Locator};
use glint_kubehub::DiscoveryMapper;
use kube::Client;
use tracing::info;

use crate::output::{self, DiscoverFormat, ListFormat};

async fn connect(kube: &KubeSettings) -> Result<(Client, Arc<DiscoveryMapper>)> {
    let client = glint_kubehub::connect(kube).await?;
    let mapper = DiscoveryMapper::new(client.clone()).await.context("loading discovery")?;
    Ok((client, mapper))
}

pub async fn discover(kube: &KubeSettings, format: DiscoverFormat) -> Result<()> {
    let (_, mapper) = connect(kube).await?;
    let snapshot = mapper.snapshot();
    info!(resources = snapshot.len(), "discover");
    println!("{}", output::render_discovery(snapshot.entries(), format)?);
    Ok(())
}

pub async fn list(kube: &KubeSettings, token: &str, namespace: Option<&str>, format: ListFormat) -> Result<()> {
    let (client, mapper) = connect(kube).await?;
    let id = Locator::new(mapper.clone()).resolve(token)?;
    let objects = glint_apply::list_objects(&client, &mapper, &id, namespace).await?;
    match namespace {
        Some(ns) => eprintln!("Found {} {} in '{}' namespace:", objects.len(), id.resource, ns),
        None => eprintln!("Found {} {} in all namespaces:", objects.len(), id.resource),
    }
    let rendered = output::render_objects(&objects, format, chrono::Utc::now())?;
    if !rendered.is_empty() {
        println!("{}", rendered.trim_end());
    }
    Ok(())
}

pub async fn apply(kube: &KubeSettings, filenames: &[PathBuf], dry_run: bool, namespace: Option<String>) -> Result<()> {
    let objects = glint_apply::read_objects(filenames, ManifestLimits::from_env())?;
    let (client, mapper) = connect(kube).await?;
    let outcomes = glint_apply::apply_objects(&client, &mapper, &objects, &BatchOptions { namespace, dry_run }).await?;
    report(&outcomes, "applied");
    Ok(())
}

/// `args` is `<token> <name>...`; manifests in `filenames` are deleted too.
pub async fn delete(kube: &KubeSettings, args: &[String], filenames: &[PathBuf], dry_run: bool, namespace: Option<String>) -> Result<()> {
    if args.is_empty() && filenames.is_empty() {
        bail!("nothing to delete: pass <resource> <name>... or -f <manifest>");
    }
    if args.len() == 1 {
        bail!("no resource names provided for {}", args[0]);
    }
    let objects = if filenames.is_empty() { Vec::new() } else { glint_apply::read_objects(filenames, ManifestLimits::from_env())? };
    let (client, mapper) = connect(kube).await?;
    let opts = BatchOptions { namespace, dry_run };

    if let Some((token, names)) = args.split_first() {
        let id = Locator::new(mapper.clone()).resolve(token)?;
        report(&glint_apply::delete_named(&client, &mapper, &id, names, &opts).await?, "deleted");
    }
    if !objects.is_empty() {
        report(&glint_apply::delete_objects(&client, &mapper, &objects, &opts).await?, "deleted");
    }
    Ok(())
}

fn report(outcomes: &[Outcome], verb: &str) {
    for o in outcomes {
        let target = match &o.namespace {
            Some(ns) => format!("{} {}/{}", o.resource, ns, o.name),
            None => format!("{} {}", o.resource, o.name),
        };
        let suffix = if o.dry_run { " (server dry run)" } else { "" };
        println!("{} {}{}", target, verb, suffix);
    }
}
