use anyhow::{Context, Result};
use glint_core::KubeSettings;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::info;

/// Build a client from explicit settings: in-cluster, a given kubeconfig file
/// (optionally a named context), or the usual inference chain.
pub async fn connect(settings: &KubeSettings) -> Result<Client> {
    let opts = KubeConfigOptions { context: settings.context.clone(), ..KubeConfigOptions::default() };
    let config = if settings.in_cluster {
        Config::incluster().context("loading in-cluster config")?
    } else if let Some(path) = &settings.kubeconfig {
        let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
        Config::from_custom_kubeconfig(kc, &opts).await.context("building config from kubeconfig")?
    } else if settings.context.is_some() {
        Config::from_kubeconfig(&opts).await.context("building config for context")?
    } else {
        Config::infer().await.context("inferring kube config")?
    };
    info!(cluster = %config.cluster_url, default_ns = %config.default_namespace, "kube config loaded");
    Client::try_from(config).context("creating kube client")
}
