use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use glint_core::{GlintConfig, Locator};
use glint_gateway::QueryGateway;
use glint_kubehub::{DiscoveryMapper, KubeWatchSource};
use glint_store::WatchCache;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Resolve the configured resources, start the watch cache, and serve the
/// query gateway until Ctrl-C.
pub async fn run(config: GlintConfig) -> Result<()> {
    if config.resources.is_empty() {
        anyhow::bail!("no resources specified to watch");
    }
    let client = glint_kubehub::connect(&config.kube).await?;
    let mapper = DiscoveryMapper::new(client.clone()).await.context("loading discovery")?;
    let shutdown = CancellationToken::new();
    let refresher = mapper.spawn_refresh(config.kube.discovery_refresh, shutdown.clone());

    let locator = Locator::new(mapper.clone());
    let ids = locator.resolve_many(&config.resources).context("resolving resources")?;
    info!(resources = ?config.resources, resolved = ?ids.iter().map(ToString::to_string).collect::<Vec<_>>(), "starting watch cache");

    let source = KubeWatchSource::new(client, Arc::clone(&mapper));
    let cache = Arc::new(WatchCache::new(&source, ids, config.engine.clone())?);
    let engine = tokio::spawn({
        let cache = Arc::clone(&cache);
        let shutdown = shutdown.clone();
        async move { cache.start(shutdown).await }
    });

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("interrupt received; shutting down"),
                Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
            }
            shutdown.cancel();
        }
    });

    let gateway = Arc::new(QueryGateway::new(Arc::clone(&cache), mapper, &config.gateway.prefix));
    let served = serve_gateway(config.gateway.listen, gateway, shutdown.clone()).await;

    engine.await.context("joining watch cache")??;
    if let Err(e) = refresher.await {
        warn!(error = %e, "discovery refresher failed");
    }
    served
}

/// Serve until `shutdown` fires. Always cancels `shutdown` on return, bind
/// failures included, so the background tasks wind down with it.
async fn serve_gateway(listen: SocketAddr, gateway: Arc<QueryGateway>, shutdown: CancellationToken) -> Result<()> {
    let served = match TcpListener::bind(listen).await.with_context(|| format!("binding {}", listen)) {
        Ok(listener) => glint_gateway::serve(listener, gateway, shutdown.clone()).await,
        Err(e) => Err(e),
    };
    shutdown.cancel();
    served
}

#[cfg(test)]
mod tests {
    use super::*;
    use glint_core::{EngineSettings, MapperSnapshot, ResourceId};
    use glint_store::ChannelSource;

    #[tokio::test]
    async fn bind_failure_cancels_shutdown() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let cache = Arc::new(WatchCache::new(&ChannelSource::new(), Vec::<ResourceId>::new(), EngineSettings::default()).unwrap());
        let gateway = Arc::new(QueryGateway::new(cache, Arc::new(MapperSnapshot::new(Vec::new())), "/api"));
        let shutdown = CancellationToken::new();

        let err = serve_gateway(addr, gateway, shutdown.clone()).await.unwrap_err();
        assert!(err.to_string().contains("binding"));
        assert!(shutdown.is_cancelled());
    }
}
