use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use metrics::{counter, histogram};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::query::{QueryGateway, Reply, ReplyBody};

const REQUEST_ID: &str = "x-request-id";

/// Single fallback route: every path goes through [`QueryGateway::handle`].
pub fn router(gateway: Arc<QueryGateway>) -> Router {
    Router::new().fallback(dispatch).with_state(gateway).layer(middleware::from_fn(log_requests))
}

/// Serve until `shutdown` is cancelled; in-flight requests finish first.
pub async fn serve(listener: TcpListener, gateway: Arc<QueryGateway>, shutdown: CancellationToken) -> Result<()> {
    let addr = listener.local_addr().context("reading listener address")?;
    info!(%addr, prefix = gateway.prefix(), "query gateway listening");
    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("serving query gateway")?;
    info!("query gateway stopped");
    Ok(())
}

async fn dispatch(State(gateway): State<Arc<QueryGateway>>, req: Request) -> Response {
    let reply = gateway.handle(req.uri().path());
    reply.into_response()
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        match self.body {
            ReplyBody::Json(v) => (self.status, Json(v)).into_response(),
            ReplyBody::Text(t) => (self.status, t).into_response(),
        }
    }
}

async fn log_requests(mut req: Request, next: Next) -> Response {
    let started = Instant::now();
    let id = req
        .headers()
        .get(REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if let Ok(v) = HeaderValue::from_str(&id) {
        req.headers_mut().insert(REQUEST_ID, v);
    }
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut resp = next.run(req).await;

    let status = resp.status();
    let elapsed = started.elapsed();
    if let Ok(v) = HeaderValue::from_str(&id) {
        resp.headers_mut().insert(REQUEST_ID, v);
    }
    resp.headers_mut().entry(header::CACHE_CONTROL).or_insert(HeaderValue::from_static("no-store"));
    counter!("glint_gateway_requests_total", 1u64, "status" => status.as_u16().to_string());
    histogram!("glint_gateway_request_seconds", elapsed.as_secs_f64());
    info!(request_id = %id, %method, path = %path, status = status.as_u16(), elapsed_ms = elapsed.as_millis() as u64, "request");
    resp
}
