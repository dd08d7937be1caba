//! Liveness and per-app status endpoints for external uptime monitors.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use anyhow::Context;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    body::Incoming, header, server::conn::http1, service::service_fn, Method, Request, Response,
    StatusCode, Uri,
};
use hyper_util::rt::TokioIo;
use pyhost_core::{domain::TargetId, supervisor::Supervisor};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const ALIVE: &str = "🤖 Python Host Bot is Alive!";

/// Resolve a request to a status code and plain-text body.
pub async fn route(supervisor: &Supervisor, method: &Method, uri: &Uri) -> (StatusCode, String) {
    if *method != Method::GET && *method != Method::HEAD {
        return (StatusCode::NOT_FOUND, "Not Found".to_string());
    }

    match uri.path() {
        "/" => (StatusCode::OK, ALIVE.to_string()),
        "/status" => {
            let script = uri
                .query()
                .and_then(|q| {
                    url::form_urlencoded::parse(q.as_bytes())
                        .find(|(k, _)| k == "script")
                        .map(|(_, v)| v.into_owned())
                })
                .filter(|s| !s.trim().is_empty());
            let Some(script) = script else {
                return (StatusCode::BAD_REQUEST, "Specify script".to_string());
            };

            // Ids that do not parse can never be running.
            let running = match TargetId::parse(&script) {
                Ok(target) => supervisor.is_running(&target).await,
                Err(_) => false,
            };
            if running {
                (StatusCode::OK, format!("✅ {script} is running."))
            } else {
                (StatusCode::NOT_FOUND, format!("❌ {script} is stopped."))
            }
        }
        _ => (StatusCode::NOT_FOUND, "Not Found".to_string()),
    }
}

async fn handle(
    supervisor: Arc<Supervisor>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (status, body) = route(&supervisor, req.method(), req.uri()).await;
    debug!(method = %req.method(), path = %req.uri().path(), status = status.as_u16(), "http request");

    let mut resp = Response::new(Full::new(Bytes::from(body)));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    Ok(resp)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(
    addr: SocketAddr,
    supervisor: Arc<Supervisor>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status server on {addr}"))?;
    info!(addr = %listener.local_addr().unwrap_or(addr), "status server listening");
    serve_listener(listener, supervisor, shutdown).await
}

/// Accept loop over an already bound listener.
pub async fn serve_listener(
    listener: TcpListener,
    supervisor: Arc<Supervisor>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("status server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };

        let supervisor = supervisor.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| handle(supervisor.clone(), req));
            let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
            tokio::select! {
                res = conn => {
                    if let Err(e) = res {
                        debug!(peer = %peer, error = %e, "http connection error");
                    }
                }
                _ = shutdown.cancelled() => {}
            }
        });
    }
}
