//! Admin HTTP server for metrics scrapes and health checks

use crate::controller::ControllerState;
use crate::metrics::QueueMetrics;
use crate::report;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bind the admin server serving /metrics, /healthz and /readyz and run it
/// in the background until `shutdown` is cancelled.
///
/// Returns the bound address (useful with port 0) and the server task.
pub fn spawn_admin(
    addr: SocketAddr,
    metrics: Arc<QueueMetrics>,
    state: watch::Receiver<ControllerState>,
    shutdown: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<()>), hyper::Error> {
    let make_svc = make_service_fn(move |_: &AddrStream| {
        let metrics = metrics.clone();
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                let state = state.clone();
                async move { Ok::<_, Infallible>(handle(&req, &metrics, &state)) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    let local_addr = server.local_addr();
    let graceful = server.with_graceful_shutdown(async move { shutdown.cancelled().await });

    let handle = tokio::spawn(async move {
        if let Err(e) = graceful.await {
            tracing::error!("Admin HTTP server error: {}", e);
        }
    });

    Ok((local_addr, handle))
}

fn text(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

fn handle(
    req: &Request<Body>,
    metrics: &QueueMetrics,
    state: &watch::Receiver<ControllerState>,
) -> Response<Body> {
    let path = req.uri().path();
    let response = match path {
        "/healthz" => text(StatusCode::OK, "ok\n"),

        "/readyz" => match *state.borrow() {
            ControllerState::Polling => text(StatusCode::OK, "ready\n"),
            _ => text(StatusCode::SERVICE_UNAVAILABLE, "not ready\n"),
        },

        "/metrics" => match metrics.encode() {
            Ok(body) => {
                let mut response = Response::new(Body::from(body));
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static(metrics.content_type()),
                );
                response
            }
            Err(e) => {
                tracing::error!("Failed to encode metrics: {}", e);
                text(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable\n")
            }
        },

        _ => text(StatusCode::NOT_FOUND, "not found\n"),
    };

    report::admin_http_request(path, response.status().as_u16());
    response
}
