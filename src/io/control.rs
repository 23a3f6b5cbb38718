//! Control-plane HTTP listener
//!
//! Two GET routes mutate the master pause register:
//! `/pause?duration=<seconds>` (missing or zero duration pauses
//! indefinitely) and `/resume`. Uses hyper for the HTTP server.

use crate::infra::ops::OpsContext;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

pub const CONTROL_PORT: u16 = 8555;

fn respond(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    ctx: Arc<OpsContext>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/pause") => match parse_duration_query(req.uri().query()) {
            Ok(duration) => {
                ctx.pause(duration).await;
                Ok(respond(StatusCode::OK, ""))
            }
            Err(()) => Ok(respond(StatusCode::BAD_REQUEST, "Invalid duration parameter")),
        },
        (&Method::GET, "/resume") => {
            ctx.resume();
            Ok(respond(StatusCode::OK, ""))
        }
        (_, "/pause") | (_, "/resume") => {
            Ok(respond(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"))
        }
        _ => Ok(respond(StatusCode::NOT_FOUND, "Not Found")),
    }
}

/// Extract the pause duration from the query string. Absent, empty, or
/// zero means an indefinite pause.
pub fn parse_duration_query(query: Option<&str>) -> Result<i64, ()> {
    let Some(query) = query else { return Ok(0) };
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("duration=") {
            if value.is_empty() || value == "0" {
                return Ok(0);
            }
            return value.parse::<i64>().map_err(|_| ());
        }
    }
    Ok(0)
}

/// Serve the control plane until shutdown.
pub async fn run_control_server(
    port: u16,
    ctx: Arc<OpsContext>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, "control server started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let ctx = ctx.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let ctx = ctx.clone();
                                async move { handle_request(req, ctx).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "control server connection error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "control server accept error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("control server shutdown");
                    return Ok(());
                }
            }
        }
    }
}
