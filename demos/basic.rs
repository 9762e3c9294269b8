//! Minimal strata demo: JSON endpoints behind access logging, security
//! headers and compression, served by hyper-util with graceful shutdown.
//!
//! Run with:
//!   STRATA_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/users/42
//!   curl -i --compressed http://localhost:3000/report
//!   curl -i -X POST http://localhost:3000/users -d '{"name":"alice"}'
//!   curl -i -X DELETE http://localhost:3000/report

use std::io::Write;

use http::Method;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName, HeaderValue, LOCATION};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use strata::middleware::{AccessLog, Secure};
use strata::{Config, Context, Group, Router, logging};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    logging::init(&config.log_filter)?;

    let service = app(&config).into_service();
    let listener = TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, "strata demo listening");

    let mut tasks = tokio::task::JoinSet::new();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            () = &mut shutdown => {
                info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let svc = service.clone().with_remote_addr(remote_addr);
                tasks.spawn(async move {
                    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), svc)
                        .await
                    {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                });
            }

            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    while tasks.join_next().await.is_some() {}

    info!("strata demo stopped");
    Ok(())
}

fn app(config: &Config) -> Router {
    let mut router = Router::new();

    if config.access_log {
        router = router.layer(AccessLog::new().header(HeaderName::from_static("x-request-id")));
    }
    if config.security_headers {
        router = router.layer(Secure::default());
    }
    if let Some(compress) = config.compress() {
        router = router.layer(compress);
    }

    router
        .on(Method::GET, "/report", report)
        .group(
            Group::new("/users")
                .on(Method::GET, "/{id}", get_user)
                .on(Method::POST, "/", create_user),
        )
}

// GET /users/{id}
fn get_user(ctx: &mut Context) {
    let id = ctx.request.param("id").unwrap_or("unknown").to_owned();
    if let Err(e) = ctx.response.write_json(&serde_json::json!({ "id": id, "name": "alice" })) {
        error!(error = %e, "failed to write user");
    }
}

// POST /users/
fn create_user(ctx: &mut Context) {
    if ctx.request.body().is_empty() {
        ctx.response.error_message(400, "request body required");
        return;
    }

    let location = HeaderValue::from_static("/users/99");
    ctx.response.headers_mut().insert(LOCATION, location);
    ctx.response.write_header(201);
}

// GET /report: a large text body, compressed when the client allows it.
fn report(ctx: &mut Context) {
    let line = "strata streams this line through whatever encoder was negotiated\n";
    let lines = 200;

    let headers = ctx.response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(line.len() * lines));

    for _ in 0..lines {
        if let Err(e) = ctx.response.write_all(line.as_bytes()) {
            error!(error = %e, "report write failed");
            return;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
