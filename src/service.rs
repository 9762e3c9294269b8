//! The request adapter between hyper and the synchronous pipeline.
//!
//! For every request, [`Service`]:
//!
//! 1. collects the body (`400 Bad Request` if that fails),
//! 2. moves to tokio's blocking pool, since handlers and encoders block,
//! 3. builds the [`Request`], a [`Response`] over a [`Capture`] transport and
//!    the `request` tracing span,
//! 4. runs the handler chain, recovering from panics,
//! 5. commits `200 OK` if nothing was written, runs the completion callbacks
//!    and closes every body sink,
//! 6. turns the capture into an `http::Response`.
//!
//! A panic before the response is committed becomes a
//! `500 Internal Server Error`. That includes a panic in a before-commit
//! hook, since the transport has not seen the status yet. After the commit
//! the status is already fixed and the panic is only logged.

use std::any::Any;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use tracing::{error, field, info_span, warn};

use crate::context::Context;
use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::response::Response;
use crate::transport::Capture;

/// A cloneable hyper service running one handler chain.
///
/// Usually obtained from [`Router::into_service`](crate::Router::into_service).
#[derive(Clone)]
pub struct Service {
    handler: BoxedHandler,
    remote_addr: Option<SocketAddr>,
}

impl Service {
    pub fn new(handler: BoxedHandler) -> Self {
        Self { handler, remote_addr: None }
    }

    /// The peer address reported by [`Request::remote_addr`]. Set it on the
    /// per-connection clone.
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Runs the pipeline for one request with a collected body.
    ///
    /// Blocks for as long as the handler does; async callers go through the
    /// hyper [`Service`](hyper::service::Service) impl instead.
    pub fn handle(&self, req: http::Request<Bytes>) -> http::Response<Full<Bytes>> {
        let span = info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            headers = field::Empty,
        );
        let _entered = span.enter();

        let capture = Capture::new();
        let response = Response::new(capture.clone(), capture.clone());
        let mut ctx = Context::new(Request::new(req, self.remote_addr), response, span.clone());

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.handler.call(&mut ctx);
            if !ctx.response.written() {
                ctx.response.write_header(StatusCode::OK.as_u16());
            }
        }));

        if let Err(payload) = outcome {
            let message = panic_message(payload.as_ref());
            if ctx.response.committed() {
                error!(panic = message, "handler panicked after the response was committed");
            } else {
                if ctx.response.abort_commit() {
                    error!(panic = message, "before-commit hook panicked");
                } else {
                    error!(panic = message, "handler panicked");
                }
                ctx.response.error(StatusCode::INTERNAL_SERVER_ERROR.as_u16());
            }
        }

        if let Err(e) = ctx.response.complete() {
            error!(error = %e, "failed to finish response body");
        }

        capture.into_http()
    }
}

/// A bare error response, for failures outside the handler chain.
fn failure(status: StatusCode) -> http::Response<Full<Bytes>> {
    let capture = Capture::new();
    let mut response = Response::new(capture.clone(), capture.clone());
    response.error(status.as_u16());

    if let Err(e) = response.complete() {
        error!(error = %e, "failed to finish error response");
    }

    capture.into_http()
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

impl<B> hyper::service::Service<http::Request<B>> for Service
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: std::fmt::Display,
{
    type Response = http::Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<B>) -> Self::Future {
        let service = self.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!(error = %e, "failed to read request body");
                    return Ok(failure(StatusCode::BAD_REQUEST));
                }
            };

            let req = http::Request::from_parts(parts, body);
            match tokio::task::spawn_blocking(move || service.handle(req)).await {
                Ok(response) => Ok(response),
                Err(e) => {
                    error!(error = %e, "request task failed");
                    Ok(failure(StatusCode::INTERNAL_SERVER_ERROR))
                }
            }
        })
    }
}
