//! # strata
//!
//! Write-once HTTP responses, onion middleware and content negotiation on top
//! of hyper.
//!
//! ## The model
//!
//! A request runs through a chain of synchronous [`Handler`]s sharing one
//! [`Context`]. The [`Response`] in it commits exactly once: the first
//! [`write_header`](Response::write_header), explicit or triggered by the
//! first body write, runs every before-commit hook (newest first) and then
//! hands status and headers to the transport.
//!
//! Middleware uses those hooks to act at the last moment the headers can
//! still change:
//!
//! - [`Compress`](middleware::Compress) swaps the body sink for a `br`,
//!   `zstd`, `gzip` or `deflate` encoder picked by the [`Negotiator`],
//! - [`Secure`](middleware::Secure) fills in browser security headers,
//! - [`AccessLog`](middleware::AccessLog) records the status and headers
//!   that actually went out.
//!
//! The [`Service`] adapter runs the chain on tokio's blocking pool, turns
//! panics into `500`s and closes the body encoders once the handler returns.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::Method;
//! use strata::middleware::{AccessLog, Compress, Secure};
//! use strata::{Context, Router};
//!
//! let service = Router::new()
//!     .layer(AccessLog::new())
//!     .layer(Secure::default())
//!     .layer(Compress::new())
//!     .on(Method::GET, "/users/{id}", get_user)
//!     .into_service();
//! // hand `service` to a hyper connection builder; see demos/basic.rs
//!
//! fn get_user(ctx: &mut Context) {
//!     let id = ctx.request.param("id").unwrap_or("unknown").to_owned();
//!     if let Err(e) = ctx.response.write_json(&serde_json::json!({ "id": id })) {
//!         tracing::error!(error = %e, "failed to write user");
//!     }
//! }
//! ```

mod context;
mod error;
mod handler;
mod negotiate;
mod request;
mod response;
mod router;
mod service;

pub mod codec;
pub mod config;
pub mod headers;
pub mod logging;
pub mod middleware;
pub mod transport;

pub use config::Config;
pub use context::Context;
pub use error::Error;
pub use handler::{BoxedHandler, Handler};
pub use negotiate::{MAX_QUALITY, Negotiator};
pub use request::Request;
pub use response::{Completion, ContentType, Hook, HookHandle, Response};
pub use router::{Group, Router};
pub use service::Service;
