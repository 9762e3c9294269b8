//! Middleware layer.
//!
//! Middleware intercepts a request on its way to the handler and the response
//! on its way out. Each middleware gets the [`Context`] and a [`Next`]
//! continuation: code before `next.run(ctx)` runs on the way in, code after
//! it runs on the way out, and not calling it short-circuits the chain.
//!
//! [`compose`] wraps a handler in a list of middleware, index 0 outermost:
//!
//! ```text
//! compose(h, [a, b])   a: before ─┐
//!                        b: before ─┐
//!                           h       │
//!                        b: after  ─┘
//!                      a: after   ─┘
//! ```
//!
//! Middleware that needs to see or change the response *at commit time*
//! (compression, security headers, access logging) registers a before-commit
//! hook on the [`Response`](crate::Response) instead of acting after `next`.
//!
//! Built-in middleware:
//! - [`Compress`]: negotiated streaming compression
//! - [`Secure`]: security response headers
//! - [`AccessLog`]: one structured event per request

use std::sync::Arc;

use crate::context::Context;
use crate::handler::{BoxedHandler, Handler};

mod compress;
mod log;
mod secure;

pub use compress::{Compress, DEFAULT_MIN_SIZE};
pub use log::{AccessLog, AccessRecord};
pub use secure::{Secure, SecurityPolicy, Setting};

/// A request interceptor.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, ctx: &mut Context, next: Next<'_>);
}

/// A shared middleware, as stored by routers and groups.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// The rest of the chain. Consumed by [`run`](Next::run), so it runs at most
/// once.
pub struct Next<'a> {
    inner: &'a dyn Handler,
}

impl Next<'_> {
    pub fn run(self, ctx: &mut Context) {
        self.inner.call(ctx);
    }
}

/// Wraps `handler` in `middlewares`, index 0 outermost.
pub fn compose(handler: BoxedHandler, middlewares: &[BoxedMiddleware]) -> BoxedHandler {
    middlewares.iter().rev().fold(handler, |next, middleware| {
        Arc::new(Layer { middleware: Arc::clone(middleware), next })
    })
}

struct Layer {
    middleware: BoxedMiddleware,
    next: BoxedHandler,
}

impl Handler for Layer {
    fn call(&self, ctx: &mut Context) {
        self.middleware.handle(ctx, Next { inner: &*self.next });
    }
}

/// Middleware from a closure.
///
/// ```rust
/// use strata::middleware::from_fn;
///
/// let _stamp = from_fn(|ctx, next| {
///     ctx.response.headers_mut().insert("x-served-by", "strata".parse().unwrap());
///     next.run(ctx);
/// });
/// ```
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: Fn(&mut Context, Next<'_>) + Send + Sync + 'static,
{
    FromFn(f)
}

/// See [`from_fn`].
pub struct FromFn<F>(F);

impl<F> Middleware for FromFn<F>
where
    F: Fn(&mut Context, Next<'_>) + Send + Sync + 'static,
{
    fn handle(&self, ctx: &mut Context, next: Next<'_>) {
        (self.0)(ctx, next)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use bytes::Bytes;
    use tracing::Span;

    use crate::context::Context;
    use crate::request::Request;
    use crate::response::Response;
    use crate::transport::Capture;

    /// A context for `req` whose response writes into the returned capture.
    pub fn context(req: http::Request<Bytes>) -> (Context, Capture) {
        let capture = Capture::new();
        let response = Response::new(capture.clone(), capture.clone());
        (Context::new(Request::new(req, None), response, Span::none()), capture)
    }

    pub fn get(path: &str) -> http::Request<Bytes> {
        http::Request::get(path).body(Bytes::new()).unwrap()
    }
}
