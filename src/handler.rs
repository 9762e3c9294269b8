//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! The router holds handlers of *different* types in one
//! `HashMap<Method, Tree>`, and middleware wraps them in further types. All of
//! them are erased to the same trait object:
//!
//! ```text
//! fn hello(ctx: &mut Context) { … }          ← user writes this
//!        ↓ router.on(Method::GET, "/", hello)
//! Arc::new(hello)                            ← BoxedHandler = Arc<dyn Handler>
//!        ↓ compose(handler, &middlewares)
//! Arc<Layer { middleware, next: handler }>   ← still a BoxedHandler
//!        ↓
//! handler.call(&mut ctx)  at request time    ← one vtable dispatch per layer
//! ```
//!
//! Handlers run synchronously on tokio's blocking pool, so a handler may read
//! files or block on I/O without stalling the async workers.

use std::sync::Arc;

use crate::context::Context;

/// Something that can handle a request: a route handler, or a route handler
/// already wrapped in middleware.
///
/// Implemented for every `Fn(&mut Context)`.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: &mut Context);
}

impl<F> Handler for F
where
    F: Fn(&mut Context) + Send + Sync + 'static,
{
    fn call(&self, ctx: &mut Context) {
        self(ctx)
    }
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn Handler>;
