//! Per-request state passed through middleware and handlers.

use tracing::Span;

use crate::request::Request;
use crate::response::Response;

/// One request/response cycle.
///
/// The fields are public so a handler can read the request while writing the
/// response without fighting the borrow checker.
pub struct Context {
    pub request: Request,
    pub response: Response,
    span: Span,
}

impl Context {
    pub fn new(request: Request, response: Response, span: Span) -> Self {
        Self { request, response, span }
    }

    /// The `request` span every event of this request is recorded in.
    pub fn span(&self) -> &Span {
        &self.span
    }
}
