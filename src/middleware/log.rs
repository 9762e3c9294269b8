//! Access logging.
//!
//! [`AccessLog`] emits one `info` event per request, after the rest of the
//! chain has returned:
//!
//! ```text
//! INFO request{method=GET path=/users/7}: incoming request url=/users/7 method=GET
//!      remote_addr=10.0.0.4:51234 referer= user_agent=curl/8.5.0 http_version=HTTP/1.1
//!      response_status=200 response_type=application/json response_encoding=gzip
//!      response_time=3 total_time=4
//! ```
//!
//! Status and response headers are read in a before-commit hook. Placed
//! outside [`Compress`](crate::middleware::Compress), that hook runs after
//! compression's, so `response_encoding` is the coding actually sent.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderName};
use http::{Method, StatusCode, Version};
use tracing::info;

use crate::context::Context;
use crate::headers;
use crate::middleware::{Middleware, Next};

type Observer = Arc<dyn Fn(&AccessRecord) + Send + Sync>;

/// One served request, as logged by [`AccessLog`].
#[derive(Clone, Debug)]
pub struct AccessRecord {
    pub url: String,
    pub method: Method,
    pub remote_addr: Option<SocketAddr>,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub http_version: Version,
    pub response_status: StatusCode,
    pub response_type: Option<String>,
    pub response_encoding: Option<String>,
    /// From the start of the middleware to the response commit.
    pub response_time: Duration,
    /// From the start of the middleware to the end of the chain.
    pub total_time: Duration,
}

/// Access-log middleware.
///
/// ```rust
/// use http::header::HeaderName;
/// use strata::middleware::AccessLog;
///
/// let log = AccessLog::new().header(HeaderName::from_static("x-request-id"));
/// ```
#[derive(Clone, Default)]
pub struct AccessLog {
    headers: Vec<HeaderName>,
    requests_disabled: bool,
    observer: Option<Observer>,
}

impl AccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request header on the request span, so every event logged
    /// while handling the request carries it.
    pub fn header(mut self, name: HeaderName) -> Self {
        self.headers.push(name);
        self
    }

    /// Skips the per-request event; header recording still applies.
    pub fn disable_requests(mut self) -> Self {
        self.requests_disabled = true;
        self
    }

    /// Also hands every record to `observer`, e.g. to ship it elsewhere.
    pub fn observe<F>(mut self, observer: F) -> Self
    where
        F: Fn(&AccessRecord) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    fn record_headers(&self, ctx: &Context) {
        if self.headers.is_empty() {
            return;
        }

        let mut fields = String::new();
        for name in &self.headers {
            let value = headers::get_str(ctx.request.headers(), name).unwrap_or("");
            if !fields.is_empty() {
                fields.push(' ');
            }
            let _ = write!(fields, "{}={value:?}", field_name(name.as_str()));
        }

        ctx.span().record("headers", tracing::field::display(&fields));
    }
}

struct Committed {
    status: StatusCode,
    at: Instant,
    content_type: Option<String>,
    content_encoding: Option<String>,
}

impl Middleware for AccessLog {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) {
        let start = Instant::now();
        self.record_headers(ctx);

        if self.requests_disabled {
            next.run(ctx);
            return;
        }

        let committed = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&committed);
        ctx.response.register_before_commit(move |status, res| {
            let headers = res.headers();
            *slot.borrow_mut() = Some(Committed {
                status,
                at: Instant::now(),
                content_type: headers::get_str(headers, &CONTENT_TYPE).map(str::to_owned),
                content_encoding: headers::get_str(headers, &CONTENT_ENCODING).map(str::to_owned),
            });
        });

        next.run(ctx);

        // Commit the implicit 200 here so the hook sees the final headers.
        if !ctx.response.written() {
            ctx.response.write_header(StatusCode::OK.as_u16());
        }

        let Some(committed) = committed.take() else {
            return;
        };

        let req = &ctx.request;
        let record = AccessRecord {
            url: req.uri().to_string(),
            method: req.method().clone(),
            remote_addr: req.remote_addr(),
            referer: req.referer().map(str::to_owned),
            user_agent: req.user_agent().map(str::to_owned),
            http_version: req.version(),
            response_status: committed.status,
            response_type: committed.content_type,
            response_encoding: committed.content_encoding,
            response_time: committed.at.saturating_duration_since(start),
            total_time: start.elapsed(),
        };

        info!(
            url = %record.url,
            method = %record.method,
            remote_addr = %record.remote_addr.map(|a| a.to_string()).unwrap_or_default(),
            referer = record.referer.as_deref().unwrap_or(""),
            user_agent = record.user_agent.as_deref().unwrap_or(""),
            http_version = ?record.http_version,
            response_status = record.response_status.as_u16(),
            response_type = record.response_type.as_deref().unwrap_or(""),
            response_encoding = record.response_encoding.as_deref().unwrap_or(""),
            response_time = record.response_time.as_millis() as u64,
            total_time = record.total_time.as_millis() as u64,
            "incoming request"
        );

        if let Some(observer) = &self.observer {
            observer(&record);
        }
    }
}

/// `X-Request-ID` → `x_request_id`.
fn field_name(header: &str) -> String {
    let mut name = String::with_capacity(header.len());
    for c in header.chars().map(|c| c.to_ascii_lowercase()) {
        if c.is_ascii_alphanumeric() {
            name.push(c);
        } else if !name.ends_with('_') {
            name.push('_');
        }
    }
    name
}
