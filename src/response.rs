//! The write-once HTTP response.
//!
//! A [`Response`] is created once per request by the [`Service`](crate::Service)
//! adapter and handed to middleware and the route handler through the
//! [`Context`](crate::Context). Handlers set headers, then either call
//! [`write_header`](Response::write_header) or just start writing the body.
//!
//! # Commit
//!
//! The first `write_header` *commits* the response. Before the status goes
//! out, every before-commit hook runs, newest first. Middleware registers its
//! hook on the way in, so outer middleware registers before inner middleware
//! and therefore observes the headers after it:
//!
//! ```text
//! access log   registers hook #1 ─┐
//!   compress   registers hook #2 ─┼─ handler writes body → commit
//!                                 │
//!                  runs hook #2 ◄─┘  (sees the handler's Content-Type/-Length,
//!                  runs hook #1      may swap the body sink for an encoder)
//!                  sends status       (sees final status and Content-Encoding)
//! ```
//!
//! Headers stay mutable after commit, but whether the wire sees the change is
//! up to the transport. The [`Capture`](crate::transport::Capture) transport
//! snapshots them at commit, so late changes are lost; a warning is logged.

use std::io::{self, Write};
use std::time::Instant;

use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue, X_CONTENT_TYPE_OPTIONS};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use tracing::warn;

use crate::error::Error;
use crate::transport::{Rejected, Sink, Transport};

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`Response::write_bytes`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    FormData,     // application/x-www-form-urlencoded
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream  (binary / file download)
    Pdf,          // application/pdf
    Png,          // image/png
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::FormData    => "application/x-www-form-urlencoded",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Pdf         => "application/pdf",
            Self::Png         => "image/png",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

// ── Hooks ─────────────────────────────────────────────────────────────────────

/// A before-commit hook. Receives the status being committed.
pub type Hook = Box<dyn FnOnce(StatusCode, &mut Response)>;

/// A callback run by [`Response::complete`] once the body is done.
pub type Completion = Box<dyn FnOnce(&mut Response)>;

/// Identifies a registered before-commit hook so it can be removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HookHandle(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Open,
    Committing,
    Committed,
}

// ── Response ─────────────────────────────────────────────────────────────────

/// The single HTTP response for one request.
pub struct Response {
    headers: HeaderMap,
    status: Option<StatusCode>,
    phase: Phase,
    committed_at: Option<Instant>,
    hooks: Vec<(HookHandle, Hook)>,
    next_hook: u64,
    completions: Vec<Completion>,
    sink: Option<Box<dyn Sink>>,
    transport: Box<dyn Transport>,
    warned_late_header: bool,
}

impl Response {
    /// A response that commits through `transport` and writes its body into
    /// `sink`.
    pub fn new(transport: impl Transport + 'static, sink: impl Sink + 'static) -> Self {
        Self {
            headers: HeaderMap::new(),
            status: None,
            phase: Phase::Open,
            committed_at: None,
            hooks: Vec::new(),
            next_hook: 0,
            completions: Vec::new(),
            sink: Some(Box::new(sink)),
            transport: Box::new(transport),
            warned_late_header: false,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable headers. Always available; after commit the change may never
    /// reach the client, and the first such access logs a warning.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        if self.phase == Phase::Committed && !self.warned_late_header {
            self.warned_late_header = true;
            warn!("response headers modified after commit; the transport may ignore the change");
        }

        &mut self.headers
    }

    /// Commits the response with `status`.
    ///
    /// Only the first call runs the before-commit hooks. Every later call is
    /// forwarded to the transport as is, which decides what to make of it.
    ///
    /// # Panics
    ///
    /// Panics if `status` is outside `100..=599`.
    pub fn write_header(&mut self, status: u16) {
        let status = match StatusCode::from_u16(status) {
            Ok(code) if (100..=599).contains(&status) => code,
            _ => panic!("invalid status code {status}"),
        };

        match self.phase {
            Phase::Committed => {
                self.transport.write_header(status, &self.headers);
                return;
            }
            Phase::Committing => {
                warn!(status = status.as_u16(), "write_header called from a before-commit hook; ignored");
                return;
            }
            Phase::Open => {}
        }

        self.status = Some(status);
        self.phase = Phase::Committing;

        let hooks = std::mem::take(&mut self.hooks);
        for (_, hook) in hooks.into_iter().rev() {
            hook(status, self);
        }

        self.phase = Phase::Committed;
        self.committed_at = Some(Instant::now());
        self.transport.write_header(status, &self.headers);
    }

    /// The committed status, or `None` before the first `write_header`.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Whether `write_header` has been called (explicitly or by a body write).
    pub fn written(&self) -> bool {
        self.status.is_some()
    }

    /// Whether status and headers have reached the transport. Stays `false`
    /// while the before-commit hooks are still running.
    pub fn committed(&self) -> bool {
        self.phase == Phase::Committed
    }

    /// Backs out of a commit that a before-commit hook interrupted by
    /// panicking, so the response can be written again. The hooks that had
    /// not run yet are dropped. Returns `false` if no commit was in progress.
    pub(crate) fn abort_commit(&mut self) -> bool {
        if self.phase != Phase::Committing {
            return false;
        }

        self.hooks.clear();
        self.status = None;
        self.phase = Phase::Open;
        true
    }

    /// When the status and headers were handed to the transport.
    pub fn committed_at(&self) -> Option<Instant> {
        self.committed_at
    }

    /// Registers `hook` to run just before the response commits.
    ///
    /// Hooks run newest first. A hook registered once the commit has started
    /// would never run; it is dropped with a warning.
    pub fn register_before_commit<F>(&mut self, hook: F) -> HookHandle
    where
        F: FnOnce(StatusCode, &mut Response) + 'static,
    {
        let handle = HookHandle(self.next_hook);
        self.next_hook += 1;

        if self.phase == Phase::Open {
            self.hooks.push((handle, Box::new(hook)));
        } else {
            warn!("before-commit hook registered after commit; it will not run");
        }

        handle
    }

    /// Removes a hook that has not run yet. Returns whether it was pending.
    pub fn remove_before_commit(&mut self, handle: HookHandle) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|(h, _)| *h != handle);
        self.hooks.len() != before
    }

    /// Registers `callback` to run from [`complete`](Self::complete), after
    /// the handler chain has returned. Callbacks run newest first.
    pub fn on_complete<F>(&mut self, callback: F)
    where
        F: FnOnce(&mut Response) + 'static,
    {
        self.completions.push(Box::new(callback));
    }

    /// Interposes a new body sink over the current one.
    ///
    /// If `wrap` rejects, the sink it hands back is reinstalled and its
    /// error returned.
    pub fn wrap_sink<F>(&mut self, wrap: F) -> io::Result<()>
    where
        F: FnOnce(Box<dyn Sink>) -> Result<Box<dyn Sink>, Rejected>,
    {
        let sink = self.sink.take().ok_or_else(closed)?;

        match wrap(sink) {
            Ok(wrapped) => {
                self.sink = Some(wrapped);
                Ok(())
            }
            Err(Rejected { sink, error }) => {
                self.sink = Some(sink);
                Err(error)
            }
        }
    }

    /// Ends the outermost sink layer and reinstalls the one beneath it.
    ///
    /// Finishing the transport's own sink closes the body for good.
    pub fn finish_sink_layer(&mut self) -> io::Result<()> {
        match self.sink.take() {
            Some(sink) => {
                self.sink = sink.finish()?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Runs the completion callbacks, then finishes every remaining sink
    /// layer. Called by the adapter once per response.
    pub fn complete(&mut self) -> io::Result<()> {
        while let Some(callback) = self.completions.pop() {
            callback(self);
        }

        while self.sink.is_some() {
            self.finish_sink_layer()?;
        }

        Ok(())
    }

    // ── Convenience writers ─────────────────────────────────────────────────

    /// Writes `status` with its standard reason phrase as a plain-text body.
    pub fn error(&mut self, status: u16) {
        let reason = StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or("");
        self.error_message(status, reason);
    }

    /// Writes `status` with `message` as a plain-text body.
    ///
    /// Drops any `Content-Length` the handler set, since the body is being
    /// replaced.
    pub fn error_message(&mut self, status: u16, message: &str) {
        let headers = self.headers_mut();
        headers.remove(CONTENT_LENGTH);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(ContentType::Text.as_str()));
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));

        self.write_header(status);

        if let Err(e) = writeln!(self, "{message}") {
            warn!(error = %e, "failed to write error response");
        }
    }

    /// Writes `body` with the given content type and a `Content-Length`.
    pub fn write_bytes(&mut self, content_type: ContentType, body: &[u8]) -> io::Result<()> {
        self.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        self.write_body(body)
    }

    /// Writes `text`; `Content-Type` defaults to `text/plain; charset=utf-8`.
    pub fn write_text(&mut self, text: &str) -> io::Result<()> {
        self.default_content_type(ContentType::Text);
        self.write_body(text.as_bytes())
    }

    /// Serialises `value` as JSON; `Content-Type` defaults to
    /// `application/json`.
    pub fn write_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        let body = serde_json::to_vec(value)?;
        self.default_content_type(ContentType::Json);
        self.write_body(&body)?;
        Ok(())
    }

    fn default_content_type(&mut self, content_type: ContentType) {
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        }
    }

    fn write_body(&mut self, body: &[u8]) -> io::Result<()> {
        if !self.written() {
            self.headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }
        self.write_all(body)
    }
}

impl Write for Response {
    /// Commits with `200 OK` first if nothing was committed yet.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.written() {
            self.write_header(StatusCode::OK.as_u16());
        }

        match self.sink.as_mut() {
            Some(sink) => sink.write(buf),
            None => Err(closed()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "response body already finished")
}
