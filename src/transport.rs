//! What a [`Response`](crate::Response) writes into.
//!
//! A response talks to the wire through two seams:
//!
//! - a [`Transport`], which receives the status line and headers when the
//!   response commits, and
//! - a [`Sink`], which receives body bytes. Sinks stack: a compressing
//!   encoder is a sink that writes into the sink beneath it.
//!
//! [`Capture`] implements both over one shared buffer. It is what the
//! [`Service`](crate::Service) adapter hands every response, and what tests
//! use to look at the bytes a pipeline produced.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use tracing::warn;

/// Receives the status and headers of a response.
pub trait Transport {
    /// Sends the status line and headers.
    ///
    /// The response calls this on every `write_header`, not only the first,
    /// so implementations decide what a repeated call means.
    fn write_header(&mut self, status: StatusCode, headers: &HeaderMap);
}

/// A destination for response body bytes.
pub trait Sink: Write {
    /// Ends this layer's stream (writing any trailer, e.g. a gzip footer)
    /// and hands back the sink it was writing into.
    ///
    /// The transport's own sink sits at the bottom and returns `None`.
    fn finish(self: Box<Self>) -> io::Result<Option<Box<dyn Sink>>>;
}

/// A sink layer that refused to wrap, handing the original sink back.
pub struct Rejected {
    pub sink: Box<dyn Sink>,
    pub error: io::Error,
}

/// In-memory transport and sink, shared by cheap clones.
#[derive(Clone, Default)]
pub struct Capture {
    inner: Rc<RefCell<Captured>>,
}

#[derive(Default)]
struct Captured {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    /// The committed status, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.inner.borrow().status
    }

    /// Headers as they were when the response committed.
    pub fn headers(&self) -> HeaderMap {
        self.inner.borrow().headers.clone()
    }

    /// Body bytes written so far.
    pub fn body(&self) -> Vec<u8> {
        self.inner.borrow().body.clone()
    }

    /// Converts everything captured into an `http` response.
    ///
    /// An uncommitted capture becomes an empty `200 OK`.
    pub fn into_http(self) -> http::Response<Full<Bytes>> {
        let captured = self.inner.take();

        let mut response = http::Response::new(Full::new(Bytes::from(captured.body)));
        *response.status_mut() = captured.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = captured.headers;
        response
    }
}

impl Transport for Capture {
    fn write_header(&mut self, status: StatusCode, headers: &HeaderMap) {
        let mut captured = self.inner.borrow_mut();

        if let Some(first) = captured.status {
            warn!(first = first.as_u16(), ignored = status.as_u16(), "superfluous write_header call");
            return;
        }

        captured.status = Some(status);
        captured.headers = headers.clone();
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.borrow_mut().body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Sink for Capture {
    fn finish(self: Box<Self>) -> io::Result<Option<Box<dyn Sink>>> {
        Ok(None)
    }
}
