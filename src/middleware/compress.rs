//! Negotiated response compression.

use std::sync::Arc;

use http::header::{
    ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, HeaderValue,
};
use http::{Method, StatusCode};
use tracing::{debug, error};

use crate::codec::{self, Codec};
use crate::context::Context;
use crate::headers;
use crate::middleware::{Middleware, Next};
use crate::negotiate::Negotiator;
use crate::response::Response;

/// Bodies with a smaller `Content-Length` are sent as is.
pub const DEFAULT_MIN_SIZE: u64 = 1024;

type Filter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Compresses response bodies with the best coding the client accepts.
///
/// The decision is made in a before-commit hook, once the handler has set
/// `Content-Type` and `Content-Length`. A response is encoded only when all
/// of these hold:
///
/// - it has no `Content-Encoding` yet, no `Content-Range`, and a status that
///   carries a body (not 1xx, 204 or 304);
/// - its `Content-Length` is at least [`min_size`](Self::min_size), or absent;
/// - the [`filter`](Self::filter) accepts its `Content-Type`;
/// - the request's `Accept-Encoding` accepts one of the configured codecs.
///
/// `Vary: Accept-Encoding` is added either way.
///
/// ```rust
/// use std::sync::Arc;
///
/// use strata::codec::{Codec, Gzip, Zstd};
/// use strata::middleware::Compress;
///
/// let codecs: [Arc<dyn Codec>; 2] = [Arc::new(Zstd::default()), Arc::new(Gzip { level: 9 })];
/// let compress = Compress::new()
///     .codecs(codecs)
///     .min_size(512)
///     .filter(|content_type| content_type.starts_with("text/"));
/// ```
#[derive(Clone)]
pub struct Compress {
    codecs: Arc<Vec<Arc<dyn Codec>>>,
    negotiator: Negotiator,
    min_size: u64,
    filter: Filter,
}

impl Default for Compress {
    fn default() -> Self {
        Self::with_codecs(codec::defaults())
    }
}

impl Compress {
    /// Built-in codecs (`br`, `zstd`, `gzip`, `deflate`), 1 KiB threshold,
    /// `text/*` and `application/*` only.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_codecs(codecs: Vec<Arc<dyn Codec>>) -> Self {
        let negotiator = Negotiator::encodings(codecs.iter().map(|c| c.token().to_owned()));
        Self {
            codecs: Arc::new(codecs),
            negotiator,
            min_size: DEFAULT_MIN_SIZE,
            filter: Arc::new(default_filter),
        }
    }

    /// Replaces the codec list. Order is the server's preference when the
    /// client ranks several codings equally.
    pub fn codecs<I>(self, codecs: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Codec>>,
    {
        Self {
            min_size: self.min_size,
            filter: self.filter,
            ..Self::with_codecs(codecs.into_iter().collect())
        }
    }

    pub fn min_size(mut self, bytes: u64) -> Self {
        self.min_size = bytes;
        self
    }

    /// Decides from the `Content-Type` (empty if unset) whether to compress.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.filter = Arc::new(filter);
        self
    }

    fn apply(&self, status: StatusCode, accept_encoding: &[String], res: &mut Response) {
        if self.compressible(status, res) {
            self.encode(accept_encoding, res);
        }

        headers::append_vary(res.headers_mut(), "Accept-Encoding");
    }

    fn compressible(&self, status: StatusCode, res: &Response) -> bool {
        let headers = res.headers();

        if headers.contains_key(CONTENT_ENCODING) || headers.contains_key(CONTENT_RANGE) {
            return false;
        }

        if status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
        {
            return false;
        }

        if let Some(value) = headers.get(CONTENT_LENGTH) {
            let length = value.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok());
            match length {
                Some(length) if length >= self.min_size => {}
                _ => return false,
            }
        }

        let content_type = headers::get_str(headers, &CONTENT_TYPE).unwrap_or("");
        (self.filter)(content_type)
    }

    fn encode(&self, accept_encoding: &[String], res: &mut Response) {
        let (token, matched) = self.negotiator.best(accept_encoding);
        if !matched {
            return;
        }

        let Some(codec) = self.codecs.iter().find(|c| c.token() == token) else {
            return;
        };

        let Ok(encoding) = HeaderValue::from_str(codec.token()) else {
            error!(encoding = codec.token(), "codec token is not a valid header value");
            return;
        };

        if let Err(e) = res.wrap_sink(|sink| codec.wrap(sink)) {
            error!(encoding = codec.token(), error = %e, "failed to create encoder");
            return;
        }

        debug!(encoding = codec.token(), "compressing response");

        let headers = res.headers_mut();
        headers.insert(CONTENT_ENCODING, encoding);
        headers.remove(CONTENT_LENGTH);

        let token = codec.token().to_owned();
        res.on_complete(move |res| {
            if let Err(e) = res.finish_sink_layer() {
                error!(encoding = %token, error = %e, "failed to close encoder");
            }
        });
    }
}

fn default_filter(content_type: &str) -> bool {
    let content_type = content_type.trim_start().to_ascii_lowercase();
    content_type.starts_with("text/") || content_type.starts_with("application/")
}

impl Middleware for Compress {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) {
        if *ctx.request.method() != Method::HEAD {
            let accept_encoding = ctx.request.header_values(&ACCEPT_ENCODING);
            let this = self.clone();
            ctx.response.register_before_commit(move |status, res| {
                this.apply(status, &accept_encoding, res);
            });
        }

        next.run(ctx);
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Read, Write};

    use bytes::Bytes;
    use http::header::VARY;

    use super::*;
    use crate::handler::{BoxedHandler, Handler};
    use crate::middleware::compose;
    use crate::middleware::testing::context;
    use crate::transport::{Capture, Rejected, Sink};

    fn request(accept_encoding: &str) -> http::Request<Bytes> {
        http::Request::get("/")
            .header(ACCEPT_ENCODING, accept_encoding)
            .body(Bytes::new())
            .unwrap()
    }

    /// Runs `handler` behind `compress` and completes the response.
    fn run<H>(compress: Compress, req: http::Request<Bytes>, handler: H) -> Capture
    where
        H: Fn(&mut Context) + Send + Sync + 'static,
    {
        let handler: BoxedHandler = Arc::new(handler);
        let app = compose(handler, &[Arc::new(compress)]);

        let (mut ctx, capture) = context(req);
        app.call(&mut ctx);
        ctx.response.complete().unwrap();
        capture
    }

    fn text_body(ctx: &mut Context, len: usize) {
        let headers = ctx.response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        ctx.response.write_all(&vec![b'a'; len]).unwrap();
    }

    #[test]
    fn gzip_scenario() {
        let capture = run(Compress::new(), request("gzip"), |ctx| text_body(ctx, 2048));

        let headers = capture.headers();
        assert_eq!(headers.get(CONTENT_ENCODING).unwrap(), "gzip");
        assert!(!headers.contains_key(CONTENT_LENGTH));
        assert_eq!(headers.get(VARY).unwrap(), "Accept-Encoding");

        let mut body = Vec::new();
        flate2::read::GzDecoder::new(&capture.body()[..]).read_to_end(&mut body).unwrap();
        assert_eq!(body, vec![b'a'; 2048]);
    }

    #[test]
    fn prefers_client_ranking_then_server_order() {
        let capture = run(Compress::new(), request("gzip;q=0.5, zstd, br"), |ctx| {
            text_body(ctx, 4096)
        });
        assert_eq!(capture.headers().get(CONTENT_ENCODING).unwrap(), "br");

        let capture = run(Compress::new(), request("gzip, zstd;q=0.9"), |ctx| text_body(ctx, 4096));
        assert_eq!(capture.headers().get(CONTENT_ENCODING).unwrap(), "gzip");
    }

    #[test]
    fn existing_encoding_is_left_alone() {
        let capture = run(Compress::new(), request("gzip"), |ctx| {
            ctx.response.headers_mut().insert(CONTENT_ENCODING, HeaderValue::from_static("identity"));
            text_body(ctx, 4096);
        });

        assert_eq!(capture.headers().get(CONTENT_ENCODING).unwrap(), "identity");
        assert_eq!(capture.body(), vec![b'a'; 4096]);
        assert_eq!(capture.headers().get(VARY).unwrap(), "Accept-Encoding");
    }

    #[test]
    fn small_bodies_are_not_compressed() {
        let capture = run(Compress::new(), request("gzip"), |ctx| text_body(ctx, 500));

        let headers = capture.headers();
        assert!(!headers.contains_key(CONTENT_ENCODING));
        assert_eq!(headers.get(CONTENT_LENGTH).unwrap(), "500");
        assert_eq!(headers.get(VARY).unwrap(), "Accept-Encoding");
        assert_eq!(capture.body().len(), 500);
    }

    #[test]
    fn unknown_length_only_checks_type() {
        let capture = run(Compress::new(), request("gzip"), |ctx| {
            ctx.response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
            ctx.response.write_all(b"tiny").unwrap();
        });

        assert_eq!(capture.headers().get(CONTENT_ENCODING).unwrap(), "gzip");
    }

    #[test]
    fn filter_rejects_images() {
        let capture = run(Compress::new(), request("gzip"), |ctx| {
            ctx.response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
            ctx.response.write_all(&[0; 4096]).unwrap();
        });

        assert!(!capture.headers().contains_key(CONTENT_ENCODING));
    }

    #[test]
    fn no_accept_encoding_means_identity() {
        let req = http::Request::get("/").body(Bytes::new()).unwrap();
        let capture = run(Compress::new(), req, |ctx| text_body(ctx, 4096));

        assert!(!capture.headers().contains_key(CONTENT_ENCODING));
        assert_eq!(capture.headers().get(VARY).unwrap(), "Accept-Encoding");
    }

    #[test]
    fn refused_coding_is_not_used() {
        let capture = run(Compress::new(), request("gzip;q=0, *;q=0"), |ctx| text_body(ctx, 4096));

        assert!(!capture.headers().contains_key(CONTENT_ENCODING));
    }

    #[test]
    fn no_content_status_is_skipped() {
        let capture = run(Compress::new(), request("gzip"), |ctx| {
            ctx.response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
            ctx.response.write_header(204);
        });

        assert!(!capture.headers().contains_key(CONTENT_ENCODING));
        assert!(capture.body().is_empty());
    }

    struct Broken;

    impl Codec for Broken {
        fn token(&self) -> &str {
            "gzip"
        }

        fn wrap(&self, sink: Box<dyn Sink>) -> Result<Box<dyn Sink>, Rejected> {
            Err(Rejected { sink, error: io::Error::other("encoder unavailable") })
        }
    }

    #[test]
    fn encoder_failure_keeps_plain_body() {
        let broken: Arc<dyn Codec> = Arc::new(Broken);
        let compress = Compress::new().codecs([broken]);
        let capture = run(compress, request("gzip"), |ctx| text_body(ctx, 2048));

        let headers = capture.headers();
        assert!(!headers.contains_key(CONTENT_ENCODING));
        assert_eq!(headers.get(CONTENT_LENGTH).unwrap(), "2048");
        assert_eq!(capture.body(), vec![b'a'; 2048]);
    }

    #[test]
    fn custom_threshold_and_filter() {
        let compress = Compress::new().min_size(10).filter(|ct| ct == "image/svg+xml");
        let capture = run(compress, request("deflate"), |ctx| {
            let headers = ctx.response.headers_mut();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/svg+xml"));
            headers.insert(CONTENT_LENGTH, HeaderValue::from(64));
            ctx.response.write_all(&[b'<'; 64]).unwrap();
        });

        assert_eq!(capture.headers().get(CONTENT_ENCODING).unwrap(), "deflate");

        let mut body = Vec::new();
        flate2::read::ZlibDecoder::new(&capture.body()[..]).read_to_end(&mut body).unwrap();
        assert_eq!(body, [b'<'; 64]);
    }
}
