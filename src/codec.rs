//! Streaming body encoders for `Content-Encoding`.
//!
//! A [`Codec`] turns the response's current [`Sink`] into an encoding sink
//! over it. Each encoder implements `Sink::finish` by writing its trailer and
//! handing back the sink it wrapped, so the response can unwind the stack one
//! layer at a time.
//!
//! | Token | Crate | Default level |
//! |---|---|---|
//! | `br` | `brotli` | quality 6 (an error writing the final meta-block is not reported) |
//! | `zstd` | `zstd` | 3 |
//! | `gzip` | `flate2` | 6 |
//! | `deflate` | `flate2` (zlib framing, as HTTP defines it) | 6 |

use std::io::{self, Write};
use std::sync::Arc;

use brotli::CompressorWriter;
use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use zstd::stream::{raw, zio};

use crate::transport::{Rejected, Sink};

/// A content coding the server can apply to response bodies.
pub trait Codec: Send + Sync {
    /// The `Content-Encoding` token, e.g. `gzip`.
    fn token(&self) -> &str;

    /// Wraps `sink` in an encoder. On failure the untouched sink comes back
    /// inside [`Rejected`].
    fn wrap(&self, sink: Box<dyn Sink>) -> Result<Box<dyn Sink>, Rejected>;
}

/// The built-in codecs in default preference order: `br`, `zstd`, `gzip`,
/// `deflate`.
pub fn defaults() -> Vec<Arc<dyn Codec>> {
    vec![
        Arc::new(Brotli::default()),
        Arc::new(Zstd::default()),
        Arc::new(Gzip::default()),
        Arc::new(Deflate::default()),
    ]
}

/// Looks up a built-in codec by its token (case-insensitive).
pub fn by_token(token: &str) -> Option<Arc<dyn Codec>> {
    defaults().into_iter().find(|codec| codec.token().eq_ignore_ascii_case(token))
}

// ── br ────────────────────────────────────────────────────────────────────────

const BROTLI_BUFFER: usize = 4096;
const BROTLI_LGWIN: u32 = 22;

#[derive(Clone, Copy, Debug)]
pub struct Brotli {
    pub quality: u32,
}

impl Default for Brotli {
    fn default() -> Self {
        Self { quality: 6 }
    }
}

impl Codec for Brotli {
    fn token(&self) -> &str {
        "br"
    }

    fn wrap(&self, sink: Box<dyn Sink>) -> Result<Box<dyn Sink>, Rejected> {
        Ok(Box::new(CompressorWriter::new(sink, BROTLI_BUFFER, self.quality, BROTLI_LGWIN)))
    }
}

impl Sink for CompressorWriter<Box<dyn Sink>> {
    // `into_inner` writes the final meta-block but swallows write errors, so
    // flush first to surface a failing sink.
    fn finish(mut self: Box<Self>) -> io::Result<Option<Box<dyn Sink>>> {
        self.flush()?;
        Ok(Some(CompressorWriter::into_inner(*self)))
    }
}

// ── zstd ──────────────────────────────────────────────────────────────────────

type ZstdWriter = zio::Writer<Box<dyn Sink>, raw::Encoder<'static>>;

#[derive(Clone, Copy, Debug)]
pub struct Zstd {
    pub level: i32,
}

impl Default for Zstd {
    fn default() -> Self {
        Self { level: zstd::DEFAULT_COMPRESSION_LEVEL }
    }
}

impl Codec for Zstd {
    fn token(&self) -> &str {
        "zstd"
    }

    // The context is created before the sink is handed over, so a failure
    // leaves the sink with the caller.
    fn wrap(&self, sink: Box<dyn Sink>) -> Result<Box<dyn Sink>, Rejected> {
        match raw::Encoder::new(self.level) {
            Ok(encoder) => Ok(Box::new(ZstdWriter::new(sink, encoder))),
            Err(error) => Err(Rejected { sink, error }),
        }
    }
}

impl Sink for ZstdWriter {
    fn finish(self: Box<Self>) -> io::Result<Option<Box<dyn Sink>>> {
        let mut writer = *self;
        zio::Writer::finish(&mut writer)?;
        let (sink, _) = writer.into_inner();
        Ok(Some(sink))
    }
}

// ── gzip / deflate ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug)]
pub struct Gzip {
    pub level: u32,
}

impl Default for Gzip {
    fn default() -> Self {
        Self { level: Compression::default().level() }
    }
}

impl Codec for Gzip {
    fn token(&self) -> &str {
        "gzip"
    }

    fn wrap(&self, sink: Box<dyn Sink>) -> Result<Box<dyn Sink>, Rejected> {
        Ok(Box::new(GzEncoder::new(sink, Compression::new(self.level))))
    }
}

impl Sink for GzEncoder<Box<dyn Sink>> {
    fn finish(self: Box<Self>) -> io::Result<Option<Box<dyn Sink>>> {
        GzEncoder::finish(*self).map(Some)
    }
}

/// HTTP `deflate`: a zlib stream (RFC 1950), not raw deflate.
#[derive(Clone, Copy, Debug)]
pub struct Deflate {
    pub level: u32,
}

impl Default for Deflate {
    fn default() -> Self {
        Self { level: Compression::default().level() }
    }
}

impl Codec for Deflate {
    fn token(&self) -> &str {
        "deflate"
    }

    fn wrap(&self, sink: Box<dyn Sink>) -> Result<Box<dyn Sink>, Rejected> {
        Ok(Box::new(ZlibEncoder::new(sink, Compression::new(self.level))))
    }
}

impl Sink for ZlibEncoder<Box<dyn Sink>> {
    fn finish(self: Box<Self>) -> io::Result<Option<Box<dyn Sink>>> {
        ZlibEncoder::finish(*self).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;
    use crate::transport::Capture;

    fn encode(codec: &dyn Codec, body: &[u8]) -> Vec<u8> {
        let capture = Capture::new();
        let mut sink = codec.wrap(Box::new(capture.clone())).ok().unwrap();
        sink.write_all(body).unwrap();

        let inner = sink.finish().unwrap();
        assert!(inner.is_some(), "{} should hand back its inner sink", codec.token());
        capture.body()
    }

    #[test]
    fn default_order() {
        let tokens: Vec<_> = defaults().iter().map(|c| c.token().to_owned()).collect();
        assert_eq!(tokens, ["br", "zstd", "gzip", "deflate"]);
    }

    #[test]
    fn lookup_ignores_case() {
        assert_eq!(by_token("GZip").unwrap().token(), "gzip");
        assert!(by_token("compress").is_none());
    }

    #[test]
    fn encoders_produce_decodable_streams() {
        let body = "strata ".repeat(500).into_bytes();

        let mut out = Vec::new();
        flate2::read::GzDecoder::new(&encode(&Gzip::default(), &body)[..])
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, body);

        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(&encode(&Deflate::default(), &body)[..])
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, body);

        let out = zstd::stream::decode_all(&encode(&Zstd::default(), &body)[..]).unwrap();
        assert_eq!(out, body);

        let mut out = Vec::new();
        brotli::Decompressor::new(&encode(&Brotli::default(), &body)[..], 4096)
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, body);
    }

    /// Refuses every byte.
    struct Failing;

    impl Write for Failing {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Sink for Failing {
        fn finish(self: Box<Self>) -> io::Result<Option<Box<dyn Sink>>> {
            Ok(None)
        }
    }

    #[test]
    fn finish_reports_a_failing_sink() {
        for codec in defaults() {
            let mut sink = codec.wrap(Box::new(Failing)).ok().unwrap();
            let _ = sink.write_all(b"payload");

            assert!(sink.finish().is_err(), "{} swallowed the write error", codec.token());
        }
    }
}
