use crate::encoding::Encoding;
use crate::sink::Sink;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use std::io;
use std::io::Write;
use tracing::{trace, warn};
use zstd::stream::raw::Encoder as ZstdRawEncoder;
use zstd::stream::write::Encoder as ZstdEncoder;
// (almost thanks and) copy from actix-http: https://github.com/actix/actix-web/blob/master/actix-http/src/encoding/encoder.rs

type Inner = Box<dyn Sink>;

/// A running compressor writing into an inner sink.
enum Encoder {
    Gzip(GzEncoder<Inner>),
    Deflate(ZlibEncoder<Inner>),
    Zstd(ZstdEncoder<'static, Inner>),
    Br(Box<brotli::CompressorWriter<Inner>>),
}

impl Encoder {
    fn new(prepared: PreparedSink, inner: Inner) -> Self {
        match prepared.kind {
            Prepared::Gzip => Self::Gzip(GzEncoder::new(inner, Compression::best())),
            Prepared::Deflate => Self::Deflate(ZlibEncoder::new(inner, Compression::best())),
            Prepared::Zstd(raw) => Self::Zstd(ZstdEncoder::with_encoder(inner, raw)),
            Prepared::Br => Self::Br(Box::new(brotli::CompressorWriter::new(
                inner,
                32 * 1024, // 32 KiB buffer
                3,         // BROTLI_PARAM_QUALITY
                22,        // BROTLI_PARAM_LGWIN
            ))),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Encoder::Gzip(_) => "gzip",
            Encoder::Deflate(_) => "deflate",
            Encoder::Zstd(_) => "zstd",
            Encoder::Br(_) => "br",
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let result = match self {
            Self::Gzip(encoder) => encoder.write_all(data),
            Self::Deflate(encoder) => encoder.write_all(data),
            Self::Zstd(encoder) => encoder.write_all(data),
            Self::Br(encoder) => encoder.write_all(data),
        };
        if let Err(err) = &result {
            trace!("Error encoding {} encoding: {}", self.name(), err);
        }
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Gzip(encoder) => encoder.flush(),
            Self::Deflate(encoder) => encoder.flush(),
            Self::Zstd(encoder) => encoder.flush(),
            Self::Br(encoder) => encoder.flush(),
        }
    }

    /// Writes the stream trailer and gives back the inner sink.
    fn finish(self) -> io::Result<Inner> {
        match self {
            Self::Gzip(encoder) => encoder.finish(),
            Self::Deflate(encoder) => encoder.finish(),
            Self::Zstd(encoder) => encoder.finish(),
            Self::Br(mut encoder) => {
                encoder.flush()?;
                Ok(encoder.into_inner())
            }
        }
    }
}

enum Prepared {
    Gzip,
    Deflate,
    Zstd(ZstdRawEncoder<'static>),
    Br,
}

/// Compressor state that is ready to wrap a sink, see [`EncodedSink::prepare`].
pub struct PreparedSink {
    kind: Prepared,
}

impl PreparedSink {
    pub fn wrap(self, inner: Box<dyn Sink>) -> EncodedSink {
        EncodedSink { encoder: Some(Encoder::new(self, inner)) }
    }
}

impl std::fmt::Debug for PreparedSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PreparedSink")
    }
}

/// A [`Sink`] decorator that compresses everything written to it.
///
/// [`Sink::finish`] closes the compressor and then finishes the inner sink. If the sink is
/// dropped without being finished, the compressor is closed on drop instead, so it is never
/// left open whichever path the response took.
pub struct EncodedSink {
    encoder: Option<Encoder>,
}

impl EncodedSink {
    /// Allocates the compressor state for `encoding`.
    ///
    /// This is the only fallible step, and it happens before any sink is handed over, so a
    /// failure never costs the caller its current sink.
    pub fn prepare(encoding: Encoding) -> io::Result<PreparedSink> {
        let kind = match encoding {
            Encoding::Gzip => Prepared::Gzip,
            Encoding::Deflate => Prepared::Deflate,
            Encoding::Zstd => Prepared::Zstd(ZstdRawEncoder::new(6)?),
            Encoding::Br => Prepared::Br,
        };
        Ok(PreparedSink { kind })
    }

    pub fn new(encoding: Encoding, inner: Box<dyn Sink>) -> io::Result<Self> {
        Ok(Self::prepare(encoding)?.wrap(inner))
    }

    /// The content coding produced by this sink.
    pub fn encoding_name(&self) -> Option<&'static str> {
        self.encoder.as_ref().map(Encoder::name)
    }

    fn encoder_mut(&mut self) -> io::Result<&mut Encoder> {
        self.encoder.as_mut().ok_or_else(|| io::Error::other("encoded sink already finished"))
    }
}

impl std::fmt::Debug for EncodedSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedSink").field("encoding", &self.encoding_name()).finish()
    }
}

impl io::Write for EncodedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder_mut()?.write(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder_mut()?.flush()
    }
}

impl Sink for EncodedSink {
    fn finish(mut self: Box<Self>) -> io::Result<Bytes> {
        let encoder = self.encoder.take().ok_or_else(|| io::Error::other("encoded sink already finished"))?;
        encoder.finish()?.finish()
    }
}

impl Drop for EncodedSink {
    fn drop(&mut self) {
        let Some(encoder) = self.encoder.take() else {
            return;
        };
        let name = encoder.name();
        match encoder.finish().and_then(|inner| inner.finish()) {
            Ok(_) => trace!(encoding = name, "encoder closed on drop"),
            Err(e) => warn!(encoding = name, cause = %e, "failed to close encoder on drop"),
        }
    }
}
