//! Module for encoding HTTP response bodies.
//!
//! This module provides streaming compressors (gzip, deflate, zstd and brotli) in the shape
//! of a [`Sink`](crate::sink::Sink) decorator, so the compression middleware can swap the
//! outbound sink of a response without touching the rest of the pipeline.
//!
//! The main components are:
//! - `Encoding`: the content codings we can produce, negotiated against `Accept-Encoding`
//! - `encoder`: the `Encoder` state machine and the `EncodedSink` decorator
//!
//! The implementation is inspired by the actix-http crate's encoding functionality.

mod encoder;

pub use encoder::{EncodedSink, PreparedSink};

use serde::Deserialize;
use std::fmt;

/// A content coding this crate can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Gzip,
    Deflate,
    Zstd,
    Br,
}

impl Encoding {
    /// Picks the first of `preferred` that the `Accept-Encoding` value advertises.
    pub fn select(accept_encodings: &str, preferred: &[Encoding]) -> Option<Self> {
        let accepted = || {
            accept_encodings.split(',').filter_map(|item| item.split(';').next()).map(str::trim)
        };
        preferred.iter().copied().find(|encoding| accepted().any(|name| name.eq_ignore_ascii_case(encoding.name())))
    }

    /// Returns the name of the encoding, as used in `Content-Encoding`.
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
            Encoding::Zstd => "zstd",
            Encoding::Br => "br",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
