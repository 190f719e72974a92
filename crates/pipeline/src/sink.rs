//! The outbound byte sink a response is written through.
//!
//! A sink is an [`io::Write`] with an explicit end of life: [`Sink::finish`] consumes it,
//! flushes whatever it still holds and hands back the bytes bound for the wire. Decorators
//! such as [`EncodedSink`](crate::encoding::EncodedSink) wrap an inner sink and finish it as
//! part of their own `finish`.

use bytes::{Bytes, BytesMut};
use std::fmt;
use std::io;

pub trait Sink: io::Write + Send {
    /// Flushes and releases the sink. Consuming `self` makes this run at most once.
    fn finish(self: Box<Self>) -> io::Result<Bytes>;
}

impl fmt::Debug for dyn Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sink")
    }
}

// inspired by from actix-http
/// The raw sink: collects everything in memory.
#[derive(Debug, Default)]
pub struct BufferSink {
    buf: BytesMut,
}

impl BufferSink {
    pub fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096) }
    }
}

impl io::Write for BufferSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Sink for BufferSink {
    fn finish(self: Box<Self>) -> io::Result<Bytes> {
        Ok(self.buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn buffer_collects_writes() {
        let mut sink: Box<dyn Sink> = Box::new(BufferSink::new());
        sink.write_all(b"hello ").unwrap();
        sink.write_all(b"world").unwrap();
        assert_eq!(sink.finish().unwrap(), Bytes::from_static(b"hello world"));
    }
}
