//! Buffered byte-stream wrapper over one socket.
//!
//! A [`Pipe`] splits a duplex stream into a [`PipeReader`], which refills a
//! pooled buffer on demand and lets parsers peek and advance over it, and a
//! [`PipeWriter`] for emitting heads and bodies. Both halves release their
//! buffer and their side of the socket when dropped, on every exit path.

use bytes::BytesMut;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::timeout;

use crate::buffer::cursor::BodyCursor;
use crate::buffer::pool::{BufferPool, PooledBuffer};
use crate::error::{ProxyError, Result};
use crate::http::body::ChunkedEncoder;
use crate::http::parser::HeadParser;

pub struct Pipe {
    pub reader: PipeReader,
    pub writer: PipeWriter,
}

impl Pipe {
    pub fn new<S>(stream: S, pool: &BufferPool) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);

        Self {
            reader: PipeReader::new(read_half, pool),
            writer: PipeWriter::new(write_half),
        }
    }

    pub fn into_split(self) -> (PipeReader, PipeWriter) {
        (self.reader, self.writer)
    }
}

pub struct PipeReader {
    inner: Box<dyn AsyncRead + Send + Unpin>,
    buf: PooledBuffer,
    start: usize,
    end: usize,
    reads: usize,
    read_timeout: Option<Duration>,
}

impl PipeReader {
    pub fn new<R>(inner: R, pool: &BufferPool) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            inner: Box::new(inner),
            buf: pool.rent(),
            start: 0,
            end: 0,
            reads: 0,
            read_timeout: None,
        }
    }

    /// Bounds how long a single socket read may wait. Relayed tunnel bytes
    /// go through [`AsyncRead`] and are not affected.
    pub fn set_read_timeout(&mut self, limit: Option<Duration>) {
        self.read_timeout = limit;
    }

    /// Bytes read from the socket but not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Marks `n` buffered bytes as consumed.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.end - self.start, "advanced past buffered data");

        self.start += n;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Reads more bytes from the socket, returning how many arrived; zero
    /// means the peer closed its side.
    pub async fn fill(&mut self) -> io::Result<usize> {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        if self.end == self.buf.len() {
            self.buf.grow();
        }

        let read = self.inner.read(&mut self.buf[self.end..]);
        let n = match self.read_timeout {
            Some(limit) => timeout(limit, read).await.map_err(|_| {
                io::Error::new(io::ErrorKind::TimedOut, format!("peer sent nothing for {limit:?}"))
            })??,
            None => read.await?,
        };
        self.end += n;
        self.reads += 1;
        Ok(n)
    }

    pub async fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        if self.start == self.end && self.fill().await? == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf[self.start]))
    }

    pub async fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let byte = self.peek_byte().await?;
        if byte.is_some() {
            self.advance(1);
        }
        Ok(byte)
    }

    /// Number of socket reads performed so far.
    pub fn network_reads(&self) -> usize {
        self.reads
    }

    /// Feeds buffered bytes to `parser`, reading more as needed, until the
    /// head is complete.
    ///
    /// Returns `false` if the peer closed before sending anything.
    pub async fn read_head<P: HeadParser>(&mut self, parser: &mut P, limit: usize) -> Result<bool> {
        let mut consumed = 0;

        loop {
            let n = parser.parse(self.buffered())?;
            self.advance(n);
            consumed += n;

            if parser.is_head_complete() {
                return Ok(true);
            }
            if consumed + self.buffered().len() >= limit {
                return Err(ProxyError::HeadTooLarge(limit));
            }

            if self.fill().await? == 0 {
                return if consumed == 0 && self.buffered().is_empty() {
                    Ok(false)
                } else {
                    Err(ProxyError::UnexpectedEof)
                };
            }
        }
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;

        // Serve what the parser left behind before touching the socket.
        if this.start < this.end {
            let n = (this.end - this.start).min(out.remaining());
            out.put_slice(&this.buf[this.start..this.start + n]);
            this.advance(n);
            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut this.inner).poll_read(cx, out)
    }
}

pub struct PipeWriter {
    inner: Box<dyn AsyncWrite + Send + Unpin>,
    scratch: BytesMut,
    sent: u64,
}

impl PipeWriter {
    pub fn new<W>(inner: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Box::new(inner),
            scratch: BytesMut::new(),
            sent: 0,
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes).await?;
        self.sent += bytes.len() as u64;
        Ok(())
    }

    pub async fn send_text(&mut self, text: &str) -> io::Result<()> {
        self.send(text.as_bytes()).await
    }

    /// Sends one body run, wrapped in a chunk envelope when `encoder` is set.
    pub async fn send_body(&mut self, data: &[u8], encoder: Option<&mut ChunkedEncoder>) -> io::Result<()> {
        match encoder {
            Some(encoder) => {
                let mut scratch = std::mem::take(&mut self.scratch);
                scratch.clear();
                encoder.encode(data, &mut scratch);
                let result = self.send(&scratch).await;
                self.scratch = scratch;
                result
            }
            None => self.send(data).await,
        }
    }

    /// Writes the chunked terminator.
    pub async fn finish_chunked(&mut self, encoder: &mut ChunkedEncoder) -> io::Result<()> {
        let mut tail = BytesMut::with_capacity(5);
        encoder.finish(&mut tail);
        self.send(&tail).await
    }

    /// Streams everything `cursor` yields, re-chunking when `chunked` is set.
    pub async fn send_stream(&mut self, cursor: &mut BodyCursor, chunked: bool) -> Result<u64> {
        let mut encoder = chunked.then(ChunkedEncoder::new);
        let mut total = 0;

        while let Some(segment) = cursor.next_segment().await? {
            self.send_body(&segment, encoder.as_mut()).await?;
            total += segment.len() as u64;
        }
        if let Some(encoder) = encoder.as_mut() {
            self.finish_chunked(encoder).await?;
        }

        self.flush().await?;
        Ok(total)
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }

    /// Total bytes written so far.
    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            this.sent += n as u64;
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::parser::RequestParser;

    #[tokio::test]
    async fn peek_does_not_consume() {
        let pool = BufferPool::new(8, 4);
        let mut reader = PipeReader::new(&b"ab"[..], &pool);

        assert_eq!(reader.peek_byte().await.unwrap(), Some(b'a'));
        assert_eq!(reader.read_byte().await.unwrap(), Some(b'a'));
        assert_eq!(reader.read_byte().await.unwrap(), Some(b'b'));
        assert_eq!(reader.read_byte().await.unwrap(), None);
    }

    #[tokio::test]
    async fn head_spanning_many_reads_grows_the_buffer() {
        let pool = BufferPool::new(8, 4);
        let raw = b"GET /a/long/path HTTP/1.1\r\nHost: example.com\r\n\r\nrest";
        let mut reader = PipeReader::new(&raw[..], &pool);
        let mut parser = RequestParser::new();

        assert!(reader.read_head(&mut parser, 1024).await.unwrap());
        assert_eq!(parser.head().target(), "/a/long/path");
        assert_eq!(reader.buffered(), b"rest");
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let pool = BufferPool::new(8, 4);
        let raw = b"GET /0123456789012345678901234567890123456789 HTTP/1.1\r\n\r\n";
        let mut reader = PipeReader::new(&raw[..], &pool);
        let mut parser = RequestParser::new();

        let err = reader.read_head(&mut parser, 16).await.unwrap_err();
        assert!(matches!(err, ProxyError::HeadTooLarge(16)));
    }

    #[tokio::test]
    async fn immediate_close_is_not_an_error() {
        let pool = BufferPool::default();
        let mut reader = PipeReader::new(&b""[..], &pool);
        let mut parser = RequestParser::new();
        assert!(!reader.read_head(&mut parser, 1024).await.unwrap());
    }

    #[tokio::test]
    async fn stalled_peer_times_out() {
        let pool = BufferPool::default();
        let (near, mut far) = tokio::io::duplex(64);
        far.write_all(b"GET / HTTP/1.1\r\nHost: a").await.unwrap();

        let mut reader = PipeReader::new(near, &pool);
        reader.set_read_timeout(Some(Duration::from_millis(50)));
        let mut parser = RequestParser::new();

        let err = reader.read_head(&mut parser, 1024).await.unwrap_err();
        assert!(matches!(err, ProxyError::Io(ref e) if e.kind() == io::ErrorKind::TimedOut));
        drop(far);
    }
}
