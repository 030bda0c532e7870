use parking_lot::RwLock;
use std::ops::{Deref, Range};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

use crate::buffer::pool::{BufferPool, PooledBuffer};
use crate::error::{ProxyError, Result};
use crate::http::body::BodyDecoder;
use crate::pipe::PipeReader;

/// One immutable run of body payload, stored in a pooled buffer.
///
/// The buffer returns to its pool when the last reference is dropped.
#[derive(Debug)]
pub struct Segment {
    buf: PooledBuffer,
    len: usize,
}

impl Deref for Segment {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// A cursor's view into part of a shared segment.
#[derive(Debug, Clone)]
pub struct SegmentView {
    segment: Arc<Segment>,
    range: Range<usize>,
}

impl Deref for SegmentView {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.segment[self.range.clone()]
    }
}

/// Where undelivered body bytes come from: the pipe they arrive on and the
/// decoder that strips their framing.
pub struct BodySource {
    pub reader: PipeReader,
    pub decoder: BodyDecoder,
}

impl BodySource {
    pub fn new(reader: PipeReader, decoder: BodyDecoder) -> Self {
        Self { reader, decoder }
    }
}

#[derive(Debug, Default)]
struct Segments {
    list: Vec<Arc<Segment>>,
    buffered: u64,
    end_of_stream: bool,
    failed: bool,
}

enum Probe {
    Ready(Arc<Segment>),
    End,
    Failed,
    Pending,
}

/// Append-only body store shared by any number of [`BodyCursor`]s.
///
/// Segments are produced on demand: a cursor that reaches the end of what
/// has been buffered triggers one fetch from the source. Fetches are
/// serialized, and a segment becomes visible only once it is complete.
///
/// [`BodyCursor`]: crate::buffer::BodyCursor
pub struct SegmentBuffer {
    pool: BufferPool,
    segments: RwLock<Segments>,
    source: tokio::sync::Mutex<Option<BodySource>>,
    network_reads: AtomicUsize,
}

impl SegmentBuffer {
    /// A buffer that pulls its content from `source` as cursors ask for it.
    pub fn streaming(pool: BufferPool, source: BodySource) -> Arc<Self> {
        let complete = source.decoder.is_complete();

        Arc::new(Self {
            pool,
            segments: RwLock::new(Segments {
                end_of_stream: complete,
                ..Default::default()
            }),
            source: tokio::sync::Mutex::new((!complete).then_some(source)),
            network_reads: AtomicUsize::new(0),
        })
    }

    /// A complete buffer holding `data`.
    pub fn from_bytes(pool: BufferPool, data: &[u8]) -> Arc<Self> {
        let mut segments = Segments {
            end_of_stream: true,
            ..Default::default()
        };

        for piece in data.chunks(pool.buffer_size()) {
            let mut buf = pool.rent();
            buf[..piece.len()].copy_from_slice(piece);
            segments.list.push(Arc::new(Segment { buf, len: piece.len() }));
            segments.buffered += piece.len() as u64;
        }

        Arc::new(Self {
            pool,
            segments: RwLock::new(segments),
            source: tokio::sync::Mutex::new(None),
            network_reads: AtomicUsize::new(0),
        })
    }

    pub fn empty(pool: BufferPool) -> Arc<Self> {
        Self::from_bytes(pool, &[])
    }

    /// Total body length, known once the last byte has been buffered.
    pub fn len(&self) -> Option<u64> {
        let segments = self.segments.read();
        segments.end_of_stream.then_some(segments.buffered)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Whether more data may still arrive.
    pub fn is_complete(&self) -> bool {
        self.segments.read().end_of_stream
    }

    pub fn buffered_len(&self) -> u64 {
        self.segments.read().buffered
    }

    pub fn segment_count(&self) -> usize {
        self.segments.read().list.len()
    }

    /// Number of socket reads issued on behalf of this body.
    pub fn network_reads(&self) -> usize {
        self.network_reads.load(Ordering::Relaxed)
    }

    /// Returns segment `index` starting at `offset`, fetching from the
    /// source as needed. `None` means the body ended before `index`.
    pub async fn segment(&self, index: usize, offset: usize) -> Result<Option<SegmentView>> {
        loop {
            match self.probe(index) {
                Probe::Ready(segment) => return Ok(Some(view(segment, offset))),
                Probe::End => return Ok(None),
                Probe::Failed => return Err(aborted()),
                Probe::Pending => {}
            }

            let mut source = self.source.lock().await;

            // Another cursor may have fetched while we waited for the lock.
            if !matches!(self.probe(index), Probe::Pending) {
                continue;
            }

            if let Err(e) = self.pull(&mut source).await {
                *source = None;
                self.segments.write().failed = true;
                return Err(e);
            }
        }
    }

    /// Reads the rest of the body from the network without handing it to
    /// anyone, so the length becomes known.
    pub async fn fill_to_end(&self) -> Result<u64> {
        let mut index = self.segment_count();
        while self.segment(index, 0).await?.is_some() {
            index += 1;
        }
        Ok(self.buffered_len())
    }

    fn probe(&self, index: usize) -> Probe {
        let segments = self.segments.read();

        if let Some(segment) = segments.list.get(index) {
            Probe::Ready(segment.clone())
        } else if segments.failed {
            Probe::Failed
        } else if segments.end_of_stream {
            Probe::End
        } else {
            Probe::Pending
        }
    }

    /// Produces at most one segment from the source.
    async fn pull(&self, slot: &mut Option<BodySource>) -> Result<()> {
        let Some(source) = slot.as_mut() else {
            self.segments.write().end_of_stream = true;
            return Ok(());
        };

        let mut buf = self.pool.rent();
        let capacity = buf.len();
        let mut filled = 0;

        while filled < capacity && !source.decoder.is_complete() {
            if source.reader.buffered().is_empty() {
                // Hand over what we have rather than wait for more.
                if filled > 0 {
                    break;
                }

                let n = source.reader.fill().await?;
                self.network_reads.fetch_add(1, Ordering::Relaxed);
                if n == 0 {
                    source.decoder.finish_at_eof()?;
                    break;
                }
                continue;
            }

            let available = source.reader.buffered();
            let decoded = source.decoder.decode(available, capacity - filled)?;
            let payload = &available[decoded.payload];
            buf[filled..filled + payload.len()].copy_from_slice(payload);
            filled += payload.len();
            source.reader.advance(decoded.consumed);
        }

        let complete = source.decoder.is_complete();
        trace!(bytes = filled, complete, "body segment fetched");

        let mut segments = self.segments.write();
        if filled > 0 {
            segments.list.push(Arc::new(Segment { buf, len: filled }));
            segments.buffered += filled as u64;
        }
        if complete {
            segments.end_of_stream = true;
            drop(segments);
            *slot = None;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SegmentBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let segments = self.segments.read();
        f.debug_struct("SegmentBuffer")
            .field("segments", &segments.list.len())
            .field("buffered", &segments.buffered)
            .field("end_of_stream", &segments.end_of_stream)
            .finish()
    }
}

fn view(segment: Arc<Segment>, offset: usize) -> SegmentView {
    let end = segment.len();
    SegmentView {
        segment,
        range: offset.min(end)..end,
    }
}

fn aborted() -> ProxyError {
    ProxyError::Forwarding("body stream was aborted by an earlier error".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_splits_into_pool_sized_segments() {
        let pool = BufferPool::new(4, 8);
        let buffer = SegmentBuffer::from_bytes(pool.clone(), b"0123456789");

        assert_eq!(buffer.segment_count(), 3);
        assert_eq!(buffer.len(), Some(10));
        assert_eq!(pool.outstanding(), 3);

        drop(buffer);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn empty_buffer_has_known_zero_length() {
        let buffer = SegmentBuffer::empty(BufferPool::default());
        assert!(buffer.is_empty());
        assert!(buffer.is_complete());
    }
}
