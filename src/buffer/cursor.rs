use std::sync::Arc;

use crate::buffer::segment::{SegmentBuffer, SegmentView};
use crate::error::Result;

/// An independent read position over a [`SegmentBuffer`].
///
/// Cursors never share offsets; several can walk the same body at their
/// own pace and only the one that reaches the frontier triggers a fetch.
#[derive(Debug, Clone)]
pub struct BodyCursor {
    buffer: Arc<SegmentBuffer>,
    index: usize,
    offset: usize,
    position: u64,
}

impl BodyCursor {
    pub fn new(buffer: Arc<SegmentBuffer>) -> Self {
        Self {
            buffer,
            index: 0,
            offset: 0,
            position: 0,
        }
    }

    pub fn buffer(&self) -> &Arc<SegmentBuffer> {
        &self.buffer
    }

    /// Bytes yielded so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns the unread remainder of the current segment and moves past it.
    pub async fn next_segment(&mut self) -> Result<Option<SegmentView>> {
        let Some(view) = self.buffer.segment(self.index, self.offset).await? else {
            return Ok(None);
        };

        self.index += 1;
        self.offset = 0;
        self.position += view.len() as u64;
        Ok(Some(view))
    }

    /// Copies up to `out.len()` bytes; zero means the body is exhausted.
    pub async fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        loop {
            let Some(view) = self.buffer.segment(self.index, self.offset).await? else {
                return Ok(0);
            };

            // An exhausted segment; move to the next one.
            if view.is_empty() {
                self.index += 1;
                self.offset = 0;
                continue;
            }

            let n = view.len().min(out.len());
            out[..n].copy_from_slice(&view[..n]);
            self.offset += n;
            self.position += n as u64;
            return Ok(n);
        }
    }

    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(segment) = self.next_segment().await? {
            out.extend_from_slice(&segment);
        }
        Ok(out)
    }

    /// Goes back to the first byte without touching the network.
    pub fn rewind(&mut self) {
        self.index = 0;
        self.offset = 0;
        self.position = 0;
    }
}
