//! Body framing: fixed length, chunked transfer coding and read-until-close.
//!
//! Decoders work on whatever bytes are at hand and keep all state between
//! calls, so the result never depends on where the network split the stream.

use bytes::{BufMut, BytesMut};
use std::fmt::Write as _;
use std::ops::Range;

use super::constants::{CHUNKED_TERMINATOR, CR, CRLF, LF};
use crate::error::{ProxyError, Result};

/// How the body following a head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(u64),
    Chunked,
    /// Response bodies without a length run until the origin closes
    UntilClose,
}

/// Result of one [`BodyDecoder::decode`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Bytes of input used, framing included.
    pub consumed: usize,
    /// Payload bytes within the input slice.
    pub payload: Range<usize>,
}

impl Decoded {
    fn framing_only(consumed: usize) -> Self {
        Decoded { consumed, payload: 0..0 }
    }
}

#[derive(Debug, Clone)]
pub enum BodyDecoder {
    Length { remaining: u64 },
    Chunked(ChunkedDecoder),
    UntilClose,
    Done,
}

impl BodyDecoder {
    pub fn new(framing: BodyFraming) -> Self {
        match framing {
            BodyFraming::Empty | BodyFraming::Length(0) => BodyDecoder::Done,
            BodyFraming::Length(n) => BodyDecoder::Length { remaining: n },
            BodyFraming::Chunked => BodyDecoder::Chunked(ChunkedDecoder::new()),
            BodyFraming::UntilClose => BodyDecoder::UntilClose,
        }
    }

    pub fn is_complete(&self) -> bool {
        match self {
            BodyDecoder::Done => true,
            BodyDecoder::Chunked(chunked) => chunked.is_complete(),
            _ => false,
        }
    }

    /// Decodes the next run of payload from `data`, yielding at most
    /// `max_payload` payload bytes.
    ///
    /// Consumes nothing once the body is complete; bytes after the body
    /// belong to the next message.
    pub fn decode(&mut self, data: &[u8], max_payload: usize) -> Result<Decoded> {
        match self {
            BodyDecoder::Done => Ok(Decoded::framing_only(0)),
            BodyDecoder::Length { remaining } => {
                let n = (*remaining).min(data.len() as u64).min(max_payload as u64) as usize;
                *remaining -= n as u64;
                if *remaining == 0 {
                    *self = BodyDecoder::Done;
                }
                Ok(Decoded { consumed: n, payload: 0..n })
            }
            BodyDecoder::Chunked(chunked) => chunked.decode(data, max_payload),
            BodyDecoder::UntilClose => {
                let n = data.len().min(max_payload);
                Ok(Decoded { consumed: n, payload: 0..n })
            }
        }
    }

    /// Called when the peer closed the stream.
    pub fn finish_at_eof(&mut self) -> Result<()> {
        match self {
            BodyDecoder::UntilClose | BodyDecoder::Done => {
                *self = BodyDecoder::Done;
                Ok(())
            }
            _ if self.is_complete() => Ok(()),
            _ => Err(ProxyError::UnexpectedEof),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size { value: u64, digits: usize },
    Extension(u64),
    SizeLf(u64),
    Data(u64),
    DataCr,
    DataLf,
    TrailerStart,
    TrailerLine,
    TrailerLf,
    EndLf,
    Done,
}

/// Strips chunk envelopes (`hex-size [;ext] CRLF data CRLF`) one byte of
/// framing at a time.
#[derive(Debug, Clone)]
pub struct ChunkedDecoder {
    state: ChunkState,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            state: ChunkState::Size { value: 0, digits: 0 },
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == ChunkState::Done
    }

    pub fn decode(&mut self, data: &[u8], max_payload: usize) -> Result<Decoded> {
        let mut i = 0;

        while i < data.len() {
            let b = data[i];

            self.state = match self.state {
                ChunkState::Done => return Ok(Decoded::framing_only(i)),
                ChunkState::Data(remaining) => {
                    let n = remaining
                        .min((data.len() - i) as u64)
                        .min(max_payload as u64) as usize;
                    if n == 0 {
                        return Ok(Decoded::framing_only(i));
                    }

                    let left = remaining - n as u64;
                    self.state = if left == 0 { ChunkState::DataCr } else { ChunkState::Data(left) };
                    return Ok(Decoded { consumed: i + n, payload: i..i + n });
                }
                ChunkState::Size { value, digits } => match b {
                    b';' | b' ' | b'\t' if digits > 0 => ChunkState::Extension(value),
                    CR if digits > 0 => ChunkState::SizeLf(value),
                    _ => {
                        let digit = (b as char)
                            .to_digit(16)
                            .ok_or_else(|| ProxyError::malformed("expected a hex digit in chunk size"))?;
                        let value = value
                            .checked_mul(16)
                            .and_then(|v| v.checked_add(digit as u64))
                            .ok_or_else(|| ProxyError::malformed("chunk size overflows"))?;
                        ChunkState::Size { value, digits: digits + 1 }
                    }
                },
                ChunkState::Extension(value) => match b {
                    CR => ChunkState::SizeLf(value),
                    _ => ChunkState::Extension(value),
                },
                ChunkState::SizeLf(value) => {
                    expect(b, LF, "expected LF after chunk size")?;
                    match value {
                        0 => ChunkState::TrailerStart,
                        n => ChunkState::Data(n),
                    }
                }
                ChunkState::DataCr => {
                    expect(b, CR, "expected CR after chunk data")?;
                    ChunkState::DataLf
                }
                ChunkState::DataLf => {
                    expect(b, LF, "expected LF after chunk data")?;
                    ChunkState::Size { value: 0, digits: 0 }
                }
                ChunkState::TrailerStart => match b {
                    CR => ChunkState::EndLf,
                    _ => ChunkState::TrailerLine,
                },
                ChunkState::TrailerLine => match b {
                    CR => ChunkState::TrailerLf,
                    _ => ChunkState::TrailerLine,
                },
                ChunkState::TrailerLf => {
                    expect(b, LF, "expected LF after trailer field")?;
                    ChunkState::TrailerStart
                }
                ChunkState::EndLf => {
                    expect(b, LF, "expected LF after last chunk")?;
                    ChunkState::Done
                }
            };

            i += 1;
        }

        Ok(Decoded::framing_only(i))
    }
}

fn expect(actual: u8, expected: u8, reason: &str) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(ProxyError::malformed(reason))
    }
}

/// Wraps payload runs in chunk envelopes.
#[derive(Debug, Default)]
pub struct ChunkedEncoder {
    finished: bool,
}

impl ChunkedEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes one chunk. Empty input writes nothing, since a zero-size chunk
    /// would end the body.
    pub fn encode(&mut self, data: &[u8], out: &mut BytesMut) {
        debug_assert!(!self.finished, "chunk written after terminator");
        if data.is_empty() {
            return;
        }

        out.reserve(data.len() + 20);
        let _ = write!(out, "{:x}", data.len());
        out.put_slice(CRLF);
        out.put_slice(data);
        out.put_slice(CRLF);
    }

    /// Writes the `0\r\n\r\n` terminator once.
    pub fn finish(&mut self, out: &mut BytesMut) {
        if !self.finished {
            out.put_slice(CHUNKED_TERMINATOR);
            self.finished = true;
        }
    }
}
