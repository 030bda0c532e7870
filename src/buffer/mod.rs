//! Body storage.
//!
//! - **`pool`**: shared, bounded free list of byte buffers
//! - **`segment`**: append-only list of pooled segments filled lazily from a
//!   pipe, with at most one network fetch in flight
//! - **`cursor`**: independent replay positions over a segment buffer

pub mod cursor;
pub mod pool;
pub mod segment;

pub use cursor::BodyCursor;
pub use pool::{BufferPool, PooledBuffer};
pub use segment::{BodySource, Segment, SegmentBuffer, SegmentView};
