//! Bounded Ring Buffer
//!
//! Fixed-capacity FIFO history: pushing past capacity silently evicts the
//! oldest entry, and iteration always runs oldest to newest.

mod buffer;

pub use buffer::RingBuffer;

use thiserror::Error;

/// Ring buffer construction errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingBufferError {
    #[error("Ring buffer capacity must be at least 1")]
    ZeroCapacity,
}
