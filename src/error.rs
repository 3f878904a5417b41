//! Error taxonomy for the block VFS (see spec §7).

use std::io;

/// All failure modes surfaced by this crate.
///
/// Chosen deliberately as a sum type rather than a sentinel integer: a
/// legal register frame is a full 64-bit value, so no unsigned return could
/// double as both "frame" and "error" without risking collision.
#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    /// Transport short read/write, unexpected opcode echoed back, or a
    /// response whose b0/b1 flags were not both set to "success".
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Every block on every online device is already allocated.
    #[error("capacity exhausted: no free block on any online device")]
    Capacity,

    /// Operation on a closed/invalid handle, or a seek past end-of-file.
    #[error("usage error: {0}")]
    Usage(String),

    /// A response echoed the request's opcode but indicated controller-side
    /// failure (b1 != 1 after the request leg).
    #[error("controller rejected request: opcode {opcode:#x}")]
    Controller { opcode: u8 },

    /// The underlying TCP stream failed outright.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type VfsResult<T> = Result<T, VfsError>;
