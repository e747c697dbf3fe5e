use std::io;

use thiserror::Error;

/// Failure modes of the wire layer.
///
/// Every variant except [`WireError::Io`] is a protocol-level condition;
/// all of them are fatal for the connection they occur on. The framing
/// reader never recovers mid-frame.
#[derive(Debug, Error)]
pub enum WireError {
    /// The header advertised a payload larger than the hard cap.
    #[error("advertised payload length {0} is too large")]
    OversizedPayload(u32),

    /// The payload hash prefix did not match the header checksum.
    #[error("checksum mismatch: message advertised {advertised:08x}, calculated {calculated:08x}")]
    ChecksumMismatch { advertised: u32, calculated: u32 },

    /// The stream ended before a complete message could be read.
    #[error("stream ended before the end of the message")]
    ShortRead,

    /// A command string was not sendable: over 12 bytes or non-ASCII.
    #[error("invalid command {0:?}")]
    InvalidCommand(String),

    /// An `inv`/`getdata` vector list was over the 50 000-entry cap.
    #[error("inventory list of {0} entries is over the limit")]
    OversizedInventory(usize),

    /// A payload field could not be parsed.
    #[error("decode error: {0}")]
    Decode(&'static str),

    /// Transport failure (including read deadline expiry).
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl WireError {
    /// Maps `read_exact` errors so that a clean EOF is reported as
    /// [`WireError::ShortRead`] instead of a generic I/O error.
    pub(crate) fn from_read(err: io::Error) -> WireError {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => WireError::ShortRead,
            _ => WireError::Io(err),
        }
    }
}
