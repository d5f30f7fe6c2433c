//! Owned message-pipe ends for talking to a remote session.
//!
//! Provides:
//! - `OwnedPipeEnd` - Exclusively owned, idempotently closed pipe end
//! - `MessageTransport` - Transport seam, with in-memory and framed impls
//! - Line framing (JSON + base64)

pub mod pipe;
pub mod protocol;
pub mod transport;

pub use pipe::{OwnedPipeEnd, PipeError};
pub use protocol::Frame;
pub use transport::{
    BoxTransport, ChannelTransport, DEFAULT_MAX_FRAME_LEN, FramedTransport, MessageTransport,
};
