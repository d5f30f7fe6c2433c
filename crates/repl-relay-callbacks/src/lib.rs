//! Interactive callback surface served to a remote session.
//!
//! Provides:
//! - `SessionCallback` - One method per interactive callback kind
//! - `DefaultCallback` / `RecordingCallback` - Neutral and recording impls
//! - `CallbackPeer` - Answers callback requests arriving over a pipe end

pub mod callback;
pub mod messages;
pub mod peer;
pub mod recording;

pub use callback::{
    ButtonPressed, CallbackError, DefaultCallback, LocatorResult, MessageButtons, PlotDeviceProperties,
    PlotMessage, SessionCallback,
};
pub use messages::{CallbackKind, CallbackReply, CallbackRequest};
pub use peer::{CallbackClient, CallbackPeer, PeerError};
pub use recording::{CallbackCall, RecordingCallback};
