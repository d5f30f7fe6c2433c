//! Session routing for the relay.
//!
//! Provides:
//! - `ActiveSessionLocator` - Track the active front-end of a slot
//! - `SubmissionDispatcher` - Forward batches of lines in strict FIFO order
//! - `ReplRelay` - Facade over both, plus the callback pipe

pub mod dispatcher;
pub mod locator;
pub mod relay;

#[cfg(test)]
mod testing;

pub use dispatcher::{BatchReport, DispatchError, Submission, SubmissionDispatcher};
pub use locator::{ActiveSessionLocator, LocatorError, LocatorStatus};
pub use relay::{RelayError, ReplRelay};
