//! Typed dispatch events.

use serde::{Deserialize, Serialize};

use crate::traits::FrontEndId;

/// Progress of a submission batch through the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// Batch admitted to the queue.
    BatchQueued { seq: u64, lines: usize },
    /// Worker picked the batch up.
    BatchStarted { seq: u64 },
    /// One line acknowledged by a front-end.
    LineForwarded {
        seq: u64,
        index: usize,
        front_end: FrontEndId,
    },
    /// Every line was forwarded.
    BatchCompleted { seq: u64 },
    /// Batch aborted.
    BatchFailed { seq: u64, reason: String },
    /// Batch cancelled before the worker reached it.
    BatchWithdrawn { seq: u64 },
}

impl DispatchEvent {
    /// Sequence number of the batch this event belongs to.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        match self {
            Self::BatchQueued { seq, .. }
            | Self::BatchStarted { seq }
            | Self::LineForwarded { seq, .. }
            | Self::BatchCompleted { seq }
            | Self::BatchFailed { seq, .. }
            | Self::BatchWithdrawn { seq } => *seq,
        }
    }

    /// Whether no further events follow for this batch.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::BatchCompleted { .. } | Self::BatchFailed { .. } | Self::BatchWithdrawn { .. }
        )
    }
}
