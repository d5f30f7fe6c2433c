//! Serialized dispatch of submission batches.
//!
//! Every batch goes through one FIFO queue drained by a single worker task.
//! A batch is forwarded line by line, and each line must be acknowledged by
//! the front-end before the next one is sent. Batches never interleave.

use std::{
    future::IntoFuture,
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU8, Ordering},
    },
};

use futures::{FutureExt, future::BoxFuture};
use repl_relay_core::{DispatchEvent, EventStore, InputError};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::locator::{ActiveSessionLocator, LocatorError};

/// Dispatch error.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No active session")]
    NoActiveSession,
    #[error("Batch cancelled")]
    Cancelled,
    #[error("Front-end rejected line {line}: {source}")]
    Input {
        line: usize,
        #[source]
        source: InputError,
    },
    #[error("Session lookup failed: {0}")]
    Lookup(LocatorError),
    #[error("Front-end panicked while accepting input")]
    Panicked,
    #[error("Dispatcher is shut down")]
    Closed,
}

impl From<LocatorError> for DispatchError {
    fn from(err: LocatorError) -> Self {
        match err {
            LocatorError::Cancelled => Self::Cancelled,
            err @ LocatorError::Registry(_) => Self::Lookup(err),
        }
    }
}

/// Outcome of a batch that was forwarded completely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub seq: u64,
    pub lines: usize,
}

type BatchResult = Result<BatchReport, DispatchError>;

const QUEUED: u8 = 0;
const STARTED: u8 = 1;
const WITHDRAWN: u8 = 2;

/// Shared between a [`Submission`] and its queued batch.
struct Ticket {
    state: AtomicU8,
    cancel: CancellationToken,
}

impl Ticket {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            state: AtomicU8::new(QUEUED),
            cancel,
        }
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(QUEUED, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_withdrawn(&self) -> bool {
        self.state.load(Ordering::Acquire) == WITHDRAWN
    }
}

struct QueuedBatch {
    seq: u64,
    lines: Vec<String>,
    ticket: Arc<Ticket>,
    done: oneshot::Sender<BatchResult>,
}

/// Handle to a submitted batch.
///
/// Awaiting it resolves once every line was forwarded, or with the first
/// error. Dropping it does not cancel the batch.
#[must_use = "a submission does nothing observable unless awaited or cancelled"]
pub struct Submission {
    seq: u64,
    ticket: Arc<Ticket>,
    done: oneshot::Receiver<BatchResult>,
}

impl std::fmt::Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submission").field("seq", &self.seq).finish_non_exhaustive()
    }
}

impl Submission {
    fn completed(report: BatchReport) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(report));
        let ticket = Ticket::new(CancellationToken::new());
        ticket.state.store(STARTED, Ordering::Release);
        Self {
            seq: report.seq,
            ticket: Arc::new(ticket),
            done: rx,
        }
    }

    /// Sequence number assigned at admission. Zero for an empty batch.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Cancel the batch.
    ///
    /// A batch still queued is withdrawn and none of its lines are sent.
    /// A batch in flight stops before its next line.
    pub fn cancel(&self) {
        if self.ticket.transition(WITHDRAWN) {
            debug!(seq = self.seq, "Batch withdrawn");
        }
        self.ticket.cancel.cancel();
    }

    /// Wait for the batch to finish.
    ///
    /// # Errors
    /// Returns the error that aborted the batch.
    pub async fn wait(self) -> BatchResult {
        let Self { ticket, mut done, .. } = self;
        tokio::select! {
            biased;
            result = &mut done => return result.unwrap_or(Err(DispatchError::Closed)),
            () = ticket.cancel.cancelled() => {}
        }
        if ticket.is_withdrawn() {
            return Err(DispatchError::Cancelled);
        }
        done.await.unwrap_or(Err(DispatchError::Closed))
    }
}

impl IntoFuture for Submission {
    type Output = BatchResult;
    type IntoFuture = BoxFuture<'static, BatchResult>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

/// Admission side of the queue.
struct Admission {
    next_seq: u64,
    tx: mpsc::UnboundedSender<QueuedBatch>,
}

/// Owns the dispatch queue and its worker.
pub struct SubmissionDispatcher {
    admission: Mutex<Admission>,
    events: Arc<EventStore>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SubmissionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionDispatcher")
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SubmissionDispatcher {
    /// Start the worker. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn start(locator: Arc<ActiveSessionLocator>, events: Arc<EventStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let worker = Worker {
            locator,
            events: Arc::clone(&events),
        };
        let handle = tokio::spawn(worker.run(rx, shutdown.clone()));

        Self {
            admission: Mutex::new(Admission { next_seq: 1, tx }),
            events,
            shutdown,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Queue a batch of lines.
    ///
    /// An empty batch completes immediately and never reaches the queue.
    ///
    /// # Errors
    /// Returns `Closed` after shutdown.
    pub fn submit<I, S>(&self, lines: I) -> Result<Submission, DispatchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        if lines.is_empty() {
            return Ok(Submission::completed(BatchReport { seq: 0, lines: 0 }));
        }
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::Closed);
        }

        let ticket = Arc::new(Ticket::new(self.shutdown.child_token()));
        let (done_tx, done_rx) = oneshot::channel();
        let count = lines.len();

        let mut admission = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = admission.next_seq;
        let batch = QueuedBatch {
            seq,
            lines,
            ticket: Arc::clone(&ticket),
            done: done_tx,
        };
        admission.next_seq += 1;
        // Recorded before the worker can observe the batch.
        self.events.push(DispatchEvent::BatchQueued { seq, lines: count });
        if admission.tx.send(batch).is_err() {
            drop(admission);
            self.events.push(DispatchEvent::BatchFailed {
                seq,
                reason: DispatchError::Closed.to_string(),
            });
            return Err(DispatchError::Closed);
        }
        drop(admission);

        debug!(seq, lines = count, "Batch queued");
        Ok(Submission {
            seq,
            ticket,
            done: done_rx,
        })
    }

    /// Stop the worker.
    ///
    /// The batch in flight is cancelled and batches still queued fail with
    /// `Closed`.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                error!("Dispatch worker failed: {e}");
            }
        }
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for SubmissionDispatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Worker {
    locator: Arc<ActiveSessionLocator>,
    events: Arc<EventStore>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<QueuedBatch>, shutdown: CancellationToken) {
        loop {
            let batch = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                batch = rx.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };
            self.handle(batch).await;
        }

        rx.close();
        while let Ok(batch) = rx.try_recv() {
            self.events.push(DispatchEvent::BatchFailed {
                seq: batch.seq,
                reason: DispatchError::Closed.to_string(),
            });
            let _ = batch.done.send(Err(DispatchError::Closed));
        }
        debug!("Dispatch worker stopped");
    }

    async fn handle(&self, batch: QueuedBatch) {
        let QueuedBatch {
            seq,
            lines,
            ticket,
            done,
        } = batch;

        if !ticket.transition(STARTED) {
            debug!(seq, "Skipping withdrawn batch");
            self.events.push(DispatchEvent::BatchWithdrawn { seq });
            return;
        }
        self.events.push(DispatchEvent::BatchStarted { seq });

        let forwarded = AssertUnwindSafe(self.forward(seq, &lines, &ticket.cancel))
            .catch_unwind()
            .await
            .unwrap_or(Err(DispatchError::Panicked));

        let result = match forwarded {
            Ok(()) => {
                self.events.push(DispatchEvent::BatchCompleted { seq });
                Ok(BatchReport {
                    seq,
                    lines: lines.len(),
                })
            }
            Err(err) => {
                warn!(seq, "Batch failed: {err}");
                self.events.push(DispatchEvent::BatchFailed {
                    seq,
                    reason: err.to_string(),
                });
                Err(err)
            }
        };
        let _ = done.send(result);
    }

    /// Forward each line to the front-end resolved at batch start.
    ///
    /// The batch fails once that front-end stops being the tracked one.
    async fn forward(
        &self,
        seq: u64,
        lines: &[String],
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        let front_end = self
            .locator
            .get_active(false, cancel)
            .await?
            .ok_or(DispatchError::NoActiveSession)?;
        let id = front_end.id();

        for (index, line) in lines.iter().enumerate() {
            if index > 0 && !self.locator.is_current(id) {
                debug!(seq, index, front_end = %id, "Front-end no longer active");
                return Err(DispatchError::NoActiveSession);
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(DispatchError::Cancelled),
                accepted = front_end.accept_input(line) => {
                    accepted.map_err(|source| DispatchError::Input { line: index, source })?;
                }
            }

            self.events.push(DispatchEvent::LineForwarded {
                seq,
                index,
                front_end: id,
            });
        }
        Ok(())
    }
}
