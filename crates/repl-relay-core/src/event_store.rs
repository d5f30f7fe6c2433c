//! Broadcast + history store for dispatch events.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::{StreamExt, future};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{DispatchEvent, RelayConfig};

/// Event store with broadcast and history support.
///
/// Late subscribers receive the retained history first and then follow
/// live updates without gaps.
pub struct EventStore {
    history: RwLock<VecDeque<DispatchEvent>>,
    limit: usize,
    sender: broadcast::Sender<DispatchEvent>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

impl EventStore {
    /// Create a store keeping at most `limit` events.
    #[must_use]
    pub fn new(limit: usize, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            history: RwLock::new(VecDeque::with_capacity(limit.min(64))),
            limit,
            sender,
        }
    }

    /// Create a store sized from the relay configuration.
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.event_history, config.event_capacity)
    }

    /// Record an event and publish it to live listeners.
    pub fn push(&self, event: DispatchEvent) {
        // Publish under the write lock so a concurrent snapshot+subscribe
        // sees each event exactly once.
        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        if self.limit > 0 {
            while history.len() >= self.limit {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        let _ = self.sender.send(event);
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }

    /// Snapshot of the retained history.
    #[must_use]
    pub fn history(&self) -> Vec<DispatchEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live updates.
    ///
    /// Lagging receivers silently skip the events they missed.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, DispatchEvent> {
        let (history, rx) = {
            let guard = self.history.read().unwrap_or_else(PoisonError::into_inner);
            (guard.iter().cloned().collect::<Vec<_>>(), self.sender.subscribe())
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }

    /// Events of a single batch, ending with its terminal event.
    #[must_use]
    pub fn batch_stream(&self, seq: u64) -> futures::stream::BoxStream<'static, DispatchEvent> {
        let events = self
            .history_plus_stream()
            .filter(move |event| future::ready(event.seq() == seq))
            .boxed();

        futures::stream::unfold((events, false), |(mut events, done)| async move {
            if done {
                return None;
            }
            let event = events.next().await?;
            let done = event.is_terminal();
            Some((event, (events, done)))
        })
        .boxed()
    }
}
