//! Relay facade wiring the locator, dispatcher and callback peer together.

use std::sync::{Arc, Mutex, PoisonError};

use repl_relay_callbacks::{CallbackPeer, PeerError, SessionCallback};
use repl_relay_core::{EventStore, FrontEndRef, HostEvent, InputError, RelayConfig, SessionRegistry};
use repl_relay_pipe::{MessageTransport, OwnedPipeEnd};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    dispatcher::{DispatchError, Submission, SubmissionDispatcher},
    locator::{ActiveSessionLocator, LocatorError},
};

/// Relay error.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Session lookup failed: {0}")]
    Locator(#[from] LocatorError),
    #[error("No active session")]
    NoActiveSession,
    #[error("Front-end rejected input: {0}")]
    Input(#[from] InputError),
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("Callback peer error: {0}")]
    Peer(#[from] PeerError),
}

struct AttachedPeer {
    cancel: CancellationToken,
    task: JoinHandle<Result<u64, PeerError>>,
}

/// Entry point for one session kind.
pub struct ReplRelay {
    config: RelayConfig,
    locator: Arc<ActiveSessionLocator>,
    events: Arc<EventStore>,
    dispatcher: SubmissionDispatcher,
    peer: Mutex<Option<AttachedPeer>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ReplRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplRelay")
            .field("config", &self.config)
            .field("locator", &self.locator)
            .finish_non_exhaustive()
    }
}

impl ReplRelay {
    /// Build the relay and start its dispatch worker.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn init(config: RelayConfig, registry: Arc<dyn SessionRegistry>) -> Self {
        let locator = Arc::new(ActiveSessionLocator::new(registry, config.slot));
        let events = Arc::new(EventStore::from_config(&config));
        let dispatcher = SubmissionDispatcher::start(Arc::clone(&locator), Arc::clone(&events));
        info!(slot = %config.slot, "Relay initialized");

        Self {
            config,
            locator,
            events,
            dispatcher,
            peer: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &RelayConfig {
        &self.config
    }

    #[must_use]
    pub const fn locator(&self) -> &Arc<ActiveSessionLocator> {
        &self.locator
    }

    #[must_use]
    pub const fn events(&self) -> &Arc<EventStore> {
        &self.events
    }

    /// Feed a host notification to the locator.
    pub fn handle_host_event(&self, event: &HostEvent) {
        debug!(kind = event.kind(), "Host event");
        self.locator.apply(event);
    }

    /// Queue a batch of lines for the active session.
    ///
    /// # Errors
    /// Returns error if the dispatcher is shut down.
    pub fn submit<I, S>(&self, lines: I) -> Result<Submission, DispatchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dispatcher.submit(lines)
    }

    /// Resolve the active front-end.
    ///
    /// # Errors
    /// Returns error if the registry fails.
    pub async fn active_session(
        &self,
        create_if_missing: bool,
    ) -> Result<Option<FrontEndRef>, LocatorError> {
        self.active_session_with_cancel(create_if_missing, &self.cancel)
            .await
    }

    /// Resolve the active front-end, giving up when `cancel` fires.
    ///
    /// # Errors
    /// Returns error if the registry fails or the lookup is cancelled.
    pub async fn active_session_with_cancel(
        &self,
        create_if_missing: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<FrontEndRef>, LocatorError> {
        self.locator.get_active(create_if_missing, cancel).await
    }

    /// Run `code` on the active front-end outside the submission queue.
    ///
    /// Blank code is ignored. The front-end is created when missing if the
    /// configuration allows it.
    ///
    /// # Errors
    /// Returns error if no front-end is available or it refuses the code.
    pub async fn execute_immediate(&self, code: &str) -> Result<(), RelayError> {
        self.execute_immediate_with_cancel(code, &self.cancel).await
    }

    /// [`execute_immediate`](Self::execute_immediate) whose session lookup
    /// gives up when `cancel` fires.
    ///
    /// # Errors
    /// Returns error if no front-end is available, it refuses the code, or
    /// the lookup is cancelled.
    pub async fn execute_immediate_with_cancel(
        &self,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RelayError> {
        if code.trim().is_empty() {
            return Ok(());
        }
        let front_end = self
            .active_session_with_cancel(self.config.immediate_creates_session, cancel)
            .await?
            .ok_or(RelayError::NoActiveSession)?;
        front_end.execute(code)?;
        Ok(())
    }

    /// Serve interactive callbacks over `pipe`.
    ///
    /// A previously attached pipe is detached first.
    pub async fn attach_pipe<T>(&self, pipe: OwnedPipeEnd<T>, callback: Arc<dyn SessionCallback>)
    where
        T: MessageTransport + 'static,
    {
        if let Err(e) = self.detach_pipe().await {
            error!("Previous callback peer failed: {e}");
        }

        let cancel = self.cancel.child_token();
        let task = CallbackPeer::new(pipe, callback).spawn(cancel.clone());
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner) = Some(AttachedPeer { cancel, task });
        debug!("Callback pipe attached");
    }

    /// Stop serving callbacks and release the pipe.
    ///
    /// Returns the number of requests served, or `None` when no pipe was
    /// attached.
    ///
    /// # Errors
    /// Returns error if the peer failed.
    pub async fn detach_pipe(&self) -> Result<Option<u64>, RelayError> {
        let attached = self.peer.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(AttachedPeer { cancel, task }) = attached else {
            return Ok(None);
        };

        cancel.cancel();
        match task.await {
            Ok(served) => {
                let served = served?;
                debug!(served, "Callback pipe detached");
                Ok(Some(served))
            }
            Err(e) => {
                error!("Callback peer task failed: {e}");
                Ok(None)
            }
        }
    }

    /// Whether a callback pipe is attached and still being served.
    #[must_use]
    pub fn has_pipe(&self) -> bool {
        self.peer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|peer| !peer.task.is_finished())
    }

    /// Release the pipe, stop the dispatcher and forget the session.
    pub async fn teardown(self) {
        if let Err(e) = self.detach_pipe().await {
            error!("Callback peer failed: {e}");
        }
        self.cancel.cancel();
        self.dispatcher.shutdown().await;
        self.locator.clear();
        info!("Relay torn down");
    }
}

impl Drop for ReplRelay {
    fn drop(&mut self) {
        // Stops an attached peer, which then releases its pipe.
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use repl_relay_callbacks::{
        CallbackCall, CallbackClient, CallbackKind, DefaultCallback, RecordingCallback,
    };
    use repl_relay_core::SlotToken;
    use repl_relay_pipe::ChannelTransport;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::testing::{StubFrontEnd, StubRegistry};

    fn relay() -> (ReplRelay, Arc<StubRegistry>, SlotToken) {
        let slot = SlotToken::random();
        let registry = Arc::new(StubRegistry::new());
        let relay = ReplRelay::init(RelayConfig::new(slot), registry.clone());
        (relay, registry, slot)
    }

    #[tokio::test]
    async fn test_end_to_end_submissions() {
        let (relay, _, slot) = relay();
        let (stub, front_end) = StubFrontEnd::new(slot).into_ref();
        relay.handle_host_event(&HostEvent::ActivationChanged {
            old: None,
            new: Some(front_end),
        });

        let first = relay.submit(["a=1", "b=2"]).unwrap();
        let second = relay.submit(["print(a+b)"]).unwrap();
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(stub.received(), vec!["a=1", "b=2", "print(a+b)"]);
        relay.teardown().await;
    }

    #[tokio::test]
    async fn test_execute_immediate_creates_session() {
        let (relay, registry, slot) = relay();
        let (stub, front_end) = StubFrontEnd::new(slot).into_ref();
        registry.create_with(front_end);

        assert_ok!(relay.execute_immediate("plot(x)").await);
        assert_eq!(stub.executed(), vec!["plot(x)"]);
        assert_eq!(stub.shown(), 1);
        assert!(relay.locator().current().is_some());
    }

    #[tokio::test]
    async fn test_execute_immediate_ignores_blank_code() {
        let (relay, registry, _) = relay();
        assert_ok!(relay.execute_immediate("  \n\t").await);
        assert!(registry.lookups().is_empty());
    }

    #[tokio::test]
    async fn test_execute_immediate_without_create() {
        let slot = SlotToken::random();
        let registry = Arc::new(StubRegistry::new());
        let config = RelayConfig {
            immediate_creates_session: false,
            ..RelayConfig::new(slot)
        };
        let relay = ReplRelay::init(config, registry.clone());

        let result = relay.execute_immediate("1 + 1").await;
        assert!(matches!(result, Err(RelayError::NoActiveSession)));
        assert_eq!(registry.lookups(), vec![false]);
    }

    #[tokio::test]
    async fn test_active_session_lookup() {
        let (relay, registry, slot) = relay();
        assert!(relay.active_session(false).await.unwrap().is_none());

        let (_, front_end) = StubFrontEnd::new(slot).into_ref();
        registry.register(front_end.clone());
        let found = relay.active_session(false).await.unwrap().unwrap();
        assert_eq!(found.id(), front_end.id());

        registry.unregister(front_end.id());
        relay.handle_host_event(&HostEvent::Destroyed(front_end));
        assert!(relay.active_session(false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_attached_pipe_serves_callbacks() {
        let (relay, _, _) = relay();
        let recording = Arc::new(RecordingCallback::new().with_user_input("42\n"));
        let (local, remote) = ChannelTransport::pair();

        relay.attach_pipe(OwnedPipeEnd::new(local), recording.clone()).await;
        assert!(relay.has_pipe());

        let mut client = CallbackClient::new(OwnedPipeEnd::new(remote));
        let value = client
            .call(CallbackKind::ReadUserInput {
                prompt: "n? ".into(),
                max_length: 8,
            })
            .await
            .unwrap();
        assert_eq!(value, json!("42\n"));

        assert_eq!(relay.detach_pipe().await.unwrap(), Some(1));
        assert!(!relay.has_pipe());
        assert_eq!(
            recording.calls(),
            vec![CallbackCall::ReadUserInput {
                prompt: "n? ".into(),
                max_length: 8
            }]
        );
    }

    #[tokio::test]
    async fn test_teardown_releases_pipe() {
        let (relay, _, _) = relay();
        let (local, remote) = ChannelTransport::pair();
        relay
            .attach_pipe(OwnedPipeEnd::new(local), Arc::new(DefaultCallback))
            .await;

        relay.teardown().await;

        let mut remote = OwnedPipeEnd::new(remote);
        let err = assert_err!(remote.receive().await);
        assert!(err.is_remote_closed());
    }

    #[tokio::test]
    async fn test_drop_without_teardown_releases_pipe() {
        let (relay, _, _) = relay();
        let (local, remote) = ChannelTransport::pair();
        relay
            .attach_pipe(OwnedPipeEnd::new(local), Arc::new(DefaultCallback))
            .await;

        drop(relay);

        let mut remote = OwnedPipeEnd::new(remote);
        let received = assert_ok!(
            tokio::time::timeout(Duration::from_secs(5), remote.receive()).await
        );
        assert!(assert_err!(received).is_remote_closed());
    }

    #[tokio::test]
    async fn test_cancelled_lookup() {
        let (relay, registry, _) = relay();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = relay.active_session_with_cancel(true, &cancel).await;
        assert!(matches!(result, Err(LocatorError::Cancelled)));

        let result = relay.execute_immediate_with_cancel("1 + 1", &cancel).await;
        assert!(matches!(result, Err(RelayError::Locator(LocatorError::Cancelled))));
        assert!(registry.lookups().is_empty());
    }

    #[tokio::test]
    async fn test_detach_without_pipe() {
        let (relay, _, _) = relay();
        assert_eq!(relay.detach_pipe().await.unwrap(), None);
    }
}
