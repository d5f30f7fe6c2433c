//! Tracks which session front-end input is routed to.
//!
//! The host reports creation, destruction and activation changes of its
//! front-ends. The locator keeps the most recently active front-end of its
//! slot, and falls back to a registry lookup when it knows of none.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use repl_relay_core::{FrontEndId, FrontEndRef, HostEvent, RegistryError, SessionRegistry, SlotToken};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Locator error.
#[derive(Debug, thiserror::Error)]
pub enum LocatorError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Session lookup cancelled")]
    Cancelled,
}

/// What the locator currently knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorStatus {
    NoSession,
    ResolvingSession,
    SessionKnown,
}

#[derive(Default)]
struct State {
    current: Option<FrontEndRef>,
    resolving: bool,
    /// Front-ends reported destroyed while a lookup is in flight.
    destroyed: HashSet<FrontEndId>,
}

/// Resolves the active front-end for one slot.
pub struct ActiveSessionLocator {
    registry: Arc<dyn SessionRegistry>,
    slot: SlotToken,
    state: Mutex<State>,
    lookup: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ActiveSessionLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSessionLocator")
            .field("slot", &self.slot)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl ActiveSessionLocator {
    #[must_use]
    pub fn new(registry: Arc<dyn SessionRegistry>, slot: SlotToken) -> Self {
        Self {
            registry,
            slot,
            state: Mutex::new(State::default()),
            lookup: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn slot(&self) -> SlotToken {
        self.slot
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The cached front-end, without consulting the registry.
    #[must_use]
    pub fn current(&self) -> Option<FrontEndRef> {
        self.state().current.clone()
    }

    /// Whether `id` is the tracked front-end. Never consults the registry.
    #[must_use]
    pub fn is_current(&self, id: FrontEndId) -> bool {
        self.state()
            .current
            .as_ref()
            .is_some_and(|current| current.id() == id)
    }

    #[must_use]
    pub fn status(&self) -> LocatorStatus {
        let state = self.state();
        if state.current.is_some() {
            LocatorStatus::SessionKnown
        } else if state.resolving {
            LocatorStatus::ResolvingSession
        } else {
            LocatorStatus::NoSession
        }
    }

    /// Return the active front-end, looking it up when none is cached.
    ///
    /// A miss queries the registry without creating. When
    /// `create_if_missing` is set a second query asks the host to create
    /// one, and the resulting front-end is brought to the foreground.
    /// Lookups are serialized; a caller arriving during another caller's
    /// lookup sees its result.
    ///
    /// # Errors
    /// Returns error if the registry fails or `cancel` fires mid-lookup.
    pub async fn get_active(
        &self,
        create_if_missing: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<FrontEndRef>, LocatorError> {
        if let Some(current) = self.current() {
            return Ok(Some(current));
        }

        let _serialized = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LocatorError::Cancelled),
            guard = self.lookup.lock() => guard,
        };

        let Some(resolving) = Resolving::enter(self) else {
            return Ok(self.current());
        };

        let found = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Session lookup cancelled");
                return Err(LocatorError::Cancelled);
            }
            found = self.find(create_if_missing) => found?,
        };

        if create_if_missing {
            if let Some(front_end) = &found {
                front_end.show();
            }
        }
        Ok(resolving.finish(found))
    }

    async fn find(&self, create_if_missing: bool) -> Result<Option<FrontEndRef>, RegistryError> {
        let mut found = self.registry.find_front_end(self.slot, false).await?;
        if found.is_none() && create_if_missing {
            debug!(slot = %self.slot, "No front-end registered, asking host to create one");
            found = self.registry.find_front_end(self.slot, true).await?;
        }

        Ok(found.filter(|front_end| {
            let matches = self.matches(front_end);
            if !matches {
                warn!(
                    slot = %self.slot,
                    got = %front_end.slot(),
                    "Registry returned a front-end of another slot"
                );
            }
            matches
        }))
    }

    /// Whether a front-end of this slot currently exists.
    ///
    /// Nothing is cached and nothing is created.
    ///
    /// # Errors
    /// Returns error if the registry fails.
    pub async fn session_exists(&self) -> Result<bool, LocatorError> {
        if self.current().is_some() {
            return Ok(true);
        }
        let found = self.registry.find_front_end(self.slot, false).await?;
        Ok(found.is_some_and(|front_end| self.matches(&front_end)))
    }

    fn matches(&self, front_end: &FrontEndRef) -> bool {
        front_end.slot() == self.slot
    }

    /// Route a host notification to its handler.
    pub fn apply(&self, event: &HostEvent) {
        match event {
            HostEvent::Created(front_end) => self.notify_created(front_end),
            HostEvent::Destroyed(front_end) => self.notify_destroyed(front_end),
            HostEvent::ActivationChanged { old, new } => {
                self.notify_activation_changed(old.as_ref(), new.as_ref());
            }
        }
    }

    /// A front-end was created. Creation alone never makes it active.
    pub fn notify_created(&self, front_end: &FrontEndRef) {
        if self.matches(front_end) {
            debug!(front_end = %front_end.id(), "Session front-end created");
        }
    }

    /// A front-end was destroyed.
    pub fn notify_destroyed(&self, front_end: &FrontEndRef) {
        if !self.matches(front_end) {
            return;
        }
        let id = front_end.id();
        let mut state = self.state();
        if state.resolving {
            state.destroyed.insert(id);
        }
        if state.current.as_ref().is_some_and(|current| current.id() == id) {
            state.current = None;
            info!(front_end = %id, "Active session front-end destroyed");
        }
    }

    /// Focus moved from `old` to `new`.
    ///
    /// A newly focused front-end of this slot becomes active. Failing that,
    /// the front-end losing focus is remembered when it is one of ours.
    /// Focus moving between foreign front-ends changes nothing.
    pub fn notify_activation_changed(&self, old: Option<&FrontEndRef>, new: Option<&FrontEndRef>) {
        let candidate = new
            .filter(|front_end| self.matches(front_end))
            .or_else(|| old.filter(|front_end| self.matches(front_end)));
        if let Some(front_end) = candidate {
            self.install(Arc::clone(front_end));
        }
    }

    fn install(&self, front_end: FrontEndRef) {
        let id = front_end.id();
        let mut state = self.state();
        if state.destroyed.contains(&id) {
            debug!(front_end = %id, "Ignoring activation of destroyed front-end");
            return;
        }
        if state.current.as_ref().is_some_and(|current| current.id() == id) {
            return;
        }
        state.current = Some(front_end);
        info!(front_end = %id, "Active session front-end changed");
    }

    /// Forget the cached front-end.
    pub fn clear(&self) {
        self.state().current = None;
    }
}

/// Marks a lookup in progress; resets the state if the lookup is abandoned.
struct Resolving<'a> {
    locator: &'a ActiveSessionLocator,
    finished: bool,
}

impl<'a> Resolving<'a> {
    /// `None` when a front-end became known while waiting for the lookup gate.
    fn enter(locator: &'a ActiveSessionLocator) -> Option<Self> {
        let mut state = locator.state();
        if state.current.is_some() {
            return None;
        }
        state.resolving = true;
        Some(Self {
            locator,
            finished: false,
        })
    }

    /// Cache the lookup result unless a notification superseded it.
    fn finish(mut self, found: Option<FrontEndRef>) -> Option<FrontEndRef> {
        self.finished = true;
        let mut state = self.locator.state();
        state.resolving = false;
        let destroyed = std::mem::take(&mut state.destroyed);

        if let Some(current) = &state.current {
            return Some(Arc::clone(current));
        }
        let found = found?;
        if destroyed.contains(&found.id()) {
            debug!(front_end = %found.id(), "Front-end destroyed during lookup");
            return None;
        }
        state.current = Some(Arc::clone(&found));
        info!(front_end = %found.id(), "Resolved active session front-end");
        Some(found)
    }
}

impl Drop for Resolving<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let mut state = self.locator.state();
            state.resolving = false;
            state.destroyed.clear();
        }
    }
}
