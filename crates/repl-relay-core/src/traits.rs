//! Core traits for session front-ends and the host registry.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identity of a single front-end instance.
pub type FrontEndId = Uuid;

/// Shared handle to a live front-end.
pub type FrontEndRef = Arc<dyn FrontEnd>;

/// Slot token identifying this application's session kind.
///
/// The host may own many front-ends; only those carrying our slot token
/// are ever tracked or fed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotToken(Uuid);

impl SlotToken {
    /// Wrap an existing UUID.
    #[must_use]
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a fresh random slot.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for SlotToken {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for SlotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Error returned by a front-end when it cannot take input.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Front-end closed")]
    Closed,
    #[error("Input rejected: {0}")]
    Rejected(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The input/output surface of one interactive session.
#[async_trait]
pub trait FrontEnd: Send + Sync {
    /// Unique identity of this front-end instance.
    fn id(&self) -> FrontEndId;

    /// Slot token of the session kind this front-end belongs to.
    fn slot(&self) -> SlotToken;

    /// Submit one line for execution.
    ///
    /// Resolves once the session has acknowledged the line.
    async fn accept_input(&self, line: &str) -> Result<(), InputError>;

    /// Place `code` in the input buffer and execute it right away.
    ///
    /// Does not wait for the session to acknowledge it.
    fn execute(&self, code: &str) -> Result<(), InputError>;

    /// Bring the front-end into view. Hosts without a notion of
    /// visibility can ignore this.
    fn show(&self) {}
}

impl fmt::Debug for dyn FrontEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrontEnd")
            .field("id", &self.id())
            .field("slot", &self.slot())
            .finish()
    }
}

/// Registry error.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Host registry unavailable: {0}")]
    Unavailable(String),
    #[error("Front-end creation failed: {0}")]
    CreateFailed(String),
}

/// Host window/session registry.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Find the front-end registered under `slot`.
    ///
    /// With `create_if_missing` the host creates one when none exists.
    /// How long creation may take is up to the host.
    async fn find_front_end(
        &self,
        slot: SlotToken,
        create_if_missing: bool,
    ) -> Result<Option<FrontEndRef>, RegistryError>;
}

/// Lifecycle notification delivered by the host.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// A front-end was created.
    Created(FrontEndRef),
    /// A front-end was destroyed.
    Destroyed(FrontEndRef),
    /// The active front-end changed from `old` to `new`.
    ActivationChanged {
        old: Option<FrontEndRef>,
        new: Option<FrontEndRef>,
    },
}

impl HostEvent {
    /// Short name for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Destroyed(_) => "destroyed",
            Self::ActivationChanged { .. } => "activation_changed",
        }
    }
}
