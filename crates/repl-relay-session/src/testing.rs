//! Test doubles for front-ends and the host registry.

use std::sync::{
    Arc, Mutex, OnceLock,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use repl_relay_core::{
    FrontEnd, FrontEndId, FrontEndRef, InputError, RegistryError, SessionRegistry, SlotToken,
};
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

type Hook = Box<dyn Fn(&str) + Send + Sync>;

/// Front-end recording every line it is given.
pub struct StubFrontEnd {
    id: FrontEndId,
    slot: SlotToken,
    received: Mutex<Vec<String>>,
    log: Mutex<Vec<String>>,
    executed: Mutex<Vec<String>>,
    shown: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    reject: Option<String>,
    panic_on: Option<String>,
    on_accept: OnceLock<Hook>,
    entered: Notify,
}

impl StubFrontEnd {
    pub fn new(slot: SlotToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            slot,
            received: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            shown: AtomicUsize::new(0),
            gate: None,
            reject: None,
            panic_on: None,
            on_accept: OnceLock::new(),
            entered: Notify::new(),
        }
    }

    /// Each line waits for one permit before it is acknowledged.
    pub fn gated(slot: SlotToken, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(slot)
        }
    }

    pub fn rejecting(slot: SlotToken, line: &str) -> Self {
        Self {
            reject: Some(line.to_string()),
            ..Self::new(slot)
        }
    }

    pub fn panicking(slot: SlotToken, line: &str) -> Self {
        Self {
            panic_on: Some(line.to_string()),
            ..Self::new(slot)
        }
    }

    /// Run `hook` after each line is acknowledged.
    pub fn on_accept(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        let _ = self.on_accept.set(Box::new(hook));
    }

    pub fn into_ref(self) -> (Arc<Self>, FrontEndRef) {
        let stub = Arc::new(self);
        let front_end: FrontEndRef = stub.clone();
        (stub, front_end)
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Interleaved `recv:` / `ack:` entries.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn shown(&self) -> usize {
        self.shown.load(Ordering::SeqCst)
    }

    /// Resolves once a line has started being accepted.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }
}

#[async_trait]
impl FrontEnd for StubFrontEnd {
    fn id(&self) -> FrontEndId {
        self.id
    }

    fn slot(&self) -> SlotToken {
        self.slot
    }

    async fn accept_input(&self, line: &str) -> Result<(), InputError> {
        self.received.lock().unwrap().push(line.to_string());
        self.log.lock().unwrap().push(format!("recv:{line}"));
        self.entered.notify_one();

        if self.panic_on.as_deref() == Some(line) {
            panic!("front-end blew up on {line}");
        }
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        tokio::task::yield_now().await;
        if self.reject.as_deref() == Some(line) {
            return Err(InputError::Rejected(format!("syntax error in {line}")));
        }

        self.log.lock().unwrap().push(format!("ack:{line}"));
        if let Some(hook) = self.on_accept.get() {
            hook(line);
        }
        Ok(())
    }

    fn execute(&self, code: &str) -> Result<(), InputError> {
        self.executed.lock().unwrap().push(code.to_string());
        Ok(())
    }

    fn show(&self) {
        self.shown.fetch_add(1, Ordering::SeqCst);
    }
}

/// Registry serving a fixed set of front-ends and creating one on demand.
#[derive(Default)]
pub struct StubRegistry {
    registered: Mutex<Vec<FrontEndRef>>,
    creatable: Mutex<Option<FrontEndRef>>,
    lookups: Mutex<Vec<bool>>,
    gate: Option<Arc<Semaphore>>,
    entered: Notify,
}

impl StubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookups wait for one permit before answering.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn register(&self, front_end: FrontEndRef) {
        self.registered.lock().unwrap().push(front_end);
    }

    pub fn unregister(&self, id: FrontEndId) {
        self.registered.lock().unwrap().retain(|fe| fe.id() != id);
    }

    /// Front-end handed out on a create request.
    pub fn create_with(&self, front_end: FrontEndRef) {
        *self.creatable.lock().unwrap() = Some(front_end);
    }

    /// `create_if_missing` flag of every lookup so far.
    pub fn lookups(&self) -> Vec<bool> {
        self.lookups.lock().unwrap().clone()
    }

    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }
}

#[async_trait]
impl SessionRegistry for StubRegistry {
    async fn find_front_end(
        &self,
        slot: SlotToken,
        create_if_missing: bool,
    ) -> Result<Option<FrontEndRef>, RegistryError> {
        self.lookups.lock().unwrap().push(create_if_missing);
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        let found = self
            .registered
            .lock()
            .unwrap()
            .iter()
            .find(|fe| fe.slot() == slot)
            .cloned();
        if found.is_some() || !create_if_missing {
            return Ok(found);
        }

        let created = self.creatable.lock().unwrap().take();
        if let Some(front_end) = &created {
            self.register(front_end.clone());
        }
        Ok(created)
    }
}
