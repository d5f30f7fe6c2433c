//! Drives a relay against an in-memory session.
//!
//! Run with: cargo run -p relay-demo [config.json]
//!
//! Set `RUST_LOG=debug` to watch the locator and dispatcher at work.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use repl_relay_callbacks::{CallbackClient, CallbackKind, DefaultCallback};
use repl_relay_core::{
    FrontEnd, FrontEndId, FrontEndRef, HostEvent, InputError, RegistryError, RelayConfig,
    SessionRegistry, SlotToken,
};
use repl_relay_pipe::{ChannelTransport, OwnedPipeEnd};
use repl_relay_session::ReplRelay;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Front-end that echoes what it is given.
struct EchoConsole {
    id: FrontEndId,
    slot: SlotToken,
}

#[async_trait]
impl FrontEnd for EchoConsole {
    fn id(&self) -> FrontEndId {
        self.id
    }

    fn slot(&self) -> SlotToken {
        self.slot
    }

    async fn accept_input(&self, line: &str) -> Result<(), InputError> {
        tracing::info!(console = %self.id, "> {line}");
        Ok(())
    }

    fn execute(&self, code: &str) -> Result<(), InputError> {
        tracing::info!(console = %self.id, "(immediate) {code}");
        Ok(())
    }

    fn show(&self) {
        tracing::info!(console = %self.id, "Console brought to front");
    }
}

/// Registry holding at most one console, created on demand.
#[derive(Default)]
struct Consoles {
    console: Mutex<Option<FrontEndRef>>,
}

#[async_trait]
impl SessionRegistry for Consoles {
    async fn find_front_end(
        &self,
        slot: SlotToken,
        create_if_missing: bool,
    ) -> Result<Option<FrontEndRef>, RegistryError> {
        let mut console = self
            .console
            .lock()
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        if console.is_none() && create_if_missing {
            let created: FrontEndRef = Arc::new(EchoConsole {
                id: Uuid::new_v4(),
                slot,
            });
            *console = Some(created);
        }
        Ok(console.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    }
    .with_env_overrides()?;

    let consoles = Arc::new(Consoles::default());
    let relay = ReplRelay::init(config, consoles.clone());

    let mut events = relay.events().history_plus_stream();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            tracing::debug!(event = %serde_json::to_string(&event).unwrap_or_default(), "Dispatch event");
        }
    });

    // The first immediate call creates the console and makes it active.
    relay.execute_immediate("library(stats)").await?;
    if let Some(console) = relay.active_session(false).await? {
        relay.handle_host_event(&HostEvent::ActivationChanged {
            old: None,
            new: Some(console),
        });
    }

    let first = relay.submit(["a <- 1", "b <- 2"])?;
    let second = relay.submit(["print(a + b)"])?;
    let report = first.await?;
    tracing::info!(seq = report.seq, lines = report.lines, "First batch forwarded");
    let report = second.await?;
    tracing::info!(seq = report.seq, lines = report.lines, "Second batch forwarded");

    let (local, remote) = ChannelTransport::pair();
    relay
        .attach_pipe(OwnedPipeEnd::new(local), Arc::new(DefaultCallback))
        .await;
    let mut client = CallbackClient::new(OwnedPipeEnd::new(remote));
    let url = client
        .call(CallbackKind::PackageRepositoryUrl { name: "CRAN".into() })
        .await?;
    tracing::info!(%url, "Package repository");
    client.close().await?;

    relay.teardown().await;
    printer.abort();
    Ok(())
}
