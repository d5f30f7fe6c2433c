//! Exclusively owned pipe ends.

use std::{fmt, io};

use bytes::Bytes;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::transport::MessageTransport;

/// Pipe error.
#[derive(Debug, Error)]
pub enum PipeError {
    #[error("Pipe end is closed")]
    Closed,
    #[error("Pipe end already owns a transport")]
    AlreadyOwned,
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),
}

impl PipeError {
    /// Whether the remote end went away.
    #[must_use]
    pub fn is_remote_closed(&self) -> bool {
        matches!(self, Self::Transport(e) if matches!(
            e.kind(),
            io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
        ))
    }
}

enum PipeState<T> {
    Vacant,
    Open(T),
    Closed,
}

/// One end of a duplex channel to a remote session.
///
/// The handle owns its transport exclusively. It is neither `Clone` nor
/// shareable; hand it off with [`transfer`](Self::transfer) or by moving it.
/// [`close`](Self::close) releases the transport exactly once. Dropping an
/// open handle drops the transport without the async release step.
pub struct OwnedPipeEnd<T: MessageTransport> {
    state: PipeState<T>,
}

impl<T: MessageTransport> OwnedPipeEnd<T> {
    /// Take ownership of an established transport.
    #[must_use]
    pub const fn new(transport: T) -> Self {
        Self {
            state: PipeState::Open(transport),
        }
    }

    /// Create a handle that does not own a transport yet.
    #[must_use]
    pub const fn vacant() -> Self {
        Self {
            state: PipeState::Vacant,
        }
    }

    /// Attach a transport to a vacant handle.
    ///
    /// # Errors
    /// Returns `AlreadyOwned` if the handle is open and `Closed` if it has
    /// been closed; closed handles are never reused.
    pub fn open(&mut self, transport: T) -> Result<(), PipeError> {
        match self.state {
            PipeState::Vacant => {
                self.state = PipeState::Open(transport);
                Ok(())
            }
            PipeState::Open(_) => Err(PipeError::AlreadyOwned),
            PipeState::Closed => Err(PipeError::Closed),
        }
    }

    /// Whether the handle currently owns a transport.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, PipeState::Open(_))
    }

    /// Whether the handle has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.state, PipeState::Closed)
    }

    fn transport(&mut self) -> Result<&mut T, PipeError> {
        match &mut self.state {
            PipeState::Open(transport) => Ok(transport),
            PipeState::Vacant | PipeState::Closed => Err(PipeError::Closed),
        }
    }

    /// Send one message.
    ///
    /// # Errors
    /// Returns `Closed` without a live transport, `Transport` on I/O failure.
    pub async fn send(&mut self, message: impl Into<Bytes>) -> Result<(), PipeError> {
        self.transport()?.send(message.into()).await?;
        Ok(())
    }

    /// Receive the next message.
    ///
    /// # Errors
    /// Returns `Closed` without a live transport, `Transport` on I/O failure.
    pub async fn receive(&mut self) -> Result<Bytes, PipeError> {
        Ok(self.transport()?.receive().await?)
    }

    /// Release the transport.
    ///
    /// Repeated calls are no-ops. The handle counts as closed even if the
    /// release itself fails.
    ///
    /// # Errors
    /// Returns `Transport` if releasing the transport fails.
    pub async fn close(&mut self) -> Result<(), PipeError> {
        match std::mem::replace(&mut self.state, PipeState::Closed) {
            PipeState::Open(mut transport) => {
                tracing::debug!("Releasing pipe transport");
                transport.release().await?;
                Ok(())
            }
            PipeState::Vacant | PipeState::Closed => Ok(()),
        }
    }

    /// Move the open transport into a new handle, closing this one.
    ///
    /// # Errors
    /// Returns `Closed` if there is nothing to transfer.
    pub fn transfer(&mut self) -> Result<Self, PipeError> {
        match std::mem::replace(&mut self.state, PipeState::Closed) {
            PipeState::Open(transport) => Ok(Self::new(transport)),
            previous @ PipeState::Vacant => {
                self.state = previous;
                Err(PipeError::Closed)
            }
            PipeState::Closed => Err(PipeError::Closed),
        }
    }

    /// Run `f` with a handle around `transport`, closing it on every exit
    /// path.
    ///
    /// The closure's error wins over a failing close.
    ///
    /// # Errors
    /// Returns the closure's error, or the close error if only that failed.
    pub async fn scoped<F, R, E>(transport: T, f: F) -> Result<R, E>
    where
        F: for<'a> FnOnce(&'a mut Self) -> BoxFuture<'a, Result<R, E>>,
        E: From<PipeError>,
    {
        let mut pipe = Self::new(transport);
        let result = f(&mut pipe).await;
        let closed = pipe.close().await;
        let value = result?;
        closed?;
        Ok(value)
    }
}

impl<T: MessageTransport> Drop for OwnedPipeEnd<T> {
    fn drop(&mut self) {
        if self.is_open() {
            tracing::debug!("Pipe end dropped while open; dropping transport");
        }
    }
}

impl<T: MessageTransport> fmt::Debug for OwnedPipeEnd<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            PipeState::Vacant => "vacant",
            PipeState::Open(_) => "open",
            PipeState::Closed => "closed",
        };
        f.debug_struct("OwnedPipeEnd").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use futures::FutureExt;
    use tokio_test::assert_ok;

    use super::*;
    use crate::transport::ChannelTransport;

    /// Transport counting release calls.
    struct CountingTransport {
        inner: ChannelTransport,
        releases: Arc<AtomicUsize>,
        fail_release: bool,
    }

    impl CountingTransport {
        fn new(inner: ChannelTransport) -> (Self, Arc<AtomicUsize>) {
            let releases = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    inner,
                    releases: Arc::clone(&releases),
                    fail_release: false,
                },
                releases,
            )
        }
    }

    #[async_trait]
    impl MessageTransport for CountingTransport {
        async fn send(&mut self, message: Bytes) -> io::Result<()> {
            self.inner.send(message).await
        }

        async fn receive(&mut self) -> io::Result<Bytes> {
            self.inner.receive().await
        }

        async fn release(&mut self) -> io::Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            if self.fail_release {
                return Err(io::Error::other("release failed"));
            }
            self.inner.release().await
        }
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (local, remote) = ChannelTransport::pair();
        let mut pipe = OwnedPipeEnd::new(local);
        let mut peer = OwnedPipeEnd::new(remote);

        assert_ok!(pipe.send("hello").await);
        assert_eq!(peer.receive().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_releases_once() {
        let (local, _remote) = ChannelTransport::pair();
        let (transport, releases) = CountingTransport::new(local);
        let mut pipe = OwnedPipeEnd::new(transport);

        assert_ok!(pipe.close().await);
        assert_ok!(pipe.close().await);

        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(pipe.is_closed());
        assert!(matches!(pipe.send("x").await, Err(PipeError::Closed)));
        assert!(matches!(pipe.receive().await, Err(PipeError::Closed)));
    }

    #[tokio::test]
    async fn test_failed_release_still_closes() {
        let (local, _remote) = ChannelTransport::pair();
        let (mut transport, releases) = CountingTransport::new(local);
        transport.fail_release = true;
        let mut pipe = OwnedPipeEnd::new(transport);

        assert!(matches!(pipe.close().await, Err(PipeError::Transport(_))));
        assert_ok!(pipe.close().await);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(matches!(pipe.send("x").await, Err(PipeError::Closed)));
    }

    #[tokio::test]
    async fn test_open_twice_is_rejected() {
        let (a, b) = ChannelTransport::pair();
        let mut pipe = OwnedPipeEnd::vacant();
        assert!(matches!(pipe.send("x").await, Err(PipeError::Closed)));

        assert_ok!(pipe.open(a));
        assert!(matches!(pipe.open(b), Err(PipeError::AlreadyOwned)));
        assert!(pipe.is_open());
    }

    #[tokio::test]
    async fn test_closed_handle_cannot_be_reopened() {
        let (a, b) = ChannelTransport::pair();
        let mut pipe = OwnedPipeEnd::new(a);
        assert_ok!(pipe.close().await);
        assert!(matches!(pipe.open(b), Err(PipeError::Closed)));
    }

    #[tokio::test]
    async fn test_transfer_moves_ownership() {
        let (local, remote) = ChannelTransport::pair();
        let mut first = OwnedPipeEnd::new(local);
        let mut second = first.transfer().unwrap();
        let mut peer = OwnedPipeEnd::new(remote);

        assert!(matches!(first.send("x").await, Err(PipeError::Closed)));
        assert_ok!(second.send("moved").await);
        assert_eq!(peer.receive().await.unwrap(), Bytes::from_static(b"moved"));
        assert!(matches!(first.transfer(), Err(PipeError::Closed)));
    }

    #[tokio::test]
    async fn test_drop_releases_transport() {
        let (local, remote) = ChannelTransport::pair();
        let pipe = OwnedPipeEnd::new(local);
        let mut peer = OwnedPipeEnd::new(remote);

        drop(pipe);
        let err = peer.receive().await.unwrap_err();
        assert!(err.is_remote_closed());
    }

    #[tokio::test]
    async fn test_remote_termination() {
        let (local, remote) = ChannelTransport::pair();
        let mut pipe = OwnedPipeEnd::new(local);
        drop(remote);

        let err = pipe.receive().await.unwrap_err();
        assert!(err.is_remote_closed());
    }

    #[tokio::test]
    async fn test_scoped_closes_on_error() {
        let (local, _remote) = ChannelTransport::pair();
        let (transport, releases) = CountingTransport::new(local);

        let result: Result<(), PipeError> = OwnedPipeEnd::scoped(transport, |pipe| {
            async move {
                pipe.send("before failure").await?;
                Err(PipeError::Closed)
            }
            .boxed()
        })
        .await;

        assert!(matches!(result, Err(PipeError::Closed)));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scoped_returns_value() {
        let (local, remote) = ChannelTransport::pair();
        let (transport, releases) = CountingTransport::new(local);
        let mut peer = OwnedPipeEnd::new(remote);

        let value: Result<usize, PipeError> = OwnedPipeEnd::scoped(transport, |pipe| {
            async move {
                pipe.send("abc").await?;
                Ok(3)
            }
            .boxed()
        })
        .await;

        assert_eq!(value.unwrap(), 3);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(peer.receive().await.unwrap(), Bytes::from_static(b"abc"));
    }
}
