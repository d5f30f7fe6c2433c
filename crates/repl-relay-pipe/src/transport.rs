//! Transports carrying pipe messages.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    io::{
        AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
        WriteHalf,
    },
    sync::mpsc,
};

use crate::protocol::Frame;

/// Type-erased transport.
pub type BoxTransport = Box<dyn MessageTransport>;

/// A duplex, message-oriented channel to a remote session.
///
/// Implementations report a terminated remote end as
/// [`io::ErrorKind::UnexpectedEof`] from [`receive`](Self::receive).
#[async_trait]
pub trait MessageTransport: Send {
    /// Send one message.
    async fn send(&mut self, message: Bytes) -> io::Result<()>;

    /// Wait for the next message.
    async fn receive(&mut self) -> io::Result<Bytes>;

    /// Release the underlying resource.
    async fn release(&mut self) -> io::Result<()>;
}

#[async_trait]
impl MessageTransport for BoxTransport {
    async fn send(&mut self, message: Bytes) -> io::Result<()> {
        (**self).send(message).await
    }

    async fn receive(&mut self) -> io::Result<Bytes> {
        (**self).receive().await
    }

    async fn release(&mut self) -> io::Result<()> {
        (**self).release().await
    }
}

fn remote_closed() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "remote end closed")
}

/// In-process transport backed by a pair of unbounded channels.
pub struct ChannelTransport {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl ChannelTransport {
    /// Create two connected ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();

        (
            Self {
                tx: Some(a_tx),
                rx: a_rx,
            },
            Self {
                tx: Some(b_tx),
                rx: b_rx,
            },
        )
    }
}

#[async_trait]
impl MessageTransport for ChannelTransport {
    async fn send(&mut self, message: Bytes) -> io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "transport released"))?;
        tx.send(message)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "remote end closed"))
    }

    async fn receive(&mut self) -> io::Result<Bytes> {
        self.rx.recv().await.ok_or_else(remote_closed)
    }

    async fn release(&mut self) -> io::Result<()> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}

/// Default limit on a single incoming frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Newline-delimited JSON frames over a byte stream pair.
///
/// Suitable for child process stdio, sockets, or an in-memory duplex.
pub struct FramedTransport<R, W> {
    reader: BufReader<R>,
    writer: W,
    line: String,
    max_frame_len: usize,
}

impl<R, W> FramedTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Frame messages read from `reader` and written to `writer`.
    #[must_use]
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            line: String::new(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Limit incoming frames to `max` bytes, not counting the newline.
    #[must_use]
    pub const fn with_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }
}

impl<S> FramedTransport<ReadHalf<S>, WriteHalf<S>>
where
    S: AsyncRead + AsyncWrite + Send,
{
    /// Frame messages over a single bidirectional stream.
    #[must_use]
    pub fn from_stream(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
            line: String::new(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

#[async_trait]
impl<R, W> MessageTransport for FramedTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: Bytes) -> io::Result<()> {
        let line = Frame::message(&message).to_line().map_err(io::Error::other)?;
        self.writer.write_all(&line).await?;
        self.writer.flush().await
    }

    /// Fails with `InvalidData` once a frame exceeds the length limit; the
    /// stream is out of sync after that.
    async fn receive(&mut self) -> io::Result<Bytes> {
        let limit = u64::try_from(self.max_frame_len).unwrap_or(u64::MAX).saturating_add(1);
        loop {
            self.line.clear();
            if (&mut self.reader).take(limit).read_line(&mut self.line).await? == 0 {
                return Err(remote_closed());
            }
            if self.line.len() > self.max_frame_len && !self.line.ends_with('\n') {
                tracing::warn!(max = self.max_frame_len, "Incoming frame too long");
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame exceeds {} bytes", self.max_frame_len),
                ));
            }
            if self.line.trim().is_empty() {
                continue;
            }

            let frame = Frame::from_line(&self.line)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            return frame
                .decode_message()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
        }
    }

    async fn release(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
