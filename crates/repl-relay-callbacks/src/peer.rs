//! Serves callback requests arriving over a pipe end.

use std::sync::Arc;

use repl_relay_pipe::{MessageTransport, OwnedPipeEnd, PipeError};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    callback::{CallbackError, SessionCallback},
    messages::{CallbackKind, CallbackReply, CallbackRequest},
};

/// Peer error.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("Pipe error: {0}")]
    Pipe(#[from] PipeError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Remote callback failed: {0}")]
    Remote(String),
    #[error("Reply {got} does not match request {expected}")]
    Mismatched { expected: u64, got: u64 },
}

/// Owns a pipe end and answers the remote session's callback requests.
///
/// Requests are handled one at a time in arrival order. The pipe is closed
/// on every exit path of [`serve`](Self::serve).
pub struct CallbackPeer<T: MessageTransport> {
    pipe: OwnedPipeEnd<T>,
    callback: Arc<dyn SessionCallback>,
}

impl<T: MessageTransport + 'static> CallbackPeer<T> {
    /// Create a peer that takes ownership of `pipe`.
    #[must_use]
    pub fn new(pipe: OwnedPipeEnd<T>, callback: Arc<dyn SessionCallback>) -> Self {
        Self { pipe, callback }
    }

    /// Serve on a background task until cancelled or the remote hangs up.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<Result<u64, PeerError>> {
        tokio::spawn(async move {
            let result = self.serve(cancel).await;
            if let Err(e) = &result {
                tracing::error!("Callback peer stopped: {e}");
            }
            result
        })
    }

    /// Serve requests until cancelled or the remote hangs up.
    ///
    /// Returns the number of requests answered.
    ///
    /// # Errors
    /// Returns error if the pipe fails or a reply cannot be encoded.
    pub async fn serve(mut self, cancel: CancellationToken) -> Result<u64, PeerError> {
        let result = self.serve_loop(&cancel).await;
        let closed = self.pipe.close().await;
        let handled = result?;
        closed?;
        Ok(handled)
    }

    async fn serve_loop(&mut self, cancel: &CancellationToken) -> Result<u64, PeerError> {
        let mut handled = 0;

        loop {
            let received = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                received = self.pipe.receive() => received,
            };

            let message = match received {
                Ok(message) => message,
                Err(e) if e.is_remote_closed() => {
                    tracing::debug!("Remote session closed the callback pipe");
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            let request: CallbackRequest = match serde_json::from_slice(&message) {
                Ok(request) => request,
                Err(e) => {
                    // Without an id there is nothing to reply to.
                    tracing::warn!("Invalid callback request: {e}");
                    continue;
                }
            };

            let reply = dispatch(self.callback.as_ref(), request, cancel.child_token()).await;
            self.pipe.send(serde_json::to_vec(&reply)?).await?;
            handled += 1;
        }

        Ok(handled)
    }
}

async fn dispatch(
    callback: &dyn SessionCallback,
    request: CallbackRequest,
    cancel: CancellationToken,
) -> CallbackReply {
    let id = request.id;
    match invoke(callback, request.call, cancel).await {
        Ok(value) => CallbackReply::Success { id, value },
        Err(e) => {
            tracing::error!(id, "Callback failed: {e}");
            CallbackReply::Error {
                id,
                error: e.to_string(),
            }
        }
    }
}

async fn invoke(
    callback: &dyn SessionCallback,
    call: CallbackKind,
    cancel: CancellationToken,
) -> Result<Value, CallbackError> {
    let value = match call {
        CallbackKind::ShowErrorMessage { message } => {
            callback.show_error_message(&message).await?;
            Value::Null
        }
        CallbackKind::ShowMessage { message, buttons } => {
            serde_json::to_value(callback.show_message(&message, buttons).await?)?
        }
        CallbackKind::ShowHelp { url } => {
            callback.show_help(&url).await?;
            Value::Null
        }
        CallbackKind::Plot { plot } => {
            callback.plot(plot, cancel).await?;
            Value::Null
        }
        CallbackKind::Locator { device_id } => {
            serde_json::to_value(callback.locator(device_id, cancel).await?)?
        }
        CallbackKind::PlotDeviceCreate { device_id } => {
            serde_json::to_value(callback.plot_device_create(device_id, cancel).await?)?
        }
        CallbackKind::PlotDeviceDestroy { device_id } => {
            callback.plot_device_destroy(device_id, cancel).await?;
            Value::Null
        }
        CallbackKind::ReadUserInput { prompt, max_length } => {
            Value::String(callback.read_user_input(&prompt, max_length, cancel).await?)
        }
        CallbackKind::PackageRepositoryUrl { name } => {
            Value::String(callback.package_repository_url(&name))
        }
        CallbackKind::ViewObject { expression, title } => {
            callback.view_object(&expression, &title).await?;
            Value::Null
        }
        CallbackKind::ViewLibrary => {
            callback.view_library().await?;
            Value::Null
        }
        CallbackKind::ViewFile {
            file_name,
            tab_name,
            delete_file,
        } => {
            callback.view_file(&file_name, &tab_name, delete_file).await?;
            Value::Null
        }
        CallbackKind::SaveFile { file_name, data } => {
            Value::String(callback.save_file(&file_name, &data).await?)
        }
    };
    Ok(value)
}

/// Remote-side helper issuing callback requests over a pipe end.
///
/// Calls are strictly request/reply; one call is outstanding at a time.
pub struct CallbackClient<T: MessageTransport> {
    pipe: OwnedPipeEnd<T>,
    next_id: u64,
}

impl<T: MessageTransport> CallbackClient<T> {
    /// Create a client that takes ownership of `pipe`.
    #[must_use]
    pub const fn new(pipe: OwnedPipeEnd<T>) -> Self {
        Self { pipe, next_id: 1 }
    }

    /// Invoke a callback and wait for its reply.
    ///
    /// # Errors
    /// Returns `Remote` if the callback failed on the host side.
    pub async fn call(&mut self, call: CallbackKind) -> Result<Value, PeerError> {
        let id = self.next_id;
        self.next_id += 1;

        let request = CallbackRequest { id, call };
        self.pipe.send(serde_json::to_vec(&request)?).await?;

        let reply: CallbackReply = serde_json::from_slice(&self.pipe.receive().await?)?;
        if reply.id() != id {
            return Err(PeerError::Mismatched {
                expected: id,
                got: reply.id(),
            });
        }
        match reply {
            CallbackReply::Success { value, .. } => Ok(value),
            CallbackReply::Error { error, .. } => Err(PeerError::Remote(error)),
        }
    }

    /// Close the underlying pipe end.
    ///
    /// # Errors
    /// Returns error if releasing the transport fails.
    pub async fn close(&mut self) -> Result<(), PeerError> {
        Ok(self.pipe.close().await?)
    }
}
