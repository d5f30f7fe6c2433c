//! Callback implementation that records every call.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::callback::{
    ButtonPressed, CallbackError, DefaultCallback, LocatorResult, MessageButtons, PlotDeviceProperties,
    PlotMessage, SessionCallback,
};

/// One recorded callback invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackCall {
    ShowErrorMessage(String),
    ShowMessage {
        message: String,
        buttons: MessageButtons,
    },
    ShowHelp(String),
    Plot(PlotMessage),
    Locator(Uuid),
    PlotDeviceCreate(Uuid),
    PlotDeviceDestroy(Uuid),
    ReadUserInput {
        prompt: String,
        max_length: usize,
    },
    PackageRepositoryUrl(String),
    ViewObject {
        expression: String,
        title: String,
    },
    ViewLibrary,
    ViewFile {
        file_name: String,
        tab_name: String,
        delete_file: bool,
    },
    SaveFile {
        file_name: String,
        data: Vec<u8>,
    },
}

/// Records calls in order and answers with configurable replies.
///
/// Anything not configured is answered like [`DefaultCallback`].
#[derive(Debug, Default)]
pub struct RecordingCallback {
    calls: Mutex<Vec<CallbackCall>>,
    message_reply: Option<ButtonPressed>,
    user_input: Option<String>,
    locator_reply: Option<LocatorResult>,
}

impl RecordingCallback {
    /// Create a recorder with default replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to message boxes with `button`.
    #[must_use]
    pub fn with_message_reply(mut self, button: ButtonPressed) -> Self {
        self.message_reply = Some(button);
        self
    }

    /// Reply to input prompts with `input`.
    #[must_use]
    pub fn with_user_input(mut self, input: impl Into<String>) -> Self {
        self.user_input = Some(input.into());
        self
    }

    /// Reply to locator requests with `result`.
    #[must_use]
    pub fn with_locator_reply(mut self, result: LocatorResult) -> Self {
        self.locator_reply = Some(result);
        self
    }

    /// Calls recorded so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<CallbackCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Forget recorded calls.
    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn record(&self, call: CallbackCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

#[async_trait]
impl SessionCallback for RecordingCallback {
    async fn show_error_message(&self, message: &str) -> Result<(), CallbackError> {
        self.record(CallbackCall::ShowErrorMessage(message.to_string()));
        Ok(())
    }

    async fn show_message(
        &self,
        message: &str,
        buttons: MessageButtons,
    ) -> Result<ButtonPressed, CallbackError> {
        self.record(CallbackCall::ShowMessage {
            message: message.to_string(),
            buttons,
        });
        match self.message_reply {
            Some(button) => Ok(button),
            None => DefaultCallback.show_message(message, buttons).await,
        }
    }

    async fn show_help(&self, url: &str) -> Result<(), CallbackError> {
        self.record(CallbackCall::ShowHelp(url.to_string()));
        Ok(())
    }

    async fn plot(&self, plot: PlotMessage, _cancel: CancellationToken) -> Result<(), CallbackError> {
        self.record(CallbackCall::Plot(plot));
        Ok(())
    }

    async fn locator(
        &self,
        device_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<LocatorResult, CallbackError> {
        self.record(CallbackCall::Locator(device_id));
        match self.locator_reply {
            Some(result) => Ok(result),
            None => DefaultCallback.locator(device_id, cancel).await,
        }
    }

    async fn plot_device_create(
        &self,
        device_id: Uuid,
        _cancel: CancellationToken,
    ) -> Result<PlotDeviceProperties, CallbackError> {
        self.record(CallbackCall::PlotDeviceCreate(device_id));
        Ok(PlotDeviceProperties::default())
    }

    async fn plot_device_destroy(
        &self,
        device_id: Uuid,
        _cancel: CancellationToken,
    ) -> Result<(), CallbackError> {
        self.record(CallbackCall::PlotDeviceDestroy(device_id));
        Ok(())
    }

    async fn read_user_input(
        &self,
        prompt: &str,
        max_length: usize,
        cancel: CancellationToken,
    ) -> Result<String, CallbackError> {
        self.record(CallbackCall::ReadUserInput {
            prompt: prompt.to_string(),
            max_length,
        });
        match &self.user_input {
            Some(input) => Ok(input.clone()),
            None => DefaultCallback.read_user_input(prompt, max_length, cancel).await,
        }
    }

    fn package_repository_url(&self, name: &str) -> String {
        self.record(CallbackCall::PackageRepositoryUrl(name.to_string()));
        DefaultCallback.package_repository_url(name)
    }

    async fn view_object(&self, expression: &str, title: &str) -> Result<(), CallbackError> {
        self.record(CallbackCall::ViewObject {
            expression: expression.to_string(),
            title: title.to_string(),
        });
        Ok(())
    }

    async fn view_library(&self) -> Result<(), CallbackError> {
        self.record(CallbackCall::ViewLibrary);
        Ok(())
    }

    async fn view_file(
        &self,
        file_name: &str,
        tab_name: &str,
        delete_file: bool,
    ) -> Result<(), CallbackError> {
        self.record(CallbackCall::ViewFile {
            file_name: file_name.to_string(),
            tab_name: tab_name.to_string(),
            delete_file,
        });
        Ok(())
    }

    async fn save_file(&self, file_name: &str, data: &[u8]) -> Result<String, CallbackError> {
        self.record(CallbackCall::SaveFile {
            file_name: file_name.to_string(),
            data: data.to_vec(),
        });
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::DEFAULT_REPOSITORY_URL;

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let callback = RecordingCallback::new();
        let device = Uuid::new_v4();

        callback.show_help("https://example.org/help").await.unwrap();
        callback
            .plot_device_create(device, CancellationToken::new())
            .await
            .unwrap();
        callback.view_library().await.unwrap();

        assert_eq!(
            callback.calls(),
            vec![
                CallbackCall::ShowHelp("https://example.org/help".into()),
                CallbackCall::PlotDeviceCreate(device),
                CallbackCall::ViewLibrary,
            ]
        );

        callback.clear();
        assert!(callback.calls().is_empty());
    }

    #[tokio::test]
    async fn test_default_replies() {
        let callback = RecordingCallback::new();

        let pressed = callback
            .show_message("Save workspace?", MessageButtons::YesNo)
            .await
            .unwrap();
        assert_eq!(pressed, ButtonPressed::Ok);

        let input = callback
            .read_user_input("> ", 80, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(input, "\n");

        assert_eq!(callback.package_repository_url("CRAN"), DEFAULT_REPOSITORY_URL);
    }

    #[tokio::test]
    async fn test_configured_replies() {
        let callback = RecordingCallback::new()
            .with_message_reply(ButtonPressed::No)
            .with_user_input("42")
            .with_locator_reply(LocatorResult::clicked(10, 20));

        let pressed = callback
            .show_message("Quit?", MessageButtons::YesNo)
            .await
            .unwrap();
        assert_eq!(pressed, ButtonPressed::No);

        let input = callback
            .read_user_input("n: ", 8, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(input, "42");

        let located = callback
            .locator(Uuid::new_v4(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(located, LocatorResult::clicked(10, 20));
    }
}
