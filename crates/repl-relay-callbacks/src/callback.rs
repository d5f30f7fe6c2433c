//! Interactive callbacks a remote session may invoke during execution.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Repository URL answered when the host has no better mapping.
pub const DEFAULT_REPOSITORY_URL: &str = "https://cran.rstudio.com";

/// Buttons offered by a message box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageButtons {
    #[default]
    Ok,
    OkCancel,
    YesNo,
    YesNoCancel,
}

/// Button the user pressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonPressed {
    #[default]
    Ok,
    Cancel,
    Yes,
    No,
}

/// A rendered plot ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlotMessage {
    /// Plot device that produced the image.
    pub device_id: Uuid,
    /// Rendered image on disk.
    pub file_path: PathBuf,
}

/// Outcome of an interactive locator request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorResult {
    pub clicked: bool,
    pub x: i32,
    pub y: i32,
}

impl LocatorResult {
    /// The user dismissed the locator without clicking.
    #[must_use]
    pub const fn not_clicked() -> Self {
        Self {
            clicked: false,
            x: -1,
            y: -1,
        }
    }

    /// The user clicked at `(x, y)`.
    #[must_use]
    pub const fn clicked(x: i32, y: i32) -> Self {
        Self {
            clicked: true,
            x,
            y,
        }
    }
}

/// Geometry of a new plot device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlotDeviceProperties {
    pub width: u32,
    pub height: u32,
    pub resolution: u32,
}

impl Default for PlotDeviceProperties {
    fn default() -> Self {
        Self {
            width: 360,
            height: 360,
            resolution: 96,
        }
    }
}

/// Callback error.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("Callback cancelled")]
    Cancelled,
    #[error("Callback failed: {0}")]
    Failed(String),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Capabilities a remote session may use while executing code.
///
/// Implement this trait to plug in the host's UI. Every kind of callback
/// is one method; the session layer never depends on a concrete host.
#[async_trait]
pub trait SessionCallback: Send + Sync {
    /// Display an error message.
    async fn show_error_message(&self, message: &str) -> Result<(), CallbackError>;

    /// Display a message box and report the pressed button.
    async fn show_message(
        &self,
        message: &str,
        buttons: MessageButtons,
    ) -> Result<ButtonPressed, CallbackError>;

    /// Open a help page.
    async fn show_help(&self, url: &str) -> Result<(), CallbackError>;

    /// Display a rendered plot.
    async fn plot(&self, plot: PlotMessage, cancel: CancellationToken) -> Result<(), CallbackError>;

    /// Ask the user to click on a plot.
    async fn locator(
        &self,
        device_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<LocatorResult, CallbackError>;

    /// Create a plot device.
    async fn plot_device_create(
        &self,
        device_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<PlotDeviceProperties, CallbackError>;

    /// Destroy a plot device.
    async fn plot_device_destroy(
        &self,
        device_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<(), CallbackError>;

    /// Prompt the user for a line of input.
    async fn read_user_input(
        &self,
        prompt: &str,
        max_length: usize,
        cancel: CancellationToken,
    ) -> Result<String, CallbackError>;

    /// Map a package repository name to its URL.
    fn package_repository_url(&self, name: &str) -> String;

    /// Show an object in a data viewer.
    async fn view_object(&self, expression: &str, title: &str) -> Result<(), CallbackError>;

    /// Show the package library.
    async fn view_library(&self) -> Result<(), CallbackError>;

    /// Show a file, optionally deleting it afterwards.
    async fn view_file(
        &self,
        file_name: &str,
        tab_name: &str,
        delete_file: bool,
    ) -> Result<(), CallbackError>;

    /// Save `data` on the host; returns the path written.
    async fn save_file(&self, file_name: &str, data: &[u8]) -> Result<String, CallbackError>;
}

/// Callback implementation that answers every request with a neutral
/// default and displays nothing.
#[derive(Debug, Default, Clone)]
pub struct DefaultCallback;

#[async_trait]
impl SessionCallback for DefaultCallback {
    async fn show_error_message(&self, message: &str) -> Result<(), CallbackError> {
        tracing::warn!("Session error: {message}");
        Ok(())
    }

    async fn show_message(
        &self,
        _message: &str,
        _buttons: MessageButtons,
    ) -> Result<ButtonPressed, CallbackError> {
        Ok(ButtonPressed::Ok)
    }

    async fn show_help(&self, url: &str) -> Result<(), CallbackError> {
        tracing::debug!("Ignoring help request for {url}");
        Ok(())
    }

    async fn plot(&self, _plot: PlotMessage, _cancel: CancellationToken) -> Result<(), CallbackError> {
        Ok(())
    }

    async fn locator(
        &self,
        _device_id: Uuid,
        _cancel: CancellationToken,
    ) -> Result<LocatorResult, CallbackError> {
        Ok(LocatorResult::not_clicked())
    }

    async fn plot_device_create(
        &self,
        _device_id: Uuid,
        _cancel: CancellationToken,
    ) -> Result<PlotDeviceProperties, CallbackError> {
        Ok(PlotDeviceProperties::default())
    }

    async fn plot_device_destroy(
        &self,
        _device_id: Uuid,
        _cancel: CancellationToken,
    ) -> Result<(), CallbackError> {
        Ok(())
    }

    async fn read_user_input(
        &self,
        _prompt: &str,
        _max_length: usize,
        _cancel: CancellationToken,
    ) -> Result<String, CallbackError> {
        Ok("\n".to_string())
    }

    fn package_repository_url(&self, _name: &str) -> String {
        DEFAULT_REPOSITORY_URL.to_string()
    }

    async fn view_object(&self, _expression: &str, _title: &str) -> Result<(), CallbackError> {
        Ok(())
    }

    async fn view_library(&self) -> Result<(), CallbackError> {
        Ok(())
    }

    async fn view_file(
        &self,
        _file_name: &str,
        _tab_name: &str,
        _delete_file: bool,
    ) -> Result<(), CallbackError> {
        Ok(())
    }

    async fn save_file(&self, _file_name: &str, _data: &[u8]) -> Result<String, CallbackError> {
        Ok(String::new())
    }
}
