//! Callback request/reply messages exchanged over a pipe.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::callback::{MessageButtons, PlotMessage};

/// A callback invocation sent by the remote session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRequest {
    /// Correlates the reply with this request.
    pub id: u64,
    /// The callback to run.
    pub call: CallbackKind,
}

/// Callback kinds and their arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CallbackKind {
    ShowErrorMessage {
        message: String,
    },
    ShowMessage {
        message: String,
        #[serde(default)]
        buttons: MessageButtons,
    },
    ShowHelp {
        url: String,
    },
    Plot {
        plot: PlotMessage,
    },
    Locator {
        device_id: Uuid,
    },
    PlotDeviceCreate {
        device_id: Uuid,
    },
    PlotDeviceDestroy {
        device_id: Uuid,
    },
    ReadUserInput {
        prompt: String,
        max_length: usize,
    },
    PackageRepositoryUrl {
        name: String,
    },
    ViewObject {
        expression: String,
        title: String,
    },
    ViewLibrary,
    ViewFile {
        file_name: String,
        tab_name: String,
        #[serde(default)]
        delete_file: bool,
    },
    SaveFile {
        file_name: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

/// Reply to a [`CallbackRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallbackReply {
    Success { id: u64, value: Value },
    Error { id: u64, error: String },
}

impl CallbackReply {
    /// Id of the request this reply answers.
    #[must_use]
    pub const fn id(&self) -> u64 {
        match self {
            Self::Success { id, .. } | Self::Error { id, .. } => *id,
        }
    }
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}
