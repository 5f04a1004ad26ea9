//! Host-visible errors.
//!
//! The host only ever sees one message per failure. [`PluginError`] keeps
//! the engine's [`ErrorKind`] next to it for callers that want to branch.

use capzip_core::{ErrorKind, ZipError};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

/// Operation a failure belongs to, which decides the message prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    Zip,
    Unzip,
}

impl Operation {
    fn prefix(self) -> &'static str {
        match self {
            Self::Zip => "Failed to create zip archive",
            Self::Unzip => "Failed to extract zip archive",
        }
    }

    fn missing_source(self) -> &'static str {
        match self {
            Self::Zip => "Source path does not exist",
            Self::Unzip => "Source zip file does not exist",
        }
    }
}

/// A failed plugin call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PluginError {
    kind: Option<ErrorKind>,
    message: String,
}

impl PluginError {
    /// A request that failed validation before reaching the engine.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self {
            kind: None,
            message: message.into(),
        }
    }

    pub(crate) fn from_engine(operation: Operation, err: ZipError) -> Self {
        let kind = err.kind();
        let message = match kind {
            ErrorKind::SourceNotFound => operation.missing_source().to_string(),
            _ => format!("{}: {err}", operation.prefix()),
        };
        Self {
            kind: Some(kind),
            message,
        }
    }

    #[cfg(feature = "async")]
    pub(crate) fn task_failed(operation: Operation, err: tokio::task::JoinError) -> Self {
        Self {
            kind: None,
            message: format!("{}: worker task failed: {err}", operation.prefix()),
        }
    }

    /// The engine error kind, or `None` for argument and task failures.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.kind
    }

    /// The message shown to the host.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Serialize for PluginError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("PluginError", 2)?;
        state.serialize_field("code", self.kind.map_or("InvalidArgument", ErrorKind::name))?;
        state.serialize_field("message", &self.message)?;
        state.end()
    }
}
