//! # capzip
//!
//! The host-facing surface of the capzip engine: the `zip`, `unzip` and
//! `getPluginVersion` calls of the app plugin, taking the same arguments the
//! host sends and failing with a single message.
//!
//! ```rust,no_run
//! use capzip::{UnzipRequest, ZipRequest};
//!
//! capzip::zip(&ZipRequest::new("/data/notes.txt", "/data/notes.zip")).unwrap();
//! capzip::unzip(&UnzipRequest::new("file:///data/notes.zip", "/data/out")).unwrap();
//! ```
//!
//! With the `async` feature, [`asynchronous`] runs the same calls on tokio's
//! blocking pool.

#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(feature = "async")]
pub mod asynchronous;
pub mod error;
pub mod request;

pub use capzip_archive::{UnzipReport, ZipReport};
pub use capzip_core::{CancellationToken, ErrorKind, Warning};
pub use error::PluginError;
pub use request::{UnzipRequest, ZipRequest};

use capzip_archive::{UnzipOptions, ZipOptions};
use error::Operation;
use request::{effective_password, host_path};
use serde::Serialize;

/// Version reported to the host.
pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Payload of `getPluginVersion`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginVersion {
    /// Semantic version of the plugin.
    pub version: String,
}

/// The plugin version.
pub fn get_plugin_version() -> PluginVersion {
    PluginVersion {
        version: PLUGIN_VERSION.to_string(),
    }
}

/// Whether passwords are honoured. When this is `false`, a `zip` call with
/// a password fails instead of writing an unencrypted archive.
pub fn supports_encryption() -> bool {
    capzip_archive::supports_encryption()
}

fn validate(source: &str, destination: &str) -> Result<(), PluginError> {
    if source.is_empty() {
        return Err(PluginError::invalid_argument("Source path is required"));
    }
    if destination.is_empty() {
        return Err(PluginError::invalid_argument("Destination path is required"));
    }
    Ok(())
}

/// Create an archive.
pub fn zip(request: &ZipRequest) -> Result<(), PluginError> {
    zip_with(request, None).map(|_| ())
}

/// Create an archive, checking `cancel` between entries.
pub fn zip_with(
    request: &ZipRequest,
    cancel: Option<CancellationToken>,
) -> Result<ZipReport, PluginError> {
    validate(&request.source, &request.destination)?;
    let mut options = ZipOptions::default();
    if let Some(password) = effective_password(request.password.as_deref()) {
        options = options.password(password);
    }
    if let Some(token) = cancel {
        options = options.cancel_token(token);
    }
    let report = capzip_archive::zip(
        &host_path(&request.source),
        &host_path(&request.destination),
        &options,
    )
    .map_err(|err| PluginError::from_engine(Operation::Zip, err))?;
    log::info!(
        "zip: {} entries, {} bytes into {}",
        report.entries,
        report.bytes_written,
        request.destination
    );
    Ok(report)
}

/// Extract an archive.
pub fn unzip(request: &UnzipRequest) -> Result<(), PluginError> {
    unzip_with(request, None).map(|_| ())
}

/// Extract an archive, checking `cancel` between entries.
pub fn unzip_with(
    request: &UnzipRequest,
    cancel: Option<CancellationToken>,
) -> Result<UnzipReport, PluginError> {
    validate(&request.source, &request.destination)?;
    let mut options = UnzipOptions::default();
    if let Some(password) = effective_password(request.password.as_deref()) {
        options = options.password(password);
    }
    if let Some(token) = cancel {
        options = options.cancel_token(token);
    }
    let report = capzip_archive::unzip(
        &host_path(&request.source),
        &host_path(&request.destination),
        &options,
    )
    .map_err(|err| PluginError::from_engine(Operation::Unzip, err))?;
    for warning in &report.warnings {
        log::warn!("unzip: {warning}");
    }
    Ok(report)
}
