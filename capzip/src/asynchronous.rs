//! Async wrappers that keep the blocking engine off the caller's runtime
//! threads.

use crate::error::{Operation, PluginError};
use crate::{CancellationToken, UnzipReport, UnzipRequest, ZipReport, ZipRequest};

/// Create an archive on the blocking pool.
pub async fn zip(request: ZipRequest) -> Result<(), PluginError> {
    zip_with(request, None).await.map(|_| ())
}

/// Create an archive on the blocking pool, checking `cancel` between entries.
pub async fn zip_with(
    request: ZipRequest,
    cancel: Option<CancellationToken>,
) -> Result<ZipReport, PluginError> {
    tokio::task::spawn_blocking(move || crate::zip_with(&request, cancel))
        .await
        .map_err(|err| PluginError::task_failed(Operation::Zip, err))?
}

/// Extract an archive on the blocking pool.
pub async fn unzip(request: UnzipRequest) -> Result<(), PluginError> {
    unzip_with(request, None).await.map(|_| ())
}

/// Extract an archive on the blocking pool, checking `cancel` between entries.
pub async fn unzip_with(
    request: UnzipRequest,
    cancel: Option<CancellationToken>,
) -> Result<UnzipReport, PluginError> {
    tokio::task::spawn_blocking(move || crate::unzip_with(&request, cancel))
        .await
        .map_err(|err| PluginError::task_failed(Operation::Unzip, err))?
}
