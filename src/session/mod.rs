//! Session folder cleanup.
//!
//! The gateway service owns the credentials and keeps them under the
//! configured session folder. All we do is remove it once the account is
//! logged out or the session is unusable.

use std::path::Path;

use tokio::fs;

/// Removes the session folder. Missing folders and failures are logged,
/// never raised.
pub async fn wipe(dir: &Path) {
    match fs::try_exists(dir).await {
        Ok(true) => match fs::remove_dir_all(dir).await {
            Ok(()) => tracing::info!("Session folder {dir:?} deleted successfully!"),
            Err(e) => tracing::error!("Error cleaning session files in {dir:?}: {e}"),
        },
        Ok(false) => tracing::debug!("no session folder at {dir:?}, nothing to clean"),
        Err(e) => tracing::error!("Error cleaning session files in {dir:?}: {e}"),
    }
}
