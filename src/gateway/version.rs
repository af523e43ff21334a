use std::{fmt, time::Duration};

use serde::Deserialize;

/// Version file published by the upstream gateway library.
pub const DEFAULT_URL: &str =
    "https://raw.githubusercontent.com/WhiskeySockets/Baileys/master/src/Defaults/baileys-version.json";

const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ProtocolVersion(pub [u32; 3]);

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self([2, 3000, 1015901307])
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch] = self.0;
        write!(f, "{major}.{minor}.{patch}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: ProtocolVersion,
    pub is_latest: bool,
}

#[derive(Deserialize)]
struct VersionFile {
    version: ProtocolVersion,
}

/// Looks up the latest protocol version. Falls back to the built-in one on
/// any failure, or without a request when `url` is empty.
pub async fn fetch_latest(url: &str) -> VersionInfo {
    if url.is_empty() {
        return VersionInfo {
            version: ProtocolVersion::default(),
            is_latest: false,
        };
    }
    match try_fetch(url).await {
        Ok(version) => VersionInfo {
            version,
            is_latest: true,
        },
        Err(e) => {
            tracing::debug!("failed to fetch latest protocol version from {url}: {e}");
            VersionInfo {
                version: ProtocolVersion::default(),
                is_latest: false,
            }
        }
    }
}

async fn try_fetch(url: &str) -> anyhow::Result<ProtocolVersion> {
    let client = reqwest::Client::builder().timeout(TIMEOUT).build()?;
    let resp = client.get(url).send().await?;
    let file: VersionFile = resp.error_for_status()?.json().await?;
    Ok(file.version)
}
