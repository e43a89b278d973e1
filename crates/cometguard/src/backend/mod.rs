//! Built-in tracking clients.
//!
//! Provides:
//! - `ConsoleClient` for lightweight logging through `tracing`
//! - `OfflineClient` for JSON-lines experiment logs on disk
//! - `CometMlClient` for the `comet_ml` Python SDK (optional)
//! - `BackendProbe` for detecting which of them is usable

mod console;
mod offline;
#[cfg(feature = "python")]
mod comet;

pub use console::ConsoleClient;
pub use offline::{OfflineClient, DEFAULT_OFFLINE_DIR, EVENTS_FILE};
#[cfg(feature = "python")]
pub use comet::CometMlClient;

use crate::client::{ClientProbe, TrackingClient};
use crate::types::CodeSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Tracking client selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Console,
    Offline,
    Comet,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] =
        [BackendKind::Console, BackendKind::Offline, BackendKind::Comet];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Console => "console",
            BackendKind::Offline => "offline",
            BackendKind::Comet => "comet",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "console" => Ok(BackendKind::Console),
            "offline" => Ok(BackendKind::Offline),
            "comet" | "comet_ml" => Ok(BackendKind::Comet),
            other => Err(format!(
                "unknown backend '{}' (expected console, offline or comet)",
                other
            )),
        }
    }
}

/// Probe for the built-in client of the given kind.
#[derive(Clone, Copy, Debug)]
pub struct BackendProbe(pub BackendKind);

impl ClientProbe for BackendProbe {
    fn detect(&self) -> Option<Arc<dyn TrackingClient>> {
        match self.0 {
            BackendKind::Console => Some(Arc::new(ConsoleClient::new())),
            BackendKind::Offline => Some(Arc::new(OfflineClient::default())),
            #[cfg(feature = "python")]
            BackendKind::Comet => match CometMlClient::new() {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    tracing::debug!("comet_ml not usable: {:#}", e);
                    None
                }
            },
            #[cfg(not(feature = "python"))]
            BackendKind::Comet => {
                tracing::debug!("comet backend requires the 'python' feature");
                None
            }
        }
    }
}

/// Source text needs a file name to be stored under.
pub(crate) fn check_code_snapshot(snapshot: &CodeSnapshot) -> anyhow::Result<()> {
    if snapshot.code.is_some() && snapshot.code_name.is_none() {
        anyhow::bail!("code_name is mandatory when code is given");
    }
    if snapshot.file_path.is_none() && snapshot.folder.is_none() && snapshot.code.is_none() {
        anyhow::bail!("nothing to log: give a file, a folder or code");
    }
    Ok(())
}
