//! # cometguard
//!
//! Best-effort experiment tracking for training code.
//!
//! ## Overview
//!
//! cometguard provides:
//! - `TrackingGuard`, which activates a tracking session on first use and
//!   silently does nothing when tracking is disabled or unavailable
//! - The `TrackingClient` / `Experiment` traits describing the tracking SDK
//! - Built-in backends: console, offline (JSON lines on disk) and, with the
//!   `python` feature, the `comet_ml` Python SDK
//!
//! ## Features
//!
//! - `default` - Console and offline backends
//! - `python` - `CometMlClient`, driving `comet_ml` through pyo3
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cometguard::prelude::*;
//!
//! let config = SessionConfig::new().with("project_name", "cartpole");
//! let mut tracker = TrackingGuard::new(true, config, BackendProbe(BackendKind::Console))?;
//!
//! // The session is created here, on the first call.
//! tracker.log_metric("reward", 1.5, Some(10), None, true);
//! tracker.add_tag("baseline");
//! tracker.end();
//! ```

pub mod backend;
pub mod client;
pub mod config;
mod float_format;
pub mod guard;
pub mod types;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::{BackendKind, BackendProbe, ConsoleClient, OfflineClient};
    #[cfg(feature = "python")]
    pub use crate::backend::CometMlClient;
    pub use crate::client::{ClientProbe, Experiment, TrackingClient};
    pub use crate::config::{GuardConfig, SessionConfig};
    pub use crate::guard::{SessionState, TrackingGuard};
    pub use crate::types::{
        AssetData, AssetOptions, ChannelOrder, CodeSnapshot, ImageData, ImageOptions,
        MetricValue, ModelArtifact, TrackingEvent,
    };
    pub use crate::{GuardError, Result};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("Tracking client not installed: {0}")]
    DependencyMissing(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, GuardError>;
