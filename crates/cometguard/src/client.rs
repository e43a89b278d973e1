//! Contract between the guard and an experiment-tracking SDK.

use crate::config::SessionConfig;
use crate::types::{
    AssetData, AssetOptions, CodeSnapshot, ImageData, ImageOptions, MetricValue, ModelArtifact,
};
use std::sync::Arc;

/// Process-level entry point of a tracking SDK.
///
/// The client owns the "current experiment" slot that SDKs of this kind keep
/// per process. `create_experiment` fills it, `clear_global_experiment`
/// empties it.
pub trait TrackingClient: Send + Sync {
    /// Global setup. Must be idempotent.
    fn init(&self) -> anyhow::Result<()>;

    /// Key of the current process-wide experiment, if one exists.
    fn global_experiment(&self) -> Option<String>;

    /// Start a new experiment with the forwarded options.
    fn create_experiment(&self, config: &SessionConfig) -> anyhow::Result<Box<dyn Experiment>>;

    /// Forget the current process-wide experiment.
    fn clear_global_experiment(&self);
}

/// A live tracking session.
pub trait Experiment: Send {
    /// Identifier assigned by the client.
    fn key(&self) -> &str;

    fn log_metric(
        &mut self,
        name: &str,
        value: &MetricValue,
        step: Option<u64>,
        epoch: Option<u64>,
        include_context: bool,
    ) -> anyhow::Result<()>;

    fn log_model(
        &mut self,
        name: &str,
        artifact: &ModelArtifact,
        artifact_name: Option<&str>,
    ) -> anyhow::Result<()>;

    fn log_image(&mut self, image: &ImageData, options: &ImageOptions) -> anyhow::Result<()>;

    fn log_code(&mut self, snapshot: &CodeSnapshot) -> anyhow::Result<()>;

    fn log_asset(&mut self, asset: &AssetData, options: &AssetOptions) -> anyhow::Result<()>;

    fn add_tag(&mut self, tag: &str) -> anyhow::Result<()>;

    /// Finish the session and flush pending data.
    fn end(&mut self) -> anyhow::Result<()>;
}

/// Capability detection: is a tracking client installed?
///
/// Consulted once, when an enabled guard is constructed.
pub trait ClientProbe {
    fn detect(&self) -> Option<Arc<dyn TrackingClient>>;
}

impl<F> ClientProbe for F
where
    F: Fn() -> Option<Arc<dyn TrackingClient>>,
{
    fn detect(&self) -> Option<Arc<dyn TrackingClient>> {
        self()
    }
}
