//! The tracking session guard.
//!
//! `TrackingGuard` wraps every tracking call with the same precondition:
//! create the session on first use, then either pass the call through or
//! drop it. Tracking is best-effort. Apart from construction, nothing here
//! returns an error; failures become `warn!` events and the caller's work
//! carries on.

use crate::backend::BackendProbe;
use crate::client::{ClientProbe, Experiment, TrackingClient};
use crate::config::{GuardConfig, SessionConfig};
use crate::types::{
    AssetData, AssetOptions, CodeSnapshot, ImageData, ImageOptions, MetricValue, ModelArtifact,
    TrackingEvent,
};
use crate::{GuardError, Result};
use std::sync::Arc;

/// Lifecycle of the guarded session.
///
/// `Disabled` is terminal. `Active` never goes back to `Uninitialized`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Tracking requested, session not created yet
    Uninitialized,
    /// Session created, calls are forwarded
    Active,
    /// Calls are dropped
    Disabled,
}

/// Lazily activated, fail-quiet wrapper around a tracking client.
///
/// # Example
///
/// ```ignore
/// let mut tracker = TrackingGuard::new(args.track, options, BackendProbe(BackendKind::Offline))?;
///
/// for epoch in 0..epochs {
///     let loss = train_epoch(&mut model);
///     tracker.log_metric("loss", loss, None, Some(epoch), true);
/// }
/// tracker.log_model("policy", "checkpoints/best.bin", None);
/// tracker.end();
/// ```
pub struct TrackingGuard {
    state: SessionState,
    client: Option<Arc<dyn TrackingClient>>,
    config: SessionConfig,
    experiment: Option<Box<dyn Experiment>>,
}

impl TrackingGuard {
    /// Create a guard.
    ///
    /// With `enabled == false` the guard is disabled for good and `config`
    /// is dropped. Otherwise `probe` must find a tracking client, or
    /// construction fails with [`GuardError::DependencyMissing`].
    pub fn new(enabled: bool, config: SessionConfig, probe: impl ClientProbe) -> Result<Self> {
        if !enabled {
            return Ok(Self::disabled());
        }

        let client = probe.detect().ok_or_else(|| {
            GuardError::DependencyMissing(
                "no experiment-tracking client available; install comet_ml \
                 ('pip install comet-ml') and build with the 'python' feature, \
                 or pick another backend"
                    .to_string(),
            )
        })?;

        Ok(Self::with_client(true, config, client))
    }

    /// Create a guard around an already available client.
    pub fn with_client(
        enabled: bool,
        config: SessionConfig,
        client: Arc<dyn TrackingClient>,
    ) -> Self {
        if !enabled {
            return Self::disabled();
        }

        Self {
            state: SessionState::Uninitialized,
            client: Some(client),
            config,
            experiment: None,
        }
    }

    /// A guard that drops every call.
    pub fn disabled() -> Self {
        Self {
            state: SessionState::Disabled,
            client: None,
            config: SessionConfig::default(),
            experiment: None,
        }
    }

    /// Build a guard from file-level settings, detecting the configured
    /// backend with the built-in probe.
    pub fn from_config(config: &GuardConfig) -> Result<Self> {
        Self::new(
            config.enabled,
            config.options.clone(),
            BackendProbe(config.backend),
        )
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Key of the live experiment, once activated.
    pub fn experiment_key(&self) -> Option<&str> {
        self.experiment.as_deref().map(|e| e.key())
    }

    /// Make sure a session exists. Returns whether calls should go through.
    fn ensure_active(&mut self) -> bool {
        match self.state {
            SessionState::Active => true,
            SessionState::Disabled => false,
            SessionState::Uninitialized => match self.activate() {
                Ok(experiment) => {
                    tracing::info!(key = experiment.key(), "Started experiment tracking session");
                    self.experiment = Some(experiment);
                    self.state = SessionState::Active;
                    true
                }
                Err(e) => {
                    tracing::warn!(
                        "Experiment tracking disabled, session could not start: {:#}",
                        e
                    );
                    self.state = SessionState::Disabled;
                    self.client = None;
                    false
                }
            },
        }
    }

    fn activate(&self) -> anyhow::Result<Box<dyn Experiment>> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no tracking client"))?;

        client.init()?;
        if let Some(existing) = client.global_experiment() {
            tracing::warn!(
                existing = %existing,
                "An experiment was already created manually, which might cause clashes"
            );
        }
        client.create_experiment(&self.config)
    }

    /// Run `op` against the session if tracking is on. Client errors are
    /// logged and swallowed; the session stays active.
    fn forward<F>(&mut self, operation: &'static str, op: F)
    where
        F: FnOnce(&mut dyn Experiment) -> anyhow::Result<()>,
    {
        if !self.ensure_active() {
            return;
        }

        if let Some(experiment) = self.experiment.as_deref_mut() {
            if let Err(e) = op(experiment) {
                tracing::warn!(operation, "Experiment tracking call failed: {:#}", e);
            }
        }
    }

    /// Log a general metric (accuracy, loss, a flag, a label...).
    ///
    /// `step` and `epoch` are the x axis when plotting. With
    /// `include_context` the client attaches its current context.
    pub fn log_metric(
        &mut self,
        name: &str,
        value: impl Into<MetricValue>,
        step: Option<u64>,
        epoch: Option<u64>,
        include_context: bool,
    ) {
        let value = value.into();
        self.forward("log_metric", |e| {
            e.log_metric(name, &value, step, epoch, include_context)
        });
    }

    /// Log model data (file, folder or stream contents) under `name`.
    pub fn log_model(
        &mut self,
        name: &str,
        artifact: impl Into<ModelArtifact>,
        artifact_name: Option<&str>,
    ) {
        let artifact = artifact.into();
        self.forward("log_model", |e| e.log_model(name, &artifact, artifact_name));
    }

    pub fn log_image(&mut self, image: impl Into<ImageData>, options: ImageOptions) {
        let image = image.into();
        self.forward("log_image", |e| e.log_image(&image, &options));
    }

    /// Attach source code. See [`CodeSnapshot`] for the `code_name` rule.
    pub fn log_code(&mut self, snapshot: CodeSnapshot) {
        self.forward("log_code", |e| e.log_code(&snapshot));
    }

    pub fn log_asset(&mut self, asset: impl Into<AssetData>, options: AssetOptions) {
        let asset = asset.into();
        self.forward("log_asset", |e| e.log_asset(&asset, &options));
    }

    pub fn add_tag(&mut self, tag: &str) {
        self.forward("add_tag", |e| e.add_tag(tag));
    }

    /// Finish the session, release it and clear the client's current
    /// experiment. The guard is disabled afterwards.
    pub fn end(&mut self) {
        if !self.ensure_active() {
            return;
        }

        if let Some(mut experiment) = self.experiment.take() {
            match experiment.end() {
                Ok(()) => {
                    tracing::info!(key = experiment.key(), "Ended experiment tracking session")
                }
                Err(e) => {
                    tracing::warn!(operation = "end", "Experiment tracking call failed: {:#}", e)
                }
            }
        }
        if let Some(client) = self.client.take() {
            client.clear_global_experiment();
        }
        self.state = SessionState::Disabled;
    }

    /// Dispatch a recorded event to the matching operation.
    pub fn apply(&mut self, event: TrackingEvent) {
        match event {
            TrackingEvent::Metric {
                name,
                value,
                step,
                epoch,
                include_context,
            } => self.log_metric(&name, value, step, epoch, include_context),
            TrackingEvent::Model {
                name,
                artifact,
                artifact_name,
            } => self.log_model(&name, artifact, artifact_name.as_deref()),
            TrackingEvent::Image { image, options } => self.log_image(image, options),
            TrackingEvent::Code { snapshot } => self.log_code(snapshot),
            TrackingEvent::Asset { asset, options } => self.log_asset(asset, options),
            TrackingEvent::Tag { tag } => self.add_tag(&tag),
            TrackingEvent::End => self.end(),
        }
    }
}

impl std::fmt::Debug for TrackingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingGuard")
            .field("state", &self.state)
            .field("experiment", &self.experiment_key())
            .finish()
    }
}
