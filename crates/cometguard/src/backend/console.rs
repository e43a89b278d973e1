//! Console tracking backend.

use super::check_code_snapshot;
use crate::client::{Experiment, TrackingClient};
use crate::config::SessionConfig;
use crate::types::{
    AssetData, AssetOptions, CodeSnapshot, ImageData, ImageOptions, MetricValue, ModelArtifact,
};
use std::sync::Mutex;
use uuid::Uuid;

/// Client that reports every call as a `tracing` event.
#[derive(Default)]
pub struct ConsoleClient {
    current: Mutex<Option<String>>,
}

impl ConsoleClient {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrackingClient for ConsoleClient {
    fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn global_experiment(&self) -> Option<String> {
        self.current.lock().ok().and_then(|c| c.clone())
    }

    fn create_experiment(&self, config: &SessionConfig) -> anyhow::Result<Box<dyn Experiment>> {
        let key = Uuid::new_v4().simple().to_string();
        // Values may hold credentials; only option names are printed.
        let options: Vec<&str> = config.iter().map(|(k, _)| k.as_str()).collect();
        tracing::info!(key = %key, options = ?options, "Experiment started");

        if let Ok(mut current) = self.current.lock() {
            *current = Some(key.clone());
        }
        Ok(Box::new(ConsoleExperiment { key }))
    }

    fn clear_global_experiment(&self) {
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
    }
}

struct ConsoleExperiment {
    key: String,
}

impl Experiment for ConsoleExperiment {
    fn key(&self) -> &str {
        &self.key
    }

    fn log_metric(
        &mut self,
        name: &str,
        value: &MetricValue,
        step: Option<u64>,
        epoch: Option<u64>,
        _include_context: bool,
    ) -> anyhow::Result<()> {
        tracing::info!(step = ?step, epoch = ?epoch, "{} = {}", name, value);
        Ok(())
    }

    fn log_model(
        &mut self,
        name: &str,
        artifact: &ModelArtifact,
        artifact_name: Option<&str>,
    ) -> anyhow::Result<()> {
        match artifact {
            ModelArtifact::Path(p) => {
                tracing::info!(
                    model = name,
                    path = %p.display(),
                    file_name = ?artifact_name,
                    "Model logged"
                )
            }
            ModelArtifact::Bytes(b) => {
                tracing::info!(
                    model = name,
                    bytes = b.len(),
                    file_name = ?artifact_name,
                    "Model logged"
                )
            }
        }
        Ok(())
    }

    fn log_image(&mut self, image: &ImageData, options: &ImageOptions) -> anyhow::Result<()> {
        let source = match image {
            ImageData::Path(p) => p.display().to_string(),
            ImageData::Bytes(b) => format!("{} bytes", b.len()),
            ImageData::Array(a) => format!("array {:?}", a.shape()),
            ImageData::Pixels(rows) => format!("{} pixel rows", rows.len()),
        };
        tracing::info!(
            name = ?options.name,
            format = %options.format,
            step = ?options.step,
            "Image logged: {}",
            source
        );
        Ok(())
    }

    fn log_code(&mut self, snapshot: &CodeSnapshot) -> anyhow::Result<()> {
        check_code_snapshot(snapshot)?;
        tracing::info!(
            file = ?snapshot.file_path,
            folder = ?snapshot.folder,
            code_name = ?snapshot.code_name,
            "Code logged"
        );
        Ok(())
    }

    fn log_asset(&mut self, asset: &AssetData, options: &AssetOptions) -> anyhow::Result<()> {
        match asset {
            AssetData::Path(p) => {
                tracing::info!(
                    path = %p.display(),
                    file_name = ?options.file_name,
                    step = ?options.step,
                    "Asset logged"
                )
            }
            AssetData::Bytes(b) => {
                tracing::info!(
                    bytes = b.len(),
                    file_name = ?options.file_name,
                    step = ?options.step,
                    "Asset logged"
                )
            }
        }
        Ok(())
    }

    fn add_tag(&mut self, tag: &str) -> anyhow::Result<()> {
        tracing::info!(tag, "Tag added");
        Ok(())
    }

    fn end(&mut self) -> anyhow::Result<()> {
        tracing::info!(key = %self.key, "Experiment ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_experiment_slot() {
        let client = ConsoleClient::new();
        assert!(client.global_experiment().is_none());

        let mut experiment = client.create_experiment(&SessionConfig::new()).unwrap();
        assert_eq!(experiment.key().len(), 32);
        assert_eq!(client.global_experiment().as_deref(), Some(experiment.key()));

        experiment.log_metric("loss", &MetricValue::Float(0.3), Some(1), None, true).unwrap();
        experiment.end().unwrap();
        client.clear_global_experiment();
        assert!(client.global_experiment().is_none());
    }

    #[test]
    fn test_code_without_name_is_rejected() {
        let client = ConsoleClient::new();
        let mut experiment = client.create_experiment(&SessionConfig::new()).unwrap();
        let snapshot = CodeSnapshot {
            code: Some("print('hi')".into()),
            ..Default::default()
        };
        assert!(experiment.log_code(&snapshot).is_err());
    }
}
