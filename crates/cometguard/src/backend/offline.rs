//! Offline tracking backend.
//!
//! Each experiment becomes a directory:
//!
//! ```text
//! <offline_directory>/<key>/
//!     experiment.json   options the session was created with (minus api_key)
//!     events.jsonl      one TrackingEvent per line
//!     assets/           copies of every file, folder and stream logged
//! ```
//!
//! File references inside `events.jsonl` point into `assets/`, relative to
//! the experiment directory, so the directory can be moved and replayed.

use super::check_code_snapshot;
use crate::client::{Experiment, TrackingClient};
use crate::config::SessionConfig;
use crate::types::{
    AssetData, AssetOptions, CodeSnapshot, ImageData, ImageOptions, MetricValue, ModelArtifact,
    TrackingEvent,
};
use anyhow::Context;
use serde_json::{json, Map};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Directory used when neither the client nor the session names one.
pub const DEFAULT_OFFLINE_DIR: &str = ".cometguard";
/// Event log inside an experiment directory.
pub const EVENTS_FILE: &str = "events.jsonl";
const METADATA_FILE: &str = "experiment.json";
const ASSETS_DIR: &str = "assets";

/// Session option naming the directory experiments are written to.
const DIRECTORY_OPTION: &str = "offline_directory";

/// Client that records experiments to local JSON-lines logs.
pub struct OfflineClient {
    directory: PathBuf,
    current: Mutex<Option<String>>,
}

impl Default for OfflineClient {
    fn default() -> Self {
        Self::new(DEFAULT_OFFLINE_DIR)
    }
}

impl OfflineClient {
    /// Create a client writing under `directory` unless a session overrides
    /// it with the `offline_directory` option.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            current: Mutex::new(None),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl TrackingClient for OfflineClient {
    fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn global_experiment(&self) -> Option<String> {
        self.current.lock().ok().and_then(|c| c.clone())
    }

    fn create_experiment(&self, config: &SessionConfig) -> anyhow::Result<Box<dyn Experiment>> {
        let root = config
            .get_str(DIRECTORY_OPTION)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.directory.clone());
        let key = Uuid::new_v4().simple().to_string();
        let dir = root.join(&key);

        fs::create_dir_all(dir.join(ASSETS_DIR))
            .with_context(|| format!("cannot create experiment directory {}", dir.display()))?;

        let options: Map<String, serde_json::Value> = config
            .iter()
            .filter(|(k, _)| k.as_str() != "api_key")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let metadata = json!({
            "key": key,
            "options": options,
            "version": crate::VERSION,
        });
        fs::write(dir.join(METADATA_FILE), serde_json::to_vec_pretty(&metadata)?)?;

        let events = BufWriter::new(File::create(dir.join(EVENTS_FILE))?);
        tracing::info!(key = %key, path = %dir.display(), "Offline experiment created");

        if let Ok(mut current) = self.current.lock() {
            *current = Some(key.clone());
        }

        Ok(Box::new(OfflineExperiment {
            key,
            dir,
            events,
            stored: 0,
            ended: false,
        }))
    }

    fn clear_global_experiment(&self) {
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
    }
}

struct OfflineExperiment {
    key: String,
    dir: PathBuf,
    events: BufWriter<File>,
    /// Number of files placed in assets/, used to keep names unique
    stored: usize,
    ended: bool,
}

impl OfflineExperiment {
    fn record(&mut self, event: &TrackingEvent) -> anyhow::Result<()> {
        if self.ended {
            anyhow::bail!("experiment {} already ended", self.key);
        }
        serde_json::to_writer(&mut self.events, event)?;
        self.events.write_all(b"\n")?;
        self.events.flush()?;
        Ok(())
    }

    fn next_asset_path(&mut self, name: &str) -> PathBuf {
        self.stored += 1;
        let name = name.replace(['/', '\\'], "_");
        Path::new(ASSETS_DIR).join(format!("{:04}_{}", self.stored, name))
    }

    /// Copy a file or folder into assets/. Returns the path relative to the
    /// experiment directory.
    fn store_path(&mut self, src: &Path, name: Option<&str>) -> anyhow::Result<PathBuf> {
        if self.ended {
            anyhow::bail!("experiment {} already ended", self.key);
        }
        let name = name
            .map(str::to_string)
            .or_else(|| src.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "asset".to_string());
        // Folders may hold the offline directory itself (a project root
        // with `.cometguard/` inside); the copy must not reach its own output.
        let exclude = fs::canonicalize(&self.dir)?;
        if src.is_dir() && fs::canonicalize(src)?.starts_with(&exclude) {
            anyhow::bail!(
                "cannot log {}: it lies inside the experiment directory",
                src.display()
            );
        }

        let rel = self.next_asset_path(&name);
        if let Err(e) = copy_recursive(src, &self.dir.join(&rel), &exclude) {
            self.discard(&rel);
            return Err(e).with_context(|| format!("cannot copy {}", src.display()));
        }
        Ok(rel)
    }

    /// Remove a copy made by `store_path` or `store_bytes`.
    fn discard(&self, rel: &Path) {
        let path = self.dir.join(rel);
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(e) = removed {
            tracing::debug!(path = %path.display(), "Could not remove partial asset: {}", e);
        }
    }

    fn store_bytes(&mut self, bytes: &[u8], name: &str) -> anyhow::Result<PathBuf> {
        if self.ended {
            anyhow::bail!("experiment {} already ended", self.key);
        }
        let rel = self.next_asset_path(name);
        fs::write(self.dir.join(&rel), bytes)?;
        Ok(rel)
    }
}

impl Experiment for OfflineExperiment {
    fn key(&self) -> &str {
        &self.key
    }

    fn log_metric(
        &mut self,
        name: &str,
        value: &MetricValue,
        step: Option<u64>,
        epoch: Option<u64>,
        include_context: bool,
    ) -> anyhow::Result<()> {
        self.record(&TrackingEvent::Metric {
            name: name.to_string(),
            value: value.clone(),
            step,
            epoch,
            include_context,
        })
    }

    fn log_model(
        &mut self,
        name: &str,
        artifact: &ModelArtifact,
        artifact_name: Option<&str>,
    ) -> anyhow::Result<()> {
        let stored = match artifact {
            ModelArtifact::Path(p) => self.store_path(p, artifact_name)?,
            ModelArtifact::Bytes(b) => self.store_bytes(b, artifact_name.unwrap_or(name))?,
        };
        self.record(&TrackingEvent::Model {
            name: name.to_string(),
            artifact: ModelArtifact::Path(stored),
            artifact_name: artifact_name.map(str::to_string),
        })
    }

    fn log_image(&mut self, image: &ImageData, options: &ImageOptions) -> anyhow::Result<()> {
        let image = match image {
            ImageData::Path(p) => ImageData::Path(self.store_path(p, options.name.as_deref())?),
            ImageData::Bytes(b) => {
                let name = options
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("image.{}", options.format));
                ImageData::Path(self.store_bytes(b, &name)?)
            }
            inline => inline.clone(),
        };
        self.record(&TrackingEvent::Image {
            image,
            options: options.clone(),
        })
    }

    fn log_code(&mut self, snapshot: &CodeSnapshot) -> anyhow::Result<()> {
        check_code_snapshot(snapshot)?;
        let mut stored = snapshot.clone();
        if let Some(p) = &snapshot.file_path {
            stored.file_path = Some(self.store_path(p, None)?);
        }
        if let Some(p) = &snapshot.folder {
            match self.store_path(p, None) {
                Ok(rel) => stored.folder = Some(rel),
                Err(e) => {
                    // No event will reference the file copied above.
                    if let Some(rel) = &stored.file_path {
                        self.discard(rel);
                    }
                    return Err(e);
                }
            }
        }
        self.record(&TrackingEvent::Code { snapshot: stored })
    }

    fn log_asset(&mut self, asset: &AssetData, options: &AssetOptions) -> anyhow::Result<()> {
        let stored = match asset {
            AssetData::Path(p) => self.store_path(p, options.file_name.as_deref())?,
            AssetData::Bytes(b) => {
                self.store_bytes(b, options.file_name.as_deref().unwrap_or("asset"))?
            }
        };
        self.record(&TrackingEvent::Asset {
            asset: AssetData::Path(stored),
            options: options.clone(),
        })
    }

    fn add_tag(&mut self, tag: &str) -> anyhow::Result<()> {
        self.record(&TrackingEvent::Tag {
            tag: tag.to_string(),
        })
    }

    fn end(&mut self) -> anyhow::Result<()> {
        self.record(&TrackingEvent::End)?;
        self.ended = true;
        tracing::info!(key = %self.key, path = %self.dir.display(), "Offline experiment saved");
        Ok(())
    }
}

/// Copy a file or directory tree. `exclude` is a canonical path: directory
/// entries that are it or contain it are skipped. Symlinked directories are
/// not followed.
fn copy_recursive(src: &Path, dst: &Path, exclude: &Path) -> std::io::Result<()> {
    if !src.is_dir() {
        fs::copy(src, dst)?;
        return Ok(());
    }

    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_symlink() && path.is_dir() {
            tracing::debug!(path = %path.display(), "Skipping symlinked directory");
            continue;
        }
        if file_type.is_dir() && exclude.starts_with(fs::canonicalize(&path)?) {
            tracing::debug!(path = %path.display(), "Skipping directory holding the experiment");
            continue;
        }
        copy_recursive(&path, &dst.join(entry.file_name()), exclude)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_events(dir: &Path) -> Vec<TrackingEvent> {
        fs::read_to_string(dir.join(EVENTS_FILE))
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_records_events_and_assets() {
        let root = TempDir::new().unwrap();
        let weights = root.path().join("weights.bin");
        fs::write(&weights, b"\x01\x02\x03").unwrap();

        let client = OfflineClient::new(root.path().join("runs"));
        let config = SessionConfig::new()
            .with("project_name", "cartpole")
            .with("api_key", "secret");
        let mut experiment = client.create_experiment(&config).unwrap();
        let exp_dir = root.path().join("runs").join(experiment.key());

        experiment
            .log_metric("reward", &MetricValue::Float(12.5), Some(3), None, true)
            .unwrap();
        experiment
            .log_model("policy", &ModelArtifact::Path(weights.clone()), None)
            .unwrap();
        experiment
            .log_asset(
                &AssetData::Bytes(b"hello".to_vec()),
                &AssetOptions::default().file_name("notes.txt"),
            )
            .unwrap();
        experiment
            .log_code(&CodeSnapshot::text("print(1)", "snippet.py"))
            .unwrap();
        experiment.add_tag("baseline").unwrap();
        experiment.end().unwrap();

        let events = read_events(&exp_dir);
        assert_eq!(events.len(), 6);
        assert_eq!(events[0].kind(), "log_metric");
        assert_eq!(events[5], TrackingEvent::End);

        match &events[1] {
            TrackingEvent::Model {
                artifact: ModelArtifact::Path(p),
                ..
            } => {
                assert_eq!(p, &PathBuf::from("assets/0001_weights.bin"));
                assert_eq!(fs::read(exp_dir.join(p)).unwrap(), b"\x01\x02\x03");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            fs::read_to_string(exp_dir.join("assets/0002_notes.txt")).unwrap(),
            "hello"
        );

        let metadata = fs::read_to_string(exp_dir.join(METADATA_FILE)).unwrap();
        assert!(metadata.contains("cartpole"));
        assert!(!metadata.contains("secret"));
    }

    #[test]
    fn test_session_option_overrides_directory() {
        let root = TempDir::new().unwrap();
        let client = OfflineClient::default();
        let config = SessionConfig::new().with(
            "offline_directory",
            root.path().to_string_lossy().into_owned(),
        );
        let experiment = client.create_experiment(&config).unwrap();
        assert!(root.path().join(experiment.key()).join(EVENTS_FILE).exists());
        assert_eq!(client.global_experiment().as_deref(), Some(experiment.key()));
    }

    #[test]
    fn test_copies_folders() {
        let root = TempDir::new().unwrap();
        let src = root.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("train.py"), "import x").unwrap();
        fs::write(src.join("nested/util.py"), "def f(): pass").unwrap();

        let client = OfflineClient::new(root.path().join("runs"));
        let mut experiment = client.create_experiment(&SessionConfig::new()).unwrap();
        let exp_dir = root.path().join("runs").join(experiment.key());
        experiment.log_code(&CodeSnapshot::folder(&src)).unwrap();

        assert!(exp_dir.join("assets/0001_src/train.py").exists());
        assert!(exp_dir.join("assets/0001_src/nested/util.py").exists());
    }

    #[test]
    fn test_calls_after_end_fail() {
        let root = TempDir::new().unwrap();
        let client = OfflineClient::new(root.path());
        let mut experiment = client.create_experiment(&SessionConfig::new()).unwrap();
        experiment.end().unwrap();

        assert!(experiment.add_tag("late").is_err());
        assert!(experiment.end().is_err());
        assert!(experiment
            .log_asset(&AssetData::Bytes(vec![1]), &AssetOptions::default())
            .is_err());
    }

    #[test]
    fn test_unwritable_directory_fails_creation() {
        let root = TempDir::new().unwrap();
        let blocker = root.path().join("not_a_dir");
        fs::write(&blocker, "file").unwrap();

        let client = OfflineClient::new(&blocker);
        assert!(client.create_experiment(&SessionConfig::new()).is_err());
        assert!(client.global_experiment().is_none());
    }

    #[test]
    fn test_missing_source_file_is_an_error() {
        let root = TempDir::new().unwrap();
        let client = OfflineClient::new(root.path());
        let mut experiment = client.create_experiment(&SessionConfig::new()).unwrap();

        let missing = ModelArtifact::Path(root.path().join("nope.bin"));
        assert!(experiment.log_model("policy", &missing, None).is_err());
    }

    #[test]
    fn test_folder_holding_offline_directory() {
        let root = TempDir::new().unwrap();
        let project = root.path().join("project");
        let offline_root = project.join(DEFAULT_OFFLINE_DIR);
        fs::create_dir_all(project.join("src")).unwrap();
        fs::write(project.join("train.py"), "import env").unwrap();
        fs::write(project.join("src/model.py"), "class Policy: pass").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(&project, project.join("src/loop")).unwrap();

        let client = OfflineClient::new(&offline_root);
        assert_eq!(client.directory(), offline_root.as_path());
        let mut experiment = client.create_experiment(&SessionConfig::new()).unwrap();
        let exp_dir = offline_root.join(experiment.key());

        experiment.log_code(&CodeSnapshot::folder(&project)).unwrap();

        let copy = exp_dir.join("assets/0001_project");
        assert!(copy.join("train.py").exists());
        assert!(copy.join("src/model.py").exists());
        assert!(!copy.join(DEFAULT_OFFLINE_DIR).exists());
        assert!(!copy.join("src/loop").exists());
        assert_eq!(fs::read_dir(exp_dir.join(ASSETS_DIR)).unwrap().count(), 1);
    }

    #[test]
    fn test_folder_inside_experiment_is_rejected() {
        let root = TempDir::new().unwrap();
        let client = OfflineClient::new(root.path());
        let mut experiment = client.create_experiment(&SessionConfig::new()).unwrap();
        let assets = root.path().join(experiment.key()).join(ASSETS_DIR);

        assert!(experiment.log_code(&CodeSnapshot::folder(&assets)).is_err());
        assert_eq!(fs::read_dir(&assets).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_code_folder_leaves_no_file_copy() {
        let root = TempDir::new().unwrap();
        let script = root.path().join("train.py");
        fs::write(&script, "import env").unwrap();

        let client = OfflineClient::new(root.path().join("runs"));
        let mut experiment = client.create_experiment(&SessionConfig::new()).unwrap();
        let exp_dir = root.path().join("runs").join(experiment.key());

        let snapshot = CodeSnapshot {
            file_path: Some(script),
            folder: Some(root.path().join("missing")),
            ..Default::default()
        };
        assert!(experiment.log_code(&snapshot).is_err());
        assert_eq!(fs::read_dir(exp_dir.join(ASSETS_DIR)).unwrap().count(), 0);
        assert_eq!(fs::read_to_string(exp_dir.join(EVENTS_FILE)).unwrap(), "");
    }

    #[test]
    fn test_non_finite_metric_is_replayable() {
        let root = TempDir::new().unwrap();
        let client = OfflineClient::new(root.path());
        let mut experiment = client.create_experiment(&SessionConfig::new()).unwrap();
        let exp_dir = root.path().join(experiment.key());

        experiment
            .log_metric("loss", &MetricValue::Float(f64::NAN), Some(1), None, true)
            .unwrap();
        experiment
            .log_metric("grad_norm", &MetricValue::Float(f64::INFINITY), Some(1), None, true)
            .unwrap();

        let events = read_events(&exp_dir);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            TrackingEvent::Metric { value: MetricValue::Float(x), .. } if x.is_nan()
        ));
        assert!(matches!(
            &events[1],
            TrackingEvent::Metric { value: MetricValue::Float(x), .. } if *x == f64::INFINITY
        ));
    }
}
