//! Guard and session configuration.

use crate::backend::BackendKind;
use crate::{GuardError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Options forwarded verbatim to the tracking client when a session is
/// created (API key, project name, workspace, ...).
///
/// The guard never interprets these.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionConfig {
    options: BTreeMap<String, Value>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an option.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.options.insert(key.into(), value.into());
    }

    /// Parse a `key=value` pair. The value is read as JSON when it parses,
    /// otherwise it is kept as a plain string.
    pub fn insert_pair(&mut self, pair: &str) -> Result<()> {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| GuardError::Config(format!("expected key=value, got '{}'", pair)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(GuardError::Config(format!("empty option name in '{}'", pair)));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        self.options.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.options.iter()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

impl From<BTreeMap<String, Value>> for SessionConfig {
    fn from(options: BTreeMap<String, Value>) -> Self {
        Self { options }
    }
}

/// Everything needed to build a `TrackingGuard` from a file.
///
/// ```json
/// {
///   "enabled": true,
///   "backend": "offline",
///   "options": { "offline_directory": "runs", "project_name": "cartpole" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Turn tracking on. Off unless asked for.
    pub enabled: bool,
    /// Which tracking client to use
    pub backend: BackendKind,
    /// Forwarded to the client on activation
    pub options: SessionConfig,
}

impl GuardConfig {
    /// Create an enabled config for the given backend.
    pub fn new(backend: BackendKind) -> Self {
        Self {
            enabled: true,
            backend,
            options: SessionConfig::default(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key, value);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&data)
    }
}
