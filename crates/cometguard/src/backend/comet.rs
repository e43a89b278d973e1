//! comet_ml backend using the Python bridge.

use crate::client::{Experiment, TrackingClient};
use crate::config::SessionConfig;
use crate::types::{
    AssetData, AssetOptions, CodeSnapshot, ImageData, ImageOptions, MetricValue, ModelArtifact,
};
use numpy::ToPyArray;
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyDict, PyList, PyTuple};
use serde_json::Value;
use std::path::Path;

/// Client driving the `comet_ml` Python SDK.
///
/// Needs an interpreter with `comet_ml` installed. Construction fails when
/// the module cannot be imported, which is how `BackendProbe` decides the
/// dependency is missing.
pub struct CometMlClient {
    comet: PyObject,
}

impl CometMlClient {
    pub fn new() -> anyhow::Result<Self> {
        Python::with_gil(|py| {
            let comet = py
                .import_bound("comet_ml")
                .map_err(|e| anyhow::anyhow!("Failed to import comet_ml: {}", e))?
                .to_object(py);
            Ok(Self { comet })
        })
    }
}

impl TrackingClient for CometMlClient {
    fn init(&self) -> anyhow::Result<()> {
        Python::with_gil(|py| {
            self.comet.bind(py).call_method0("init")?;
            Ok(())
        })
    }

    fn global_experiment(&self) -> Option<String> {
        Python::with_gil(|py| {
            let experiment = self
                .comet
                .bind(py)
                .call_method0("get_global_experiment")
                .ok()?;
            if experiment.is_none() {
                return None;
            }
            let key = experiment
                .call_method0("get_key")
                .and_then(|k| k.extract::<String>())
                .unwrap_or_else(|_| "<unknown>".to_string());
            Some(key)
        })
    }

    fn create_experiment(&self, config: &SessionConfig) -> anyhow::Result<Box<dyn Experiment>> {
        Python::with_gil(|py| {
            let kwargs = PyDict::new_bound(py);
            for (k, v) in config.iter() {
                kwargs.set_item(k, json_to_py(py, v)?)?;
            }

            let experiment = self
                .comet
                .bind(py)
                .call_method("Experiment", (), Some(&kwargs))?;
            let key: String = experiment.call_method0("get_key")?.extract()?;

            Ok(Box::new(CometExperiment {
                experiment: experiment.to_object(py),
                key,
            }) as Box<dyn Experiment>)
        })
    }

    fn clear_global_experiment(&self) {
        Python::with_gil(|py| {
            let cleared = self
                .comet
                .bind(py)
                .getattr("config")
                .and_then(|config| config.setattr("experiment", py.None()));
            if let Err(e) = cleared {
                tracing::debug!("Could not clear comet_ml.config.experiment: {}", e);
            }
        })
    }
}

struct CometExperiment {
    experiment: PyObject,
    key: String,
}

impl Experiment for CometExperiment {
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
        Python::with_gil(|py| {
            let value = match value {
                MetricValue::Bool(b) => b.to_object(py),
                MetricValue::Int(i) => i.to_object(py),
                MetricValue::Float(x) => x.to_object(py),
                MetricValue::Text(s) => s.to_object(py),
            };
            self.experiment.bind(py).call_method1(
                "log_metric",
                (name, value, step, epoch, include_context),
            )?;
            Ok(())
        })
    }

    fn log_model(
        &mut self,
        name: &str,
        artifact: &ModelArtifact,
        artifact_name: Option<&str>,
    ) -> anyhow::Result<()> {
        Python::with_gil(|py| {
            let data = match artifact {
                ModelArtifact::Path(p) => path_to_py(py, p),
                ModelArtifact::Bytes(b) => bytes_io(py, b)?,
            };
            self.experiment
                .bind(py)
                .call_method1("log_model", (name, data, artifact_name))?;
            Ok(())
        })
    }

    fn log_image(&mut self, image: &ImageData, options: &ImageOptions) -> anyhow::Result<()> {
        Python::with_gil(|py| {
            let data = match image {
                ImageData::Path(p) => path_to_py(py, p),
                ImageData::Bytes(b) => bytes_io(py, b)?,
                ImageData::Array(a) => a.to_pyarray_bound(py).to_object(py),
                ImageData::Pixels(rows) => rows.to_object(py),
            };

            let kwargs = PyDict::new_bound(py);
            kwargs.set_item("name", options.name.as_deref())?;
            kwargs.set_item("overwrite", options.overwrite)?;
            kwargs.set_item("image_format", options.format.as_str())?;
            kwargs.set_item("image_scale", options.scale)?;
            match &options.shape {
                Some(shape) => kwargs.set_item("image_shape", PyTuple::new_bound(py, shape))?,
                None => kwargs.set_item("image_shape", py.None())?,
            }
            kwargs.set_item("image_colormap", options.colormap.as_deref())?;
            kwargs.set_item("image_minmax", options.minmax)?;
            kwargs.set_item("image_channels", options.channels.as_str())?;
            kwargs.set_item("copy_to_tmp", options.copy_to_temp)?;
            kwargs.set_item("step", options.step)?;

            self.experiment
                .bind(py)
                .call_method("log_image", (data,), Some(&kwargs))?;
            Ok(())
        })
    }

    fn log_code(&mut self, snapshot: &CodeSnapshot) -> anyhow::Result<()> {
        Python::with_gil(|py| {
            let kwargs = PyDict::new_bound(py);
            kwargs.set_item("file_name", snapshot.file_path.as_deref().map(|p| path_to_py(py, p)))?;
            kwargs.set_item("folder", snapshot.folder.as_deref().map(|p| path_to_py(py, p)))?;
            kwargs.set_item("code", snapshot.code.as_deref())?;
            kwargs.set_item("code_name", snapshot.code_name.as_deref())?;

            self.experiment
                .bind(py)
                .call_method("log_code", (), Some(&kwargs))?;
            Ok(())
        })
    }

    fn log_asset(&mut self, asset: &AssetData, options: &AssetOptions) -> anyhow::Result<()> {
        Python::with_gil(|py| {
            let data = match asset {
                AssetData::Path(p) => path_to_py(py, p),
                AssetData::Bytes(b) => bytes_io(py, b)?,
            };

            let kwargs = PyDict::new_bound(py);
            kwargs.set_item("file_name", options.file_name.as_deref())?;
            kwargs.set_item("overwrite", options.overwrite)?;
            kwargs.set_item("copy_to_tmp", options.copy_to_temp)?;
            kwargs.set_item("step", options.step)?;
            match &options.metadata {
                Some(metadata) => {
                    let py_metadata = PyDict::new_bound(py);
                    for (k, v) in metadata {
                        py_metadata.set_item(k, json_to_py(py, v)?)?;
                    }
                    kwargs.set_item("metadata", py_metadata)?;
                }
                None => kwargs.set_item("metadata", py.None())?,
            }

            self.experiment
                .bind(py)
                .call_method("log_asset", (data,), Some(&kwargs))?;
            Ok(())
        })
    }

    fn add_tag(&mut self, tag: &str) -> anyhow::Result<()> {
        Python::with_gil(|py| {
            self.experiment.bind(py).call_method1("add_tag", (tag,))?;
            Ok(())
        })
    }

    fn end(&mut self) -> anyhow::Result<()> {
        Python::with_gil(|py| {
            self.experiment.bind(py).call_method0("end")?;
            Ok(())
        })
    }
}

fn path_to_py(py: Python<'_>, path: &Path) -> PyObject {
    path.to_string_lossy().to_object(py)
}

/// Wrap bytes in `io.BytesIO`, the file-like object comet_ml expects.
fn bytes_io(py: Python<'_>, bytes: &[u8]) -> PyResult<PyObject> {
    let io = py.import_bound("io")?;
    let stream = io.call_method1("BytesIO", (PyBytes::new_bound(py, bytes),))?;
    Ok(stream.to_object(py))
}

fn json_to_py(py: Python<'_>, value: &Value) -> PyResult<PyObject> {
    Ok(match value {
        Value::Null => py.None(),
        Value::Bool(b) => b.to_object(py),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_object(py),
            None => n.as_f64().unwrap_or(f64::NAN).to_object(py),
        },
        Value::String(s) => s.to_object(py),
        Value::Array(items) => {
            let list = PyList::empty_bound(py);
            for item in items {
                list.append(json_to_py(py, item)?)?;
            }
            list.to_object(py)
        }
        Value::Object(map) => {
            let dict = PyDict::new_bound(py);
            for (k, v) in map {
                dict.set_item(k, json_to_py(py, v)?)?;
            }
            dict.to_object(py)
        }
    })
}
