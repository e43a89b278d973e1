//! Arguments of the tracking operations and the recorded event type.

use crate::float_format::{self, non_finite_name, JsonFloat};
use ndarray::ArrayD;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Value of a logged metric.
///
/// In JSON, booleans, integers, finite floats and strings are written as
/// themselves. Non-finite floats are written as `{"float": "NaN"}` (or
/// `"inf"`, `"-inf"`) so that a text metric reading "NaN" stays text.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetricValue::Bool(b) => serializer.serialize_bool(*b),
            MetricValue::Int(i) => serializer.serialize_i64(*i),
            MetricValue::Float(x) => match non_finite_name(*x) {
                None => serializer.serialize_f64(*x),
                Some(name) => {
                    let mut map = serializer.serialize_map(Some(1))?;
                    map.serialize_entry("float", name)?;
                    map.end()
                }
            },
            MetricValue::Text(s) => serializer.serialize_str(s),
        }
    }
}

struct MetricValueVisitor;

impl<'de> Visitor<'de> for MetricValueVisitor {
    type Value = MetricValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a boolean, number, string or {\"float\": ..}")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<MetricValue, E> {
        Ok(MetricValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<MetricValue, E> {
        Ok(MetricValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<MetricValue, E> {
        Ok(MetricValue::from(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<MetricValue, E> {
        Ok(MetricValue::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<MetricValue, E> {
        Ok(MetricValue::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<MetricValue, E> {
        Ok(MetricValue::Text(v))
    }

    // Logs written before non-finite floats had their own encoding.
    fn visit_unit<E: de::Error>(self) -> Result<MetricValue, E> {
        Ok(MetricValue::Float(f64::NAN))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<MetricValue, A::Error> {
        let mut value = None;
        while let Some(key) = map.next_key::<String>()? {
            if key != "float" {
                return Err(de::Error::unknown_field(&key, &["float"]));
            }
            value = Some(map.next_value::<JsonFloat>()?.0);
        }
        value
            .map(MetricValue::Float)
            .ok_or_else(|| de::Error::missing_field("float"))
    }
}

impl<'de> Deserialize<'de> for MetricValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MetricValueVisitor)
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Bool(b) => write!(f, "{}", b),
            MetricValue::Int(i) => write!(f, "{}", i),
            MetricValue::Float(x) => write!(f, "{:.4}", x),
            MetricValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<f32> for MetricValue {
    fn from(v: f32) -> Self {
        MetricValue::Float(v as f64)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<i32> for MetricValue {
    fn from(v: i32) -> Self {
        MetricValue::Int(v as i64)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(i) => MetricValue::Int(i),
            Err(_) => MetricValue::Float(v as f64),
        }
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

/// Model data: a file or directory on disk, or the contents of a stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelArtifact {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for ModelArtifact {
    fn from(p: PathBuf) -> Self {
        ModelArtifact::Path(p)
    }
}

impl From<&str> for ModelArtifact {
    fn from(p: &str) -> Self {
        ModelArtifact::Path(PathBuf::from(p))
    }
}

impl From<Vec<u8>> for ModelArtifact {
    fn from(b: Vec<u8>) -> Self {
        ModelArtifact::Bytes(b)
    }
}

/// Image payload. Encoding is left to the tracking client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageData {
    /// Path to an image file
    Path(PathBuf),
    /// Encoded image bytes (e.g. the contents of a PNG stream)
    Bytes(Vec<u8>),
    /// In-memory matrix, rows x columns (x channels)
    #[serde(with = "float_format::array")]
    Array(ArrayD<f64>),
    /// Structured pixel list, one inner vector per row
    #[serde(with = "float_format::pixels")]
    Pixels(Vec<Vec<f64>>),
}

impl From<PathBuf> for ImageData {
    fn from(p: PathBuf) -> Self {
        ImageData::Path(p)
    }
}

impl From<&str> for ImageData {
    fn from(p: &str) -> Self {
        ImageData::Path(PathBuf::from(p))
    }
}

impl From<ArrayD<f64>> for ImageData {
    fn from(a: ArrayD<f64>) -> Self {
        ImageData::Array(a)
    }
}

/// Where color information lives in 2D image data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrder {
    /// (channels, rows, columns)
    First,
    /// (rows, columns, channels)
    #[default]
    Last,
}

impl ChannelOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelOrder::First => "first",
            ChannelOrder::Last => "last",
        }
    }
}

/// Options for `log_image`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageOptions {
    /// Name shown on the dashboard; defaults to the file name of a path
    pub name: Option<String>,
    /// Replace an existing image with the same name
    pub overwrite: bool,
    /// Format used when the data has to be turned into an image
    pub format: String,
    /// Rescale factor
    #[serde(with = "float_format::float")]
    pub scale: f64,
    /// New shape: (width, height) or (width, height, colors)
    pub shape: Option<Vec<usize>>,
    /// Colormap used to colorize a matrix
    pub colormap: Option<String>,
    /// (min, max) used to scale values; autoscaled when absent
    #[serde(with = "float_format::minmax")]
    pub minmax: Option<(f64, f64)>,
    pub channels: ChannelOrder,
    /// Copy non-path data to a temporary file before upload
    pub copy_to_temp: bool,
    pub step: Option<u64>,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            name: None,
            overwrite: false,
            format: "png".to_string(),
            scale: 1.0,
            shape: None,
            colormap: None,
            minmax: None,
            channels: ChannelOrder::Last,
            copy_to_temp: true,
            step: None,
        }
    }
}

impl ImageOptions {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn shape(mut self, shape: Vec<usize>) -> Self {
        self.shape = Some(shape);
        self
    }

    pub fn colormap(mut self, colormap: impl Into<String>) -> Self {
        self.colormap = Some(colormap.into());
        self
    }

    pub fn minmax(mut self, min: f64, max: f64) -> Self {
        self.minmax = Some((min, max));
        self
    }

    pub fn channels(mut self, channels: ChannelOrder) -> Self {
        self.channels = channels;
        self
    }

    pub fn copy_to_temp(mut self, enabled: bool) -> Self {
        self.copy_to_temp = enabled;
        self
    }

    pub fn step(mut self, step: u64) -> Self {
        self.step = Some(step);
        self
    }
}

/// Source code to attach to an experiment.
///
/// When `code` is given, `code_name` is mandatory. The tracking client
/// enforces this, not the guard.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeSnapshot {
    pub file_path: Option<PathBuf>,
    pub folder: Option<PathBuf>,
    pub code: Option<String>,
    pub code_name: Option<String>,
}

impl CodeSnapshot {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn folder(path: impl Into<PathBuf>) -> Self {
        Self {
            folder: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn text(code: impl Into<String>, code_name: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            code_name: Some(code_name.into()),
            ..Default::default()
        }
    }
}

/// Arbitrary file payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetData {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for AssetData {
    fn from(p: PathBuf) -> Self {
        AssetData::Path(p)
    }
}

impl From<&str> for AssetData {
    fn from(p: &str) -> Self {
        AssetData::Path(PathBuf::from(p))
    }
}

impl From<Vec<u8>> for AssetData {
    fn from(b: Vec<u8>) -> Self {
        AssetData::Bytes(b)
    }
}

/// Options for `log_asset`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetOptions {
    /// Display name; defaults to the file name of a path
    pub file_name: Option<String>,
    /// Replace all existing assets with the same name
    pub overwrite: bool,
    /// Copy stream data to a temporary file before upload
    pub copy_to_temp: bool,
    pub step: Option<u64>,
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl Default for AssetOptions {
    fn default() -> Self {
        Self {
            file_name: None,
            overwrite: false,
            copy_to_temp: true,
            step: None,
            metadata: None,
        }
    }
}

impl AssetOptions {
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn copy_to_temp(mut self, enabled: bool) -> Self {
        self.copy_to_temp = enabled;
        self
    }

    pub fn step(mut self, step: u64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// One tracking call, as recorded by the offline backend and replayed by
/// `TrackingGuard::apply`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackingEvent {
    Metric {
        name: String,
        value: MetricValue,
        #[serde(default)]
        step: Option<u64>,
        #[serde(default)]
        epoch: Option<u64>,
        #[serde(default = "default_true")]
        include_context: bool,
    },
    Model {
        name: String,
        artifact: ModelArtifact,
        #[serde(default)]
        artifact_name: Option<String>,
    },
    Image {
        image: ImageData,
        #[serde(default)]
        options: ImageOptions,
    },
    Code {
        snapshot: CodeSnapshot,
    },
    Asset {
        asset: AssetData,
        #[serde(default)]
        options: AssetOptions,
    },
    Tag {
        tag: String,
    },
    End,
}

fn default_true() -> bool {
    true
}

impl TrackingEvent {
    /// Short operation name, used in log output.
    pub fn kind(&self) -> &'static str {
        match self {
            TrackingEvent::Metric { .. } => "log_metric",
            TrackingEvent::Model { .. } => "log_model",
            TrackingEvent::Image { .. } => "log_image",
            TrackingEvent::Code { .. } => "log_code",
            TrackingEvent::Asset { .. } => "log_asset",
            TrackingEvent::Tag { .. } => "add_tag",
            TrackingEvent::End => "end",
        }
    }

    /// Resolve relative file references against `base`.
    pub fn rebase_paths(&mut self, base: &Path) {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        match self {
            TrackingEvent::Model {
                artifact: ModelArtifact::Path(p),
                ..
            } => rebase(p),
            TrackingEvent::Image {
                image: ImageData::Path(p),
                ..
            } => rebase(p),
            TrackingEvent::Asset {
                asset: AssetData::Path(p),
                ..
            } => rebase(p),
            TrackingEvent::Code { snapshot } => {
                if let Some(p) = snapshot.file_path.as_mut() {
                    rebase(p);
                }
                if let Some(p) = snapshot.folder.as_mut() {
                    rebase(p);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_value_json_forms() {
        let v: MetricValue = serde_json::from_str("3").unwrap();
        assert_eq!(v, MetricValue::Int(3));
        let v: MetricValue = serde_json::from_str("0.25").unwrap();
        assert_eq!(v, MetricValue::Float(0.25));
        let v: MetricValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, MetricValue::Bool(true));
        let v: MetricValue = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(v, MetricValue::Text("high".to_string()));
    }

    #[test]
    fn test_metric_value_from_u64_overflow() {
        assert_eq!(MetricValue::from(7u64), MetricValue::Int(7));
        assert!(matches!(MetricValue::from(u64::MAX), MetricValue::Float(_)));
    }

    #[test]
    fn test_image_options_defaults() {
        let opts = ImageOptions::default();
        assert_eq!(opts.format, "png");
        assert_eq!(opts.scale, 1.0);
        assert_eq!(opts.channels, ChannelOrder::Last);
        assert!(opts.copy_to_temp);
        assert!(!opts.overwrite);

        let opts: ImageOptions = serde_json::from_str(r#"{"name": "frame"}"#).unwrap();
        assert_eq!(opts.name.as_deref(), Some("frame"));
        assert_eq!(opts.format, "png");
    }

    #[test]
    fn test_event_parses_minimal_metric() {
        let event: TrackingEvent =
            serde_json::from_str(r#"{"event": "metric", "name": "loss", "value": 0.5}"#).unwrap();
        assert_eq!(
            event,
            TrackingEvent::Metric {
                name: "loss".to_string(),
                value: MetricValue::Float(0.5),
                step: None,
                epoch: None,
                include_context: true,
            }
        );
        assert_eq!(event.kind(), "log_metric");
    }

    #[test]
    fn test_event_json_shape() {
        let event = TrackingEvent::Asset {
            asset: AssetData::Path(PathBuf::from("weights.bin")),
            options: AssetOptions::default().step(4).metadata("epoch", 2),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "asset");
        assert_eq!(json["asset"]["path"], "weights.bin");
        assert_eq!(json["options"]["step"], 4);
        assert_eq!(json["options"]["metadata"]["epoch"], 2);
        assert_eq!(json["options"]["copy_to_temp"], true);
    }

    #[test]
    fn test_rebase_paths() {
        let base = Path::new("/runs/abc");
        let mut event = TrackingEvent::Model {
            name: "policy".into(),
            artifact: ModelArtifact::Path(PathBuf::from("assets/0001_policy.bin")),
            artifact_name: None,
        };
        event.rebase_paths(base);
        assert_eq!(
            event,
            TrackingEvent::Model {
                name: "policy".into(),
                artifact: ModelArtifact::Path(PathBuf::from("/runs/abc/assets/0001_policy.bin")),
                artifact_name: None,
            }
        );

        let mut event = TrackingEvent::Code {
            snapshot: CodeSnapshot::file("/src/train.py"),
        };
        event.rebase_paths(base);
        assert_eq!(
            event,
            TrackingEvent::Code {
                snapshot: CodeSnapshot::file("/src/train.py"),
            }
        );
    }

    #[test]
    fn test_non_finite_metric_round_trip() {
        for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let json = serde_json::to_string(&MetricValue::Float(v)).unwrap();
            match serde_json::from_str::<MetricValue>(&json).unwrap() {
                MetricValue::Float(back) if v.is_nan() => assert!(back.is_nan()),
                MetricValue::Float(back) => assert_eq!(back, v),
                other => panic!("unexpected value {:?}", other),
            }
        }
        assert_eq!(
            serde_json::to_string(&MetricValue::Float(f64::INFINITY)).unwrap(),
            r#"{"float":"inf"}"#
        );

        // Text that looks like a float stays text.
        let json = serde_json::to_string(&MetricValue::Text("NaN".into())).unwrap();
        assert_eq!(
            serde_json::from_str::<MetricValue>(&json).unwrap(),
            MetricValue::Text("NaN".into())
        );

        // null, as written by older logs
        assert!(matches!(
            serde_json::from_str::<MetricValue>("null").unwrap(),
            MetricValue::Float(x) if x.is_nan()
        ));
    }

    #[test]
    fn test_non_finite_metric_inside_event() {
        let event = TrackingEvent::Metric {
            name: "loss".into(),
            value: MetricValue::Float(f64::NAN),
            step: Some(1),
            epoch: None,
            include_context: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        match serde_json::from_str::<TrackingEvent>(&json).unwrap() {
            TrackingEvent::Metric {
                value: MetricValue::Float(x),
                step,
                ..
            } => {
                assert!(x.is_nan());
                assert_eq!(step, Some(1));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_image_data_round_trip() {
        let array = ArrayD::from_shape_vec(
            ndarray::IxDyn(&[2, 2]),
            vec![0.0, f64::NAN, f64::INFINITY, -1.0],
        )
        .unwrap();
        let event = TrackingEvent::Image {
            image: ImageData::Array(array),
            options: ImageOptions::default().minmax(f64::NEG_INFINITY, 1.0),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: TrackingEvent = serde_json::from_str(&json).unwrap();
        match back {
            TrackingEvent::Image {
                image: ImageData::Array(a),
                options,
            } => {
                assert_eq!(a.shape(), &[2, 2]);
                let values: Vec<f64> = a.iter().copied().collect();
                assert_eq!(values[0], 0.0);
                assert!(values[1].is_nan());
                assert_eq!(values[2], f64::INFINITY);
                assert_eq!(values[3], -1.0);
                assert_eq!(options.minmax, Some((f64::NEG_INFINITY, 1.0)));
            }
            other => panic!("unexpected event {:?}", other),
        }

        let pixels = ImageData::Pixels(vec![vec![1.0, f64::NEG_INFINITY], vec![f64::NAN, 2.0]]);
        let json = serde_json::to_string(&pixels).unwrap();
        match serde_json::from_str::<ImageData>(&json).unwrap() {
            ImageData::Pixels(rows) => {
                assert_eq!(rows[0], vec![1.0, f64::NEG_INFINITY]);
                assert!(rows[1][0].is_nan());
                assert_eq!(rows[1][1], 2.0);
            }
            other => panic!("unexpected image {:?}", other),
        }
    }

    #[test]
    fn test_array_shape_mismatch_is_rejected() {
        let json = r#"{"array": {"shape": [2, 2], "data": [1.0, 2.0]}}"#;
        assert!(serde_json::from_str::<ImageData>(json).is_err());
    }
}
