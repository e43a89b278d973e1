//! JSON encoding for floats that keeps NaN and the infinities.
//!
//! `serde_json` writes non-finite floats as `null`. Here they are written as
//! the strings `"NaN"`, `"inf"` and `"-inf"`, and `null` reads back as NaN.

use ndarray::{ArrayD, IxDyn};
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;

pub(crate) fn non_finite_name(v: f64) -> Option<&'static str> {
    if v.is_nan() {
        Some("NaN")
    } else if v == f64::INFINITY {
        Some("inf")
    } else if v == f64::NEG_INFINITY {
        Some("-inf")
    } else {
        None
    }
}

pub(crate) fn parse_non_finite(s: &str) -> Option<f64> {
    match s {
        "NaN" | "nan" => Some(f64::NAN),
        "inf" | "Infinity" => Some(f64::INFINITY),
        "-inf" | "-Infinity" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

/// `f64` that survives a JSON round trip.
#[derive(Clone, Copy, Debug)]
pub(crate) struct JsonFloat(pub f64);

impl Serialize for JsonFloat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match non_finite_name(self.0) {
            Some(name) => serializer.serialize_str(name),
            None => serializer.serialize_f64(self.0),
        }
    }
}

struct JsonFloatVisitor;

impl<'de> Visitor<'de> for JsonFloatVisitor {
    type Value = f64;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number, \"NaN\", \"inf\" or \"-inf\"")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
        Ok(v as f64)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
        Ok(v as f64)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
        parse_non_finite(v).ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
    }

    fn visit_unit<E: de::Error>(self) -> Result<f64, E> {
        Ok(f64::NAN)
    }

    fn visit_none<E: de::Error>(self) -> Result<f64, E> {
        Ok(f64::NAN)
    }
}

impl<'de> Deserialize<'de> for JsonFloat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(JsonFloatVisitor).map(JsonFloat)
    }
}

/// `#[serde(with)]` for a plain `f64` field.
pub(crate) mod float {
    use super::JsonFloat;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        JsonFloat(*v).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        JsonFloat::deserialize(deserializer).map(|f| f.0)
    }
}

/// `#[serde(with)]` for an optional `(min, max)` pair.
pub(crate) mod minmax {
    use super::JsonFloat;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        v: &Option<(f64, f64)>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        v.map(|(lo, hi)| (JsonFloat(lo), JsonFloat(hi)))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<(f64, f64)>, D::Error> {
        Option::<(JsonFloat, JsonFloat)>::deserialize(deserializer)
            .map(|v| v.map(|(lo, hi)| (lo.0, hi.0)))
    }
}

/// `#[serde(with)]` for a pixel list, one inner vector per row.
pub(crate) mod pixels {
    use super::JsonFloat;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(rows: &[Vec<f64>], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(
            rows.iter()
                .map(|row| row.iter().map(|v| JsonFloat(*v)).collect::<Vec<_>>()),
        )
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<f64>>, D::Error> {
        let rows = Vec::<Vec<JsonFloat>>::deserialize(deserializer)?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().map(|v| v.0).collect())
            .collect())
    }
}

/// `#[serde(with)]` for an n-dimensional array, stored as
/// `{"shape": [..], "data": [..]}` in row-major order.
pub(crate) mod array {
    use super::*;

    #[derive(Serialize)]
    struct ArrayOut<'a> {
        shape: &'a [usize],
        data: Vec<JsonFloat>,
    }

    #[derive(Deserialize)]
    struct ArrayIn {
        shape: Vec<usize>,
        data: Vec<JsonFloat>,
    }

    pub fn serialize<S: Serializer>(a: &ArrayD<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        ArrayOut {
            shape: a.shape(),
            data: a.iter().map(|v| JsonFloat(*v)).collect(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<ArrayD<f64>, D::Error> {
        let raw = ArrayIn::deserialize(deserializer)?;
        let data = raw.data.into_iter().map(|v| v.0).collect();
        ArrayD::from_shape_vec(IxDyn(&raw.shape), data).map_err(de::Error::custom)
    }
}
