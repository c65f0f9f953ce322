//! Shared domain types.
//!
//! Engine options are kept as an insertion-ordered map so that the command
//! line handed to the engine, the persisted `options.txt` and the printed dry
//! run all list options in the same order.

use std::fmt;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use crate::data::image::Image;

/// A single inference-engine option value.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Flag(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<f64>),
    Image(Image),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Flag(v) => write!(f, "{v}"),
            OptionValue::Int(v) => write!(f, "{v}"),
            OptionValue::Float(v) => write!(f, "{v}"),
            OptionValue::Text(v) => write!(f, "{v}"),
            OptionValue::List(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
            OptionValue::Image(img) => write!(f, "<image {}>", img.shape_label()),
        }
    }
}

impl Serialize for OptionValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            OptionValue::Flag(v) => serializer.serialize_bool(*v),
            OptionValue::Int(v) => serializer.serialize_i64(*v),
            OptionValue::Float(v) => serializer.serialize_f64(*v),
            OptionValue::Text(v) => serializer.serialize_str(v),
            OptionValue::List(values) => values.serialize(serializer),
            OptionValue::Image(_) => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Flag(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        OptionValue::Float(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

impl From<Vec<f64>> for OptionValue {
    fn from(value: Vec<f64>) -> Self {
        OptionValue::List(value)
    }
}

impl From<Image> for OptionValue {
    fn from(value: Image) -> Self {
        OptionValue::Image(value)
    }
}

/// Option name -> value, in insertion order.
pub type FitOptions = IndexMap<String, OptionValue>;

/// Optional biophysical constants. Unset values are left to the engine's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BiophysConstants {
    /// Tissue T1 (s).
    pub t1: Option<f64>,
    /// Blood T1 (s).
    pub t1b: Option<f64>,
    /// Tissue T2 (s).
    pub t2: Option<f64>,
    /// Blood T2 (s).
    pub t2b: Option<f64>,
}

impl BiophysConstants {
    pub fn entries(&self) -> [(&'static str, Option<f64>); 4] {
        [
            ("t1", self.t1),
            ("t1b", self.t1b),
            ("t2", self.t2),
            ("t2b", self.t2b),
        ]
    }
}

/// Multi-TE modelling configuration.
#[derive(Debug, Clone, Default)]
pub struct MultiTeConfig {
    /// Run a resting-state fit before the multi-TE fit.
    pub multite_init: bool,
    pub constants: BiophysConstants,
    /// User-supplied engine options; these win over everything else.
    pub multite_options: Option<FitOptions>,
}

/// Named outputs returned by one engine run.
#[derive(Debug, Clone, Default)]
pub struct FitOutputs {
    pub images: IndexMap<String, Image>,
    /// Engine log text, if the engine produced one.
    pub logfile: Option<String>,
}

impl FitOutputs {
    pub fn get(&self, name: &str) -> Option<&Image> {
        self.images.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.images.keys().cloned().collect()
    }
}
