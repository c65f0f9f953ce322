//! Engine option assembly for the multi-TE fit.
//!
//! Options are built from layers merged in a fixed precedence (later wins):
//!
//! 1. fixed defaults (method, noise model, model name, output flags, iteration cap)
//! 2. dataset-derived values (data, mask, TIs, TEs, label durations, repeats)
//! 3. biophysical constants, only those that are set
//! 4. user overrides from the options file

use crate::data::asldata::AslImage;
use crate::data::image::Image;
use crate::domain::{FitOptions, MultiTeConfig, OptionValue};

pub const MULTITE_MODEL: &str = "asl_multite";
pub const DEFAULT_MAX_ITERATIONS: i64 = 30;

/// Merge option layers; a key set by a later layer overwrites earlier values
/// but keeps the position where it first appeared.
pub fn merge_layers<'a>(layers: impl IntoIterator<Item = &'a FitOptions>) -> FitOptions {
    let mut merged = FitOptions::new();
    for layer in layers {
        for (key, value) in layer {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

fn layer<const N: usize>(entries: [(&str, OptionValue); N]) -> FitOptions {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

pub fn default_layer() -> FitOptions {
    layer([
        ("method", "vb".into()),
        ("noise", "white".into()),
        ("model", MULTITE_MODEL.into()),
    ])
}

/// Dataset-derived options. Callers must have checked that repeats are fixed.
pub fn dataset_layer(data: &AslImage, mask: &Image) -> FitOptions {
    layer([
        ("data", data.image.clone().into()),
        ("mask", mask.clone().into()),
        ("ti", data.tis.clone().into()),
        ("te", data.tes.clone().into()),
        ("tau", data.taus.clone().into()),
        ("repeats", (data.rpts[0] as i64).into()),
    ])
}

pub fn output_layer() -> FitOptions {
    layer([
        ("infertexch", true.into()),
        ("save-mean", true.into()),
        ("save-model-fit", true.into()),
        ("max-iterations", DEFAULT_MAX_ITERATIONS.into()),
    ])
}

pub fn constants_layer(config: &MultiTeConfig) -> FitOptions {
    config
        .constants
        .entries()
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), OptionValue::Float(v))))
        .collect()
}

/// Engine options for the multi-TE fit of prepared (differenced, `etr`-ordered) data.
pub fn fabber_options(data: &AslImage, mask: &Image, config: &MultiTeConfig) -> FitOptions {
    let empty = FitOptions::new();
    let overrides = config.multite_options.as_ref().unwrap_or(&empty);
    merge_layers([
        &default_layer(),
        &dataset_layer(data, mask),
        &output_layer(),
        &constants_layer(config),
        overrides,
    ])
}
