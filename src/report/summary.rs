//! Machine-readable run summary (`run_summary.json`).

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::app::pipeline::ModelOutput;
use crate::data::asldata::{AslImage, LabelFormat};
use crate::domain::FitOptions;
use crate::error::AppError;

#[derive(Debug, Clone, Serialize)]
pub struct DataSummary {
    pub shape: String,
    pub iaf: LabelFormat,
    pub order: String,
    pub tis: Vec<f64>,
    pub tes: Vec<f64>,
    pub taus: Vec<f64>,
    pub rpts: Vec<usize>,
}

impl From<&AslImage> for DataSummary {
    fn from(asl: &AslImage) -> Self {
        Self {
            shape: asl.image.shape_label(),
            iaf: asl.iaf,
            order: asl.order.clone(),
            tis: asl.tis.clone(),
            tes: asl.tes.clone(),
            taus: asl.taus.clone(),
            rpts: asl.rpts.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub tool: String,
    pub version: String,
    pub generated: DateTime<Local>,
    pub data: DataSummary,
    pub options: FitOptions,
    pub init_outputs: Option<Vec<String>>,
    pub engine_outputs: Vec<String>,
    pub native_maps: Vec<String>,
    pub registered: bool,
    pub struc_maps: Vec<String>,
}

impl RunSummary {
    pub fn from_output(out: &ModelOutput) -> Self {
        Self {
            tool: "asl_multite".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            generated: Local::now(),
            data: DataSummary::from(&out.multite.data),
            options: out.multite.finalstep.options.clone(),
            init_outputs: out.multite.init.as_ref().map(|init| init.step.outputs.names()),
            engine_outputs: out.multite.finalstep.outputs.names(),
            native_maps: out.native.maps.keys().cloned().collect(),
            registered: out.registration.is_some(),
            struc_maps: out.transformed.maps.keys().cloned().collect(),
        }
    }
}

/// Write the summary as pretty JSON.
pub fn write_summary_json(path: &Path, summary: &RunSummary) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::config(format!("Failed to create summary JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, summary)
        .map_err(|e| AppError::config(format!("Failed to write summary JSON: {e}")))?;
    Ok(())
}
