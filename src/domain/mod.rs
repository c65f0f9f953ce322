//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - engine option values and the ordered option map (`OptionValue`, `FitOptions`)
//! - modelling configuration (`MultiTeConfig`, `BiophysConstants`)
//! - engine outputs (`FitOutputs`)

pub mod types;

pub use types::*;
