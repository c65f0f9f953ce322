//! `asl-multite` library crate.
//!
//! The binary (`asl_multite`) is a thin wrapper around this library so that:
//!
//! - the pipeline is testable without spawning the inference engine or FSL tools
//! - the steps (fit, native output, registration, structural output) can be reused
//!   by a larger ASL pipeline

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod output;
pub mod report;
pub mod tools;
pub mod workspace;
