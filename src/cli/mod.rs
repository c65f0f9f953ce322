//! Command-line parsing for the multi-TE ASL modeller.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the fitting and output code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::data::asldata::LabelFormat;
use crate::fit::engine::DEFAULT_FABBER;
use crate::output::register::DEFAULT_FLIRT;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "asl_multite", version, about = "Multi-TE ASL perfusion modelling")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit the multi-TE model, then write native and structural space maps.
    Run(RunArgs),
    /// Print the engine options `run` would use, without running any tool.
    Options(RunArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct RunArgs {
    /// 4D ASL data (.nii or .nii.gz).
    #[arg(short = 'i', long, value_name = "NII")]
    pub asldata: PathBuf,

    /// Label/control arrangement of the input data.
    #[arg(long, value_enum, default_value_t = LabelFormat::Tc)]
    pub iaf: LabelFormat,

    /// Volume order, fastest varying first (l=label/control, e=TE, t=TI, r=repeat).
    /// Defaults to `letr`, or `etr` for differenced data.
    #[arg(long)]
    pub order: Option<String>,

    /// Inversion times (s), comma separated.
    #[arg(long, value_delimiter = ',', required = true)]
    pub tis: Vec<f64>,

    /// Echo times (s), comma separated.
    #[arg(long, value_delimiter = ',', required = true)]
    pub tes: Vec<f64>,

    /// Label durations (s): one value for all TIs, or one per TI.
    #[arg(long, alias = "tau", value_delimiter = ',', default_value = "1.8")]
    pub taus: Vec<f64>,

    /// Repeats per TI: one value for all TIs, or one per TI.
    #[arg(long, value_delimiter = ',', default_value = "1")]
    pub rpts: Vec<usize>,

    /// Analysis mask (.nii or .nii.gz). Defaults to every voxel.
    #[arg(short = 'm', long, value_name = "NII")]
    pub mask: Option<PathBuf>,

    /// Structural image (.nii or .nii.gz) for re-registration and structural space output.
    #[arg(long, value_name = "NII")]
    pub struc: Option<PathBuf>,

    /// Output directory. Without it results are only logged.
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Initialize perfusion and transit time using a fit on the resting-state ASL model.
    #[arg(long, help_heading = "Multi-TE Options")]
    pub multite_init: bool,

    /// File containing additional options for the multi-TE fitting step.
    #[arg(long, value_name = "FILE", help_heading = "Multi-TE Options")]
    pub multite_options: Option<PathBuf>,

    /// Tissue T1 (s).
    #[arg(long, help_heading = "Constants")]
    pub t1: Option<f64>,

    /// Blood T1 (s).
    #[arg(long, help_heading = "Constants")]
    pub t1b: Option<f64>,

    /// Tissue T2 (s).
    #[arg(long, help_heading = "Constants")]
    pub t2: Option<f64>,

    /// Blood T2 (s).
    #[arg(long, help_heading = "Constants")]
    pub t2b: Option<f64>,

    /// Inference engine executable.
    #[arg(long, env = "FABBER_ASL", default_value = DEFAULT_FABBER, help_heading = "Tools")]
    pub fabber: PathBuf,

    /// FLIRT executable used for registration.
    #[arg(long, env = "FLIRT", default_value = DEFAULT_FLIRT, help_heading = "Tools")]
    pub flirt: PathBuf,
}
