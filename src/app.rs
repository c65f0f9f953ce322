//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and sets up diagnostics
//! - parses CLI arguments into a `RunConfig`
//! - loads the dataset into a `Workspace`
//! - runs the modelling pipeline (or a dry run of the option assembly)
//! - prints and persists the run summary

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Command, RunArgs};
use crate::data::asldata::{AslImage, LabelFormat};
use crate::domain::{BiophysConstants, MultiTeConfig};
use crate::error::AppError;
use crate::fit::engine::FabberEngine;
use crate::fit::init::RestingStateInit;
use crate::fit::multite::prepare_data;
use crate::fit::options::fabber_options;
use crate::io::nifti::read_nifti;
use crate::io::optfile::read_optfile;
use crate::output::register::FlirtRegistrar;
use crate::workspace::{RunLog, SaveDir, Workspace};

pub mod pipeline;

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub asldata: PathBuf,
    pub iaf: LabelFormat,
    pub order: String,
    pub tis: Vec<f64>,
    pub tes: Vec<f64>,
    pub taus: Vec<f64>,
    pub rpts: Vec<usize>,
    pub mask: Option<PathBuf>,
    pub struc: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub multite: MultiTeConfig,
    pub fabber: PathBuf,
    pub flirt: PathBuf,
}

/// Entry point for the `asl_multite` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    // `asl_multite -i data.nii ...` behaves like `asl_multite run -i data.nii ...`.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Options(args) => handle_options(args),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let config = run_config_from_args(&args)?;
    let mut wsp = load_workspace(&config, RunLog::stdout())?;

    let engine = FabberEngine::new(&config.fabber);
    let registrar = FlirtRegistrar::new(&config.flirt, config.struc.clone());
    let tools = pipeline::Collaborators {
        engine: &engine,
        init: &RestingStateInit,
        registrar: &registrar,
    };

    let out = pipeline::model_multite(&mut wsp, &tools)?;

    let summary = crate::report::RunSummary::from_output(&out);
    println!("\n{}", crate::report::format_run_summary(&summary));
    if let Some(save) = &wsp.savedir {
        crate::report::write_summary_json(&save.path().join("run_summary.json"), &summary)?;
    }
    Ok(())
}

fn handle_options(args: RunArgs) -> Result<(), AppError> {
    let config = RunConfig {
        output: None,
        ..run_config_from_args(&args)?
    };
    let wsp = load_workspace(&config, RunLog::capture())?;
    let data = prepare_data(&wsp.asldata)?;
    let options = fabber_options(&data, &wsp.mask_or_all(), &wsp.config);
    print!("{}", crate::report::format_options(&options));
    Ok(())
}

pub fn run_config_from_args(args: &RunArgs) -> Result<RunConfig, AppError> {
    let multite_options = args
        .multite_options
        .as_deref()
        .map(read_optfile)
        .transpose()?;

    Ok(RunConfig {
        asldata: args.asldata.clone(),
        iaf: args.iaf,
        order: args
            .order
            .clone()
            .unwrap_or_else(|| args.iaf.default_order().to_string()),
        tis: args.tis.clone(),
        tes: args.tes.clone(),
        taus: args.taus.clone(),
        rpts: args.rpts.clone(),
        mask: args.mask.clone(),
        struc: args.struc.clone(),
        output: args.output.clone(),
        multite: MultiTeConfig {
            multite_init: args.multite_init,
            constants: BiophysConstants {
                t1: args.t1,
                t1b: args.t1b,
                t2: args.t2,
                t2b: args.t2b,
            },
            multite_options,
        },
        fabber: args.fabber.clone(),
        flirt: args.flirt.clone(),
    })
}

/// Read the input images and build the workspace for a run.
pub fn load_workspace(config: &RunConfig, log: RunLog) -> Result<Workspace, AppError> {
    let image = read_nifti(&config.asldata)?;
    let asl = AslImage::new(
        image,
        config.iaf,
        &config.order,
        config.tis.clone(),
        config.tes.clone(),
        config.taus.clone(),
        config.rpts.clone(),
    )?;
    tracing::info!(shape = %asl.image.shape_label(), order = %asl.order, "loaded ASL data");

    let mut wsp = Workspace::new(asl, config.multite.clone()).with_log(log);
    if let Some(path) = &config.mask {
        wsp = wsp.with_mask(read_nifti(path)?)?;
    }
    if let Some(dir) = &config.output {
        wsp = wsp.with_savedir(SaveDir::create(dir)?)?;
    }
    Ok(wsp)
}

/// Rewrite argv so `asl_multite <flags>` defaults to `asl_multite run <flags>`.
///
/// Rules:
/// - `asl_multite`                      -> unchanged (clap prints usage)
/// - `asl_multite -i asl.nii ...`       -> `asl_multite run -i asl.nii ...`
/// - `asl_multite --help/--version/-h`  -> unchanged (show top-level help/version)
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        return argv;
    };

    let is_top_level_help_or_version = matches!(
        arg1.as_str(),
        "-h" | "--help" | "-V" | "--version" | "help"
    );
    if is_top_level_help_or_version {
        return argv;
    }

    let is_subcommand = matches!(arg1.as_str(), "run" | "options");
    if is_subcommand {
        return argv;
    }

    if arg1.starts_with('-') {
        argv.insert(1, "run".to_string());
    }
    argv
}
