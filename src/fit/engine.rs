//! Inference engine boundary.
//!
//! The multi-TE model is fitted by an external variational Bayes tool. This
//! module defines the trait the pipeline calls, the default implementation
//! that spawns `fabber_asl`, and `run_fabber`, which wraps one engine run as a
//! named pipeline step.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::data::image::Image;
use crate::domain::{FitOptions, FitOutputs, OptionValue};
use crate::error::AppError;
use crate::io::nifti::{is_nifti_path, nifti_stem, read_nifti, write_nifti};
use crate::io::optfile::render_optfile;
use crate::workspace::{RunLog, Workspace};

pub const DEFAULT_FABBER: &str = "fabber_asl";

pub trait InferenceEngine {
    /// Run one fit and return its named outputs.
    fn run(&self, options: &FitOptions, log: &mut RunLog) -> Result<FitOutputs, AppError>;
}

/// Options and outputs of one engine run.
#[derive(Debug, Clone)]
pub struct FitStep {
    pub options: FitOptions,
    pub outputs: FitOutputs,
}

impl FitStep {
    pub fn get(&self, name: &str) -> Option<&Image> {
        self.outputs.get(name)
    }
}

/// Run the engine as the step stored under `step_path` (e.g. `multite/finalstep`).
///
/// Every engine output ends up in the returned `FitStep`. With a save
/// directory, the options and the engine log are persisted under `step_path`.
pub fn run_fabber(
    wsp: &mut Workspace,
    step_path: &str,
    engine: &dyn InferenceEngine,
    options: FitOptions,
    desc: &str,
) -> Result<FitStep, AppError> {
    wsp.log.write(&format!("  - {desc}     "));
    let outputs = engine.run(&options, &mut wsp.log)?;
    wsp.log.write(" - DONE\n");

    if let Some(save) = &wsp.savedir {
        save.set_item(
            step_path,
            "options.txt",
            &render_optfile(&options, |key| format!("{key}.nii")),
        )?;
        if let Some(text) = &outputs.logfile {
            save.set_item(step_path, "logfile", text)?;
        }
    }

    Ok(FitStep { options, outputs })
}

/// Runs the `fabber_asl` command-line tool in a scratch directory.
#[derive(Debug, Clone)]
pub struct FabberEngine {
    pub executable: PathBuf,
}

impl FabberEngine {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl Default for FabberEngine {
    fn default() -> Self {
        Self::new(DEFAULT_FABBER)
    }
}

impl InferenceEngine for FabberEngine {
    fn run(&self, options: &FitOptions, log: &mut RunLog) -> Result<FitOutputs, AppError> {
        let work = tempfile::Builder::new()
            .prefix("asl_multite_")
            .tempdir()
            .map_err(|e| AppError::tool(format!("Failed to create engine work dir: {e}")))?;
        let outdir = work.path().join("out");

        let mut args = render_args(options, work.path())?;
        args.push(format!("--output={}", outdir.display()));

        crate::tools::run_tool(&self.executable, &args, &[("FSLOUTPUTTYPE", "NIFTI")], log)?;
        load_outputs(&outdir)
    }
}

/// Render options as engine arguments, writing image values into `workdir`.
pub fn render_args(options: &FitOptions, workdir: &Path) -> Result<Vec<String>, AppError> {
    let mut args = Vec::with_capacity(options.len());
    for (key, value) in options {
        match value {
            OptionValue::Flag(true) => args.push(format!("--{key}")),
            OptionValue::Flag(false) => {}
            OptionValue::List(values) => {
                for (idx, v) in values.iter().enumerate() {
                    args.push(format!("--{key}{}={v}", idx + 1));
                }
            }
            OptionValue::Image(image) => {
                let path = workdir.join(format!("{key}.nii"));
                write_nifti(&path, image)?;
                args.push(format!("--{key}={}", path.display()));
            }
            other => args.push(format!("--{key}={other}")),
        }
    }
    Ok(args)
}

/// Load every `.nii`/`.nii.gz` in the engine output directory, keyed by file stem.
pub fn load_outputs(outdir: &Path) -> Result<FitOutputs, AppError> {
    let entries = std::fs::read_dir(outdir).map_err(|e| {
        AppError::tool(format!(
            "Engine output dir '{}' is not readable: {e}",
            outdir.display()
        ))
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| is_nifti_path(p))
        .collect();
    files.sort();

    let mut images = IndexMap::new();
    for path in files {
        let Some(stem) = nifti_stem(&path) else {
            continue;
        };
        let image = read_nifti(&path).map_err(|e| AppError::tool(e.message()))?;
        images.insert(stem.to_string(), image);
    }

    let logfile = std::fs::read_to_string(outdir.join("logfile")).ok();
    tracing::debug!(outputs = images.len(), has_log = logfile.is_some(), "loaded engine outputs");
    Ok(FitOutputs { images, logfile })
}



#[cfg(all(test, unix))]
mod process_tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    /// Stand-in `fabber_asl`: requires NIfTI output, copies `--data` to
    /// `mean_ftiss.nii` in the `--output` dir and writes a logfile.
    const SCRIPT: &str = r#"#!/bin/sh
[ "$FSLOUTPUTTYPE" = "NIFTI" ] || { echo "FSLOUTPUTTYPE=$FSLOUTPUTTYPE" >&2; exit 7; }
for a in "$@"; do
  case "$a" in
    --output=*) out="${a#--output=}" ;;
    --data=*) data="${a#--data=}" ;;
  esac
done
mkdir -p "$out" || exit 8
cp "$data" "$out/mean_ftiss.nii" || exit 9
printf 'model asl_multite\nargs %s\n' "$*" > "$out/logfile"
"#;

    fn script_engine(dir: &Path) -> FabberEngine {
        let path = dir.join("fabber_asl");
        std::fs::write(&path, SCRIPT).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        FabberEngine::new(path)
    }

    #[test]
    fn fabber_engine_runs_tool_and_loads_its_outputs() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = script_engine(tmp.path());
        let data = Image::new([2, 1, 1], 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut opts = FitOptions::new();
        opts.insert("model".into(), "asl_multite".into());
        opts.insert("data".into(), data.clone().into());
        opts.insert("infertexch".into(), true.into());

        let mut log = RunLog::capture();
        let outputs = engine.run(&opts, &mut log).unwrap();

        assert_eq!(outputs.names(), vec!["mean_ftiss"]);
        assert_eq!(outputs.get("mean_ftiss").unwrap().data, data.data);
        let logfile = outputs.logfile.unwrap();
        assert!(logfile.contains("--model=asl_multite"));
        assert!(logfile.contains("--infertexch"));
        assert!(logfile.contains("--output="));
    }

    #[test]
    fn fabber_engine_failure_is_a_tool_error() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = script_engine(tmp.path());
        // No --data option: the copy fails and the tool exits non-zero.
        let mut log = RunLog::capture();
        let err = engine.run(&FitOptions::new(), &mut log).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }
}
