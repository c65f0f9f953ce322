//! Optional initialisation fit.
//!
//! Before the multi-TE fit, perfusion and arrival time can be estimated with
//! the simpler resting-state kinetic model on echo-averaged data. The
//! engine's final posterior (`finalMVN`) is kept as `initial_mvn`.

use crate::data::asldata::AslImage;
use crate::data::image::Image;
use crate::domain::{FitOptions, OptionValue};
use crate::error::AppError;
use crate::fit::engine::{FitStep, InferenceEngine, run_fabber};
use crate::fit::options::DEFAULT_MAX_ITERATIONS;
use crate::workspace::Workspace;

pub const INIT_STEP: &str = "init";
pub const INIT_MODEL: &str = "aslrest";

/// Result of the initialisation fit.
#[derive(Debug, Clone)]
pub struct InitFitResult {
    pub initial_mvn: Option<Image>,
    pub step: FitStep,
}

pub trait InitialFit {
    /// Fit prepared (differenced, `etr`-ordered) data.
    fn fit(
        &self,
        wsp: &mut Workspace,
        data: &AslImage,
        engine: &dyn InferenceEngine,
    ) -> Result<InitFitResult, AppError>;
}

/// Resting-state (single compartment) fit on echo-averaged data.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestingStateInit;

impl RestingStateInit {
    pub fn options(data: &AslImage, mask: &Image) -> FitOptions {
        [
            ("method", OptionValue::from("vb")),
            ("noise", "white".into()),
            ("model", INIT_MODEL.into()),
            ("data", data.image.clone().into()),
            ("mask", mask.clone().into()),
            ("ti", data.tis.clone().into()),
            ("tau", data.taus.clone().into()),
            ("repeats", (data.rpts[0] as i64).into()),
            ("inctiss", true.into()),
            ("infertiss", true.into()),
            ("incbat", true.into()),
            ("inferbat", true.into()),
            ("save-mvn", true.into()),
            ("max-iterations", DEFAULT_MAX_ITERATIONS.into()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

impl InitialFit for RestingStateInit {
    fn fit(
        &self,
        wsp: &mut Workspace,
        data: &AslImage,
        engine: &dyn InferenceEngine,
    ) -> Result<InitFitResult, AppError> {
        let single_te = data.mean_across_echoes()?;
        let options = Self::options(&single_te, &wsp.mask_or_all());
        let step = run_fabber(
            wsp,
            INIT_STEP,
            engine,
            options,
            "Running initial fit using resting-state model",
        )?;
        let initial_mvn = step.get("finalMVN").cloned();
        if initial_mvn.is_none() {
            tracing::warn!("initial fit produced no finalMVN output");
        }
        Ok(InitFitResult { initial_mvn, step })
    }
}
