//! Multi-TE model fitting.

use crate::data::asldata::AslImage;
use crate::error::AppError;
use crate::fit::engine::{FitStep, InferenceEngine, run_fabber};
use crate::fit::init::{InitFitResult, InitialFit};
use crate::fit::options::fabber_options;
use crate::workspace::Workspace;

pub const FINAL_STEP: &str = "multite/finalstep";

/// The volume order the multi-TE model expects: echoes within each TI, repeats outermost.
pub const MULTITE_ORDER: &str = "etr";

/// Outputs of `fit_multite`.
#[derive(Debug, Clone)]
pub struct MultiTeOutput {
    /// Differenced, `etr`-ordered data handed to the engine.
    pub data: AslImage,
    /// Initialisation fit, when enabled. Not fed into the final fit.
    pub init: Option<InitFitResult>,
    pub finalstep: FitStep,
}

/// Difference and reorder raw data into the layout the multi-TE model expects.
///
/// Variable repeats are rejected up front; nothing is computed in that case.
pub fn prepare_data(asldata: &AslImage) -> Result<AslImage, AppError> {
    if asldata.is_var_repeats() {
        return Err(AppError::config(
            "Multi-TE ASL data with variable repeats not currently supported",
        ));
    }
    asldata.diff()?.reorder(MULTITE_ORDER)
}

/// Fit the multi-TE kinetic model to `wsp.asldata`.
///
/// Fails before touching the data if repeats vary between TIs. On success
/// `wsp.asldata` is replaced by the prepared (differenced, `etr`-ordered) data.
pub fn fit_multite(
    wsp: &mut Workspace,
    engine: &dyn InferenceEngine,
    init: &dyn InitialFit,
) -> Result<MultiTeOutput, AppError> {
    wsp.log.write("\nPerforming multi-TE model fitting:\n");
    let data = prepare_data(&wsp.asldata)?;
    wsp.asldata = data.clone();
    tracing::debug!(
        order = %data.order,
        volumes = data.image.nvols,
        "prepared multi-TE data"
    );

    let init = if wsp.config.multite_init {
        Some(init.fit(wsp, &data, engine)?)
    } else {
        None
    };

    let options = fabber_options(&data, &wsp.mask_or_all(), &wsp.config);
    let finalstep = run_fabber(
        wsp,
        FINAL_STEP,
        engine,
        options,
        "Running Fabber using multi-TE model",
    )?;

    wsp.log.write("\nDONE multi-TE decoding\n");
    Ok(MultiTeOutput {
        data,
        init,
        finalstep,
    })
}
