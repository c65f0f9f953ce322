//! The multi-TE modelling pipeline.
//!
//! fit -> native output -> re-registration from the perfusion map -> structural output
//!
//! Each step consumes the previous step's result explicitly; the workspace only
//! carries inputs, the run log and the save directory.

use crate::error::AppError;
use crate::fit::engine::InferenceEngine;
use crate::fit::init::InitialFit;
use crate::fit::multite::{MultiTeOutput, fit_multite};
use crate::output::native::{NativeOutput, output_native};
use crate::output::register::{Registrar, Registration, redo_reg};
use crate::output::transform::{TransformedOutput, output_trans};
use crate::workspace::Workspace;

/// External tools the pipeline delegates to.
pub struct Collaborators<'a> {
    pub engine: &'a dyn InferenceEngine,
    pub init: &'a dyn InitialFit,
    pub registrar: &'a dyn Registrar,
}

/// All computed outputs of a single `model_multite` run.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub multite: MultiTeOutput,
    pub native: NativeOutput,
    pub registration: Option<Registration>,
    pub transformed: TransformedOutput,
}

/// Model multi-TE ASL data in `wsp.asldata` and write all outputs.
pub fn model_multite(wsp: &mut Workspace, tools: &Collaborators<'_>) -> Result<ModelOutput, AppError> {
    let multite = fit_multite(wsp, tools.engine, tools.init)?;

    let native = output_native(wsp, &multite)?;

    let registration = redo_reg(wsp, tools.registrar, native.perfusion()?)?;

    let transformed = output_trans(wsp, tools.registrar, &native, registration.as_ref())?;

    wsp.log.write("\nDONE processing\n");
    Ok(ModelOutput {
        multite,
        native,
        registration,
        transformed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::asldata::{AslImage, LabelFormat};
    use crate::data::image::Image;
    use crate::domain::MultiTeConfig;
    use crate::fit::engine::testing::FakeEngine;
    use crate::fit::init::RestingStateInit;
    use crate::output::register::testing::FakeRegistrar;
    use crate::workspace::{RunLog, SaveDir};

    fn workspace() -> Workspace {
        // 2 voxels, 1 TI, 2 TEs, 2 repeats, label/control pairs.
        let data: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let image = Image::new([2, 1, 1], 8, data).unwrap();
        let asl = AslImage::new(image, LabelFormat::Tc, "ler", vec![1.8], vec![0.013, 0.04], vec![1.4], vec![2])
            .unwrap();
        Workspace::new(asl, MultiTeConfig::default()).with_log(RunLog::capture())
    }

    fn engine() -> FakeEngine {
        FakeEngine::default()
            .with_output("mean_ftiss", Image::new([2, 1, 1], 1, vec![40.0, 55.0]).unwrap())
            .with_output("mean_delttiss", Image::new([2, 1, 1], 1, vec![1.5, 1.25]).unwrap())
    }

    #[test]
    fn steps_run_in_order_and_feed_each_other() {
        let tmp = tempfile::tempdir().unwrap();
        let mut wsp = workspace()
            .with_savedir(SaveDir::create(tmp.path()).unwrap())
            .unwrap();
        let engine = engine();
        let registrar = FakeRegistrar::default();
        let tools = Collaborators {
            engine: &engine,
            init: &RestingStateInit,
            registrar: &registrar,
        };

        let out = model_multite(&mut wsp, &tools).unwrap();

        // Registration saw exactly the native perfusion map.
        let seen = registrar.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(&seen[0], out.native.perfusion().unwrap());

        // Every native map was transformed.
        assert_eq!(registrar.applied.borrow().len(), out.native.maps.len());
        assert_eq!(out.transformed.maps["perfusion"].data, vec![1040.0, 1055.0]);
        assert_eq!(out.transformed.maps["arrival"].data, vec![1001.5, 1001.25]);

        let log = wsp.log.captured();
        let order = [
            "Performing multi-TE model fitting",
            "DONE multi-TE decoding",
            "Generating native (ASL) space output",
            "Re-doing registration using perfusion image",
            "Generating structural space output",
            "DONE processing",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|marker| log.find(marker).unwrap_or_else(|| panic!("missing {marker}")))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "log out of order:\n{log}");

        assert!(tmp.path().join("output/native/perfusion.nii").exists());
        assert!(tmp.path().join("output/struc/perfusion.nii").exists());
        assert!(tmp.path().join("reg/asl2struc.mat").exists());
    }

    #[test]
    fn missing_perfusion_stops_before_registration() {
        let mut wsp = workspace();
        let engine = FakeEngine::default();
        let registrar = FakeRegistrar::default();
        let tools = Collaborators {
            engine: &engine,
            init: &RestingStateInit,
            registrar: &registrar,
        };

        let err = model_multite(&mut wsp, &tools).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(registrar.seen.borrow().is_empty());
        assert!(!wsp.log.captured().contains("DONE processing"));
    }

    #[test]
    fn skipped_registration_yields_no_transformed_maps() {
        let mut wsp = workspace();
        let engine = engine();
        let registrar = FakeRegistrar {
            skip: true,
            ..FakeRegistrar::default()
        };
        let tools = Collaborators {
            engine: &engine,
            init: &RestingStateInit,
            registrar: &registrar,
        };

        let out = model_multite(&mut wsp, &tools).unwrap();
        assert!(out.registration.is_none());
        assert!(out.transformed.maps.is_empty());
        assert!(registrar.applied.borrow().is_empty());
        assert!(wsp.log.captured().contains("DONE processing"));
    }
}
