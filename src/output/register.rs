//! Registration of ASL space to the structural image.
//!
//! The perfusion map has much better tissue contrast than raw ASL volumes, so
//! once it exists the ASL -> structural transform is re-estimated from it.

use std::path::PathBuf;

use nalgebra::Matrix4;

use crate::data::image::Image;
use crate::error::AppError;
use crate::io::nifti::{read_nifti, write_nifti};
use crate::workspace::{RunLog, Workspace};

pub const DEFAULT_FLIRT: &str = "flirt";
pub const REG_DIR: &str = "reg";

/// Rigid-body transform from ASL space to structural space (world mm, FLIRT convention).
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub asl2struc: Matrix4<f64>,
}

pub trait Registrar {
    /// Estimate the ASL -> structural transform from a perfusion map.
    /// `None` means there is nothing to register to.
    fn register(&self, perfusion: &Image, log: &mut RunLog) -> Result<Option<Registration>, AppError>;

    /// Resample `image` into structural space.
    fn apply(&self, image: &Image, reg: &Registration, log: &mut RunLog) -> Result<Image, AppError>;
}

/// Re-do the ASL -> structural registration using `perfusion`.
pub fn redo_reg(
    wsp: &mut Workspace,
    registrar: &dyn Registrar,
    perfusion: &Image,
) -> Result<Option<Registration>, AppError> {
    wsp.log.write("\nRe-doing registration using perfusion image\n");
    let reg = registrar.register(perfusion, &mut wsp.log)?;
    match &reg {
        Some(reg) => {
            if let Some(save) = &wsp.savedir {
                save.set_item(REG_DIR, "asl2struc.mat", &format_matrix(&reg.asl2struc))?;
            }
            wsp.log.write("  - DONE\n");
        }
        None => wsp.log.write("  - No structural image, registration skipped\n"),
    }
    Ok(reg)
}

/// Parse a FLIRT `.mat` file: 16 whitespace-separated numbers, row-major.
pub fn parse_matrix(text: &str) -> Result<Matrix4<f64>, AppError> {
    let values: Result<Vec<f64>, _> = text.split_whitespace().map(str::parse::<f64>).collect();
    let values = values.map_err(|e| AppError::tool(format!("Invalid transform matrix: {e}")))?;
    if values.len() != 16 {
        return Err(AppError::tool(format!(
            "Transform matrix has {} values, expected 16",
            values.len()
        )));
    }
    let matrix = Matrix4::from_row_slice(&values);
    if matrix.determinant().abs() < 1e-9 {
        return Err(AppError::data("Registration produced a singular transform"));
    }
    Ok(matrix)
}

pub fn format_matrix(matrix: &Matrix4<f64>) -> String {
    let mut out = String::new();
    for row in matrix.row_iter() {
        let parts: Vec<String> = row.iter().map(|v| format!("{v:.6}")).collect();
        out.push_str(&parts.join("  "));
        out.push('\n');
    }
    out
}

/// Registration with FSL FLIRT (6 DOF) against a structural image.
#[derive(Debug, Clone)]
pub struct FlirtRegistrar {
    pub executable: PathBuf,
    pub struc: Option<PathBuf>,
}

impl FlirtRegistrar {
    pub fn new(executable: impl Into<PathBuf>, struc: Option<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            struc,
        }
    }

    fn scratch() -> Result<tempfile::TempDir, AppError> {
        tempfile::Builder::new()
            .prefix("asl_multite_reg_")
            .tempdir()
            .map_err(|e| AppError::tool(format!("Failed to create registration work dir: {e}")))
    }

    fn run(&self, args: Vec<String>, log: &mut RunLog) -> Result<(), AppError> {
        crate::tools::run_tool(&self.executable, &args, &[("FSLOUTPUTTYPE", "NIFTI")], log)
    }
}

impl Registrar for FlirtRegistrar {
    fn register(&self, perfusion: &Image, log: &mut RunLog) -> Result<Option<Registration>, AppError> {
        let Some(struc) = &self.struc else {
            return Ok(None);
        };
        let work = Self::scratch()?;
        let input = work.path().join("perfusion.nii");
        let mat = work.path().join("asl2struc.mat");
        write_nifti(&input, perfusion)?;

        self.run(
            vec![
                "-in".into(),
                input.display().to_string(),
                "-ref".into(),
                struc.display().to_string(),
                "-omat".into(),
                mat.display().to_string(),
                "-dof".into(),
                "6".into(),
            ],
            log,
        )?;

        let text = std::fs::read_to_string(&mat)
            .map_err(|e| AppError::tool(format!("Registration produced no matrix: {e}")))?;
        Ok(Some(Registration {
            asl2struc: parse_matrix(&text)?,
        }))
    }

    fn apply(&self, image: &Image, reg: &Registration, log: &mut RunLog) -> Result<Image, AppError> {
        let struc = self
            .struc
            .as_ref()
            .ok_or_else(|| AppError::config("A structural image is required to apply a registration"))?;
        let work = Self::scratch()?;
        let input = work.path().join("in.nii");
        let mat = work.path().join("asl2struc.mat");
        let output = work.path().join("out.nii");
        write_nifti(&input, image)?;
        std::fs::write(&mat, format_matrix(&reg.asl2struc))
            .map_err(|e| AppError::tool(format!("Failed to write transform matrix: {e}")))?;

        self.run(
            vec![
                "-in".into(),
                input.display().to_string(),
                "-ref".into(),
                struc.display().to_string(),
                "-applyxfm".into(),
                "-init".into(),
                mat.display().to_string(),
                "-out".into(),
                output.display().to_string(),
            ],
            log,
        )?;
        read_nifti(&output).map_err(|e| AppError::tool(e.message()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;

    use super::*;

    /// Registrar double: records the perfusion map it saw and applies a
    /// constant offset so transformed maps are distinguishable.
    #[derive(Default)]
    pub struct FakeRegistrar {
        pub skip: bool,
        pub seen: RefCell<Vec<Image>>,
        pub applied: RefCell<Vec<String>>,
    }

    impl Registrar for FakeRegistrar {
        fn register(&self, perfusion: &Image, _log: &mut RunLog) -> Result<Option<Registration>, AppError> {
            self.seen.borrow_mut().push(perfusion.clone());
            if self.skip {
                return Ok(None);
            }
            Ok(Some(Registration {
                asl2struc: Matrix4::identity(),
            }))
        }

        fn apply(&self, image: &Image, _reg: &Registration, _log: &mut RunLog) -> Result<Image, AppError> {
            self.applied.borrow_mut().push(image.shape_label());
            let data = image.data.iter().map(|v| v + 1000.0).collect();
            image.with_volumes(image.nvols, data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_matrix_reads_flirt_format() {
        let text = "1  0  0  2.5\n0  1  0  -1\n0  0  1  0\n0  0  0  1\n";
        let m = parse_matrix(text).unwrap();
        assert_eq!(m[(0, 3)], 2.5);
        assert_eq!(m[(1, 3)], -1.0);
        assert_eq!(parse_matrix(&format_matrix(&m)).unwrap(), m);
    }

    #[test]
    fn parse_matrix_rejects_bad_input() {
        assert_eq!(parse_matrix("1 2 3").unwrap_err().exit_code(), 4);
        assert_eq!(parse_matrix("1 x 0 0").unwrap_err().exit_code(), 4);
        let singular = "0 0 0 0\n0 0 0 0\n0 0 0 0\n0 0 0 1\n";
        assert_eq!(parse_matrix(singular).unwrap_err().exit_code(), 3);
    }

    #[test]
    fn flirt_without_structural_skips() {
        let reg = FlirtRegistrar::new("/nonexistent/flirt", None);
        let mut log = RunLog::capture();
        let perf = Image::new([1, 1, 1], 1, vec![1.0]).unwrap();
        assert!(reg.register(&perf, &mut log).unwrap().is_none());
    }
}
