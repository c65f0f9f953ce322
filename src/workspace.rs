//! Processing context shared by the pipeline steps.
//!
//! `Workspace` holds the inputs (dataset, mask, configuration) and the two
//! sinks every step may use: the run log and the optional save directory.
//! Step results are not stored here; each step returns its own struct.

use std::fs::{File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::data::asldata::AslImage;
use crate::data::image::Image;
use crate::domain::MultiTeConfig;
use crate::error::AppError;

pub struct Workspace {
    pub asldata: AslImage,
    /// Analysis mask; `None` means every voxel.
    pub mask: Option<Image>,
    pub config: MultiTeConfig,
    pub savedir: Option<SaveDir>,
    pub log: RunLog,
}

impl Workspace {
    pub fn new(asldata: AslImage, config: MultiTeConfig) -> Self {
        Self {
            asldata,
            mask: None,
            config,
            savedir: None,
            log: RunLog::stdout(),
        }
    }

    pub fn with_mask(mut self, mask: Image) -> Result<Self, AppError> {
        if !mask.same_grid(&self.asldata.image) {
            return Err(AppError::data(format!(
                "Mask grid {:?} does not match ASL data grid {:?}",
                mask.dims, self.asldata.image.dims
            )));
        }
        self.mask = Some(mask);
        Ok(self)
    }

    /// Persist outputs under `savedir`; the run log is mirrored to `<savedir>/logfile`.
    pub fn with_savedir(mut self, savedir: SaveDir) -> Result<Self, AppError> {
        self.log.attach_file(&savedir.path().join("logfile"))?;
        self.savedir = Some(savedir);
        Ok(self)
    }

    pub fn with_log(mut self, log: RunLog) -> Self {
        self.log = log;
        self
    }

    /// The analysis mask, or an all-ones mask on the data grid.
    pub fn mask_or_all(&self) -> Image {
        self.mask
            .clone()
            .unwrap_or_else(|| self.asldata.image.filled_like(1.0))
    }
}

/// User-facing progress log.
pub struct RunLog {
    echo: bool,
    file: Option<BufWriter<File>>,
    captured: Option<String>,
}

impl RunLog {
    pub fn stdout() -> Self {
        Self {
            echo: true,
            file: None,
            captured: None,
        }
    }

    /// Silent log that keeps everything written in memory.
    pub fn capture() -> Self {
        Self {
            echo: false,
            file: None,
            captured: Some(String::new()),
        }
    }

    pub fn attach_file(&mut self, path: &Path) -> Result<(), AppError> {
        let file = File::create(path)
            .map_err(|e| AppError::config(format!("Failed to create log '{}': {e}", path.display())))?;
        self.file = Some(BufWriter::new(file));
        Ok(())
    }

    pub fn write(&mut self, text: &str) {
        if self.echo {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        let failed = match &mut self.file {
            Some(file) => file.write_all(text.as_bytes()).and_then(|_| file.flush()).err(),
            None => None,
        };
        if let Some(e) = failed {
            tracing::warn!("failed to write run log: {e}");
            self.file = None;
        }
        if let Some(buf) = &mut self.captured {
            buf.push_str(text);
        }
    }

    pub fn captured(&self) -> &str {
        self.captured.as_deref().unwrap_or("")
    }
}

/// Directory where named artifacts are persisted.
///
/// Artifacts live under a namespace path mirroring the step that produced
/// them, e.g. `multite/finalstep/logfile` or `output/native/perfusion.nii`.
#[derive(Debug, Clone)]
pub struct SaveDir {
    root: PathBuf,
}

impl SaveDir {
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, AppError> {
        let root = root.into();
        create_dir_all(&root).map_err(|e| {
            AppError::config(format!("Failed to create output dir '{}': {e}", root.display()))
        })?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, namespace: &str) -> Result<PathBuf, AppError> {
        let dir = self.root.join(namespace);
        create_dir_all(&dir).map_err(|e| {
            AppError::config(format!("Failed to create output dir '{}': {e}", dir.display()))
        })?;
        Ok(dir)
    }

    /// Persist a text artifact as `<namespace>/<name>`.
    pub fn set_item(&self, namespace: &str, name: &str, contents: &str) -> Result<PathBuf, AppError> {
        let path = self.dir(namespace)?.join(name);
        std::fs::write(&path, contents)
            .map_err(|e| AppError::config(format!("Failed to write '{}': {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "saved item");
        Ok(path)
    }

    /// Persist an image as `<namespace>/<name>.nii`.
    pub fn save_image(&self, namespace: &str, name: &str, image: &Image) -> Result<PathBuf, AppError> {
        let path = self.dir(namespace)?.join(format!("{name}.nii"));
        crate::io::nifti::write_nifti(&path, image)?;
        Ok(path)
    }
}
