//! In-memory image volumes.

use crate::error::AppError;

/// Identity sform rows (voxel index == mm).
pub const IDENTITY_AFFINE: [[f32; 4]; 3] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
];

/// A 3D grid with one or more volumes.
///
/// Voxel data is stored volume-major (`data[vol * nvox + vox]`), with `x`
/// varying fastest inside a volume. This is the NIfTI on-disk layout, so
/// reading and writing never transposes.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub dims: [usize; 3],
    pub nvols: usize,
    pub voxel_size: [f32; 3],
    /// First three rows of the voxel-to-world affine.
    pub affine: [[f32; 4]; 3],
    pub data: Vec<f32>,
}

impl Image {
    pub fn new(dims: [usize; 3], nvols: usize, data: Vec<f32>) -> Result<Self, AppError> {
        let nvox = dims.iter().product::<usize>();
        if nvols == 0 || nvox == 0 {
            return Err(AppError::data(format!(
                "Image must have at least one voxel and one volume (dims={dims:?}, nvols={nvols})"
            )));
        }
        if data.len() != nvox * nvols {
            return Err(AppError::data(format!(
                "Image data length {} does not match {}x{}x{}x{}",
                data.len(),
                dims[0],
                dims[1],
                dims[2],
                nvols
            )));
        }
        Ok(Self {
            dims,
            nvols,
            voxel_size: [1.0, 1.0, 1.0],
            affine: IDENTITY_AFFINE,
            data,
        })
    }

    /// Single-volume image filled with `value` on the same grid as `self`.
    pub fn filled_like(&self, value: f32) -> Self {
        Self {
            dims: self.dims,
            nvols: 1,
            voxel_size: self.voxel_size,
            affine: self.affine,
            data: vec![value; self.nvox()],
        }
    }

    /// New image on the same grid as `self` with different volume data.
    pub fn with_volumes(&self, nvols: usize, data: Vec<f32>) -> Result<Self, AppError> {
        let mut out = Self::new(self.dims, nvols, data)?;
        out.voxel_size = self.voxel_size;
        out.affine = self.affine;
        Ok(out)
    }

    pub fn nvox(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn volume(&self, idx: usize) -> &[f32] {
        let nvox = self.nvox();
        &self.data[idx * nvox..(idx + 1) * nvox]
    }

    pub fn same_grid(&self, other: &Image) -> bool {
        self.dims == other.dims
    }

    /// Short description used in logs and reports, e.g. `64x64x20x48`.
    pub fn shape_label(&self) -> String {
        format!(
            "{}x{}x{}x{}",
            self.dims[0], self.dims[1], self.dims[2], self.nvols
        )
    }
}
