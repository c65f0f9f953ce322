//! Input/output helpers.
//!
//! - NIfTI-1 read/write (`nifti`)
//! - engine options files (`optfile`)

pub mod nifti;
pub mod optfile;

pub use nifti::*;
pub use optfile::*;
