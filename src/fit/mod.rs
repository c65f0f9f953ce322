//! Model fitting orchestration.
//!
//! Responsibilities:
//!
//! - assemble engine options from layered defaults, dataset timings, constants and overrides
//! - run the external inference engine and collect its outputs
//! - optional resting-state initialisation
//! - the multi-TE fit itself (`fit_multite`)

pub mod engine;
pub mod init;
pub mod multite;
pub mod options;

pub use engine::*;
pub use init::*;
pub use multite::*;
pub use options::*;
