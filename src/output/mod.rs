//! Writing fit results: native-space maps, re-registration, structural-space maps.

pub mod native;
pub mod register;
pub mod transform;

pub use native::*;
pub use register::*;
pub use transform::*;
