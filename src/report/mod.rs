//! Reporting: terminal summaries and the JSON run summary.

pub mod format;
pub mod summary;

pub use format::*;
pub use summary::*;
