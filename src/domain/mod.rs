//! Core domain models.

pub mod run;

pub use run::{JobRun, STATUS_ERROR, STATUS_OK};
