//! Report assembly: observation + photo + identity -> signed report.

pub mod assembler;

pub use assembler::{AssembleError, Observation, ReportAssembler, format_ts};
