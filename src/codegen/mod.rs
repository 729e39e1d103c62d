//! Synthesis of runnable Python programs from notebooks, and the execution
//! context those programs report to.

/// Per-cell capture, exception policy and scoring.
pub mod context;
/// Notebook to program synthesis.
pub mod generator;
/// Running synthesized programs.
pub mod runner;

pub use context::{CaptureSink, CellError, CellScope, NotebookContext, NotebookResult, TestResult};
pub use generator::NbgCodeGenerator;
pub use runner::run_program;
