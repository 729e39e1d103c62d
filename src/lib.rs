//! # nbgcode
//!
//! Turns nbgrader notebooks into gradable Python programs: classifies cells
//! by their grading metadata, merges learners' submissions with the source
//! notebook holding the tests, and synthesizes scripts that run every code
//! cell in isolation and report the scores of the test cells.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Environment-derived configuration
pub mod config;
/// A module defining a bunch of constant values to be used throughout
pub mod constants;
/// Program synthesis and the execution context programs report to
pub mod codegen;
/// Notebook documents, merging and batches
pub mod notebook;
/// Subprocess helpers
pub mod process;
/// Python parsing and literal rendering
pub mod python;
/// Utility functions for convenience
pub mod util;

pub use codegen::{NbgCodeGenerator, NotebookContext, NotebookResult};
pub use notebook::{GraderNotebook, MergedNotebook, Submission, Submissions};
