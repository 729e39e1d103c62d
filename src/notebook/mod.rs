//! Notebook documents: cells and their grading roles, loading and indexing,
//! merging submissions with their source, and batches of submissions.

/// Submissions of one assignment processed together.
pub mod batch;
/// Cells and nbgrader grading metadata.
pub mod cell;
/// Loaded, indexed notebooks.
pub mod document;
/// Load errors.
pub mod error;
/// Merging a submission with its source notebook.
pub mod merge;

pub use batch::{BatchOutcome, Submissions};
pub use cell::{Cell, CellKind, CellRole, GradingBlock, GradingMetadata};
pub use document::{GraderNotebook, NotebookSource};
pub use error::NotebookError;
pub use merge::{MergeFailure, MergedNotebook, Submission};
