#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Merges a learner's submission with the source notebook of its assignment:
//! answers come from the submission, tests and everything locked come from
//! the source.

use std::{fmt::Display, path::PathBuf};

use super::{
    cell::{Cell, CellRole, GradingMetadata},
    document::{GraderNotebook, NotebookSource},
};

/// An answer cell of the source notebook that the submission lacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeFailure {
    /// Grade id of the missing answer.
    grade_id:   String,
    /// Name of the submission it is missing from.
    submission: String,
}

impl MergeFailure {
    /// Returns the grade id of the missing answer.
    pub fn grade_id(&self) -> &str {
        &self.grade_id
    }

    /// Returns the name of the submission.
    pub fn submission(&self) -> &str {
        &self.submission
    }
}

impl Display for MergeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "couldn't merge solution code cell {} of {}", self.grade_id, self.submission)
    }
}

/// Result of a merge: a new notebook plus the answers that had to be
/// replaced by placeholders.
#[derive(Debug, Clone)]
pub struct MergedNotebook {
    /// The merged notebook, named after the submission.
    notebook: GraderNotebook,
    /// Answers missing from the submission.
    failures: Vec<MergeFailure>,
}

impl MergedNotebook {
    /// Returns the merged notebook.
    pub fn notebook(&self) -> &GraderNotebook {
        &self.notebook
    }

    /// Consumes the merge result, returning the notebook.
    pub fn into_notebook(self) -> GraderNotebook {
        self.notebook
    }

    /// Returns the answers that were missing from the submission.
    pub fn failures(&self) -> &[MergeFailure] {
        &self.failures
    }
}

/// A learner's copy of an assignment notebook.
#[derive(Debug, Clone)]
pub struct Submission {
    /// The submitted notebook.
    notebook: GraderNotebook,
}

impl From<GraderNotebook> for Submission {
    fn from(notebook: GraderNotebook) -> Self {
        Self { notebook }
    }
}

impl Submission {
    /// Loads the submission at `path`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        GraderNotebook::from_path(path).into()
    }

    /// Loads a submission from JSON bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, name: impl Into<String>) -> Self {
        GraderNotebook::new(NotebookSource::Bytes(bytes.into()), Some(name.into())).into()
    }

    /// Returns the submitted notebook.
    pub fn notebook(&self) -> &GraderNotebook {
        &self.notebook
    }

    /// Returns the submission's name.
    pub fn name(&self) -> &str {
        self.notebook.name()
    }

    /// Merges this submission with `source`, the notebook holding the
    /// reference tests.
    ///
    /// Walks the source in order. Autograded answers are taken from the
    /// submission, or replaced by an empty placeholder when missing; every
    /// other graded cell is taken from the source. Cells without a grading
    /// role are also replayed from the source unless `only_merge_answers` is
    /// set, in which case the submission's own copies stay. Each taken cell
    /// replaces the submission cell with the same grade id (or id); cells
    /// the submission lacks are inserted after the previously taken one.
    /// Source cells flagged as solutions but carrying no usable role are
    /// never copied, so reference solutions cannot replace the learner's
    /// code.
    ///
    /// Neither input is modified.
    pub fn merge_code(&self, source: &GraderNotebook, only_merge_answers: bool) -> MergedNotebook {
        let span = tracing::info_span!(
            "merge",
            submission = %self.name(),
            source = %source.name()
        );
        let _guard = span.enter();

        let submission = &self.notebook;
        let mut slots: Vec<Slot> = submission
            .cells()
            .iter()
            .cloned()
            .map(|cell| Slot {
                cell,
                taken: false,
            })
            .collect();
        let mut failures = Vec::new();
        let mut anchor: Option<usize> = None;

        for source_cell in source.cells() {
            let grading = source_cell.grading_metadata();
            let role = grading
                .as_ref()
                .filter(|m| !m.grade_id().is_empty())
                .and_then(GradingMetadata::role);

            let replacement = match (grading.as_ref(), role) {
                (Some(metadata), Some(CellRole::AutogradedAnswer)) => {
                    let mut answer = match self.answer_for(source_cell, metadata.grade_id()) {
                        Some(answer) => answer,
                        None => {
                            let failure = MergeFailure {
                                grade_id:   metadata.grade_id().to_string(),
                                submission: self.name().to_string(),
                            };
                            tracing::warn!(notebook = %self.name(), "{failure}");
                            failures.push(failure);
                            Cell::placeholder(source_cell.id().map(str::to_owned), metadata)
                        }
                    };
                    answer.stamp_provenance(self.name());
                    answer
                }
                (Some(_), Some(_)) => {
                    let mut cell = source_cell.clone();
                    cell.stamp_provenance(source.name());
                    cell
                }
                (Some(metadata), None) if metadata.solution() => {
                    tracing::warn!(
                        notebook = %self.name(),
                        "Keeping the submission's copy of solution cell {:?}",
                        metadata.grade_id()
                    );
                    continue;
                }
                _ if !only_merge_answers => {
                    let mut cell = source_cell.clone();
                    cell.stamp_provenance(source.name());
                    cell
                }
                _ => continue,
            };

            let at = match find_slot(&slots, source_cell) {
                Some(at) => {
                    slots[at] = Slot {
                        cell:  replacement,
                        taken: true,
                    };
                    at
                }
                None => {
                    let at = anchor.map_or(0, |a| a + 1);
                    slots.insert(
                        at,
                        Slot {
                            cell:  replacement,
                            taken: true,
                        },
                    );
                    at
                }
            };
            anchor = Some(at);
        }

        let cells = slots.into_iter().map(|slot| slot.cell).collect();
        MergedNotebook {
            notebook: GraderNotebook::from_cells(
                submission.name(),
                submission.document().clone(),
                cells,
            ),
            failures,
        }
    }

    /// Finds the submission's answer to `source_cell`: the cell with the same
    /// id and grade id, else the cell with the same grade id, else the code
    /// cell with the same id carrying the source's grading metadata.
    fn answer_for(&self, source_cell: &Cell, grade_id: &str) -> Option<Cell> {
        let same_id = source_cell.id().and_then(|id| self.notebook.code_cell(id));
        if let Some(answer) = same_id.filter(|cell| {
            cell.grading_metadata()
                .is_some_and(|m| m.grade_id() == grade_id)
        }) {
            return Some(answer.clone());
        }
        if let Some(answer) = self.notebook.graded_cell(grade_id) {
            return Some(answer.clone());
        }
        same_id.map(|answer| {
            Cell::code(
                answer.id().map(str::to_owned),
                answer.source().to_vec(),
                source_cell.metadata().clone(),
            )
        })
    }
}

/// A position in the merged cell sequence.
struct Slot {
    /// The cell at this position.
    cell:  Cell,
    /// Whether the merge already put a cell here.
    taken: bool,
}

/// Position of the untaken slot that corresponds to `wanted`: same grade id
/// if it has one, otherwise same cell id.
fn find_slot(slots: &[Slot], wanted: &Cell) -> Option<usize> {
    if let Some(metadata) = wanted.grading_metadata()
        && let Some(at) = slots.iter().position(|slot| {
            !slot.taken
                && slot
                    .cell
                    .grading_metadata()
                    .is_some_and(|m| m.grade_id() == metadata.grade_id())
        })
    {
        return Some(at);
    }

    let id = wanted.id()?;
    slots
        .iter()
        .position(|slot| !slot.taken && slot.cell.id() == Some(id))
}
