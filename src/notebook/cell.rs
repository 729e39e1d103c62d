#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Notebook cells and the nbgrader grading metadata attached to them.

use std::fmt::Display;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::constants::NBGRADER_METADATA_KEY;

/// Declared type of a notebook cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CellKind {
    /// Executable code.
    Code,
    /// Markdown prose.
    Markdown,
    /// Raw, unrendered text.
    Raw,
    /// Anything else a frontend chose to write.
    Other(String),
}

impl From<String> for CellKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "code" => CellKind::Code,
            "markdown" => CellKind::Markdown,
            "raw" => CellKind::Raw,
            _ => CellKind::Other(value),
        }
    }
}

impl From<CellKind> for String {
    fn from(value: CellKind) -> Self {
        value.to_string()
    }
}

impl Display for CellKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellKind::Code => write!(f, "code"),
            CellKind::Markdown => write!(f, "markdown"),
            CellKind::Raw => write!(f, "raw"),
            CellKind::Other(other) => write!(f, "{other}"),
        }
    }
}

/// Grading role of a cell, derived from its nbgrader flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellRole {
    /// Learner's answer, scored by test cells.
    AutogradedAnswer,
    /// Tests that print or assert the points a learner earned.
    AutogradedTests,
    /// Learner's answer, scored by a human.
    ManuallyGradedAnswer,
    /// Free-form task, scored by a human.
    ManuallyGradedTask,
    /// Locked cell that learners must not edit.
    ReadOnly,
}

impl CellRole {
    /// Derives the role from the four nbgrader flags.
    ///
    /// Returns `None` when the combination carries no grading intent; this is
    /// an expected outcome, not an error.
    pub fn classify(grade: bool, solution: bool, locked: bool, task: bool) -> Option<Self> {
        match (grade, solution, task) {
            (false, true, false) => Some(CellRole::AutogradedAnswer),
            (true, false, false) => Some(CellRole::AutogradedTests),
            (true, true, false) => Some(CellRole::ManuallyGradedAnswer),
            (false, false, true) => Some(CellRole::ManuallyGradedTask),
            (false, false, false) if locked => Some(CellRole::ReadOnly),
            _ => None,
        }
    }

    /// Human readable label, as nbgrader's UI shows it.
    pub fn label(&self) -> &'static str {
        match self {
            CellRole::AutogradedAnswer => "Autograded answer",
            CellRole::AutogradedTests => "Autograded tests",
            CellRole::ManuallyGradedAnswer => "Manually graded answer",
            CellRole::ManuallyGradedTask => "Manually graded task",
            CellRole::ReadOnly => "Read-only",
        }
    }
}

impl Display for CellRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// nbgrader metadata block of a cell.
///
/// See <https://nbgrader.readthedocs.io/en/stable/contributor_guide/metadata.html>.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GradingMetadata {
    /// Version of the metadata schema.
    schema_version: u32,
    /// Whether the cell is graded.
    grade:          bool,
    /// Identifier shared by the source, release and submission copies of a
    /// cell.
    grade_id:       String,
    /// Whether the cell holds a solution.
    solution:       bool,
    /// Whether the cell is locked against edits.
    locked:         bool,
    /// Maximum achievable points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    points:         Option<f64>,
    /// Checksum nbgrader uses to detect edits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum:       Option<String>,
    /// Provenance tag stamped during a merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    notebook:       Option<Value>,
    /// Legacy free-form type field (schema v2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cell_type:      Option<String>,
    /// Whether the cell is a manually graded task (schema v3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    task:           Option<bool>,
}

impl GradingMetadata {
    /// Returns the role these flags describe, if any.
    pub fn role(&self) -> Option<CellRole> {
        CellRole::classify(self.grade, self.solution, self.locked, self.task.unwrap_or(false))
    }

    /// Returns the grade id.
    pub fn grade_id(&self) -> &str {
        &self.grade_id
    }

    /// Returns the maximum achievable points, if declared.
    pub fn points(&self) -> Option<f64> {
        self.points
    }

    /// Whether the cell is graded.
    pub fn grade(&self) -> bool {
        self.grade
    }

    /// Whether the cell holds a solution.
    pub fn solution(&self) -> bool {
        self.solution
    }

    /// Whether the cell is locked.
    pub fn locked(&self) -> bool {
        self.locked
    }

    /// Whether the cell is a task cell.
    pub fn task(&self) -> bool {
        self.task.unwrap_or(false)
    }

    /// Returns the provenance tag, if stamped.
    pub fn notebook(&self) -> Option<&Value> {
        self.notebook.as_ref()
    }

    /// Returns the schema version.
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// A minimal block that keeps the role of `self` but carries nothing a
    /// learner could have changed.
    pub fn stub(&self) -> Self {
        Self {
            schema_version: self.schema_version,
            grade:          self.grade,
            grade_id:       self.grade_id.clone(),
            solution:       self.solution,
            locked:         self.locked,
            points:         self.points,
            checksum:       None,
            notebook:       None,
            cell_type:      self.cell_type.clone(),
            task:           self.task,
        }
    }
}

/// Outcome of reading the grading block of a cell.
#[derive(Debug, Clone, PartialEq)]
pub enum GradingBlock {
    /// A well-formed block.
    Valid(GradingMetadata),
    /// A block was present but had the wrong shape; carries the reason.
    Invalid(String),
    /// No block, or not a code cell.
    Absent,
}

impl GradingBlock {
    /// Reads the grading block of `cell`.
    ///
    /// Only code cells can carry one; malformed blocks become
    /// [`GradingBlock::Invalid`] instead of an error.
    pub fn from_cell(cell: &Cell) -> Self {
        if cell.cell_type != CellKind::Code {
            return GradingBlock::Absent;
        }
        match cell.metadata.get(NBGRADER_METADATA_KEY) {
            None => GradingBlock::Absent,
            Some(raw) => match GradingMetadata::deserialize(raw) {
                Ok(metadata) => GradingBlock::Valid(metadata),
                Err(err) => GradingBlock::Invalid(err.to_string()),
            },
        }
    }

    /// Returns the metadata of a valid block; invalid and absent blocks both
    /// read as "no grading metadata".
    pub fn into_metadata(self) -> Option<GradingMetadata> {
        match self {
            GradingBlock::Valid(metadata) => Some(metadata),
            GradingBlock::Invalid(_) | GradingBlock::Absent => None,
        }
    }
}

/// Accepts nbformat sources written either as a list of lines or as one
/// string.
fn lines_or_text<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    /// The two legal shapes of a cell source.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Source {
        /// One string per line, each keeping its newline.
        Lines(Vec<String>),
        /// The whole source in one string.
        Text(String),
    }

    Ok(match Option::<Source>::deserialize(deserializer)? {
        Some(Source::Lines(lines)) => lines,
        Some(Source::Text(text)) => text.split_inclusive('\n').map(str::to_owned).collect(),
        None => Vec::new(),
    })
}

/// One cell of a Jupyter notebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Declared cell type.
    cell_type:       CellKind,
    /// Identifier, unique within one notebook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id:              Option<String>,
    /// Untyped metadata, possibly holding an nbgrader block.
    #[serde(default)]
    metadata:        Map<String, Value>,
    /// Source lines; concatenation order matters.
    #[serde(default, deserialize_with = "lines_or_text")]
    source:          Vec<String>,
    /// Execution counter the frontend recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    execution_count: Option<Value>,
    /// Recorded outputs, kept but never interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    outputs:         Option<Vec<Value>>,
    /// Attachments, kept but never interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attachments:     Option<Value>,
}

impl Cell {
    /// Creates a code cell from its parts.
    pub fn code(
        id: Option<String>,
        source: Vec<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            cell_type: CellKind::Code,
            id,
            metadata,
            source,
            execution_count: None,
            outputs: Some(Vec::new()),
            attachments: None,
        }
    }

    /// Creates an empty code cell that carries `grading` as its only
    /// metadata. Used in place of an answer missing from a submission.
    pub fn placeholder(id: Option<String>, grading: &GradingMetadata) -> Self {
        let mut metadata = Map::new();
        // A GradingMetadata always serializes to a JSON object.
        if let Ok(block) = serde_json::to_value(grading.stub()) {
            metadata.insert(NBGRADER_METADATA_KEY.to_string(), block);
        }
        Self::code(id, Vec::new(), metadata)
    }

    /// Returns the declared cell type.
    pub fn kind(&self) -> &CellKind {
        &self.cell_type
    }

    /// Whether this is a code cell.
    pub fn is_code(&self) -> bool {
        self.cell_type == CellKind::Code
    }

    /// Returns the cell id, if any.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Returns the raw metadata mapping.
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Returns the source lines.
    pub fn source(&self) -> &[String] {
        &self.source
    }

    /// Returns the concatenated source.
    pub fn source_text(&self) -> String {
        self.source.concat()
    }

    /// Reads the grading block of this cell.
    pub fn grading(&self) -> GradingBlock {
        GradingBlock::from_cell(self)
    }

    /// Returns the grading metadata if the cell is a code cell with a
    /// well-formed nbgrader block.
    pub fn grading_metadata(&self) -> Option<GradingMetadata> {
        self.grading().into_metadata()
    }

    /// Returns the grading role, if the cell has one.
    pub fn role(&self) -> Option<CellRole> {
        self.grading_metadata().and_then(|m| m.role())
    }

    /// Stamps `notebook` as the provenance of the grading block, if the cell
    /// has one.
    pub(crate) fn stamp_provenance(&mut self, notebook: &str) {
        if let Some(Value::Object(block)) = self.metadata.get_mut(NBGRADER_METADATA_KEY) {
            block.insert("notebook".to_string(), Value::String(notebook.to_string()));
        }
    }

    /// Snapshot of everything but the code: `source` and `outputs` are
    /// dropped, and so is the merge provenance, so the snapshot only changes
    /// when the cell's identity or grading does.
    pub fn snapshot(&self) -> Value {
        let mut snapshot = Map::new();
        snapshot.insert("cell_type".to_string(), Value::String(self.cell_type.to_string()));
        if let Some(id) = &self.id {
            snapshot.insert("id".to_string(), Value::String(id.clone()));
        }

        let mut metadata = self.metadata.clone();
        if let Some(Value::Object(block)) = metadata.get_mut(NBGRADER_METADATA_KEY) {
            block.remove("notebook");
        }
        snapshot.insert("metadata".to_string(), Value::Object(metadata));

        if let Some(count) = &self.execution_count {
            snapshot.insert("execution_count".to_string(), count.clone());
        }
        if let Some(attachments) = &self.attachments {
            snapshot.insert("attachments".to_string(), attachments.clone());
        }
        Value::Object(snapshot)
    }
}
