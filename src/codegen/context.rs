#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Per-cell output capture, exception policy and score bookkeeping for one
//! executed notebook.
//!
//! A [`NotebookContext`] is entered once per cell. Entering resets its
//! [`CaptureSink`]; exiting reads the captured text back, re-emits it when
//! asked to, applies the exception policy and, for autograded test cells,
//! records the score printed on the last line.

use std::{fs::OpenOptions, path::Path};

use anyhow::{Context, Result};
use bon::Builder;
use serde::{
    Deserialize, Serialize, Serializer,
    ser::SerializeMap,
};
use serde_json::Value;
use thiserror::Error;

use crate::notebook::cell::{Cell, CellRole};

/// A cell body raised and the context does not suppress exceptions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cell {cell} of {notebook} raised: {message}")]
pub struct CellError {
    /// Notebook being executed.
    notebook: String,
    /// Label of the failing cell: grade id, id, or `<unknown>`.
    cell:     String,
    /// What the cell raised.
    message:  String,
}

impl CellError {
    /// Returns the label of the failing cell.
    pub fn cell(&self) -> &str {
        &self.cell
    }

    /// Returns the raised message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Buffer receiving everything a cell writes while its scope is open.
#[derive(Debug, Default, Clone)]
pub struct CaptureSink {
    /// Captured text.
    buffer: String,
}

impl CaptureSink {
    /// Discards everything captured so far.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Returns what was captured so far.
    pub fn contents(&self) -> &str {
        &self.buffer
    }

    /// Appends `text`.
    pub fn push_str(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    /// Returns the captured text, leaving the sink empty.
    fn take(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }
}

impl std::fmt::Write for CaptureSink {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        self.buffer.push_str(s);
        Ok(())
    }
}

/// Outcome of one autograded test cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Grade id of the test cell.
    grade_id:   String,
    /// Points the cell is worth.
    max_points: Option<f64>,
    /// Points earned; absent when the output did not end in a number.
    points:     Option<f64>,
}

impl TestResult {
    /// Returns the grade id.
    pub fn grade_id(&self) -> &str {
        &self.grade_id
    }

    /// Returns the points the cell is worth.
    pub fn max_points(&self) -> Option<f64> {
        self.max_points
    }

    /// Returns the points earned.
    pub fn points(&self) -> Option<f64> {
        self.points
    }
}

impl std::fmt::Display for TestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        /// Formats an optional number the way the synthesized program does.
        fn show(value: Option<f64>) -> String {
            value.map_or_else(|| "None".to_string(), |v| format!("{v:?}"))
        }
        write!(
            f,
            "NbgCellTestResult(grade_id='{}', max_points={}, points={})",
            self.grade_id,
            show(self.max_points),
            show(self.points)
        )
    }
}

/// Aggregate over one executed notebook: one line of the results file.
///
/// Serializes flat: `{"notebook": .., "total": .., "<grade_id>": ..}`.
#[derive(Debug, Clone, PartialEq)]
pub struct NotebookResult {
    /// Notebook name.
    notebook: String,
    /// Sum of all present scores.
    total:    f64,
    /// Score per test grade id, in the order the tests ran.
    scores:   Vec<(String, Option<f64>)>,
}

impl NotebookResult {
    /// Returns the notebook name.
    pub fn notebook(&self) -> &str {
        &self.notebook
    }

    /// Returns the sum of all present scores.
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Returns the score recorded for `grade_id`. The outer `None` means no
    /// such test ran; the inner one means its score was absent.
    pub fn score(&self, grade_id: &str) -> Option<Option<f64>> {
        self.scores
            .iter()
            .find(|(id, _)| id == grade_id)
            .map(|(_, points)| *points)
    }

    /// Returns every recorded score, in the order the tests ran.
    pub fn scores(&self) -> &[(String, Option<f64>)] {
        &self.scores
    }

    /// Reads every record of a line-delimited results file.
    pub fn read_all(path: &Path) -> Result<Vec<Self>> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read results from {}", path.display()))?;

        text.lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(index, line)| {
                let value: Value = serde_json::from_str(line).with_context(|| {
                    format!("Record {} of {} is not JSON", index + 1, path.display())
                })?;
                Self::from_value(&value).with_context(|| {
                    format!("Record {} of {} is not a notebook result", index + 1, path.display())
                })
            })
            .collect()
    }

    /// Reads a record from its flat JSON form.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let notebook = map.get("notebook")?.as_str()?.to_string();
        let total = map.get("total").and_then(Value::as_f64).unwrap_or_default();
        let scores = map
            .iter()
            .filter(|(key, _)| key.as_str() != "notebook" && key.as_str() != "total")
            .map(|(key, points)| (key.clone(), points.as_f64()))
            .collect();

        Some(Self {
            notebook,
            total,
            scores,
        })
    }
}

impl Serialize for NotebookResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.scores.len() + 2))?;
        map.serialize_entry("notebook", &self.notebook)?;
        map.serialize_entry("total", &self.total)?;
        for (grade_id, points) in &self.scores {
            map.serialize_entry(grade_id, points)?;
        }
        map.end()
    }
}

/// Scope manager for the cells of one notebook run.
#[derive(Debug, Builder)]
pub struct NotebookContext {
    /// Name of the notebook being executed.
    #[builder(into)]
    name:               String,
    /// Whether captured output is re-emitted when a cell finishes.
    #[builder(default = true)]
    show_output:        bool,
    /// Whether a raising cell lets the remaining cells run.
    #[builder(default)]
    suppress_exception: bool,
    /// Capture buffer of the cell in progress.
    #[builder(skip)]
    sink:               CaptureSink,
    /// Test results recorded so far.
    #[builder(skip)]
    tests:              Vec<TestResult>,
}

impl NotebookContext {
    /// Returns the notebook name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether raising cells are swallowed.
    pub fn suppresses_exceptions(&self) -> bool {
        self.suppress_exception
    }

    /// Returns the test results recorded so far.
    pub fn tests(&self) -> &[TestResult] {
        &self.tests
    }

    /// Opens the scope of one cell. `cell_metadata` is the snapshot the
    /// synthesized program embeds for the cell; a snapshot that is not a
    /// cell is logged and treated as unknown.
    pub fn enter(&mut self, cell_metadata: Option<&Value>) -> CellScope<'_> {
        let cell = cell_metadata.and_then(|snapshot| {
            Cell::deserialize(snapshot)
                .inspect_err(|err| {
                    tracing::error!(
                        notebook = %self.name,
                        "Cell metadata could not be converted to a cell: {err}"
                    );
                })
                .ok()
        });

        self.sink.reset();
        CellScope {
            context: self,
            cell,
        }
    }

    /// Runs `body` inside the scope of one cell.
    pub fn run_cell<F, E>(&mut self, cell_metadata: Option<&Value>, body: F) -> Result<(), CellError>
    where
        F: FnOnce(&mut CaptureSink) -> Result<(), E>,
        E: std::fmt::Display,
    {
        let mut scope = self.enter(cell_metadata);
        let outcome = body(scope.sink()).map_err(|err| err.to_string());
        scope.exit(outcome)
    }

    /// Sums the present scores and maps every recorded grade id to its
    /// score. A grade id recorded twice keeps its first position and its
    /// latest score.
    pub fn finalize(&self) -> NotebookResult {
        let total = self
            .tests
            .iter()
            .filter_map(TestResult::points)
            .fold(0.0, |acc, points| acc + points);
        let mut scores: Vec<(String, Option<f64>)> = Vec::with_capacity(self.tests.len());
        for test in &self.tests {
            match scores.iter_mut().find(|(id, _)| *id == test.grade_id) {
                Some(entry) => entry.1 = test.points,
                None => scores.push((test.grade_id.clone(), test.points)),
            }
        }

        NotebookResult {
            notebook: self.name.clone(),
            total,
            scores,
        }
    }

    /// Appends `record` as one JSON line to `target`, creating the file if
    /// needed. Concurrent writers are not coordinated.
    pub fn persist(record: &NotebookResult, target: &Path) -> Result<()> {
        use std::io::Write;

        let line = serde_json::to_string(record).context("Could not serialize notebook result")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(target)
            .with_context(|| format!("Could not open results file {}", target.display()))?;
        file.write_all(format!("{line}\n").as_bytes())
            .with_context(|| format!("Could not append to results file {}", target.display()))?;

        tracing::info!(notebook = %record.notebook, "Stored result in {}", target.display());
        Ok(())
    }
}

/// The open scope of one cell. Closed with [`CellScope::exit`].
#[derive(Debug)]
pub struct CellScope<'a> {
    /// Context the scope belongs to.
    context: &'a mut NotebookContext,
    /// The cell being executed, if its snapshot was readable.
    cell:    Option<Cell>,
}

impl CellScope<'_> {
    /// Returns the sink the cell writes its output to.
    pub fn sink(&mut self) -> &mut CaptureSink {
        &mut self.context.sink
    }

    /// Closes the scope. `outcome` is the cell body's result, with the
    /// raised message on failure.
    ///
    /// Re-emits the captured output if configured to, records a test result
    /// for autograded test cells, then either swallows a failure or returns
    /// it as a [`CellError`].
    pub fn exit(self, outcome: Result<(), String>) -> Result<(), CellError> {
        let CellScope { context, cell } = self;
        let output = context.sink.take();

        if context.show_output && !output.is_empty() {
            print!("{output}");
        }

        let grading = cell.as_ref().and_then(Cell::grading_metadata);
        if let Some(metadata) = grading.filter(|m| m.role() == Some(CellRole::AutogradedTests)) {
            let points = match &outcome {
                Ok(()) => score_from_output(&output),
                Err(_) => None,
            };
            if points.is_none() && outcome.is_ok() {
                tracing::warn!(
                    notebook = %context.name,
                    "Output of test cell {} does not end with a score",
                    metadata.grade_id()
                );
            }
            context.tests.push(TestResult {
                grade_id: metadata.grade_id().to_string(),
                max_points: metadata.points(),
                points,
            });
        }

        let Err(message) = outcome else {
            return Ok(());
        };
        let label = cell
            .as_ref()
            .and_then(|c| {
                c.grading_metadata()
                    .map(|m| m.grade_id().to_string())
                    .or_else(|| c.id().map(str::to_owned))
            })
            .unwrap_or_else(|| "<unknown>".to_string());

        if context.suppress_exception {
            tracing::warn!(notebook = %context.name, "Cell {label} raised: {message}");
            Ok(())
        } else {
            Err(CellError {
                notebook: context.name.clone(),
                cell: label,
                message,
            })
        }
    }
}

/// Parses the last non-empty line of `output` as a score.
pub fn score_from_output(output: &str) -> Option<f64> {
    output
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .and_then(|line| line.parse::<f64>().ok())
        .filter(|score| score.is_finite())
}

#[cfg(test)]
mod tests {
    use std::fmt::Write as _;

    use serde_json::json;

    use super::*;

    fn test_cell(grade_id: &str, points: f64) -> Value {
        json!({
            "cell_type": "code",
            "id": grade_id,
            "metadata": { "nbgrader": {
                "schema_version": 3, "grade": true, "grade_id": grade_id,
                "solution": false, "locked": true, "points": points,
            }},
        })
    }

    fn context(suppress: bool) -> NotebookContext {
        NotebookContext::builder()
            .name("sample")
            .show_output(false)
            .suppress_exception(suppress)
            .build()
    }

    #[test]
    fn sums_scores_of_test_cells() {
        let mut context = context(false);
        for (cell, output) in [(test_cell("t1", 1.0), "1.0\n"), (test_cell("t2", 2.0), "2.0\n")] {
            context
                .run_cell(Some(&cell), |sink| writeln!(sink, "{}", output.trim()))
                .expect("cell runs");
        }

        let result = context.finalize();
        assert_eq!(result.total(), 3.0);
        assert_eq!(result.score("t1"), Some(Some(1.0)));
        assert_eq!(result.score("t2"), Some(Some(2.0)));
    }

    #[test]
    fn unparsable_score_is_absent() {
        let mut context = context(false);
        context
            .run_cell(Some(&test_cell("t1", 1.0)), |sink| writeln!(sink, "1.0"))
            .expect("cell runs");
        context
            .run_cell(Some(&test_cell("t2", 2.0)), |sink| writeln!(sink, "not-a-number"))
            .expect("cell runs");

        let result = context.finalize();
        assert_eq!(result.total(), 1.0);
        assert_eq!(result.score("t2"), Some(None));
        assert_eq!(
            serde_json::to_string(&result).expect("serialize"),
            r#"{"notebook":"sample","total":1.0,"t1":1.0,"t2":null}"#
        );
    }

    #[test]
    fn only_the_last_line_counts() {
        assert_eq!(score_from_output("checking...\n2.5\n\n"), Some(2.5));
        assert_eq!(score_from_output("2.5\ndone\n"), None);
        assert_eq!(score_from_output(""), None);
        assert_eq!(score_from_output("nan\n"), None);
    }

    #[test]
    fn exception_policy() {
        let raising = |sink: &mut CaptureSink| -> Result<(), String> {
            sink.push_str("partial\n");
            Err("ZeroDivisionError: division by zero".to_string())
        };

        let mut strict = context(false);
        let err = strict
            .run_cell(Some(&test_cell("t1", 1.0)), raising)
            .expect_err("propagates");
        assert_eq!(err.cell(), "t1");

        let mut tolerant = context(true);
        tolerant
            .run_cell(Some(&test_cell("t1", 1.0)), raising)
            .expect("suppressed");
        assert_eq!(tolerant.tests()[0].points(), None);
    }

    #[test]
    fn cells_without_metadata_are_not_scored() {
        let mut context = context(false);
        context
            .run_cell(None, |sink| writeln!(sink, "5"))
            .expect("cell runs");
        context
            .run_cell(Some(&json!("not a cell")), |sink| writeln!(sink, "5"))
            .expect("cell runs");

        assert!(context.tests().is_empty());
        assert_eq!(context.finalize().total(), 0.0);
    }

    #[test]
    fn total_without_scores_is_positive_zero() {
        let mut context = context(true);
        context
            .run_cell(Some(&test_cell("t1", 1.0)), |_| Err("AssertionError"))
            .expect("suppressed");

        let result = context.finalize();
        assert!(result.total().is_sign_positive());
        assert_eq!(
            serde_json::to_string(&result).expect("serialize"),
            r#"{"notebook":"sample","total":0.0,"t1":null}"#
        );
    }

    #[test]
    fn persist_appends_lines() {
        let dir = std::env::temp_dir().join(format!("nbg-context-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let target = dir.join("results.json");

        let mut context = context(false);
        context
            .run_cell(Some(&test_cell("t1", 1.0)), |sink| writeln!(sink, "1"))
            .expect("cell runs");
        let record = context.finalize();
        NotebookContext::persist(&record, &target).expect("first append");
        NotebookContext::persist(&record, &target).expect("second append");

        let records = NotebookResult::read_all(&target).expect("read back");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], record);

        std::fs::remove_dir_all(&dir).expect("cleanup");
    }
}
