#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! A loaded notebook with its cells indexed by id and by grade id.

use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use serde_json::{Map, Value};

use super::{
    cell::{Cell, GradingBlock},
    error::NotebookError,
};
use crate::{
    constants::{NBGRADER_METADATA_KEY, TEMPLATE_PLACEHOLDER_PATTERN, UNNAMED_NOTEBOOK},
    python::literal::python_display,
    util::indent,
};

/// Compiled template placeholder.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(TEMPLATE_PLACEHOLDER_PATTERN).expect("placeholder pattern is a valid regex")
});

/// Where a notebook's raw content comes from.
#[derive(Debug, Clone)]
pub enum NotebookSource {
    /// An `.ipynb` file on disk.
    Path(PathBuf),
    /// Raw JSON bytes, e.g. an archive entry.
    Bytes(Vec<u8>),
    /// An already parsed JSON document.
    Value(Value),
}

/// A Jupyter notebook prepared for grading.
#[derive(Debug, Clone)]
pub struct GraderNotebook {
    /// Name of the notebook, used in logs, results and file names.
    name:         String,
    /// Raw content to load from; `None` for notebooks built from cells.
    source:       Option<NotebookSource>,
    /// Top-level fields other than `cells` (`metadata`, `nbformat`, ...).
    document:     Map<String, Value>,
    /// Cells in document order.
    cells:        Vec<Cell>,
    /// Position of every code cell, by cell id.
    code_cells:   HashMap<String, usize>,
    /// Position of every cell with grading metadata, by grade id.
    graded_cells: HashMap<String, usize>,
    /// Grade ids of solution cells.
    solutions:    BTreeSet<String>,
    /// Whether a load completed.
    loaded:       bool,
    /// Why the last load failed, if it did.
    load_error:   Option<String>,
}

impl GraderNotebook {
    /// Creates a notebook from `source` and loads it.
    ///
    /// Without a `name`, file-backed notebooks are named after their file
    /// stem. Load failures are logged and leave the notebook empty or
    /// partial; see [`GraderNotebook::load_error`].
    pub fn new(source: NotebookSource, name: Option<String>) -> Self {
        let name = name.unwrap_or_else(|| match &source {
            NotebookSource::Path(path) => path
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_else(|| UNNAMED_NOTEBOOK.to_string()),
            NotebookSource::Bytes(_) | NotebookSource::Value(_) => UNNAMED_NOTEBOOK.to_string(),
        });

        let mut notebook = Self::empty(name, Some(source));
        notebook.load();
        notebook
    }

    /// Loads the notebook at `path`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(NotebookSource::Path(path.into()), None)
    }

    /// Loads a notebook from JSON bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, name: impl Into<String>) -> Self {
        Self::new(NotebookSource::Bytes(bytes.into()), Some(name.into()))
    }

    /// Loads a notebook from a parsed JSON document.
    pub fn from_value(value: Value, name: impl Into<String>) -> Self {
        Self::new(NotebookSource::Value(value), Some(name.into()))
    }

    /// Builds an already loaded notebook out of cells.
    pub(crate) fn from_cells(
        name: impl Into<String>,
        document: Map<String, Value>,
        cells: Vec<Cell>,
    ) -> Self {
        let mut notebook = Self::empty(name.into(), None);
        notebook.document = document;
        notebook.cells = cells;
        notebook.loaded = true;
        notebook.reindex();
        notebook
    }

    /// A notebook with nothing loaded yet.
    fn empty(name: String, source: Option<NotebookSource>) -> Self {
        Self {
            name,
            source,
            document: Map::new(),
            cells: Vec::new(),
            code_cells: HashMap::new(),
            graded_cells: HashMap::new(),
            solutions: BTreeSet::new(),
            loaded: false,
            load_error: None,
        }
    }

    /// Loads cells from the notebook's source and rebuilds the indices.
    ///
    /// Does nothing once a load has succeeded. A failure is logged with the
    /// notebook's name and leaves whatever cells were read before it.
    pub fn load(&mut self) {
        if self.loaded {
            return;
        }
        let span = tracing::info_span!("notebook", name = %self.name);
        let _guard = span.enter();

        self.cells.clear();
        match self.read_cells() {
            Ok(()) => {
                self.loaded = true;
                self.load_error = None;
            }
            Err(err) => {
                tracing::error!(notebook = %self.name, "{err}");
                self.load_error = Some(err.to_string());
            }
        }
        self.reindex();
    }

    /// Parses the source into `self.document` and `self.cells`.
    fn read_cells(&mut self) -> Result<(), NotebookError> {
        let raw = match &self.source {
            Some(NotebookSource::Path(path)) => {
                let bytes = std::fs::read(path).map_err(|source| NotebookError::Io {
                    path: path.clone(),
                    source,
                })?;
                self.parse_json(&bytes)?
            }
            Some(NotebookSource::Bytes(bytes)) => self.parse_json(bytes)?,
            Some(NotebookSource::Value(value)) => value.clone(),
            None => return Ok(()),
        };

        let Value::Object(mut document) = raw else {
            return Err(NotebookError::MissingCells {
                name: self.name.clone(),
            });
        };
        let Some(Value::Array(records)) = document.remove("cells") else {
            return Err(NotebookError::MissingCells {
                name: self.name.clone(),
            });
        };
        self.document = document;

        for (index, record) in records.into_iter().enumerate() {
            let cell: Cell = serde_json::from_value(record).map_err(|source| NotebookError::Cell {
                name: self.name.clone(),
                index,
                source,
            })?;
            self.cells.push(cell);
        }

        Ok(())
    }

    /// Parses JSON bytes, attributing errors to this notebook.
    fn parse_json(&self, bytes: &[u8]) -> Result<Value, NotebookError> {
        serde_json::from_slice(bytes).map_err(|source| NotebookError::Json {
            name: self.name.clone(),
            source,
        })
    }

    /// Rebuilds the id and grade id indices from the cell sequence.
    pub(crate) fn reindex(&mut self) {
        self.code_cells.clear();
        self.graded_cells.clear();
        self.solutions.clear();

        for (position, cell) in self.cells.iter().enumerate() {
            if cell.is_code()
                && let Some(id) = cell.id()
                && self.code_cells.insert(id.to_string(), position).is_some()
            {
                tracing::warn!(notebook = %self.name, "Duplicate cell id {id}");
            }

            let metadata = match cell.grading() {
                GradingBlock::Valid(metadata) => metadata,
                GradingBlock::Invalid(reason) => {
                    tracing::warn!(
                        notebook = %self.name,
                        "Ignoring malformed nbgrader metadata of cell {}: {reason}",
                        cell.id().map(str::to_owned).unwrap_or_else(|| format!("#{position}"))
                    );
                    continue;
                }
                GradingBlock::Absent => continue,
            };

            let grade_id = metadata.grade_id();
            if grade_id.is_empty() {
                tracing::warn!(notebook = %self.name, "Skipping graded cell #{position}: empty grade_id");
                continue;
            }
            if self.graded_cells.contains_key(grade_id) {
                tracing::warn!(notebook = %self.name, "Skipping duplicate grade_id {grade_id}");
                continue;
            }

            self.graded_cells.insert(grade_id.to_string(), position);
            if metadata.solution() {
                self.solutions.insert(grade_id.to_string());
            }
        }
    }

    /// Returns the notebook's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a load completed.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Why the last load failed, if it did.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// Returns the cells in document order.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Returns the code cells in document order.
    pub fn code_cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter().filter(|cell| cell.is_code())
    }

    /// Looks up a code cell by its id.
    pub fn code_cell(&self, id: &str) -> Option<&Cell> {
        self.code_cells.get(id).map(|&position| &self.cells[position])
    }

    /// Looks up a cell with grading metadata by its grade id.
    pub fn graded_cell(&self, grade_id: &str) -> Option<&Cell> {
        self.graded_cells.get(grade_id).map(|&position| &self.cells[position])
    }

    /// Number of indexed cells with grading metadata.
    pub fn graded_count(&self) -> usize {
        self.graded_cells.len()
    }

    /// Grade ids of the solution cells.
    pub fn solutions(&self) -> &BTreeSet<String> {
        &self.solutions
    }

    /// Top-level fields other than `cells`.
    pub(crate) fn document(&self) -> &Map<String, Value> {
        &self.document
    }

    /// Serializes the notebook back to nbformat JSON.
    pub fn to_json(&self) -> Value {
        let mut document = self.document.clone();
        let cells = self
            .cells
            .iter()
            .filter_map(|cell| serde_json::to_value(cell).ok())
            .collect();
        document.insert("cells".to_string(), Value::Array(cells));
        Value::Object(document)
    }

    /// Concatenates the code cells, in document order, into one block of
    /// Python and substitutes it into `template`.
    ///
    /// Every cell is headed by an `# id:` comment; `with_comments` adds one
    /// comment per nbgrader metadata entry. Lines starting with `!` are
    /// dropped. When the template cannot be read or has no
    /// `{{ notebook_code }}` line, the bare block is returned.
    pub fn as_executable_source(&self, template: Option<&Path>, with_comments: bool) -> String {
        let mut code = String::new();

        for (position, cell) in self.cells.iter().enumerate() {
            if !cell.is_code() {
                continue;
            }

            let label = cell
                .grading_metadata()
                .map(|m| m.grade_id().to_string())
                .or_else(|| cell.id().map(str::to_owned))
                .unwrap_or_else(|| format!("#{position}"));
            code.push_str(&format!("\n# id: {label}\n"));

            if with_comments
                && let Some(Value::Object(block)) = cell.metadata().get(NBGRADER_METADATA_KEY)
            {
                for (key, value) in block {
                    code.push_str(&format!("#{key}={}\n", python_display(value)));
                }
            }

            for line in cell.source() {
                if line.starts_with('!') {
                    continue;
                }
                code.push_str(line);
            }
            if !code.ends_with('\n') {
                code.push('\n');
            }
        }

        let Some(path) = template else {
            return code;
        };
        let template = match std::fs::read_to_string(path) {
            Ok(template) => template,
            Err(err) => {
                tracing::warn!(
                    notebook = %self.name,
                    "Could not read template {}: {err}; using bare code",
                    path.display()
                );
                return code;
            }
        };

        match render_template(&template, &code) {
            Some(rendered) => rendered,
            None => {
                tracing::warn!(
                    notebook = %self.name,
                    "Template {} has no {{{{ notebook_code }}}} line; using bare code",
                    path.display()
                );
                code
            }
        }
    }
}

/// Replaces the placeholder line of `template` with `code`, indented to the
/// placeholder's level. Returns `None` if there is no placeholder.
pub fn render_template(template: &str, code: &str) -> Option<String> {
    let mut matches = PLACEHOLDER.captures_iter(template);
    let captures = matches.next()?;
    if matches.next().is_some() {
        tracing::warn!("Template has more than one placeholder; only the first is replaced");
    }

    let whole = captures.get(0)?;
    let prefix = captures.name("indent").map_or("", |m| m.as_str());
    let block = indent(code.trim_start_matches('\n'), prefix);

    Some(format!(
        "{}{}{}",
        &template[..whole.start()],
        block.trim_end_matches('\n'),
        &template[whole.end()..]
    ))
}
