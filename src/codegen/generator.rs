#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Turns a (merged) notebook into one standalone Python program.
//!
//! Every code cell runs inside `with notebook_context(cell_metadata=...)`,
//! which captures its output and applies the exception policy. Imports are
//! hoisted to the top of the program, shell and magic lines are commented
//! out, and test cells get a trailing statement printing their score.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bon::Builder;

use crate::{
    constants::{CELL_EVENT_PREFIX, DEFAULT_RESULTS_FILE, NBGRADER_METADATA_KEY},
    notebook::{
        cell::{Cell, CellRole, GradingMetadata},
        document::GraderNotebook,
    },
    python::{
        literal::{python_literal, python_number, python_string},
        parser::{LastStatement, Parser},
    },
    util::{indent, sanitize_file_name},
};

/// Runtime support every synthesized program starts with: the notebook
/// context, test results and display shims.
const RUNTIME_PRELUDE: &str = include_str!("templates/runtime.py");

/// Indentation of cell bodies inside their `with` block.
const BODY_INDENT: &str = "    ";

/// Synthesizes runnable Python programs from notebooks.
#[derive(Debug, Clone, Builder)]
pub struct NbgCodeGenerator {
    /// Results file the program appends to unless given `--results`.
    #[builder(into, default = PathBuf::from(DEFAULT_RESULTS_FILE))]
    results_path: PathBuf,
}

impl Default for NbgCodeGenerator {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// One code cell, ready to be placed in the program.
struct CellUnit {
    /// Import statements lifted out of the cell.
    imports: Vec<String>,
    /// The `with` block running the cell.
    text:    String,
}

impl NbgCodeGenerator {
    /// Returns the results file baked into generated programs.
    pub fn results_path(&self) -> &Path {
        &self.results_path
    }

    /// Synthesizes the program for `notebook`. Code cells run in document
    /// order; every other cell is skipped.
    pub fn generate(&self, notebook: &GraderNotebook) -> String {
        let span = tracing::info_span!("synthesize", notebook = %notebook.name());
        let _guard = span.enter();

        let mut imports = Vec::new();
        let mut cells = String::new();
        for (position, cell) in notebook.cells().iter().enumerate() {
            if !cell.is_code() {
                continue;
            }
            let unit = synthesize_cell(notebook.name(), position, cell);
            imports.extend(unit.imports);
            cells.push_str(&unit.text);
        }
        // `from __future__` has to stay ahead of every other statement.
        imports.sort_by_key(|statement| !statement.starts_with("from __future__"));

        let mut program = String::new();
        for statement in &imports {
            program.push_str(statement);
            program.push('\n');
        }
        program.push('\n');
        program.push_str(&format!(
            "_NBG_METADATA_KEY = {}\n_NBG_EVENT_PREFIX = {}\n\n",
            python_string(NBGRADER_METADATA_KEY),
            python_string(CELL_EVENT_PREFIX)
        ));
        program.push_str(RUNTIME_PRELUDE);
        program.push_str(&format!(
            "\n\nnotebook_context = NotebookContext.from_argv({}, _nbg_sys.argv[1:], {})\n",
            python_string(notebook.name()),
            python_string(&self.results_path.to_string_lossy())
        ));
        program.push_str(&cells);
        program.push_str("\nnotebook_context.finish()\n");
        program
    }

    /// Writes the program for `notebook` to `target_dir/test_<name>.py`,
    /// creating the directory if needed, and returns the file's path.
    pub fn generate_file(&self, notebook: &GraderNotebook, target_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(target_dir)
            .with_context(|| format!("Could not create {}", target_dir.display()))?;

        let path = target_dir.join(format!("test_{}.py", sanitize_file_name(notebook.name())));
        std::fs::write(&path, self.generate(notebook))
            .with_context(|| format!("Could not write {}", path.display()))?;

        tracing::info!(notebook = %notebook.name(), "Wrote {}", path.display());
        Ok(path)
    }
}

/// Builds the `with` block for one code cell.
fn synthesize_cell(notebook: &str, position: usize, cell: &Cell) -> CellUnit {
    let grading = cell.grading_metadata();
    let role = grading.as_ref().and_then(GradingMetadata::role);
    let label = grading
        .as_ref()
        .map(|m| m.grade_id().to_string())
        .or_else(|| cell.id().map(str::to_owned))
        .unwrap_or_else(|| format!("#{position}"));

    let code = comment_out_magics(&cell.source_text());
    let parsed = match Parser::new(code.clone()) {
        Ok(parser) if !parser.has_errors() => Some(parser),
        Ok(_) => {
            tracing::debug!(notebook, "Cell {label} does not parse; its imports stay in place");
            None
        }
        Err(err) => {
            tracing::warn!(notebook, "Could not parse cell {label}: {err:#}");
            None
        }
    };

    let (mut body, imports) = match &parsed {
        Some(parser) => hoist_imports(parser).unwrap_or_else(|err| {
            tracing::warn!(notebook, "Could not lift imports out of cell {label}: {err:#}");
            (code.clone(), Vec::new())
        }),
        None => (code.clone(), Vec::new()),
    };

    if role == Some(CellRole::AutogradedTests)
        && let Some(metadata) = &grading
        && let Some(printout) = score_printout(notebook, &label, parsed.as_ref(), metadata)
    {
        ensure_newline(&mut body);
        body.push_str(&printout);
    }
    ensure_newline(&mut body);
    body.push_str("pass\n");

    let heading = match role {
        Some(role) => format!("# {label} ({role})"),
        None => format!("# {label}"),
    };
    let text = format!(
        "\n{heading}\nwith notebook_context(cell_metadata={}):\n{}",
        python_literal(&cell.snapshot()),
        indent(&body, BODY_INDENT)
    );

    CellUnit { imports, text }
}

/// Comments out lines that are shell escapes (`!`) or IPython magics (`%`),
/// keeping their indentation and the line count.
fn comment_out_magics(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    for line in code.split_inclusive('\n') {
        let content = line.trim_start();
        if content.starts_with('!') || content.starts_with('%') {
            out.push_str(&line[..line.len() - content.len()]);
            out.push('#');
            out.push_str(content);
        } else {
            out.push_str(line);
        }
    }
    out
}

/// Replaces every import statement of the parsed cell with a `pass` marker
/// echoing it, and returns the new body together with the lifted
/// statements.
fn hoist_imports(parser: &Parser) -> Result<(String, Vec<String>)> {
    let code = parser.code();
    let mut body = String::with_capacity(code.len());
    let mut hoisted = Vec::new();
    let mut cursor = 0;

    for import in parser.imports()? {
        let range = import.range();
        if range.start < cursor {
            continue;
        }
        let rest_of_line = code[range.end..].lines().next().unwrap_or_default();
        let followed_by_code = rest_of_line.trim_start().starts_with(';');

        body.push_str(&code[cursor..range.start]);
        body.push_str(&import_marker(import.text(), followed_by_code));
        hoisted.push(import.text().to_string());
        cursor = range.end;
    }
    body.push_str(&code[cursor..]);

    Ok((body, hoisted))
}

/// The no-op standing in for a lifted import. Continuation lines become
/// comments so line numbers stay put; an import followed by `;` and more
/// code becomes a bare `pass`.
fn import_marker(statement: &str, followed_by_code: bool) -> String {
    if followed_by_code {
        return "pass".to_string();
    }

    let mut lines = statement.split('\n');
    let mut marker = format!("pass  # {}", lines.next().unwrap_or_default());
    for line in lines {
        marker.push_str("\n#");
        marker.push_str(line);
    }
    marker
}

/// The statement printing a test cell's score, if one can be derived.
fn score_printout(
    notebook: &str,
    label: &str,
    parsed: Option<&Parser>,
    metadata: &GradingMetadata,
) -> Option<String> {
    let Some(parser) = parsed else {
        tracing::warn!(notebook, "Test cell {label} does not parse; no score printout added");
        return None;
    };

    match parser.last_statement() {
        Ok(Some(LastStatement::Assertion)) => match metadata.points() {
            Some(points) => Some(format!("print({})", python_number(points))),
            None => {
                tracing::warn!(
                    notebook,
                    "Test cell {label} ends with an assert but has no points; no score printout \
                     added"
                );
                None
            }
        },
        Ok(Some(LastStatement::Expression { is_print: true, .. })) => None,
        Ok(Some(LastStatement::Expression { text, .. })) => Some(format!("print({text})")),
        Ok(Some(LastStatement::Other(kind))) => {
            tracing::warn!(
                notebook,
                "Test cell {label} ends with a {kind}, not an assert or expression; no score \
                 printout added"
            );
            None
        }
        Ok(None) => {
            tracing::warn!(notebook, "Test cell {label} is empty; no score printout added");
            None
        }
        Err(err) => {
            tracing::warn!(notebook, "Could not inspect test cell {label}: {err:#}");
            None
        }
    }
}

/// Appends a newline unless `text` is empty or already ends with one.
fn ensure_newline(text: &mut String) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magics_are_commented_in_place() {
        assert_eq!(
            comment_out_magics("%matplotlib inline\n!pip install x\nif a:\n    !ls\nx = 1\n"),
            "#%matplotlib inline\n#!pip install x\nif a:\n    #!ls\nx = 1\n"
        );
    }

    #[test]
    fn imports_become_markers() {
        let parser = Parser::new(
            "import os\nfrom math import (\n    pi,\n)\nimport sys; x = 1\nprint(os.sep)\n".to_string(),
        )
        .expect("parser");
        let (body, hoisted) = hoist_imports(&parser).expect("hoist");

        assert_eq!(hoisted, ["import os", "from math import (\n    pi,\n)", "import sys"]);
        assert_eq!(
            body,
            "pass  # import os\npass  # from math import (\n#    pi,\n#)\npass; x = 1\nprint(os.sep)\n"
        );
    }
}
