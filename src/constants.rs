#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Cell metadata key under which nbgrader stores its grading block.
pub const NBGRADER_METADATA_KEY: &str = "nbgrader";

/// Placeholder a template marks with `{{ notebook_code }}` on a line of its
/// own. Inner and trailing whitespace is tolerated; the leading whitespace is
/// captured as `indent` so the substituted code can be re-indented.
pub const TEMPLATE_PLACEHOLDER_PATTERN: &str =
    r"(?m)^(?P<indent>[ \t]*)\{\{\s*notebook_code\s*\}\}[ \t]*\r?$";

/// File the synthesized programs append their results record to unless told
/// otherwise.
pub const DEFAULT_RESULTS_FILE: &str = "results.json";

/// Default location `nbg-code code` writes the merged source to.
pub const DEFAULT_OUTPUT_PYTHON: &str = "/tmp/submission.py";

/// Default directory batch output is written into.
pub const DEFAULT_OUTPUT_FOLDER: &str = "/tmp/submissions";

/// Marker in front of every machine-readable cell event a synthesized program
/// writes to stdout when started with `--events`. Starts with an ASCII record
/// separator so it cannot collide with ordinary cell output.
pub const CELL_EVENT_PREFIX: &str = "\u{1e}nbg-event ";

/// Name given to documents loaded from memory without an explicit name.
pub const UNNAMED_NOTEBOOK: &str = "notebook";

/// How many directory levels deep batch discovery looks for notebooks.
pub const SUBMISSION_SEARCH_DEPTH: i8 = 4;
