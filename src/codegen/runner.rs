#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Runs a synthesized program and replays its cell events through a
//! [`NotebookContext`].

use std::{ffi::OsString, path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;

use super::context::{NotebookContext, NotebookResult};
use crate::{constants::CELL_EVENT_PREFIX, process::run_collect, util::python_path};

/// What a synthesized program started with `--events` reports per cell.
#[derive(Debug, Deserialize)]
struct CellEvent {
    /// Metadata snapshot of the cell.
    cell:   Option<Value>,
    /// Everything the cell printed.
    #[serde(default)]
    output: String,
    /// What the cell raised, if anything.
    error:  Option<String>,
}

/// Executes the program at `program` with the Python interpreter on path.
///
/// Each cell the program reports is replayed through `context`, which
/// re-emits its output, applies the exception policy and scores test cells.
/// Returns the finalized record; persisting it is up to the caller.
///
/// Fails if the interpreter is missing, the deadline passes, a cell raises
/// and `context` does not suppress exceptions, or the program exits
/// unsuccessfully for any other reason.
pub async fn run_program(
    program: &Path,
    context: &mut NotebookContext,
    deadline: Option<Duration>,
) -> Result<NotebookResult> {
    let python = python_path()?;
    let program = std::fs::canonicalize(program)
        .with_context(|| format!("Could not find program {}", program.display()))?;

    let mut args = vec![program.as_os_str().to_os_string(), OsString::from("--events")];
    if context.suppresses_exceptions() {
        args.push(OsString::from("--suppress_exception"));
    }

    tracing::info!(notebook = %context.name(), "Running {}", program.display());
    let collected = run_collect(&python, &args, program.parent(), deadline)
        .await
        .with_context(|| format!("Failed to run {}", program.display()))?;

    let stdout = String::from_utf8_lossy(&collected.stdout);
    let mut failed_cell = false;
    for line in stdout.lines() {
        let Some(payload) = line.strip_prefix(CELL_EVENT_PREFIX) else {
            if !line.trim().is_empty() {
                tracing::debug!(notebook = %context.name(), "{line}");
            }
            continue;
        };

        let event: CellEvent = serde_json::from_str(payload)
            .with_context(|| format!("Malformed cell event from {}", program.display()))?;
        failed_cell |= event.error.is_some();

        let mut scope = context.enter(event.cell.as_ref());
        scope.sink().push_str(&event.output);
        scope.exit(event.error.map_or(Ok(()), Err))?;
    }

    if !collected.status.success() && !failed_cell {
        bail!(
            "{} exited with {}:\n{}",
            program.display(),
            collected.status,
            String::from_utf8_lossy(&collected.stderr).trim_end()
        );
    }

    Ok(context.finalize())
}
