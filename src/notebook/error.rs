#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::path::PathBuf;

use thiserror::Error;

/// Reasons a notebook could not be loaded.
#[derive(Error, Debug)]
pub enum NotebookError {
    /// The notebook file could not be read.
    #[error("Could not read {}: {source}", path.display())]
    Io {
        /// Path that was read.
        path:   PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The content is not JSON.
    #[error("{name} is not valid JSON: {source}")]
    Json {
        /// Name of the notebook.
        name:   String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The JSON document has no top-level `cells` array.
    #[error("{name} has no `cells` array")]
    MissingCells {
        /// Name of the notebook.
        name: String,
    },

    /// One cell record does not have the shape of a cell.
    #[error("{name}: cell #{index} is unreadable: {source}")]
    Cell {
        /// Name of the notebook.
        name:   String,
        /// Position of the record in the `cells` array.
        index:  usize,
        /// Underlying conversion error.
        #[source]
        source: serde_json::Error,
    },
}
