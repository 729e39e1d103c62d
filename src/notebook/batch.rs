#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Many submissions of one assignment, merged against a shared source
//! notebook and written out one file per submission.
//!
//! Submissions are independent of each other and only read the source, so
//! they are processed in parallel. A failure writing one submission's file
//! is recorded in its [`BatchOutcome`]; the rest of the batch carries on.

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use zip::ZipArchive;

use super::{
    document::{GraderNotebook, NotebookSource},
    merge::{MergedNotebook, Submission},
};
use crate::{
    codegen::generator::NbgCodeGenerator,
    constants::SUBMISSION_SEARCH_DEPTH,
    util::{find_files, sanitize_file_name},
};

/// What became of one submission of a batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// 1-based position of the submission in the batch.
    index:      usize,
    /// Name of the submission.
    submission: String,
    /// Answers the submission was missing.
    failures:   usize,
    /// The written file, or why it could not be written.
    result:     Result<PathBuf, String>,
}

impl BatchOutcome {
    /// Returns the 1-based position of the submission.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the submission's name.
    pub fn submission(&self) -> &str {
        &self.submission
    }

    /// Returns how many answers had to be replaced by placeholders.
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Returns the written file, or why writing failed.
    pub fn result(&self) -> Result<&Path, &str> {
        self.result.as_deref().map_err(String::as_str)
    }
}

/// The submissions of one assignment, plus the source notebook they are
/// merged against.
#[derive(Debug, Clone, Default)]
pub struct Submissions {
    /// Source notebook holding the tests.
    source:      Option<GraderNotebook>,
    /// Submissions, in discovery order.
    submissions: Vec<Submission>,
}

impl Submissions {
    /// Creates a batch from already loaded submissions.
    pub fn new(submissions: Vec<Submission>) -> Self {
        Self {
            source: None,
            submissions,
        }
    }

    /// Loads every `.ipynb` under `dir`, in path order. Each submission is
    /// named after its path relative to `dir`, without the extension.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            bail!("Submissions directory {} does not exist", dir.display());
        }

        let paths = find_files("ipynb", SUBMISSION_SEARCH_DEPTH, dir)
            .with_context(|| format!("Could not search {} for notebooks", dir.display()))?;
        let submissions = paths
            .into_iter()
            .filter(|path| !is_ignored(path))
            .map(|path| {
                let relative = path.strip_prefix(dir).unwrap_or(&path).with_extension("");
                let name = relative.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
                GraderNotebook::new(NotebookSource::Path(path), Some(name)).into()
            })
            .collect::<Vec<Submission>>();

        tracing::info!("Found {} submissions in {}", submissions.len(), dir.display());
        Ok(Self::new(submissions))
    }

    /// Loads every `.ipynb` entry of the zip archive at `path`, ordered by
    /// entry name. Each submission is named after its entry path without the
    /// extension; the notebooks are parsed from the entry bytes.
    pub fn from_zip(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Could not open submissions archive {}", path.display()))?;
        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("{} is not a readable zip archive", path.display()))?;

        let mut entries = Vec::new();
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .with_context(|| format!("Could not read entry #{index} of {}", path.display()))?;
            let name = entry.name().to_string();
            let Some(stem) = name.strip_suffix(".ipynb") else {
                continue;
            };
            if entry.is_dir() || is_ignored(Path::new(&name)) {
                continue;
            }

            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .with_context(|| format!("Could not extract {name} from {}", path.display()))?;
            entries.push((stem.to_string(), bytes));
        }
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));

        let submissions = entries
            .into_iter()
            .map(|(name, bytes)| Submission::from_bytes(bytes, name))
            .collect::<Vec<_>>();

        tracing::info!("Found {} submissions in {}", submissions.len(), path.display());
        Ok(Self::new(submissions))
    }

    /// Sets the source notebook.
    pub fn with_source(mut self, source: GraderNotebook) -> Self {
        self.source = Some(source);
        self
    }

    /// Returns the source notebook, if set.
    pub fn source(&self) -> Option<&GraderNotebook> {
        self.source.as_ref()
    }

    /// Returns the submissions.
    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    /// Number of submissions.
    pub fn len(&self) -> usize {
        self.submissions.len()
    }

    /// Whether the batch has no submissions.
    pub fn is_empty(&self) -> bool {
        self.submissions.is_empty()
    }

    /// The source notebook; a batch cannot run without one.
    fn require_source(&self) -> Result<&GraderNotebook> {
        let source = self
            .source
            .as_ref()
            .context("No source notebook was given for the submissions")?;
        if let Some(err) = source.load_error() {
            bail!("Source notebook {} could not be loaded: {err}", source.name());
        }
        Ok(source)
    }

    /// Merges every submission against the source notebook, in order.
    pub fn merge_all(&self, only_merge_answers: bool) -> Result<Vec<MergedNotebook>> {
        let source = self.require_source()?;
        Ok(self
            .submissions
            .par_iter()
            .map(|submission| submission.merge_code(source, only_merge_answers))
            .collect())
    }

    /// Merges every submission and writes its executable source to
    /// `target_dir/test_<source>_submission_<NNNN>.py`.
    pub fn generate_python_files(
        &self,
        target_dir: &Path,
        template: Option<&Path>,
        with_cell_comments: bool,
        only_merge_answers: bool,
    ) -> Result<Vec<BatchOutcome>> {
        let source = self.require_source()?;
        std::fs::create_dir_all(target_dir)
            .with_context(|| format!("Could not create {}", target_dir.display()))?;
        let stem = sanitize_file_name(source.name());

        Ok(self.for_each_merged(source, only_merge_answers, |index, merged| {
            let path = target_dir.join(format!("test_{stem}_submission_{index:04}.py"));
            let code = merged.notebook().as_executable_source(template, with_cell_comments);
            std::fs::write(&path, code)
                .with_context(|| format!("Could not write {}", path.display()))?;
            Ok(path)
        }))
    }

    /// Merges every submission and synthesizes its program into
    /// `target_dir/<NNNN>/test_<submission>.py`.
    pub fn generate_programs(
        &self,
        target_dir: &Path,
        generator: &NbgCodeGenerator,
        only_merge_answers: bool,
    ) -> Result<Vec<BatchOutcome>> {
        let source = self.require_source()?;

        Ok(self.for_each_merged(source, only_merge_answers, |index, merged| {
            generator.generate_file(merged.notebook(), &target_dir.join(format!("{index:04}")))
        }))
    }

    /// Merges each submission in parallel and hands it to `write`, turning
    /// every outcome into a [`BatchOutcome`].
    fn for_each_merged<F>(
        &self,
        source: &GraderNotebook,
        only_merge_answers: bool,
        write: F,
    ) -> Vec<BatchOutcome>
    where
        F: Fn(usize, &MergedNotebook) -> Result<PathBuf> + Sync,
    {
        self.submissions
            .par_iter()
            .enumerate()
            .map(|(position, submission)| {
                let index = position + 1;
                let merged = submission.merge_code(source, only_merge_answers);
                let result = write(index, &merged).map_err(|err| {
                    tracing::error!(notebook = %submission.name(), "{err:#}");
                    format!("{err:#}")
                });

                BatchOutcome {
                    index,
                    submission: submission.name().to_string(),
                    failures: merged.failures().len(),
                    result,
                }
            })
            .collect()
    }
}

/// Whether `path` lies in a Jupyter `.ipynb_checkpoints` directory or in
/// the `__MACOSX` metadata folder of an archive.
fn is_ignored(path: &Path) -> bool {
    path.components().any(|component| {
        let part = component.as_os_str();
        part == ".ipynb_checkpoints" || part == "__MACOSX"
    })
}
