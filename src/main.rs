#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! # nbg-code
//!
//! Extracts the code of nbgrader notebooks and turns learners' submissions
//! into runnable, self-scoring Python programs.
//!
//! - `code`: merge one submission with its source and write the plain code
//! - `batch`: the same, for every notebook in a directory or zip archive
//! - `generate`: synthesize self-scoring programs for one or many submissions
//! - `run`: synthesize, run and score one submission

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bpaf::*;
use dotenvy::dotenv;
use nbgcode::{
    codegen::{NbgCodeGenerator, NotebookContext, run_program},
    config,
    constants::DEFAULT_OUTPUT_PYTHON,
    notebook::{BatchOutcome, GraderNotebook, Submission, Submissions},
};
use tabled::{
    Table, Tabled,
    settings::{Panel, Style},
};
use tracing::{Level, metadata::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt};

/// Exit status when a mandatory input is missing or unreadable.
const MISSING_INPUT_STATUS: i32 = 2;

/// Where a batch of submissions is read from.
#[derive(Debug, Clone)]
enum BatchInput {
    /// Every notebook under a directory.
    Dir(PathBuf),
    /// Every notebook in a zip archive.
    Zip(PathBuf),
}

/// Where `generate` reads submissions from.
#[derive(Debug, Clone)]
enum Target {
    /// One submission notebook.
    One(PathBuf),
    /// A batch of submissions.
    Many(BatchInput),
}

/// Top-level CLI commands.
#[derive(Debug, Clone)]
enum Cmd {
    /// Merge one submission and write its code.
    Code {
        /// Source notebook with the tests.
        source:             PathBuf,
        /// Submitted notebook.
        submission:         PathBuf,
        /// Where to write the code.
        output_python:      Option<PathBuf>,
        /// Template with a `{{ notebook_code }}` line.
        template:           Option<PathBuf>,
        /// Comment every cell with its grading metadata.
        with_cell_comments: bool,
        /// Only replace answer cells.
        only_merge_answers: bool,
    },
    /// Merge every submission of a batch and write their code.
    Batch {
        /// Source notebook with the tests.
        source:             PathBuf,
        /// Directory or archive holding the submissions.
        submissions:        BatchInput,
        /// Directory to write into.
        output_folder:      Option<PathBuf>,
        /// Template with a `{{ notebook_code }}` line.
        template:           Option<PathBuf>,
        /// Comment every cell with its grading metadata.
        with_cell_comments: bool,
        /// Only replace answer cells.
        only_merge_answers: bool,
    },
    /// Synthesize self-scoring programs.
    Generate {
        /// Source notebook with the tests.
        source:             PathBuf,
        /// The submission(s).
        target:             Target,
        /// Directory to write into.
        output_folder:      Option<PathBuf>,
        /// Results file the programs append to.
        results:            Option<PathBuf>,
        /// Only replace answer cells.
        only_merge_answers: bool,
    },
    /// Synthesize, run and score one submission.
    Run {
        /// Source notebook with the tests.
        source:             PathBuf,
        /// Submitted notebook.
        submission:         PathBuf,
        /// Results file to append the record to.
        results:            Option<PathBuf>,
        /// Keep running after a cell raises.
        suppress_exception: bool,
        /// Do not echo cell output.
        hide_cell_output:   bool,
        /// Only replace answer cells.
        only_merge_answers: bool,
    },
}

/// Parsed command line.
#[derive(Debug, Clone)]
struct Options {
    /// Log at debug level.
    debug: bool,
    /// Command to run.
    cmd:   Cmd,
}

/// Parse the command line arguments and return the `Options`
fn options() -> Options {
    /// parses the source notebook
    fn source() -> impl Parser<PathBuf> {
        long("source")
            .help("Source notebook of the assignment, holding the tests")
            .argument::<PathBuf>("NOTEBOOK")
    }

    /// parses a single submission
    fn submission() -> impl Parser<PathBuf> {
        long("submission")
            .help("Submitted notebook")
            .argument::<PathBuf>("NOTEBOOK")
    }

    /// parses a directory or zip archive of submissions
    fn submissions() -> impl Parser<BatchInput> {
        let dir = long("submissions")
            .help("Directory searched for submitted notebooks")
            .argument::<PathBuf>("DIR")
            .map(BatchInput::Dir);
        let zip = long("submissions-zip")
            .help("Zip archive holding submitted notebooks")
            .argument::<PathBuf>("ZIP")
            .map(BatchInput::Zip);
        construct!([dir, zip])
    }

    /// parses the output folder
    fn output_folder() -> impl Parser<Option<PathBuf>> {
        long("output-folder")
            .help("Directory the generated files are written to")
            .argument::<PathBuf>("DIR")
            .optional()
    }

    /// parses the code template
    fn template() -> impl Parser<Option<PathBuf>> {
        long("template")
            .help("Template file with a {{ notebook_code }} line")
            .argument::<PathBuf>("FILE")
            .optional()
    }

    /// parses the results file
    fn results() -> impl Parser<Option<PathBuf>> {
        long("results")
            .help("Line-delimited JSON file results are appended to")
            .argument::<PathBuf>("FILE")
            .optional()
    }

    /// parses the cell comment switch
    fn with_cell_comments() -> impl Parser<bool> {
        long("with-cell-comments")
            .help("Precede every cell with comments holding its grading metadata")
            .switch()
    }

    /// parses the answers-only switch
    fn only_merge_answers() -> impl Parser<bool> {
        long("only-merge-answers")
            .help("Only take answer cells from the submission's counterpart; keep its other cells")
            .switch()
    }

    let code = {
        let source = source();
        let submission = submission();
        let output_python = long("output-python")
            .help("File the merged code is written to")
            .argument::<PathBuf>("FILE")
            .optional();
        let template = template();
        let with_cell_comments = with_cell_comments();
        let only_merge_answers = only_merge_answers();
        construct!(Cmd::Code {
            source,
            submission,
            output_python,
            template,
            with_cell_comments,
            only_merge_answers
        })
        .to_options()
        .command("code")
        .help("Merge one submission with its source and write the code")
    };

    let batch = {
        let source = source();
        let submissions = submissions();
        let output_folder = output_folder();
        let template = template();
        let with_cell_comments = with_cell_comments();
        let only_merge_answers = only_merge_answers();
        construct!(Cmd::Batch {
            source,
            submissions,
            output_folder,
            template,
            with_cell_comments,
            only_merge_answers
        })
        .to_options()
        .command("batch")
        .help("Merge every submission of a directory or zip archive and write their code")
    };

    let generate = {
        let source = source();
        let one = submission().map(Target::One);
        let many = submissions().map(Target::Many);
        let target = construct!([one, many]);
        let output_folder = output_folder();
        let results = results();
        let only_merge_answers = only_merge_answers();
        construct!(Cmd::Generate {
            source,
            target,
            output_folder,
            results,
            only_merge_answers
        })
        .to_options()
        .command("generate")
        .help("Synthesize self-scoring Python programs")
    };

    let run = {
        let source = source();
        let submission = submission();
        let results = results();
        let suppress_exception = long("suppress-exception")
            .help("Keep running the remaining cells after one raises")
            .switch();
        let hide_cell_output = long("hide-cell-output")
            .help("Do not echo what the cells print")
            .switch();
        let only_merge_answers = only_merge_answers();
        construct!(Cmd::Run {
            source,
            submission,
            results,
            suppress_exception,
            hide_cell_output,
            only_merge_answers
        })
        .to_options()
        .command("run")
        .help("Synthesize, run and score one submission")
    };

    let debug = short('d').long("debug").help("Log debug messages").switch();
    let cmd = construct!([code, batch, generate, run]);

    construct!(Options { debug, cmd })
        .to_options()
        .descr("Code extraction and grading for nbgrader notebooks")
        .run()
}

/// A row of the score table.
#[derive(Tabled)]
struct ScoreRow {
    /// Grade id of the test cell.
    #[tabled(rename = "Test")]
    test:       String,
    /// Points earned.
    #[tabled(rename = "Points")]
    points:     String,
    /// Points available.
    #[tabled(rename = "Out of")]
    max_points: String,
}

/// Formats an optional score for the table.
fn show_points(points: Option<f64>) -> String {
    points.map_or_else(|| "-".to_string(), |p| p.to_string())
}

/// Loads the source notebook, exiting if it cannot be read.
fn load_source(path: &Path) -> GraderNotebook {
    let source = GraderNotebook::from_path(path);
    if let Some(err) = source.load_error() {
        tracing::error!("Cannot use {} as source notebook: {err}", path.display());
        std::process::exit(MISSING_INPUT_STATUS);
    }
    source
}

/// Loads a batch of submissions, exiting if the directory or archive is
/// unusable.
fn load_submissions(input: &BatchInput, source: GraderNotebook) -> Submissions {
    let batch = match input {
        BatchInput::Dir(dir) => Submissions::from_dir(dir),
        BatchInput::Zip(archive) => Submissions::from_zip(archive),
    };
    match batch {
        Ok(batch) => batch.with_source(source),
        Err(err) => {
            tracing::error!("{err:#}");
            std::process::exit(MISSING_INPUT_STATUS);
        }
    }
}

/// Logs the outcome of every submission of a batch.
fn report(outcomes: &[BatchOutcome]) {
    let mut written = 0;
    for outcome in outcomes {
        match outcome.result() {
            Ok(path) => {
                written += 1;
                if outcome.failures() > 0 {
                    tracing::warn!(
                        "#{:04} {}: {} answers missing, wrote {}",
                        outcome.index(),
                        outcome.submission(),
                        outcome.failures(),
                        path.display()
                    );
                }
            }
            Err(err) => {
                tracing::error!("#{:04} {}: {err}", outcome.index(), outcome.submission());
            }
        }
    }
    tracing::info!("Wrote {written} of {} submissions", outcomes.len());
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let Options { debug, cmd } = options();

    let fmt = fmt::layer()
        .without_time()
        .with_file(false)
        .with_line_number(false);
    let filter_layer = LevelFilter::from_level(if debug { Level::DEBUG } else { Level::INFO });
    tracing_subscriber::registry()
        .with(fmt)
        .with(filter_layer)
        .init();

    let config = config::get();

    match cmd {
        Cmd::Code {
            source,
            submission,
            output_python,
            template,
            with_cell_comments,
            only_merge_answers,
        } => {
            let source = load_source(&source);
            let merged = Submission::from_path(submission).merge_code(&source, only_merge_answers);
            let template = template.or_else(|| config.template().map(Path::to_path_buf));
            let code = merged
                .notebook()
                .as_executable_source(template.as_deref(), with_cell_comments);

            let target = output_python.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PYTHON));
            std::fs::write(&target, code)
                .with_context(|| format!("Could not write {}", target.display()))?;
            tracing::info!("Wrote {}", target.display());
        }
        Cmd::Batch {
            source,
            submissions,
            output_folder,
            template,
            with_cell_comments,
            only_merge_answers,
        } => {
            let batch = load_submissions(&submissions, load_source(&source));
            let template = template.or_else(|| config.template().map(Path::to_path_buf));
            let target = output_folder.unwrap_or_else(|| config.output_folder().to_path_buf());

            let outcomes = batch.generate_python_files(
                &target,
                template.as_deref(),
                with_cell_comments,
                only_merge_answers,
            )?;
            report(&outcomes);
        }
        Cmd::Generate {
            source,
            target,
            output_folder,
            results,
            only_merge_answers,
        } => {
            let source = load_source(&source);
            let generator = NbgCodeGenerator::builder()
                .results_path(results.unwrap_or_else(|| config.results_path().to_path_buf()))
                .build();
            let folder = output_folder.unwrap_or_else(|| config.output_folder().to_path_buf());

            match target {
                Target::One(submission) => {
                    let merged =
                        Submission::from_path(submission).merge_code(&source, only_merge_answers);
                    generator.generate_file(merged.notebook(), &folder)?;
                }
                Target::Many(input) => {
                    let batch = load_submissions(&input, source);
                    let outcomes = batch.generate_programs(&folder, &generator, only_merge_answers)?;
                    report(&outcomes);
                }
            }
        }
        Cmd::Run {
            source,
            submission,
            results,
            suppress_exception,
            hide_cell_output,
            only_merge_answers,
        } => {
            let source = load_source(&source);
            let merged = Submission::from_path(submission).merge_code(&source, only_merge_answers);
            let results = results.unwrap_or_else(|| config.results_path().to_path_buf());
            let generator = NbgCodeGenerator::builder().results_path(results.clone()).build();
            let program = generator.generate_file(merged.notebook(), config.output_folder())?;

            let mut context = NotebookContext::builder()
                .name(merged.notebook().name())
                .show_output(!hide_cell_output)
                .suppress_exception(suppress_exception)
                .build();
            let record = run_program(&program, &mut context, Some(config.python_timeout())).await?;
            NotebookContext::persist(&record, &results)?;

            let rows: Vec<ScoreRow> = context
                .tests()
                .iter()
                .map(|test| ScoreRow {
                    test:       test.grade_id().to_string(),
                    points:     show_points(test.points()),
                    max_points: show_points(test.max_points()),
                })
                .collect();
            println!(
                "{}",
                Table::new(&rows)
                    .with(Panel::header(format!("Tests of {}", record.notebook())))
                    .with(Panel::footer(format!("Total: {}", record.total())))
                    .with(Style::modern())
            );
        }
    };

    Ok(())
}
