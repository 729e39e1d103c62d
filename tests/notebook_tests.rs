//! Tests for loading, exporting and merging notebooks.

use std::path::PathBuf;

use nbgcode::notebook::{CellRole, GraderNotebook, Submission};

const ANSWER: &str = "cell-9fb6fe3588ec4909";
const TESTS: &str = "cell-744e5dbe470759ae";

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join("python_addition")
        .join(name)
}

fn source() -> GraderNotebook {
    GraderNotebook::from_path(fixture("python_addition_source.ipynb"))
}

#[test]
fn extracts_code_of_every_variant() {
    let cases = [
        (
            "python_addition_source.ipynb",
            vec![ANSWER, "### BEGIN SOLUTION", TESTS, "### BEGIN HIDDEN TESTS"],
        ),
        (
            "python_addition_release.ipynb",
            vec![ANSWER, "# YOUR CODE HERE", "raise NotImplementedError()", TESTS],
        ),
        (
            "python_addition_correct_submission.ipynb",
            vec![ANSWER, "# YOUR CODE HERE", "z = x + y", TESTS],
        ),
    ];

    for (file, expected) in cases {
        let notebook = GraderNotebook::from_path(fixture(file));
        assert!(notebook.is_loaded(), "{file} loads");
        let code = notebook.as_executable_source(None, false);
        for needle in expected {
            assert!(code.contains(needle), "{file}: missing {needle:?} in\n{code}");
        }
        assert!(!code.contains("!echo"), "{file}: shell lines are dropped");
        assert!(!code.contains("Store the sum"), "{file}: markdown is skipped");
    }
}

#[test]
fn name_comes_from_the_file_stem() {
    assert_eq!(source().name(), "python_addition_source");
}

#[test]
fn roles_of_the_source_cells() {
    let source = source();

    assert_eq!(source.graded_count(), 2);
    assert_eq!(
        source.graded_cell(ANSWER).and_then(|c| c.role()),
        Some(CellRole::AutogradedAnswer)
    );
    assert_eq!(
        source.graded_cell(TESTS).and_then(|c| c.role()),
        Some(CellRole::AutogradedTests)
    );
    assert!(source.solutions().contains(ANSWER));
}

#[test]
fn cell_comments_carry_grading_metadata() {
    let code = source().as_executable_source(None, true);

    assert!(code.contains(&format!("#grade_id={TESTS}")));
    assert!(code.contains("#points=1"));
    assert!(code.contains("#solution=True"));
}

#[test]
fn template_wraps_the_code() {
    let code = source().as_executable_source(Some(&fixture("template.py")), false);

    assert!(code.starts_with("\"\"\"Extracted submission.\"\"\""));
    assert!(code.contains("def main():\n    # id: cell-2b7e51d0a0c3f9e1\n"));
    assert!(code.contains("    z = x + y\n"));
    assert!(!code.contains("notebook_code"));
    assert!(code.trim_end().ends_with("main()"));
}

#[test]
fn missing_template_falls_back_to_bare_code() {
    let bare = source().as_executable_source(None, false);
    let fallback = source().as_executable_source(Some(&fixture("no-such-template.py")), false);

    assert_eq!(bare, fallback);
}

#[test]
fn missing_file_loads_empty() {
    let notebook = GraderNotebook::from_path(fixture("does-not-exist.ipynb"));

    assert!(!notebook.is_loaded());
    assert!(notebook.load_error().is_some());
    assert!(notebook.cells().is_empty());
    assert_eq!(notebook.as_executable_source(None, false), "");
}

#[test]
fn merged_submission_keeps_answers_and_gains_hidden_tests() {
    let submission = Submission::from_path(fixture("python_addition_correct_submission.ipynb"));
    let merged = submission.merge_code(&source(), false);
    let code = merged.notebook().as_executable_source(None, false);

    assert!(merged.failures().is_empty());
    for needle in [ANSWER, "# YOUR CODE HERE", "z = x + y", "### BEGIN HIDDEN TESTS"] {
        assert!(code.contains(needle), "missing {needle:?} in\n{code}");
    }
    assert!(!code.contains("### BEGIN SOLUTION"));
    assert!(code.contains("scratch work"));
    assert_eq!(merged.notebook().name(), "python_addition_correct_submission");
}

#[test]
fn release_merged_with_source_is_a_failing_answer_not_a_failure() {
    let release = Submission::from_path(fixture("python_addition_release.ipynb"));
    let merged = release.merge_code(&source(), true);

    assert!(merged.failures().is_empty());
    let answer = merged.notebook().graded_cell(ANSWER).expect("answer");
    assert!(answer.source_text().contains("raise NotImplementedError()"));
}

#[test]
fn merged_notebook_serializes_back_to_nbformat() {
    let submission = Submission::from_path(fixture("python_addition_correct_submission.ipynb"));
    let merged = submission.merge_code(&source(), false);
    let json = merged.notebook().to_json();

    assert_eq!(json["nbformat"], 4);
    let reloaded = GraderNotebook::from_value(json, "reloaded");
    assert_eq!(reloaded.cells(), merged.notebook().cells());
    assert_eq!(
        reloaded
            .graded_cell(TESTS)
            .and_then(|c| c.grading_metadata())
            .and_then(|m| m.notebook().cloned()),
        Some(serde_json::json!("python_addition_source"))
    );
}
