//! End-to-end tests: synthesize programs and run them with Python. Skipped
//! when no interpreter is on path.

use std::{ffi::OsString, path::PathBuf, time::Duration};

use nbgcode::{
    codegen::{NbgCodeGenerator, NotebookContext, NotebookResult, run_program},
    notebook::{GraderNotebook, MergedNotebook, Submission},
    process::run_collect,
    util::python_path,
};

const TESTS: &str = "cell-744e5dbe470759ae";

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join("python_addition")
        .join(name)
}

fn merge(submission: &str) -> MergedNotebook {
    let source = GraderNotebook::from_path(fixture("python_addition_source.ipynb"));
    Submission::from_path(fixture(submission)).merge_code(&source, false)
}

fn merge_wrong_submission() -> MergedNotebook {
    let merged = merge("submissions/Group 2_122543/python_addition_wrong_submission.ipynb");
    assert!(merged.failures().is_empty(), "answer comes from the submission");
    merged
}

fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("nbg-runner-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    dir
}

fn context_for(merged: &MergedNotebook, suppress_exception: bool) -> NotebookContext {
    NotebookContext::builder()
        .name(merged.notebook().name())
        .show_output(false)
        .suppress_exception(suppress_exception)
        .build()
}

#[tokio::test]
async fn correct_submission_earns_the_point() {
    if python_path().is_err() {
        return;
    }
    let dir = temp_dir();
    let merged = merge("python_addition_correct_submission.ipynb");
    let program = NbgCodeGenerator::default()
        .generate_file(merged.notebook(), &dir)
        .expect("write program");

    let mut context = context_for(&merged, false);
    let record = run_program(&program, &mut context, Some(Duration::from_secs(60)))
        .await
        .expect("program runs");

    assert_eq!(record.notebook(), "python_addition_correct_submission");
    assert_eq!(record.total(), 1.0);
    assert_eq!(record.score(TESTS), Some(Some(1.0)));
    assert_eq!(context.tests()[0].max_points(), Some(1.0));

    std::fs::remove_dir_all(&dir).expect("cleanup");
}

#[tokio::test]
async fn standalone_program_prints_and_appends_its_results() {
    let Ok(python) = python_path() else {
        return;
    };
    let dir = temp_dir();
    let results = dir.join("results.json");
    let merged = merge("python_addition_correct_submission.ipynb");
    let program = NbgCodeGenerator::builder()
        .results_path(&results)
        .build()
        .generate_file(merged.notebook(), &dir)
        .expect("write program");

    let args = vec![program.clone().into_os_string(), OsString::from("--hide_cell_output")];
    for _ in 0..2 {
        let collected = run_collect(&python, &args, Some(&dir), Some(Duration::from_secs(60)))
            .await
            .expect("program runs");
        let stdout = String::from_utf8_lossy(&collected.stdout);
        assert!(collected.status.success(), "{}", String::from_utf8_lossy(&collected.stderr));
        assert!(stdout.contains(
            "[NbgCellTestResult(grade_id='cell-744e5dbe470759ae', max_points=1, points=1.0)]"
        ));
        assert!(!stdout.contains("4.0"));
    }

    let records = NotebookResult::read_all(&results).expect("results file");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].total(), 1.0);
    assert_eq!(records[0].score(TESTS), Some(Some(1.0)));

    std::fs::remove_dir_all(&dir).expect("cleanup");
}

#[tokio::test]
async fn failing_test_stops_a_strict_run() {
    if python_path().is_err() {
        return;
    }
    let dir = temp_dir();
    let merged = merge_wrong_submission();
    let program = NbgCodeGenerator::default()
        .generate_file(merged.notebook(), &dir)
        .expect("write program");

    let mut context = context_for(&merged, false);
    let err = run_program(&program, &mut context, Some(Duration::from_secs(60)))
        .await
        .expect_err("assertion propagates");

    let message = format!("{err:#}");
    assert!(message.contains("AssertionError"), "{message}");
    assert!(!message.contains("NameError"), "{message}");

    std::fs::remove_dir_all(&dir).expect("cleanup");
}

#[tokio::test]
async fn failing_test_scores_nothing_when_suppressed() {
    if python_path().is_err() {
        return;
    }
    let dir = temp_dir();
    let merged = merge_wrong_submission();
    let program = NbgCodeGenerator::default()
        .generate_file(merged.notebook(), &dir)
        .expect("write program");

    let mut context = context_for(&merged, true);
    let record = run_program(&program, &mut context, Some(Duration::from_secs(60)))
        .await
        .expect("program runs");

    assert_eq!(record.total(), 0.0);
    assert_eq!(record.score(TESTS), Some(None));
    assert_eq!(
        serde_json::to_string(&record).expect("serialize"),
        format!(r#"{{"notebook":"python_addition_wrong_submission","total":0.0,"{TESTS}":null}}"#)
    );

    std::fs::remove_dir_all(&dir).expect("cleanup");
}

#[tokio::test]
async fn hoisted_imports_are_usable() {
    if python_path().is_err() {
        return;
    }
    let dir = temp_dir();
    let notebook = GraderNotebook::from_value(
        serde_json::json!({ "cells": [
            { "cell_type": "code", "id": "c1", "metadata": {}, "source": "import os\nprint(os.sep)\n" },
            { "cell_type": "code", "id": "t1", "source": "import math\nmath.floor(2.5)\n", "metadata": {
                "nbgrader": { "schema_version": 3, "grade": true, "grade_id": "t1",
                              "solution": false, "locked": true, "points": 2 }
            }},
        ]}),
        "hoisting",
    );
    let program = NbgCodeGenerator::default()
        .generate_file(&notebook, &dir)
        .expect("write program");

    let mut context = NotebookContext::builder()
        .name("hoisting")
        .show_output(false)
        .build();
    let record = run_program(&program, &mut context, Some(Duration::from_secs(60)))
        .await
        .expect("program runs");

    assert_eq!(record.score("t1"), Some(Some(2.0)));

    std::fs::remove_dir_all(&dir).expect("cleanup");
}
