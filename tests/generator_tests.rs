//! Tests for program synthesis.

use std::path::PathBuf;

use nbgcode::{
    codegen::NbgCodeGenerator,
    notebook::{GraderNotebook, Submission},
};
use serde_json::{Value, json};

const ANSWER: &str = "cell-9fb6fe3588ec4909";
const TESTS: &str = "cell-744e5dbe470759ae";

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join("python_addition")
        .join(name)
}

fn merged_correct_submission() -> GraderNotebook {
    let source = GraderNotebook::from_path(fixture("python_addition_source.ipynb"));
    Submission::from_path(fixture("python_addition_correct_submission.ipynb"))
        .merge_code(&source, false)
        .into_notebook()
}

fn test_cell(id: &str, source: &str, points: Value) -> Value {
    json!({
        "cell_type": "code",
        "id": id,
        "metadata": { "nbgrader": {
            "schema_version": 3, "grade": true, "grade_id": id,
            "solution": false, "locked": true, "points": points,
        }},
        "source": source,
        "outputs": [],
    })
}

fn single_cell(cell: Value) -> String {
    let notebook = GraderNotebook::from_value(json!({ "cells": [cell] }), "single");
    NbgCodeGenerator::default().generate(&notebook)
}

#[test]
fn cells_run_in_document_order() {
    let program = NbgCodeGenerator::default().generate(&merged_correct_submission());

    let position = |needle: &str| {
        program
            .find(needle)
            .unwrap_or_else(|| panic!("missing {needle:?} in\n{program}"))
    };
    let helpers = position("# cell-2b7e51d0a0c3f9e1\n");
    let answer = position(&format!("# {ANSWER} (Autograded answer)"));
    let tests = position(&format!("# {TESTS} (Autograded tests)"));
    let scratch = position("# cell-0d9a8f7e6c5b4a31\n");

    assert!(helpers < answer && answer < tests && tests < scratch);
    assert_eq!(program.matches("with notebook_context(cell_metadata=").count(), 4);
    assert!(!program.contains("Store the sum"));
}

#[test]
fn imports_are_hoisted_and_shell_lines_commented() {
    let program = NbgCodeGenerator::default().generate(&merged_correct_submission());

    assert!(program.starts_with("import math\n"));
    assert!(program.contains("    pass  # import math\n"));
    assert!(program.contains("    #!echo preparing\n"));
    assert!(program.contains("    print(math.sqrt(16))\n"));
}

#[test]
fn test_cell_prints_its_last_expression() {
    let program = NbgCodeGenerator::default().generate(&merged_correct_submission());

    assert!(program.contains("    ### END HIDDEN TESTS\n    1\n    print(1)\n    pass\n"));
}

#[test]
fn snapshots_leave_out_code_and_provenance() {
    let program = NbgCodeGenerator::default().generate(&merged_correct_submission());

    assert!(!program.contains("\"source\":"));
    assert!(!program.contains("\"outputs\":"));
    assert!(!program.contains("\"notebook\": \"python_addition_source\""));
    assert!(program.contains(&format!("\"grade_id\": \"{TESTS}\"")));
    assert!(program.contains("\"grade\": True"));
}

#[test]
fn program_knows_its_notebook_and_results_file() {
    let generator = NbgCodeGenerator::builder()
        .results_path("/tmp/all-results.json")
        .build();
    let program = generator.generate(&merged_correct_submission());

    assert!(program.contains(
        "NotebookContext.from_argv(\"python_addition_correct_submission\", _nbg_sys.argv[1:], \
         \"/tmp/all-results.json\")"
    ));
    assert!(program.trim_end().ends_with("notebook_context.finish()"));
}

#[test]
fn assertion_prints_the_cells_points() {
    let program = single_cell(test_cell("t1", "x = 1\nassert x == 1\n", json!(2)));
    assert!(program.contains("    assert x == 1\n    print(2)\n    pass\n"));

    let program = single_cell(test_cell("t1", "assert True", json!(0.5)));
    assert!(program.contains("    assert True\n    print(0.5)\n    pass\n"));
}

#[test]
fn existing_print_is_not_repeated() {
    let program = single_cell(test_cell("t1", "print(3)\n", json!(3)));
    assert_eq!(program.matches("print(3)").count(), 1);
}

#[test]
fn no_printout_without_a_usable_last_statement() {
    let program = single_cell(test_cell("t1", "score = 1\n", json!(1)));
    assert!(program.contains("    score = 1\n    pass\n"));

    let program = single_cell(test_cell("t1", "", json!(1)));
    assert!(program.contains("}}}):\n    pass\n"));
}

#[test]
fn unparsable_cell_is_kept_verbatim() {
    let program = single_cell(test_cell("t1", "import os\ndef broken(:\n", json!(1)));

    assert!(program.contains("    import os\n    def broken(:\n    pass\n"));
    assert!(!program.contains("pass  # import os"));
}

#[test]
fn answer_cells_get_no_printout() {
    let cell = json!({
        "cell_type": "code",
        "id": "a1",
        "metadata": { "nbgrader": {
            "schema_version": 3, "grade": false, "grade_id": "a1",
            "solution": true, "locked": false,
        }},
        "source": "z = 1\nz\n",
    });
    let program = single_cell(cell);

    assert!(program.contains("    z = 1\n    z\n    pass\n"));
    assert!(!program.contains("print(z)"));
}

#[test]
fn future_imports_come_first() {
    let notebook = GraderNotebook::from_value(
        json!({ "cells": [
            { "cell_type": "code", "id": "c1", "metadata": {}, "source": "import os\n" },
            { "cell_type": "code", "id": "c2", "metadata": {}, "source": "from __future__ import annotations\n" },
        ]}),
        "future",
    );
    let program = NbgCodeGenerator::default().generate(&notebook);

    assert!(program.starts_with("from __future__ import annotations\nimport os\n"));
}

#[test]
fn generate_file_sanitizes_the_name() {
    let dir = std::env::temp_dir().join(format!("nbg-generate-{}", uuid::Uuid::new_v4()));
    let notebook = GraderNotebook::from_value(json!({ "cells": [] }), "Group 1/my notebook");

    let path = NbgCodeGenerator::default()
        .generate_file(&notebook, &dir)
        .expect("write program");

    assert_eq!(path, dir.join("test_Group_1_my_notebook.py"));
    let program = std::fs::read_to_string(&path).expect("read program");
    assert!(program.contains("class NotebookContext"));

    std::fs::remove_dir_all(&dir).expect("cleanup");
}

#[test]
fn continuation_lines_of_multiline_strings_are_indented_too() {
    let notebook = GraderNotebook::from_value(
        json!({ "cells": [
            { "cell_type": "code", "id": "c1", "metadata": {}, "source": "text = \"\"\"first\nsecond\"\"\"\n" },
        ]}),
        "strings",
    );
    let program = NbgCodeGenerator::default().generate(&notebook);

    assert!(program.contains("    text = \"\"\"first\n    second\"\"\"\n    pass\n"));
}
