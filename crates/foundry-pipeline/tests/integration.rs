//! End-to-end pipeline tests against a model backend that answers by task.
//!
//! Each test builds a project in a temporary directory and runs the driver
//! from a chosen phase. Phases whose artifacts are seeded on disk are loaded,
//! so every test exercises only the phase it is about.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use foundry_llm::{Completion, CompletionRequest, Model, ModelBackend, Usage};
use foundry_pipeline::{PhaseName, PhaseState, Pipeline, ProjectConfig, Workspace};
use foundry_types::{FoundryError, Result};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Replies with the next text of the first route whose key occurs in the
/// prompt. A route's last reply repeats once its others are used up.
struct RoutedBackend {
    routes: Mutex<Vec<(&'static str, VecDeque<String>)>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ModelBackend for RoutedBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let text = {
            let mut routes = self.routes.lock().unwrap();
            let replies = routes
                .iter_mut()
                .find(|(key, _)| request.prompt.contains(key))
                .map(|(_, replies)| replies)
                .ok_or_else(|| FoundryError::Other("no scripted reply for prompt".into()))?;
            if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                replies.front().cloned().unwrap_or_default()
            }
        };
        Ok(Completion {
            text,
            model: request.model.clone(),
            usage: Usage::default(),
        })
    }

    fn name(&self) -> &str {
        "routed"
    }

    fn default_model(&self) -> &str {
        "routed-1"
    }
}

const GENERATE_REQUIREMENTS: &str = "functional requirements the software must meet";
const GENERATE_TESTS_PLAN: &str = "write a numbered list of test cases";
const GENERATE_CODE: &str = "write Python code that satisfies";
const VALIDATE_CODE: &str = "properly implemented by the source code";
const ADD_MISSING: &str = "were missed or only partly implemented";
const GENERATE_TEST_SCRIPT: &str = "Create a file called test.py";
const ANALYZE_RUN: &str = "Decide whether test.py itself ran";
const EXAMINE_OUTPUT: &str = "Examine its output below";
const INDEX_CODE: &str = "semantically coherent segments";

const CALC: &str = "def add(a, b):\n    return a + b\n\ndef sub(a, b):\n    return a - b\n";

fn req(id: &str, details: &str) -> String {
    format!("<req><requirement_id>{id}</requirement_id><requirement_details>{details}</requirement_details></req>")
}

fn test_record(id: &str, status: Option<&str>) -> String {
    let status = status
        .map(|s| format!("<test_status>{s}</test_status>"))
        .unwrap_or_default();
    format!(
        "<test><test_id>{id}</test_id><requirement_id>R1</requirement_id>\
         <test_details>add 1 and 2</test_details><expected_result>3</expected_result>{status}</test>"
    )
}

fn file_record(name: &str, content: &str) -> String {
    format!("<file><file_name>{name}</file_name><file_content>{content}</file_content></file>")
}

fn imp(id: &str, verdict: &str) -> String {
    format!(
        "<imp><requirement_id>{id}</requirement_id><requirement_implemented>{verdict}</requirement_implemented>\
         <notes>checked</notes></imp>"
    )
}

fn segment(name: &str, content: &str) -> String {
    format!(
        "<code_segment><file_name>{name}</file_name><segment_description>one function</segment_description>\
         <segment_content>{content}</segment_content></code_segment>"
    )
}

struct Harness {
    pipeline: Pipeline,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    fn prompts_containing(&self, key: &str) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(key))
            .cloned()
            .collect()
    }

    fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

fn harness(root: &Path, routes: Vec<(&'static str, String)>, tweak: impl FnOnce(&mut ProjectConfig)) -> Harness {
    let routes = routes.into_iter().map(|(key, reply)| (key, vec![reply])).collect();
    sequenced_harness(root, routes, tweak)
}

fn sequenced_harness(
    root: &Path,
    routes: Vec<(&'static str, Vec<String>)>,
    tweak: impl FnOnce(&mut ProjectConfig),
) -> Harness {
    let mut config = ProjectConfig::new("calc");
    config.projects_root = root.to_path_buf();
    config.provision_venv = false;
    tweak(&mut config);

    let prompts = Arc::new(Mutex::new(Vec::new()));
    let backend = RoutedBackend {
        routes: Mutex::new(
            routes
                .into_iter()
                .map(|(key, replies)| (key, replies.into()))
                .collect(),
        ),
        prompts: prompts.clone(),
    };
    let pipeline = Pipeline::new(Workspace::new(config).unwrap(), Model::new(backend));
    Harness { pipeline, prompts }
}

fn project(root: &Path) -> std::path::PathBuf {
    root.join("calc")
}

fn seed(root: &Path, rel: &str, content: &str) {
    let path = project(root).join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn seed_planning(root: &Path) {
    seed(
        root,
        "requirements.json",
        r#"{"requirements": [
            {"requirement_id": "R1", "requirement_details": "adds numbers"},
            {"requirement_id": "R2", "requirement_details": "subtracts numbers"},
            {"requirement_id": "R3", "requirement_details": "multiplies numbers"}
        ]}"#,
    );
    seed(
        root,
        "test_plan.json",
        r#"{"tests": [{"test_id": "T1", "requirement_id": "R1", "test_details": "add 1 and 2", "expected_result": "3"}]}"#,
    );
}

fn seed_development(root: &Path) {
    seed(root, "src/calc.py", "def add(a, b):\n    return a + b\n");
    seed(root, "implementation.json", r#"{"implementation": []}"#);
}

fn read_json(root: &Path, rel: &str) -> serde_json::Value {
    let text = std::fs::read_to_string(project(root).join(rel)).unwrap();
    serde_json::from_str(&text).unwrap()
}

// ---------------------------------------------------------------------------
// Planning and resumption
// ---------------------------------------------------------------------------

#[tokio::test]
async fn planning_writes_requirements_and_test_plan() {
    let dir = tempfile::tempdir().unwrap();
    seed_development(dir.path());
    seed(dir.path(), "src/test.py", "print('ok')\n");

    let routes = vec![
        (
            GENERATE_REQUIREMENTS,
            format!("Requirements:\n{}{}", req("R1", "adds numbers"), req("R2", "subtracts numbers")),
        ),
        (GENERATE_TESTS_PLAN, test_record("T1", None)),
    ];
    let mut h = harness(dir.path(), routes, |_| {});

    let data = h
        .pipeline
        .run(PhaseName::Planning, "A calculator".into())
        .await
        .unwrap();

    assert_eq!(h.call_count(), 2);
    assert_eq!(data["specs"], "A calculator");
    assert_eq!(data["requirements"].as_array().unwrap().len(), 2);
    assert_eq!(data["tests"][0]["test_id"], "T1");
    assert_eq!(read_json(dir.path(), "requirements.json")["requirements"][1]["requirement_id"], "R2");
    assert!(project(dir.path()).join("test_plan.json").is_file());

    // The test plan prompt carries the generated requirements.
    let plan_prompt = &h.prompts_containing(GENERATE_TESTS_PLAN)[0];
    assert!(plan_prompt.contains("subtracts numbers"));

    let planning = h.pipeline.phase(PhaseName::Planning).unwrap();
    assert_eq!(planning.state(), PhaseState::Validated);
    assert!(planning.is_complete());

    // Later phases were complete on disk and only loaded.
    assert!(data.contains_key("implementation"));
    assert_eq!(data["files"].as_array().unwrap().len(), 2);
    h.pipeline.shutdown().await;
}

#[tokio::test]
async fn completed_phases_are_loaded_without_model_calls() {
    let dir = tempfile::tempdir().unwrap();
    seed_planning(dir.path());
    seed_development(dir.path());
    seed(dir.path(), "src/test.py", "print('ok')\n");

    let mut h = harness(dir.path(), Vec::new(), |_| {});
    let data = h
        .pipeline
        .run(PhaseName::Planning, "A calculator".into())
        .await
        .unwrap();

    assert_eq!(h.call_count(), 0);
    assert_eq!(data["requirements"].as_array().unwrap().len(), 3);
    assert_eq!(data["tests"][0]["test_id"], "T1");
    assert_eq!(data["specs"], "A calculator");
    for name in PhaseName::ALL {
        assert_eq!(h.pipeline.phase(name).unwrap().state(), PhaseState::Validated);
    }
}

#[tokio::test]
async fn later_start_requires_planning_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(dir.path(), Vec::new(), |_| {});

    let err = h
        .pipeline
        .run(PhaseName::Development, "A calculator".into())
        .await
        .unwrap_err();
    assert!(matches!(err, FoundryError::PhaseError { .. }));
    assert!(err.to_string().contains("run the Planning phase first"));
    assert_eq!(h.call_count(), 0);
}

#[tokio::test]
async fn exhausted_task_fails_the_phase() {
    let dir = tempfile::tempdir().unwrap();
    // Undeclared tags on every attempt.
    let routes = vec![(GENERATE_REQUIREMENTS, file_record("x.py", "x = 1"))];
    let mut h = harness(dir.path(), routes, |c| c.max_attempts = 2);

    let err = h
        .pipeline
        .run(PhaseName::Planning, "A calculator".into())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("generate_requirements"));
    assert_eq!(h.call_count(), 2);
    assert_eq!(
        h.pipeline.phase(PhaseName::Planning).unwrap().state(),
        PhaseState::FailedValidation
    );
}

// ---------------------------------------------------------------------------
// Development
// ---------------------------------------------------------------------------

#[tokio::test]
async fn development_checks_requirements_in_chunks_and_fills_gaps() {
    let dir = tempfile::tempdir().unwrap();
    seed_planning(dir.path());
    seed(dir.path(), "src/test.py", "print('ok')\n");

    // R1 passes, R2 fails, R3 is never reported.
    let verdicts = format!("{}{}", imp("R1", "Pass"), imp("R2", "fail"));
    let routes = vec![
        (GENERATE_CODE, file_record("calc.py", "def add(a, b):\n    return a + b\n")),
        (VALIDATE_CODE, verdicts),
        (ADD_MISSING, file_record("more.py", "def sub(a, b):\n    return a - b\n")),
    ];
    let mut h = harness(dir.path(), routes, |c| c.validation_chunk_size = 2);

    let data = h
        .pipeline
        .run(PhaseName::Development, "A calculator".into())
        .await
        .unwrap();

    assert_eq!(h.prompts_containing(VALIDATE_CODE).len(), 2);
    let missing = h.prompts_containing(ADD_MISSING);
    assert_eq!(missing.len(), 1);
    assert!(missing[0].contains("subtracts numbers"));
    assert!(missing[0].contains("multiplies numbers"));
    assert!(!missing[0].contains("adds numbers"));
    // The freshly generated code is part of the validation input.
    assert!(h.prompts_containing(VALIDATE_CODE)[0].contains("calc.py"));

    let implementation = read_json(dir.path(), "implementation.json");
    assert_eq!(implementation["implementation"].as_array().unwrap().len(), 4);
    assert!(project(dir.path()).join("src/more.py").is_file());

    let files: Vec<&str> = data["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["file_name"].as_str().unwrap())
        .collect();
    assert_eq!(files, vec!["calc.py", "more.py", "test.py"]);
    assert_eq!(
        h.pipeline.phase(PhaseName::Development).unwrap().state(),
        PhaseState::Validated
    );
}

#[tokio::test]
async fn development_skips_gap_filling_when_everything_passes() {
    let dir = tempfile::tempdir().unwrap();
    seed_planning(dir.path());
    seed(dir.path(), "src/test.py", "print('ok')\n");

    let verdicts = format!("{}{}{}", imp("R1", "yes"), imp("R2", "PASS"), imp("R3", "true"));
    let routes = vec![
        (GENERATE_CODE, file_record("calc.py", "def add(a, b):\n    return a + b\n")),
        (VALIDATE_CODE, verdicts),
    ];
    let mut h = harness(dir.path(), routes, |_| {});

    h.pipeline
        .run(PhaseName::Development, "A calculator".into())
        .await
        .unwrap();
    assert_eq!(h.prompts_containing(VALIDATE_CODE).len(), 1);
    assert!(h.prompts_containing(ADD_MISSING).is_empty());
}

#[tokio::test]
async fn failed_gap_filling_leaves_development_incomplete() {
    let dir = tempfile::tempdir().unwrap();
    seed_planning(dir.path());

    let verdicts = format!("{}{}{}", imp("R1", "pass"), imp("R2", "fail"), imp("R3", "pass"));
    let routes = vec![
        (GENERATE_CODE, file_record("calc.py", CALC)),
        (VALIDATE_CODE, verdicts.clone()),
        // Undeclared tag on every attempt.
        (ADD_MISSING, req("R9", "not code")),
    ];
    let mut h = harness(dir.path(), routes, |c| c.max_attempts = 2);

    let err = h
        .pipeline
        .run(PhaseName::Development, "A calculator".into())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("add_missing_requirements"));
    assert!(project(dir.path()).join("src/calc.py").is_file());
    assert!(!project(dir.path()).join("implementation.json").exists());

    let development = h.pipeline.phase(PhaseName::Development).unwrap();
    assert!(!development.is_complete());
    assert_eq!(development.state(), PhaseState::FailedValidation);

    // The next run does the phase again instead of loading it.
    let routes = vec![
        (GENERATE_CODE, file_record("calc.py", CALC)),
        (VALIDATE_CODE, verdicts),
        (ADD_MISSING, file_record("calc.py", CALC)),
        (GENERATE_TEST_SCRIPT, file_record("test.py", "print('T1 pass')")),
        (ANALYZE_RUN, "SUCCESS".to_string()),
        (EXAMINE_OUTPUT, test_record("T1", Some("pass"))),
    ];
    let mut retry = harness(dir.path(), routes, |c| c.interpreter = "true".into());
    retry
        .pipeline
        .run(PhaseName::Development, "A calculator".into())
        .await
        .unwrap();
    assert_eq!(retry.prompts_containing(GENERATE_CODE).len(), 1);
    assert_eq!(retry.prompts_containing(ADD_MISSING).len(), 1);
    assert!(project(dir.path()).join("implementation.json").is_file());
    retry.pipeline.shutdown().await;
}

#[tokio::test]
async fn indexed_code_is_kept_when_segments_reassemble() {
    let dir = tempfile::tempdir().unwrap();
    seed_planning(dir.path());

    let verdicts = format!("{}{}{}", imp("R1", "pass"), imp("R2", "pass"), imp("R3", "pass"));
    let segments = format!(
        "{}{}",
        segment("calc.py", "def add(a, b):\n    return a + b\n"),
        segment("calc.py", "\ndef sub(a, b):\n    return a - b\n"),
    );
    let routes = vec![
        (GENERATE_CODE, file_record("calc.py", CALC)),
        (VALIDATE_CODE, verdicts),
        (INDEX_CODE, segments),
    ];
    let mut h = harness(dir.path(), routes, |c| c.index_code = true);

    let data = h
        .pipeline
        .run(PhaseName::Development, "A calculator".into())
        .await
        .unwrap();

    assert_eq!(h.prompts_containing(INDEX_CODE).len(), 1);
    assert_eq!(data["code_segments"].as_array().unwrap().len(), 2);
    let on_disk = read_json(dir.path(), "llm_data/code_segments.json");
    assert_eq!(on_disk["code_segments"][1]["file_name"], "calc.py");
    assert!(h.pipeline.phase(PhaseName::Development).unwrap().is_complete());
}

#[tokio::test]
async fn indexing_retries_segments_that_do_not_reassemble() {
    let dir = tempfile::tempdir().unwrap();
    seed_planning(dir.path());

    let verdicts = format!("{}{}{}", imp("R1", "pass"), imp("R2", "pass"), imp("R3", "pass"));
    let partial = segment("calc.py", "def add(a, b):\n    return a + b\n");
    let complete = format!(
        "{}{}",
        segment("calc.py", "def add(a, b):\n    return a + b\n"),
        segment("calc.py", "\ndef sub(a, b):\n    return a - b\n"),
    );
    let routes = vec![
        (GENERATE_CODE, vec![file_record("calc.py", CALC)]),
        (VALIDATE_CODE, vec![verdicts]),
        (INDEX_CODE, vec![partial, complete]),
    ];
    let mut h = sequenced_harness(dir.path(), routes, |c| c.index_code = true);

    let data = h
        .pipeline
        .run(PhaseName::Development, "A calculator".into())
        .await
        .unwrap();

    assert_eq!(h.prompts_containing(INDEX_CODE).len(), 2);
    assert_eq!(data["code_segments"].as_array().unwrap().len(), 2);
    let on_disk = read_json(dir.path(), "llm_data/code_segments.json");
    assert_eq!(on_disk["code_segments"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn indexing_gives_up_after_one_call_per_attempt() {
    let dir = tempfile::tempdir().unwrap();
    seed_planning(dir.path());

    let verdicts = format!("{}{}{}", imp("R1", "pass"), imp("R2", "pass"), imp("R3", "pass"));
    let routes = vec![
        (GENERATE_CODE, file_record("calc.py", CALC)),
        (VALIDATE_CODE, verdicts),
        (INDEX_CODE, segment("calc.py", "def add(a, b):\n    return a + b\n")),
    ];
    let mut h = harness(dir.path(), routes, |c| {
        c.index_code = true;
        c.max_attempts = 2;
    });

    let data = h
        .pipeline
        .run(PhaseName::Development, "A calculator".into())
        .await
        .unwrap();

    assert_eq!(h.prompts_containing(INDEX_CODE).len(), 2);
    assert!(!data.contains_key("code_segments"));
    assert!(!project(dir.path()).join("llm_data/code_segments.json").exists());
    // Indexing is optional; the phase still completes.
    assert!(project(dir.path()).join("implementation.json").is_file());
    assert_eq!(
        h.pipeline.phase(PhaseName::Development).unwrap().state(),
        PhaseState::Validated
    );
}

// ---------------------------------------------------------------------------
// Testing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn testing_stops_once_every_test_passes() {
    let dir = tempfile::tempdir().unwrap();
    seed_planning(dir.path());
    seed_development(dir.path());

    let routes = vec![
        (GENERATE_TEST_SCRIPT, file_record("test.py", "print('T1 pass')")),
        (ANALYZE_RUN, "SUCCESS".to_string()),
        (EXAMINE_OUTPUT, test_record("T1", Some("pass"))),
    ];
    // `true` stands in for the interpreter so the script run needs no Python.
    let mut h = harness(dir.path(), routes, |c| c.interpreter = "true".into());

    let data = h
        .pipeline
        .run(PhaseName::Testing, "A calculator".into())
        .await
        .unwrap();

    assert_eq!(data["tests_passed"], true);
    assert_eq!(h.prompts_containing(ANALYZE_RUN).len(), 1);
    assert_eq!(h.prompts_containing(EXAMINE_OUTPUT).len(), 1);
    assert!(project(dir.path()).join("src/test.py").is_file());
    assert_eq!(read_json(dir.path(), "test_plan.json")["tests"][0]["test_status"], "pass");
    assert!(h.pipeline.shell().is_started().await);
    // No virtual environment, so nothing is frozen.
    assert!(!data.contains_key("requirements_file"));

    h.pipeline.shutdown().await;
    assert!(!h.pipeline.shell().is_started().await);
}

#[tokio::test]
async fn test_script_runs_under_an_interpreter_path() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    seed_planning(dir.path());
    seed_development(dir.path());

    let interpreter = dir.path().join("bin").join("python3");
    std::fs::create_dir_all(interpreter.parent().unwrap()).unwrap();
    std::fs::write(&interpreter, "#!/bin/sh\necho \"ran $1\"\n").unwrap();
    std::fs::set_permissions(&interpreter, std::fs::Permissions::from_mode(0o755)).unwrap();

    let routes = vec![
        (GENERATE_TEST_SCRIPT, file_record("test.py", "print('T1 pass')")),
        (ANALYZE_RUN, "SUCCESS".to_string()),
        (EXAMINE_OUTPUT, test_record("T1", Some("pass"))),
    ];
    let interpreter_path = interpreter.to_string_lossy().into_owned();
    let mut h = harness(dir.path(), routes, |c| c.interpreter = interpreter_path);

    let data = h
        .pipeline
        .run(PhaseName::Testing, "A calculator".into())
        .await
        .unwrap();

    assert_eq!(data["test_output"], "ran test.py\n");
    assert!(h.prompts_containing(ANALYZE_RUN)[0].contains("ran test.py"));
    h.pipeline.shutdown().await;
}
