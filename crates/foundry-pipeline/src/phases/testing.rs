use async_trait::async_trait;
use serde_json::Value;

use foundry_agent::FunctionalityTest;
use foundry_types::{merge_data, Data, FoundryError, Result};

use super::{inputs, PhaseContext};
use crate::phase::{required, PhaseBehavior};

const TITLE: &str = "Testing";

/// Writes `test.py`, runs it and iterates on failures until the plan passes.
pub struct TestingPhase {
    ctx: PhaseContext,
}

impl TestingPhase {
    pub fn new(ctx: PhaseContext) -> Self {
        Self { ctx }
    }

    fn test_command(&self) -> String {
        format!("{} test.py", self.ctx.workspace.config().interpreter)
    }
}

/// Whether `analyze_test_run` judged the script to have run.
fn run_succeeded(verdict: &str) -> bool {
    verdict.to_lowercase().contains("success")
}

/// The examined test plan as typed records.
fn test_results(test_plan: &Value) -> Result<Vec<FunctionalityTest>> {
    serde_json::from_value(test_plan.clone()).map_err(|e| FoundryError::PhaseError {
        phase: TITLE.into(),
        message: format!("test plan is malformed: {e}"),
    })
}

fn all_passed(tests: &[FunctionalityTest]) -> bool {
    !tests.is_empty() && tests.iter().all(FunctionalityTest::passed)
}

#[async_trait]
impl PhaseBehavior for TestingPhase {
    fn title(&self) -> &str {
        TITLE
    }

    fn description(&self) -> &str {
        "Run the generated code against the test plan and debug it until every test passes."
    }

    async fn run(&self, mut data: Data) -> Result<Data> {
        let ctx = &self.ctx;
        let mut test_plan = required(&data, "tests", TITLE, "Planning")?.clone();

        let out = ctx
            .perform(
                TITLE,
                &ctx.agents.developer,
                &ctx.tasks.generate_tests,
                &inputs([("test_plan", test_plan.clone())]),
            )
            .await?;
        merge_data(&mut data, out.into_data());

        let command = self.test_command();
        let max_iterations = ctx.workspace.config().max_test_iterations;
        let mut passed = false;
        let mut last_output = String::new();

        for iteration in 1..=max_iterations {
            last_output = ctx.commands.run(&command).await?;
            let output = Value::String(last_output.clone());
            tracing::info!(iteration, max_iterations, "Test script executed");

            let verdict = ctx
                .perform(
                    TITLE,
                    &ctx.agents.developer,
                    &ctx.tasks.analyze_test_run,
                    &inputs([("test_output", output.clone())]),
                )
                .await?;
            let verdict = verdict.as_text().unwrap_or_default().to_string();

            if run_succeeded(&verdict) {
                let out = ctx
                    .perform(
                        TITLE,
                        &ctx.agents.developer,
                        &ctx.tasks.examine_test_output,
                        &inputs([
                            ("test_plan", test_plan.clone()),
                            ("test_output", output.clone()),
                        ]),
                    )
                    .await?;
                merge_data(&mut data, out.into_data());

                if let Some(tests) = data.get("tests") {
                    test_plan = tests.clone();
                }
                let results = test_results(&test_plan)?;
                let passing = results.iter().filter(|t| t.passed()).count();
                tracing::info!(iteration, passing, total = results.len(), "Test results examined");
                if all_passed(&results) {
                    passed = true;
                    break;
                }
            } else {
                tracing::info!(iteration, "Test script errored, requesting a fix");
                let out = ctx
                    .perform(
                        TITLE,
                        &ctx.agents.developer,
                        &ctx.tasks.analyze_test_error,
                        &inputs([("error_message", output)]),
                    )
                    .await?;
                merge_data(&mut data, out.into_data());
            }
        }

        if !passed {
            tracing::warn!(max_iterations, "Test plan not passing after the last iteration");
        }
        if let Some(path) = ctx.commands.freeze_requirements().await? {
            data.insert("requirements_file".into(), Value::String(path.display().to_string()));
        }
        data.insert("test_output".into(), Value::String(last_output));
        data.insert("tests_passed".into(), Value::Bool(passed));
        if !self.validate() {
            return Err(FoundryError::PhaseError {
                phase: TITLE.into(),
                message: "test.py was not written".into(),
            });
        }
        Ok(data)
    }

    fn validate(&self) -> bool {
        self.ctx.workspace.test_script_path().is_file()
    }

    async fn load(&self, _data: &Data) -> Result<Option<Data>> {
        let ws = &self.ctx.workspace;
        if !tokio::fs::try_exists(ws.test_plan_path()).await? {
            return Ok(None);
        }
        Ok(Some(ws.read_json(&ws.test_plan_path()).await?))
    }
}
