use async_trait::async_trait;

use foundry_types::{merge_data, Data, Result};

use super::{inputs, specs, PhaseContext};
use crate::phase::{required, PhaseBehavior};

const TITLE: &str = "Planning";

/// Turns the user's specs into requirements and a functional test plan.
pub struct PlanningPhase {
    ctx: PhaseContext,
}

impl PlanningPhase {
    pub fn new(ctx: PhaseContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl PhaseBehavior for PlanningPhase {
    fn title(&self) -> &str {
        TITLE
    }

    fn description(&self) -> &str {
        "Rewrite the stakeholder specs as functional requirements and plan the tests that check them."
    }

    async fn run(&self, mut data: Data) -> Result<Data> {
        let ctx = &self.ctx;
        let specs = specs(&data, TITLE)?;

        let out = ctx
            .perform(
                TITLE,
                &ctx.agents.product_owner,
                &ctx.tasks.generate_requirements,
                &inputs([("specs", specs)]),
            )
            .await?;
        merge_data(&mut data, out.into_data());
        let requirements = required(&data, "requirements", TITLE, TITLE)?.clone();
        tracing::info!(
            count = requirements.as_array().map(Vec::len).unwrap_or(0),
            "Requirements generated"
        );

        let out = ctx
            .perform(
                TITLE,
                &ctx.agents.product_owner,
                &ctx.tasks.generate_functional_tests,
                &inputs([("requirements", requirements)]),
            )
            .await?;
        merge_data(&mut data, out.into_data());
        let tests = required(&data, "tests", TITLE, TITLE)?;
        tracing::info!(
            count = tests.as_array().map(Vec::len).unwrap_or(0),
            "Test plan generated"
        );

        Ok(data)
    }

    fn validate(&self) -> bool {
        let ws = &self.ctx.workspace;
        ws.requirements_path().is_file() && ws.test_plan_path().is_file()
    }

    async fn load(&self, _data: &Data) -> Result<Option<Data>> {
        let ws = &self.ctx.workspace;
        let mut loaded = ws.read_json(&ws.requirements_path()).await?;
        merge_data(&mut loaded, ws.read_json(&ws.test_plan_path()).await?);
        Ok(Some(loaded))
    }
}
