//! The task templates and agent roles the pipeline uses.

use std::sync::Arc;

use foundry_agent::{Agent, BackoffPolicy, ElementKind, EventEmitter, HandlerRegistry, Task};
use foundry_llm::Model;
use foundry_tools::EnvironmentInfo;

use crate::workspace::Workspace;

/// Model used when none is configured.
pub const DEFAULT_MODEL_SPEC: &str = "vllm:Qwen/Qwen2.5-Coder-32B-Instruct";

pub const PRODUCT_OWNER_ROLE: &str = "Product Owner";
pub const DEVELOPER_ROLE: &str = "Software Developer";

const ROLE_FOOTER: &str = "\n\nWhen given a task, carry it out following every rule the task sets out as closely as \
possible, while keeping the above role in mind.";

const PRODUCT_OWNER_PROMPT: &str = "You are the Product Owner of an agile software project. Your responsibilities are:\n\
\n\
1. Refining stakeholder requests.\n\
1a. Review the descriptions provided by the stakeholders.\n\
1b. Rewrite them so they are clear, concise and actionable.\n\
1c. Make sure the refined text still captures the stakeholders' vision.\n\
\n\
2. Reviewing work for alignment.\n\
2a. Check that work produced by other agents matches the original requirements.\n\
2b. Give concrete feedback so the final product meets the project's goals.";

const DEVELOPER_PROMPT: &str = "You are an experienced full-stack developer who writes clean, well documented Python. \
Your responsibilities are:\n\
\n\
1. Writing high quality code.\n\
1a. Code is modern, documented and follows the usual conventions.\n\
1b. Code is modular; each function has one clear purpose.\n\
1c. Use as few source files as is reasonable, organized in an obvious way.\n\
1d. Prefer efficient code that stays readable.";

/// Every task template the phases send.
#[derive(Debug, Clone)]
pub struct TaskCatalog {
    pub generate_requirements: Task,
    pub generate_functional_tests: Task,
    pub generate_code: Task,
    pub validate_code: Task,
    pub add_missing_requirements: Task,
    pub generate_tests: Task,
    pub analyze_test_run: Task,
    pub analyze_test_error: Task,
    pub examine_test_output: Task,
    pub index_code_semantically: Task,
}

impl TaskCatalog {
    pub fn standard(workspace: &Workspace) -> Self {
        let test_files = workspace.test_files_dir();

        Self {
            generate_requirements: Task::new(
                "generate_requirements",
                "Take the technical specifications below and write a numbered list of clear, concise functional \
                 requirements the software must meet. Each requirement maps to one function or feature. Write them \
                 so a non-technical reader understands them, and describe only what the software does, never which \
                 technology it uses.\n\nSpecifications:\n\n{specs}\n",
            )
            .expecting([ElementKind::Requirement]),

            generate_functional_tests: Task::new(
                "generate_functional_tests",
                "Take the technical requirements below and write a numbered list of test cases covering every kind \
                 of user interaction, checking that each outcome conforms to the requirements. A requirement may have \
                 several tests. Each test names the requirement it covers, the steps to run it and the expected \
                 result.\n\nRequirements:\n\n{requirements}\n",
            )
            .expecting([ElementKind::FunctionalityTest]),

            generate_code: Task::new(
                "generate_code",
                "Take the technical specifications below and write Python code that satisfies all of them. You are \
                 in the root source directory, so file names are relative to it. Organize the code into classes and \
                 functions with one clear purpose each, in as few files as is reasonable. Every module, class and \
                 function needs a docstring describing what it does, its parameters and its return value.\n\n\
                 No Python packages are installed. If the code uses any, include the commands that install them.\
                 \n\nSpecifications:\n\n{specs}\n",
            )
            .expecting([ElementKind::File, ElementKind::Command]),

            validate_code: Task::new(
                "validate_code",
                "Check whether each technical requirement below is properly implemented by the source code that \
                 follows. Report on every requirement: pass if the code fully implements it, fail otherwise, with a \
                 short note on what is present or missing.\n\nRequirements:\n\n{requirements}\n\n\
                 Source code:\n\n{source_files}\n",
            )
            .expecting([ElementKind::Implementation]),

            add_missing_requirements: Task::new(
                "add_missing_requirements",
                "The requirements below were missed or only partly implemented by the source code that follows. \
                 Add or fix code so that they are met, without breaking the requirements that already pass. Treat \
                 the code as a minimal viable product and add only what is needed.\n\n\
                 Missing requirements:\n\n{requirements}\n\nSource code:\n\n{source_files}\n\n\
                 Return the complete updated content of every file you change, plus any commands needed to run the \
                 code (installing packages and so on).\n",
            )
            .expecting([ElementKind::File, ElementKind::Command]),

            generate_tests: Task::new(
                "generate_tests",
                format!(
                    "Create a file called test.py in the current directory that uses pytest to check that every \
                     FUNCTIONAL requirement is met and the code works as expected. Follow these rules:\n\n\
                     - test.py must contain everything needed to run the project and test it. If a process such as \
                     a server must be started first, start it at the top of the script and clean it up when the tests \
                     finish or fail.\n\
                     - The tests must cover every test in the plan below. At the top of test.py define a dictionary \
                     named test_plan whose keys are the exact test IDs and whose values are the test functions. In an \
                     `if __name__ == '__main__':` block, run the tests one by one in ascending test ID order.\n\
                     - Tests must not wait for user input; simulate input with test files instead.\n\
                     - Only test functional requirements.\n\
                     - After each test finishes or errors, print a summary of what it checks and its result.\n\n\
                     Any files the tests need go in \"{test_files}\". Code that generates such files goes in \
                     pretest.py next to test.py; it is only needed when no suitable test files exist.\n\n\
                     Test plan:\n\n{{test_plan}}\n",
                    test_files = test_files.display(),
                ),
            )
            .expecting([ElementKind::File, ElementKind::Command]),

            analyze_test_run: Task::new(
                "analyze_test_run",
                "The script test.py was run and its output is below. Decide whether test.py itself ran \
                 successfully. Failing tests, or errors raised by other source files called from test.py, do not \
                 count; only an error produced by code in test.py does.\n\n\
                 If such an error occurred, respond ONLY with the word ERROR. Otherwise respond ONLY with the word \
                 SUCCESS.\n\ntest.py output:\n\n{test_output}\n",
            ),

            analyze_test_error: Task::new(
                "analyze_test_error",
                "The script test.py failed with the error below. Analyze it and return a fixed test.py, plus any \
                 commands needed to resolve the problem.\n\nError:\n\n{error_message}\n",
            )
            .expecting([ElementKind::File, ElementKind::Command]),

            examine_test_output: Task::new(
                "examine_test_output",
                "The script test.py ran successfully. Examine its output below and report every test from the test \
                 plan with its test_status set to pass or fail. For failing tests, also return the code changes or \
                 commands that will make them pass next time. Return the complete updated content of every file you \
                 change, and commands only when needed.\n\nTest plan:\n\n{test_plan}\n\n\
                 test.py output:\n\n{test_output}\n",
            )
            .expecting([
                ElementKind::FunctionalityTest,
                ElementKind::File,
                ElementKind::Command,
            ]),

            index_code_semantically: Task::new(
                "index_code_semantically",
                "Break the source files below into semantically coherent segments. A segment is one function or \
                 method, an entire class if it is short, or a block of closely related top-level statements. Keep \
                 segments in source order, grouped by file.\n\n\
                 For each file, the segments concatenated together must equal the original file exactly, comments \
                 included. Do not modify, escape or fence the code; enclose it only in \
                 <segment_content></segment_content>.\n\n\
                 For each segment give the file name, a detailed description naming every variable and operation \
                 and ending with the segment's overall purpose, and the segment's source.\n\n\
                 Source files:\n\n{source_files}\n",
            )
            .expecting([ElementKind::CodeSegment]),
        }
    }
}

/// The two agents the phases hand work to.
#[derive(Debug, Clone)]
pub struct Agents {
    pub product_owner: Arc<Agent>,
    pub developer: Arc<Agent>,
}

impl Agents {
    pub fn standard(
        model: &Model,
        handlers: Arc<HandlerRegistry>,
        environment: EnvironmentInfo,
        emitter: EventEmitter,
        backoff: BackoffPolicy,
    ) -> Self {
        let build = |role: &str, prompt: &str| {
            Arc::new(
                Agent::new(
                    model.clone(),
                    role,
                    format!("{prompt}{ROLE_FOOTER}"),
                    handlers.clone(),
                )
                .with_environment(environment.clone())
                .with_emitter(emitter.clone())
                .with_backoff(backoff.clone()),
            )
        };
        Self {
            product_owner: build(PRODUCT_OWNER_ROLE, PRODUCT_OWNER_PROMPT),
            developer: build(DEVELOPER_ROLE, DEVELOPER_PROMPT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::ProjectConfig;

    fn catalog() -> TaskCatalog {
        let mut config = ProjectConfig::new("demo");
        config.projects_root = "/tmp/projects".into();
        TaskCatalog::standard(&Workspace::new(config).unwrap())
    }

    #[test]
    fn tasks_declare_expected_records() {
        let c = catalog();
        assert_eq!(c.generate_requirements.expected_elements(), &[ElementKind::Requirement]);
        assert_eq!(c.validate_code.expected_elements(), &[ElementKind::Implementation]);
        assert!(c.analyze_test_run.expected_elements().is_empty());
        assert!(c.examine_test_output.expects("test"));
        assert!(c.index_code_semantically.expects("code_segment"));
    }

    #[test]
    fn placeholders_match_phase_inputs() {
        let c = catalog();
        assert_eq!(c.generate_code.placeholders(), vec!["specs"]);
        assert_eq!(c.validate_code.placeholders(), vec!["requirements", "source_files"]);
        assert_eq!(c.generate_tests.placeholders(), vec!["test_plan"]);
        assert_eq!(c.examine_test_output.placeholders(), vec!["test_plan", "test_output"]);
        assert_eq!(c.analyze_test_error.placeholders(), vec!["error_message"]);
    }

    #[test]
    fn test_generation_names_the_fixture_directory() {
        let c = catalog();
        assert!(c.generate_tests.details().contains("/tmp/projects/demo/test_files"));
    }
}
