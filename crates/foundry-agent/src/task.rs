//! Reusable prompt templates with named placeholders.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use foundry_types::{Data, FoundryError, Result};

use crate::element::ElementKind;

const TASK_PREAMBLE: &str =
    "\n<task>\nPlease complete the following task - paying as much attention to detail as possible: \n";

const INSTRUCTIONS: &str = "\n</task>\n<instructions>When completing the above task, please enclose your response within \
an XML tag structure - ensuring that each required value is included within the correct opening/closing \
tag pair. For example, if you are including 3 different examples in your response, and you have a tag <ex> \
that can be used to include the title of an example, then you should return 3 <ex>EXAMPLE</ex> elements \
- where EXAMPLE is replaced with the details of each example.\n</instructions>.\n<valid_xml_tags>\nSee \
the below list of valid XML elements/tags that can be used in your response:\n";

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{|\}\}|\{(\w+)\}").expect("valid regex"))
}

/// An immutable task template.
///
/// `details` may reference inputs as `{name}`; `{{` and `}}` render as
/// literal braces. `expected` lists the record kinds a reply may contain.
#[derive(Debug, Clone)]
pub struct Task {
    name: String,
    details: String,
    expected: Vec<ElementKind>,
}

impl Task {
    pub fn new(name: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            details: details.into(),
            expected: Vec::new(),
        }
    }

    pub fn expecting(mut self, kinds: impl IntoIterator<Item = ElementKind>) -> Self {
        for kind in kinds {
            if !self.expected.contains(&kind) {
                self.expected.push(kind);
            }
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn details(&self) -> &str {
        &self.details
    }

    pub fn expected_elements(&self) -> &[ElementKind] {
        &self.expected
    }

    pub fn expected_tags(&self) -> BTreeSet<&'static str> {
        self.expected.iter().map(|k| k.tag()).collect()
    }

    pub fn expects(&self, tag: &str) -> bool {
        self.expected.iter().any(|k| k.tag() == tag)
    }

    /// Placeholder names referenced by `details`, in order of first use.
    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for caps in placeholder_re().captures_iter(&self.details) {
            if let Some(name) = caps.get(1) {
                if !names.iter().any(|n| n == name.as_str()) {
                    names.push(name.as_str().to_string());
                }
            }
        }
        names
    }

    /// Substitute `inputs` into `details`.
    ///
    /// String values are inserted as-is; any other JSON value is inserted
    /// pretty-printed. A placeholder with no input is an error.
    pub fn render_details(&self, inputs: &Data) -> Result<String> {
        let mut missing = None;
        let rendered = placeholder_re().replace_all(&self.details, |caps: &Captures| {
            match caps.get(1) {
                None if &caps[0] == "{{" => "{".to_string(),
                None => "}".to_string(),
                Some(name) => match inputs.get(name.as_str()) {
                    Some(value) => render_value(value),
                    None => {
                        missing.get_or_insert_with(|| name.as_str().to_string());
                        String::new()
                    }
                },
            }
        });
        if let Some(placeholder) = missing {
            return Err(FoundryError::TaskRender {
                task: self.name.clone(),
                placeholder,
            });
        }
        Ok(rendered.into_owned())
    }

    /// The complete prompt: task details, reply instructions and the format
    /// of every accepted record kind.
    pub fn prompt(&self, inputs: &Data) -> Result<String> {
        let mut prompt = String::from(TASK_PREAMBLE);
        prompt.push_str(&self.render_details(inputs)?);
        prompt.push_str(INSTRUCTIONS);
        for kind in &self.expected {
            prompt.push_str(&kind.schema().instructions());
        }
        prompt.push_str("\n</valid_xml_tags>");
        Ok(prompt)
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(pairs: &[(&str, Value)]) -> Data {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn placeholders_are_substituted() {
        let task = Task::new("t", "Build {specs} for {who}.");
        let out = task
            .render_details(&inputs(&[("specs", json!("a calculator")), ("who", json!("me"))]))
            .unwrap();
        assert_eq!(out, "Build a calculator for me.");
    }

    #[test]
    fn structured_inputs_render_as_json() {
        let task = Task::new("t", "Reqs: {requirements}");
        let out = task
            .render_details(&inputs(&[("requirements", json!([{"requirement_id": "R1"}]))]))
            .unwrap();
        assert!(out.contains("\"requirement_id\": \"R1\""));
    }

    #[test]
    fn doubled_braces_are_literal() {
        let task = Task::new("t", "dict = {{'a': {v}}}");
        let out = task.render_details(&inputs(&[("v", json!("1"))])).unwrap();
        assert_eq!(out, "dict = {'a': 1}");
    }

    #[test]
    fn missing_input_names_the_placeholder() {
        let task = Task::new("generate_code", "Use {specs} and {extra}");
        let err = task
            .render_details(&inputs(&[("specs", json!("x"))]))
            .unwrap_err();
        match err {
            FoundryError::TaskRender { task, placeholder } => {
                assert_eq!(task, "generate_code");
                assert_eq!(placeholder, "extra");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unused_inputs_are_ignored() {
        let task = Task::new("t", "static text");
        let out = task.render_details(&inputs(&[("specs", json!("x"))])).unwrap();
        assert_eq!(out, "static text");
    }

    #[test]
    fn expected_kinds_are_deduplicated() {
        let task = Task::new("t", "").expecting([
            ElementKind::File,
            ElementKind::Command,
            ElementKind::File,
        ]);
        assert_eq!(task.expected_elements(), &[ElementKind::File, ElementKind::Command]);
        assert!(task.expects("cmd"));
        assert!(!task.expects("req"));
        assert_eq!(task.expected_tags().into_iter().collect::<Vec<_>>(), vec!["cmd", "file"]);
    }

    #[test]
    fn placeholders_listed_once_in_order() {
        let task = Task::new("t", "{b} {a} {b} {{c}}");
        assert_eq!(task.placeholders(), vec!["b", "a"]);
    }

    #[test]
    fn prompt_wraps_details_and_lists_formats() {
        let task = Task::new("t", "Do {x}").expecting([ElementKind::Requirement]);
        let prompt = task.prompt(&inputs(&[("x", json!("it"))])).unwrap();
        assert!(prompt.contains("<task>\nPlease complete the following task"));
        assert!(prompt.contains("Do it\n</task>"));
        assert!(prompt.contains("<valid_xml_tags>"));
        assert!(prompt.contains("<req>\n\t<requirement_id></requirement_id>"));
        assert!(prompt.ends_with("\n</valid_xml_tags>"));
    }
}
