//! Record kinds, their schemas, and batch validation of extracted records.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use foundry_markup::Node;
use foundry_types::{ElementValidationError, FieldIssue, FoundryError, Result};

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

/// Shape of one field's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// A sub-record rendered as nested tags.
    Nested(&'static ElementSchema),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
    pub kind: FieldKind,
}

impl FieldSpec {
    const fn text(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            required: true,
            kind: FieldKind::Text,
        }
    }

    const fn optional(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            required: false,
            kind: FieldKind::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementSchema {
    pub tag: &'static str,
    /// Completes "Use the below XML structure ..." in format instructions.
    pub purpose: &'static str,
    pub fields: &'static [FieldSpec],
}

impl ElementSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Empty tag skeleton of one record, nested fields indented one tab deeper.
    pub fn skeleton(&self) -> String {
        self.skeleton_at(1)
    }

    fn skeleton_at(&self, level: usize) -> String {
        let outer = "\t".repeat(level - 1);
        let inner = "\t".repeat(level);
        let mut out = format!("\n{outer}<{}>", self.tag);
        for field in self.fields {
            match field.kind {
                FieldKind::Text => {
                    out.push_str(&format!("\n{inner}<{0}></{0}>", field.name));
                }
                FieldKind::Nested(sub) => out.push_str(&sub.skeleton_at(level + 1)),
            }
        }
        out.push_str(&format!("\n{outer}</{}>", self.tag));
        out
    }

    /// "...Where:" glossary, one line per field.
    pub fn glossary(&self) -> String {
        let lines = self
            .fields
            .iter()
            .map(|f| format!("\n - <{}>: contains {}", f.name, f.description.to_lowercase()))
            .collect::<Vec<_>>();
        format!("\n...Where: {}", lines.join(", "))
    }

    /// Full format instructions for this record kind, as listed in a prompt's
    /// `<valid_xml_tags>` block.
    pub fn instructions(&self) -> String {
        format!(
            "Use the below XML structure {}:\n{}{}",
            self.purpose,
            self.skeleton(),
            self.glossary()
        )
    }
}

const REQUIREMENT: ElementSchema = ElementSchema {
    tag: "req",
    purpose: "to list a single requirement of the project",
    fields: &[
        FieldSpec::text(
            "requirement_id",
            "A unique identifier for the requirement, e.g. REQ-001",
        ),
        FieldSpec::text(
            "requirement_details",
            "A clear, testable description of what the software must do",
        ),
    ],
};

const FUNCTIONALITY_TEST: ElementSchema = ElementSchema {
    tag: "test",
    purpose: "to describe a single functional test of a requirement",
    fields: &[
        FieldSpec::text("test_id", "A unique identifier for the test, e.g. TEST-001"),
        FieldSpec::text(
            "requirement_id",
            "The identifier of the requirement this test verifies",
        ),
        FieldSpec::text(
            "test_details",
            "The steps needed to carry out the test",
        ),
        FieldSpec::text(
            "expected_result",
            "The observable result that means the test passed",
        ),
        FieldSpec::optional(
            "test_status",
            "The outcome of the test when it was last run: pass or fail",
        ),
    ],
};

const IMPLEMENTATION: ElementSchema = ElementSchema {
    tag: "imp",
    purpose: "to report whether a single requirement is implemented by the source code",
    fields: &[
        FieldSpec::text(
            "requirement_id",
            "The identifier of the requirement being checked",
        ),
        FieldSpec::text(
            "requirement_implemented",
            "Whether the source code fully implements the requirement: pass or fail",
        ),
        FieldSpec::text(
            "notes",
            "A short explanation of what is present or missing",
        ),
    ],
};

const FILE: ElementSchema = ElementSchema {
    tag: "file",
    purpose: "to create or overwrite a single source file",
    fields: &[
        FieldSpec::text(
            "file_name",
            "The path of the file relative to the project source directory",
        ),
        FieldSpec::text(
            "file_content",
            "The complete contents of the file, with no placeholders",
        ),
    ],
};

const COMMAND: ElementSchema = ElementSchema {
    tag: "cmd",
    purpose: "to run a single shell command in the project source directory",
    fields: &[FieldSpec::text(
        "command",
        "One non-interactive shell command, e.g. pip install requests",
    )],
};

const CODE_SEGMENT: ElementSchema = ElementSchema {
    tag: "code_segment",
    purpose: "to describe a single meaningful segment of the source code",
    fields: &[
        FieldSpec::text(
            "file_name",
            "The path of the file the segment comes from",
        ),
        FieldSpec::text(
            "segment_description",
            "A summary of what the segment does and how it is used",
        ),
        FieldSpec::text("segment_content", "The exact source text of the segment"),
    ],
};

// ---------------------------------------------------------------------------
// ElementKind
// ---------------------------------------------------------------------------

/// The closed set of record kinds a model reply may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementKind {
    Requirement,
    FunctionalityTest,
    Implementation,
    File,
    Command,
    CodeSegment,
}

impl ElementKind {
    pub const ALL: [ElementKind; 6] = [
        ElementKind::Requirement,
        ElementKind::FunctionalityTest,
        ElementKind::Implementation,
        ElementKind::File,
        ElementKind::Command,
        ElementKind::CodeSegment,
    ];

    pub fn schema(self) -> &'static ElementSchema {
        match self {
            ElementKind::Requirement => &REQUIREMENT,
            ElementKind::FunctionalityTest => &FUNCTIONALITY_TEST,
            ElementKind::Implementation => &IMPLEMENTATION,
            ElementKind::File => &FILE,
            ElementKind::Command => &COMMAND,
            ElementKind::CodeSegment => &CODE_SEGMENT,
        }
    }

    pub fn tag(self) -> &'static str {
        self.schema().tag
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

// ---------------------------------------------------------------------------
// Typed records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub requirement_id: String,
    pub requirement_details: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionalityTest {
    pub test_id: String,
    pub requirement_id: String,
    pub test_details: String,
    pub expected_result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_status: Option<String>,
}

impl FunctionalityTest {
    pub fn passed(&self) -> bool {
        self.test_status
            .as_deref()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case("pass"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub requirement_id: String,
    pub requirement_implemented: String,
    pub notes: String,
}

impl Implementation {
    /// `pass`, `yes` or `true`, ignoring case and surrounding whitespace.
    pub fn passed(&self) -> bool {
        let verdict = self.requirement_implemented.trim().to_lowercase();
        matches!(verdict.as_str(), "pass" | "yes" | "true")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileElement {
    pub file_name: String,
    pub file_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandElement {
    pub command: String,
    /// Filled in by the command handler after execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSegment {
    pub file_name: String,
    pub segment_description: String,
    pub segment_content: String,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check every record of a batch against `kind`'s schema.
///
/// Returns one JSON object per record holding only the declared fields. If
/// any record is invalid the whole batch is rejected and the error lists
/// every problem found.
pub fn validate_records(
    kind: ElementKind,
    raw: &[Node],
) -> std::result::Result<Vec<Value>, ElementValidationError> {
    let schema = kind.schema();
    let mut records = Vec::with_capacity(raw.len());
    let mut issues = Vec::new();

    for (index, node) in raw.iter().enumerate() {
        match node.as_tags() {
            Some(_) => {
                let mut problems = Vec::new();
                let record = check_fields(schema, node, "", &mut problems);
                issues.extend(problems.into_iter().map(|(field, reason)| FieldIssue {
                    index,
                    field: Some(field),
                    reason,
                }));
                records.push(Value::Object(record));
            }
            None => issues.push(FieldIssue {
                index,
                field: None,
                reason: format!("expected a <{}> record with nested fields, found plain text", schema.tag),
            }),
        }
    }

    if issues.is_empty() {
        Ok(records)
    } else {
        Err(ElementValidationError {
            tag: schema.tag.to_string(),
            issues,
        })
    }
}

fn check_fields(
    schema: &ElementSchema,
    node: &Node,
    prefix: &str,
    problems: &mut Vec<(String, String)>,
) -> Map<String, Value> {
    let mut record = Map::new();
    for field in schema.fields {
        let path = format!("{prefix}{}", field.name);
        match (node.get(field.name), field.kind) {
            (None, _) if field.required => {
                problems.push((path, "missing required field".into()));
            }
            (None, _) => {}
            (Some(Node::Text(text)), FieldKind::Text) => {
                record.insert(field.name.to_string(), Value::String(text.clone()));
            }
            (Some(Node::Tags(_)), FieldKind::Text) => {
                problems.push((path, "expected text, found nested tags".into()));
            }
            (Some(Node::Text(_)), FieldKind::Nested(sub)) => {
                problems.push((path, format!("expected nested <{}> fields, found text", sub.tag)));
            }
            (Some(inner @ Node::Tags(_)), FieldKind::Nested(sub)) => {
                let nested = check_fields(sub, inner, &format!("{path}."), problems);
                record.insert(field.name.to_string(), Value::Object(nested));
            }
        }
    }
    record
}

/// Validate a batch and convert it into typed records.
pub fn create_elements<T: DeserializeOwned>(
    kind: ElementKind,
    raw: &[Node],
) -> std::result::Result<Vec<T>, ElementValidationError> {
    let records = validate_records(kind, raw)?;
    let mut out = Vec::with_capacity(records.len());
    let mut issues = Vec::new();
    for (index, record) in records.into_iter().enumerate() {
        match serde_json::from_value::<T>(record) {
            Ok(item) => out.push(item),
            Err(e) => issues.push(FieldIssue {
                index,
                field: None,
                reason: e.to_string(),
            }),
        }
    }
    if issues.is_empty() {
        Ok(out)
    } else {
        Err(ElementValidationError {
            tag: kind.tag().to_string(),
            issues,
        })
    }
}

// ---------------------------------------------------------------------------
// ElementRegistry
// ---------------------------------------------------------------------------

/// Tag name -> record kind.
#[derive(Debug, Clone, Default)]
pub struct ElementRegistry {
    kinds: HashMap<String, ElementKind>,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every kind under its own tag.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for kind in ElementKind::ALL {
            registry.register(kind.tag(), kind);
        }
        registry
    }

    pub fn register(&mut self, tag: impl Into<String>, kind: ElementKind) {
        self.kinds.insert(tag.into(), kind);
    }

    pub fn get(&self, tag: &str) -> Option<ElementKind> {
        self.kinds.get(tag).copied()
    }

    pub fn has(&self, tag: &str) -> bool {
        self.kinds.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn validate(&self, tag: &str, raw: &[Node]) -> Result<Vec<Value>> {
        let kind = self.get(tag).ok_or_else(|| FoundryError::UnknownTag {
            tag: tag.to_string(),
        })?;
        Ok(validate_records(kind, raw)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
