//! Tagged-content extractor for Foundry model replies.
//!
//! Parses the lightweight `<name>body</name>` markup a model uses to return
//! structured records inside free text. This is not an XML parser: there are no
//! attributes, namespaces, entities or self-closing tags.
//!
//! - Top level: every occurrence of a tag is kept, in order ([`TagTree`]).
//! - Nested levels: one value per tag name, last occurrence wins ([`TagMap`]).
//! - A body with no tags is a leaf string ([`Node::Text`]).
//!
//! # Example
//! ```
//! let tree = foundry_markup::extract("<req><requirement_id>1</requirement_id></req>").unwrap();
//! let reqs = tree.get("req").unwrap();
//! assert_eq!(reqs.len(), 1);
//! assert_eq!(reqs[0].get("requirement_id").unwrap().as_text(), Some("1"));
//! ```

mod parser;
mod tree;

pub use parser::{extract, parse_node};
pub use tree::{Node, TagMap, TagTree};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(s: &str) -> Node {
        Node::Text(s.to_string())
    }

    #[test]
    fn sibling_tags_map_to_their_bodies() {
        let tree = extract("<a>x</a><b>y</b>").unwrap();
        assert_eq!(tree.tags().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(tree.get("a").unwrap(), &[text("x")]);
        assert_eq!(tree.get("b").unwrap(), &[text("y")]);
    }

    #[test]
    fn nested_tags_become_a_mapping() {
        let tree = extract("<a><b>1</b><c>2</c></a>").unwrap();
        let a = tree.get("a").unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].to_json(), json!({"b": "1", "c": "2"}));
    }

    #[test]
    fn repeated_top_level_tags_keep_order() {
        let tree = extract("<a>1</a><a>2</a>").unwrap();
        assert_eq!(tree.get("a").unwrap(), &[text("1"), text("2")]);
    }

    #[test]
    fn repeated_nested_tags_keep_last() {
        let tree = extract("<cmd><command>ls</command><command>pwd</command></cmd>").unwrap();
        let cmd = &tree.get("cmd").unwrap()[0];
        assert_eq!(cmd.get("command").unwrap().as_text(), Some("pwd"));
        assert_eq!(cmd.as_tags().unwrap().len(), 1);
    }

    #[test]
    fn plain_text_has_no_tags() {
        assert!(extract("plain text").is_none());
        assert!(extract("").is_none());
        assert!(extract("a < b and c > d").is_none());
    }

    #[test]
    fn empty_body_is_distinct_from_no_tags() {
        let tree = extract("<notes></notes>").unwrap();
        assert_eq!(tree.get("notes").unwrap(), &[text("")]);
    }

    #[test]
    fn leaf_reparses_to_itself() {
        let leaf = "def main():\n    return 1 < 2\n";
        assert_eq!(parse_node(leaf), text(leaf));
    }

    #[test]
    fn tag_names_are_lower_cased() {
        let tree = extract("<REQ><Requirement_ID>7</Requirement_ID></REQ>").unwrap();
        let req = &tree.get("req").unwrap()[0];
        assert_eq!(req.get("requirement_id").unwrap().as_text(), Some("7"));
    }

    #[test]
    fn siblings_need_not_be_contiguous() {
        let reply = "Here you go:\n<file>a</file>\nand also\n<cmd>b</cmd>\nfinally <file>c</file>";
        let tree = extract(reply).unwrap();
        assert_eq!(tree.tags().collect::<Vec<_>>(), vec!["file", "cmd"]);
        assert_eq!(tree.get("file").unwrap(), &[text("a"), text("c")]);
    }

    #[test]
    fn whitespace_inside_bodies_is_preserved() {
        let tree = extract("<file>\n  <file_name> main.py </file_name>\n</file>").unwrap();
        let file = &tree.get("file").unwrap()[0];
        assert_eq!(file.get("file_name").unwrap().as_text(), Some(" main.py "));
    }

    #[test]
    fn mismatched_closer_is_skipped_but_inner_tags_survive() {
        let tree = extract("<a><b>1</b></c>").unwrap();
        assert_eq!(tree.tags().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn unknown_tags_are_extracted_structurally() {
        let tree = extract("<zzz>whatever</zzz>").unwrap();
        assert!(tree.contains("zzz"));
    }

    #[test]
    fn deep_nesting_round_trips_to_json() {
        let tree = extract("<a><b><c>deep</c></b><d></d></a>").unwrap();
        assert_eq!(
            tree.to_json(),
            json!({"a": [{"b": {"c": "deep"}, "d": ""}]})
        );
    }

    #[test]
    fn code_with_angle_brackets_stays_a_leaf() {
        let reply = "<file_content>if a<b and b>c:\n    print(\"<ok>\")</file_content>";
        let tree = extract(reply).unwrap();
        let body = &tree.get("file_content").unwrap()[0];
        assert_eq!(
            body.as_text(),
            Some("if a<b and b>c:\n    print(\"<ok>\")")
        );
    }

    #[test]
    fn tree_serializes_in_first_appearance_order() {
        let tree = extract("<b>1</b><a>2</a><b>3</b>").unwrap();
        let json = serde_json::to_string(&tree).unwrap();
        assert_eq!(json, r#"{"b":["1","3"],"a":["2"]}"#);
    }
}
