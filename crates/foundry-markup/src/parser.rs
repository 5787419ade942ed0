use winnow::combinator::delimited;
use winnow::token::{literal, take_until, take_while};
use winnow::{ModalResult, Parser};

use crate::tree::{Node, TagMap, TagTree};

/// Tag names are word characters: Unicode alphanumerics and `_`.
fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// `<name>` with no whitespace or attributes.
fn open_tag<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    delimited('<', take_while(1.., is_word_char), '>').parse_next(input)
}

/// `<name>body</name>` where body runs to the first closing tag with exactly
/// the same name.
fn element<'i>(input: &mut &'i str) -> ModalResult<(&'i str, &'i str)> {
    let name = open_tag.parse_next(input)?;
    let close = format!("</{name}>");
    let body = take_until(0.., close.as_str()).parse_next(input)?;
    literal(close.as_str()).parse_next(input)?;
    Ok((name, body))
}

/// Find every well-formed element at one nesting level, left to right.
///
/// Text that does not start a complete element is skipped one character at a
/// time, so stray `<`, unclosed tags and mismatched closers never fail the scan.
pub(crate) fn scan(text: &str) -> Vec<(&str, &str)> {
    let mut found = Vec::new();
    let mut input = text;

    while let Some(pos) = input.find('<') {
        input = &input[pos..];
        let start = input;
        match element.parse_next(&mut input) {
            Ok(m) => found.push(m),
            Err(_) => input = &start[1..],
        }
    }

    found
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Parse a tag body below the top level.
///
/// A body with no elements is returned unchanged as a leaf. Otherwise each
/// name maps to a single value, and the last occurrence of a repeated name wins.
pub fn parse_node(body: &str) -> Node {
    let matches = scan(body);
    if matches.is_empty() {
        return Node::Text(body.to_string());
    }

    let mut map = TagMap::new();
    for (name, inner) in matches {
        map.insert(normalize(name), parse_node(inner));
    }
    Node::Tags(map)
}

/// Extract the tagged-content tree from a model reply.
///
/// Returns `None` when the text holds no well-formed element at all, which is
/// distinct from an element with an empty body (`Some` tree with a `""` leaf).
pub fn extract(text: &str) -> Option<TagTree> {
    let matches = scan(text);
    if matches.is_empty() {
        tracing::debug!(len = text.len(), "No tagged content found");
        return None;
    }

    let mut tree = TagTree::new();
    for (name, body) in matches {
        tree.push(normalize(name), parse_node(body));
    }
    tracing::debug!(
        tags = ?tree.tags().collect::<Vec<_>>(),
        "Extracted tagged content"
    );
    Some(tree)
}
