//! XML wire format of the `ILRReadValues.cgi` endpoint.
//!
//! Requests are `<body><item_list><i><n>REGISTER</n></i>...</item_list></body>` with no
//! XML declaration. Replies pair register names with values using either the long
//! spelling (`item`/`name`/`value`) or the short one (`i`/`n`/`v`). Only the short request
//! form has been confirmed against real firmware, so the reply parser accepts both.

use crate::models::touchline::{RawValueMap, RegisterPath};
use log::{debug, error};
use thiserror::Error;
use xmltree::{Element, EmitterConfig, XMLNode};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode request: {0}")]
    Encode(String),
    #[error("failed to parse response: {0}")]
    Parse(String),
}

/// Element names used for one name/value pair in a reply.
struct TagSet {
    item: &'static str,
    name: &'static str,
    value: &'static str,
}

/// Tried in order; the first spelling with any matching item element wins.
const TAG_SETS: [TagSet; 2] = [
    TagSet {
        item: "item",
        name: "name",
        value: "value",
    },
    TagSet {
        item: "i",
        name: "n",
        value: "v",
    },
];

/// Build the request document for `items`, preserving their order.
pub fn build_request(items: &[RegisterPath]) -> Result<String, ProtocolError> {
    let mut item_list = Element::new("item_list");
    for item in items {
        let mut name = Element::new("n");
        name.children.push(XMLNode::Text(item.to_string()));
        let mut entry = Element::new("i");
        entry.children.push(XMLNode::Element(name));
        item_list.children.push(XMLNode::Element(entry));
    }
    let mut body = Element::new("body");
    body.children.push(XMLNode::Element(item_list));

    let config = EmitterConfig::new()
        .write_document_declaration(false)
        .perform_indent(false);
    let mut out = Vec::new();
    body.write_with_config(&mut out, config)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    String::from_utf8(out).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Parse a reply into register values.
///
/// Never fails: a payload that is not well-formed XML yields an empty map and an
/// error log line, so one bad poll cannot break the refresh cycle.
pub fn parse_response(text: &str) -> RawValueMap {
    match try_parse_response(text) {
        Ok(values) => values,
        Err(e) => {
            error!("Failed to parse device response: {}", e);
            debug!("Raw response that failed to parse: {}", text);
            RawValueMap::new()
        }
    }
}

fn try_parse_response(text: &str) -> Result<RawValueMap, ProtocolError> {
    let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}');
    debug!("Parsing device response: {}", truncate(trimmed, 500));

    let root = Element::parse(trimmed.as_bytes()).map_err(|e| ProtocolError::Parse(e.to_string()))?;

    let mut values = RawValueMap::new();
    for tags in &TAG_SETS {
        let mut items = Vec::new();
        collect_descendants(&root, tags.item, &mut items);
        if items.is_empty() {
            continue;
        }
        for item in items {
            let name = pair_text(item, |t| t.name);
            let value = pair_text(item, |t| t.value);
            if let (Some(name), Some(value)) = (name, value) {
                values.insert(name, value);
            }
        }
        break;
    }
    Ok(values)
}

fn collect_descendants<'a>(element: &'a Element, tag: &str, out: &mut Vec<&'a Element>) {
    for node in &element.children {
        if let XMLNode::Element(child) = node {
            if child.name == tag {
                out.push(child);
            }
            collect_descendants(child, tag, out);
        }
    }
}

/// Text of the first child matching either spelling of a pair member; empty text counts as absent.
fn pair_text(item: &Element, member: fn(&TagSet) -> &'static str) -> Option<String> {
    TAG_SETS
        .iter()
        .find_map(|tags| item.get_child(member(tags)))
        .and_then(|child| child.get_text())
        .map(|text| text.into_owned())
        .filter(|text| !text.is_empty())
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
