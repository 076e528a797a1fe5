//! gNMI path helpers.

use std::collections::HashMap;

use crate::error::{AdapterError, Result};
use crate::gnmi::{Path, PathElem};

/// Join a request prefix and a path into the element sequence to resolve.
///
/// Paths using the deprecated string `element` representation are refused.
pub fn full_path(prefix: Option<&Path>, path: &Path) -> Result<Vec<PathElem>> {
    #[allow(deprecated)]
    let uses_strings = !path.element.is_empty() || prefix.is_some_and(|p| !p.element.is_empty());
    if uses_strings {
        return Err(AdapterError::unimplemented(
            "deprecated path element representation is not supported",
        ));
    }

    let mut elems = prefix.map(|p| p.elem.clone()).unwrap_or_default();
    elems.extend(path.elem.iter().cloned());
    Ok(elems)
}

/// Parse an XPath-like string such as `/interfaces/interface[name=eth0]/mtu`.
///
/// Key values may contain `/` inside brackets.
pub fn parse_path(path_str: &str) -> Path {
    let elem = split_segments(path_str)
        .into_iter()
        .map(|segment| {
            let (name, key) = parse_path_segment(segment);
            PathElem { name, key }
        })
        .collect();

    Path {
        elem,
        ..Default::default()
    }
}

fn split_segments(path_str: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, ch) in path_str.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                if i > start {
                    segments.push(&path_str[start..i]);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < path_str.len() {
        segments.push(&path_str[start..]);
    }
    segments
}

fn parse_path_segment(segment: &str) -> (String, HashMap<String, String>) {
    // "interface[name=eth0][unit=0]" -> ("interface", {name: eth0, unit: 0})
    let Some(bracket_pos) = segment.find('[') else {
        return (segment.to_string(), HashMap::new());
    };
    let name = segment[..bracket_pos].to_string();
    let mut keys = HashMap::new();
    for part in segment[bracket_pos..].split(']') {
        let part = part.trim_start_matches('[');
        for key_val in part.split(',') {
            if let Some((k, v)) = key_val.split_once('=') {
                keys.insert(k.trim().to_string(), v.trim().to_string());
            }
        }
    }
    (name, keys)
}

/// Render elements back to the XPath-like form, keys sorted by name.
pub fn path_to_string(elems: &[PathElem]) -> String {
    let rendered: Vec<String> = elems
        .iter()
        .map(|elem| {
            if elem.key.is_empty() {
                elem.name.clone()
            } else {
                let mut keys: Vec<_> = elem.key.iter().collect();
                keys.sort();
                let keys: Vec<String> = keys
                    .into_iter()
                    .map(|(k, v)| format!("[{}={}]", k, v))
                    .collect();
                format!("{}{}", elem.name, keys.concat())
            }
        })
        .collect();
    format!("/{}", rendered.join("/"))
}

/// Element names of a path, in order.
pub fn names(elems: &[PathElem]) -> impl Iterator<Item = &str> {
    elems.iter().map(|e| e.name.as_str())
}
