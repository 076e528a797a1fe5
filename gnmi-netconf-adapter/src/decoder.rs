//! NETCONF response decoder.
//!
//! Streams a `<data>` document and builds a [`Node`] tree shaped by the
//! schema. Elements the schema does not model are dropped together with
//! everything beneath them; lists and leaf-lists collect their instances into
//! arrays in document order.

use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::trace;

use crate::coerce::coerce_leaf;
use crate::error::{AdapterError, Result};
use crate::schema::{Entry, Schema};
use crate::value::{Node, Scalar};

struct Frame<'s> {
    name: String,
    entry: Option<Entry<'s>>,
    text: String,
    children: BTreeMap<String, Node>,
}

impl<'s> Frame<'s> {
    fn new(name: String, entry: Option<Entry<'s>>) -> Self {
        Self {
            name,
            entry,
            text: String::new(),
            children: BTreeMap::new(),
        }
    }

    fn collects_text(&self) -> bool {
        self.entry
            .is_some_and(|e| e.is_leaf() || e.is_leaf_list())
    }

    fn into_value(self, entry: Entry<'_>, schema: &Schema) -> Result<Node> {
        if !self.children.is_empty() {
            return Ok(Node::Object(self.children));
        }
        let text = self.text.trim();
        if text.is_empty() {
            return Ok(Node::Scalar(Scalar::Empty));
        }
        match entry.leaf_type() {
            Some(leaf_type) => coerce_leaf(text, leaf_type, schema).map(Node::Scalar),
            None => Ok(Node::Scalar(Scalar::Empty)),
        }
    }
}

/// Decode a configuration document against the schema root.
///
/// The result is always an object keyed by the top-level element names; an
/// empty document decodes to an empty object.
pub fn decode(xml: &str, schema: &Schema) -> Result<Node> {
    let mut reader = Reader::from_str(xml);
    let mut stack = vec![Frame::new(String::new(), Some(schema.root()))];

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => open(&mut stack, &start)?,
            Ok(Event::Empty(start)) => {
                open(&mut stack, &start)?;
                close(&mut stack, schema)?;
            }
            Ok(Event::End(_)) => close(&mut stack, schema)?,
            Ok(Event::Text(text)) => {
                if let Some(frame) = stack.last_mut().filter(|f| f.collects_text()) {
                    let text = text.unescape().map_err(|e| {
                        AdapterError::unknown(format!("malformed device response: {}", e))
                    })?;
                    frame.text.push_str(&text);
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(frame) = stack.last_mut().filter(|f| f.collects_text()) {
                    frame.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(AdapterError::unknown(format!(
                    "malformed device response at byte {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
        }
    }

    if stack.len() != 1 {
        return Err(AdapterError::unknown(
            "malformed device response: unclosed elements",
        ));
    }
    let root = stack
        .pop()
        .ok_or_else(|| AdapterError::internal("decoder stack underflow"))?;
    Ok(Node::Object(root.children))
}

fn open<'s>(stack: &mut Vec<Frame<'s>>, start: &BytesStart<'_>) -> Result<()> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let entry = stack
        .last()
        .and_then(|parent| parent.entry)
        .and_then(|parent| parent.child(&name));
    stack.push(Frame::new(name, entry));
    Ok(())
}

fn close(stack: &mut Vec<Frame<'_>>, schema: &Schema) -> Result<()> {
    let frame = stack
        .pop()
        .ok_or_else(|| AdapterError::unknown("malformed device response: unbalanced end tag"))?;
    let parent = stack
        .last_mut()
        .ok_or_else(|| AdapterError::unknown("malformed device response: unbalanced end tag"))?;

    let Some(entry) = frame.entry else {
        // Only log the outermost unmodeled element of a pruned subtree.
        if parent.entry.is_some() {
            trace!(element = %frame.name, "dropping element absent from schema");
        }
        return Ok(());
    };

    let name = frame.name.clone();
    let value = frame.into_value(entry, schema)?;
    if entry.is_repeated() {
        match parent.children.get_mut(&name) {
            Some(Node::Array(items)) => items.push(value),
            _ => {
                parent.children.insert(name, Node::Array(vec![value]));
            }
        }
    } else {
        parent.children.insert(name, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::sample;

    fn get<'n>(node: &'n Node, names: &[&str]) -> &'n Node {
        names.iter().fold(node, |n, name| {
            n.as_object()
                .and_then(|m| m.get(*name))
                .unwrap_or_else(|| panic!("missing {}", name))
        })
    }

    #[test]
    fn test_decode_union_leaf() {
        let schema = sample();
        let tree = decode(
            "<configuration><system><services><ssh>\
             <max-sessions-per-connection>32</max-sessions-per-connection>\
             </ssh></services></system></configuration>",
            &schema,
        )
        .unwrap();
        assert_eq!(
            get(
                &tree,
                &["configuration", "system", "services", "ssh", "max-sessions-per-connection"]
            ),
            &Node::Scalar(Scalar::Int(32))
        );
    }

    #[test]
    fn test_decode_union_with_enumeration_member() {
        let schema = sample();
        let ssh = |leaf: &str| {
            format!(
                "<configuration><system><services><ssh>\
                 <rate-limit>{}</rate-limit></ssh></services></system></configuration>",
                leaf
            )
        };
        let path = ["configuration", "system", "services", "ssh", "rate-limit"];

        let tree = decode(&ssh("unlimited"), &schema).unwrap();
        assert_eq!(
            get(&tree, &path),
            &Node::Scalar(Scalar::String("unlimited".to_string()))
        );
        let tree = decode(&ssh("25"), &schema).unwrap();
        assert_eq!(get(&tree, &path), &Node::Scalar(Scalar::Uint(25)));
        assert!(matches!(
            decode(&ssh("garbage"), &schema),
            Err(AdapterError::NotFound(_))
        ));
    }

    #[test]
    fn test_decode_drops_unmodeled_elements() {
        let schema = sample();
        let tree = decode(
            "<configuration><version>ABC</version>\
             <notintheschema><deep>XYZ</deep></notintheschema></configuration>",
            &schema,
        )
        .unwrap();
        let configuration = get(&tree, &["configuration"]).as_object().unwrap();
        assert_eq!(configuration.len(), 1);
        assert_eq!(
            configuration.get("version"),
            Some(&Node::Scalar(Scalar::String("ABC".to_string())))
        );
    }

    #[test]
    fn test_decode_list_accumulates_in_document_order() {
        let schema = sample();
        let tree = decode(
            "<components>\
             <component><name>swpri1-1-1</name></component>\
             <component><name>swpri1-1-2</name></component>\
             </components>",
            &schema,
        )
        .unwrap();
        match get(&tree, &["components", "component"]) {
            Node::Array(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(
                    get(&items[1], &["name"]),
                    &Node::Scalar(Scalar::String("swpri1-1-2".to_string()))
                );
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_single_list_instance_is_still_array() {
        let schema = sample();
        let tree = decode(
            "<configuration><interfaces><interface><name>0/3/0</name>\
             <otn-options><rate>otu4</rate><laser-enable/></otn-options>\
             </interface></interfaces></configuration>",
            &schema,
        )
        .unwrap();
        let Node::Array(items) = get(&tree, &["configuration", "interfaces", "interface"]) else {
            panic!("expected array");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(
            get(&items[0], &["otn-options", "laser-enable"]),
            &Node::Scalar(Scalar::Empty)
        );
    }

    #[test]
    fn test_decode_leaf_list() {
        let schema = sample();
        let tree = decode(
            "<configuration><system><services><ssh>\
             <protocol-version>v2</protocol-version>\
             <protocol-version>v1</protocol-version>\
             </ssh></services></system></configuration>",
            &schema,
        )
        .unwrap();
        assert_eq!(
            get(&tree, &["configuration", "system", "services", "ssh", "protocol-version"]),
            &Node::Array(vec![
                Node::Scalar(Scalar::String("v2".to_string())),
                Node::Scalar(Scalar::String("v1".to_string())),
            ])
        );
    }

    #[test]
    fn test_decode_ignores_namespace_prefixes_and_whitespace() {
        let schema = sample();
        let tree = decode(
            r#"<junos:configuration xmlns:junos="http://xml.juniper.net/junos/18.4R1/junos">
                 <junos:version>
                   18.4R1.8
                 </junos:version>
               </junos:configuration>"#,
            &schema,
        )
        .unwrap();
        assert_eq!(
            get(&tree, &["configuration", "version"]),
            &Node::Scalar(Scalar::String("18.4R1.8".to_string()))
        );
    }

    #[test]
    fn test_decode_unescapes_entities() {
        let schema = sample();
        let tree = decode(
            "<configuration><system><services><ssh>\
             <max-sessions-per-connection>&lt;limit&gt;</max-sessions-per-connection>\
             </ssh></services></system></configuration>",
            &schema,
        )
        .unwrap();
        assert_eq!(
            get(
                &tree,
                &["configuration", "system", "services", "ssh", "max-sessions-per-connection"]
            ),
            &Node::Scalar(Scalar::String("<limit>".to_string()))
        );
    }

    #[test]
    fn test_decode_empty_document() {
        let schema = sample();
        assert_eq!(decode("", &schema).unwrap(), Node::Object(BTreeMap::new()));
    }

    #[test]
    fn test_decode_union_mismatch_is_not_found() {
        let schema = sample();
        let err = decode(
            "<configuration><system><services><ssh>\
             <max-sessions-per-connection>0</max-sessions-per-connection>\
             </ssh></services></system></configuration>",
            &schema,
        )
        .unwrap_err();
        assert!(matches!(err, AdapterError::NotFound(_)));
    }

    #[test]
    fn test_decode_malformed_xml() {
        let schema = sample();
        let err = decode("<configuration><version>1</configuration>", &schema).unwrap_err();
        assert!(matches!(err, AdapterError::Unknown(_)));

        let err = decode("<configuration><version>1</version>", &schema).unwrap_err();
        assert!(matches!(err, AdapterError::Unknown(_)));
    }
}
