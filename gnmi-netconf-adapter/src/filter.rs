//! NETCONF request encoding.
//!
//! Builds `<get-config>` subtree filters and `<edit-config>` fragments from
//! gNMI paths. Elements open in path order and close in reverse; key
//! predicates become key leaves inside their list element.

use std::collections::HashMap;
use std::fmt;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use crate::error::{AdapterError, Result};
use crate::gnmi::PathElem;
use crate::value::{Node, Scalar};

/// NETCONF `operation` attribute values for the gNMI Set sub-operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOperation {
    /// gNMI update.
    Merge,
    /// gNMI replace.
    Replace,
    /// gNMI delete.
    Delete,
}

impl EditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditOperation::Merge => "merge",
            EditOperation::Replace => "replace",
            EditOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for EditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encodes filters and edit fragments, attaching `xmlns` attributes to the
/// element names listed in the namespace table.
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    namespaces: HashMap<String, String>,
}

impl Encoder {
    pub fn new(namespaces: HashMap<String, String>) -> Self {
        Self { namespaces }
    }

    /// Subtree filter selecting everything under `path`.
    ///
    /// An empty path selects the whole configuration and yields no filter.
    pub fn build_get_filter(&self, path: &[PathElem]) -> Result<Option<String>> {
        if path.is_empty() {
            return Ok(None);
        }
        let mut xml = XmlOut::new(self);
        for elem in path {
            xml.open(&elem.name, None)?;
            xml.keys(elem)?;
        }
        for elem in path.iter().rev() {
            xml.close(&elem.name)?;
        }
        xml.finish().map(Some)
    }

    /// Edit-config fragment applying `op` at the last element of `path`.
    ///
    /// `value` is ignored for deletes. Writes to the bare root are refused.
    pub fn build_edit_fragment(
        &self,
        op: EditOperation,
        path: &[PathElem],
        value: Option<&Node>,
    ) -> Result<String> {
        let Some((target, ancestors)) = path.split_last() else {
            return Err(AdapterError::unimplemented(
                "editing the whole device configuration is not supported",
            ));
        };

        let mut xml = XmlOut::new(self);
        for elem in ancestors {
            xml.open(&elem.name, None)?;
            xml.keys(elem)?;
        }

        match (op, value) {
            (EditOperation::Delete, _) | (_, None) => {
                xml.open(&target.name, Some(op))?;
                xml.keys(target)?;
                xml.close(&target.name)?;
            }
            (_, Some(Node::Array(items))) if target.key.is_empty() => {
                for item in items {
                    xml.open(&target.name, Some(op))?;
                    xml.body(item, &[])?;
                    xml.close(&target.name)?;
                }
            }
            (_, Some(node)) => {
                xml.open(&target.name, Some(op))?;
                xml.keys(target)?;
                let emitted: Vec<&str> = target.key.keys().map(String::as_str).collect();
                xml.body(node, &emitted)?;
                xml.close(&target.name)?;
            }
        }

        for elem in ancestors.iter().rev() {
            xml.close(&elem.name)?;
        }
        xml.finish()
    }
}

struct XmlOut<'e> {
    encoder: &'e Encoder,
    writer: Writer<Vec<u8>>,
}

impl<'e> XmlOut<'e> {
    fn new(encoder: &'e Encoder) -> Self {
        Self {
            encoder,
            writer: Writer::new(Vec::new()),
        }
    }

    fn write(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| AdapterError::internal(format!("failed to write XML: {}", e)))
    }

    fn open(&mut self, name: &str, op: Option<EditOperation>) -> Result<()> {
        let mut start = BytesStart::new(name);
        if let Some(ns) = self.encoder.namespaces.get(name) {
            start.push_attribute(("xmlns", ns.as_str()));
        }
        if let Some(op) = op {
            start.push_attribute(("operation", op.as_str()));
        }
        self.write(Event::Start(start))
    }

    fn close(&mut self, name: &str) -> Result<()> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    fn text(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.write(Event::Text(BytesText::new(text)))
    }

    /// Key leaves of a list element, sorted by key name.
    fn keys(&mut self, elem: &PathElem) -> Result<()> {
        let mut keys: Vec<_> = elem.key.iter().collect();
        keys.sort();
        for (name, value) in keys {
            self.open(name, None)?;
            self.text(value)?;
            self.close(name)?;
        }
        Ok(())
    }

    /// Contents of an element, skipping members already written as keys.
    fn body(&mut self, node: &Node, skip: &[&str]) -> Result<()> {
        match node {
            Node::Scalar(scalar) => self.scalar(scalar),
            Node::Object(members) => {
                for (name, child) in members {
                    if !skip.contains(&name.as_str()) {
                        self.element(name, child)?;
                    }
                }
                Ok(())
            }
            Node::Array(_) => Err(AdapterError::invalid_argument(
                "a JSON array is only valid for a list or leaf-list",
            )),
        }
    }

    fn element(&mut self, name: &str, node: &Node) -> Result<()> {
        if let Node::Array(items) = node {
            for item in items {
                self.element(name, item)?;
            }
            return Ok(());
        }
        self.open(name, None)?;
        self.body(node, &[])?;
        self.close(name)
    }

    fn scalar(&mut self, scalar: &Scalar) -> Result<()> {
        self.text(&scalar.to_string())
    }

    fn finish(self) -> Result<String> {
        String::from_utf8(self.writer.into_inner())
            .map_err(|e| AdapterError::internal(format!("generated XML is not UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::parse_path;
    use std::collections::BTreeMap;

    fn elems(path: &str) -> Vec<PathElem> {
        parse_path(path).elem
    }

    fn object(members: &[(&str, Node)]) -> Node {
        Node::Object(
            members
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn text(s: &str) -> Node {
        Node::Scalar(Scalar::String(s.to_string()))
    }

    #[test]
    fn test_get_filter_nests_elements() {
        let encoder = Encoder::default();
        let filter = encoder
            .build_get_filter(&elems("/configuration/system/services"))
            .unwrap();
        assert_eq!(
            filter.as_deref(),
            Some("<configuration><system><services></services></system></configuration>")
        );
    }

    #[test]
    fn test_get_filter_keys_inside_element() {
        let encoder = Encoder::default();
        let filter = encoder
            .build_get_filter(&elems(
                "/configuration/interfaces/interface[name=0/3/0]/otn-options/rate",
            ))
            .unwrap();
        assert_eq!(
            filter.as_deref(),
            Some(
                "<configuration><interfaces><interface><name>0/3/0</name>\
                 <otn-options><rate></rate></otn-options></interface></interfaces></configuration>"
            )
        );
    }

    #[test]
    fn test_get_filter_root_is_none() {
        let encoder = Encoder::default();
        assert_eq!(encoder.build_get_filter(&[]).unwrap(), None);
    }

    #[test]
    fn test_get_filter_is_deterministic() {
        let encoder = Encoder::default();
        let path = elems("/configuration/interfaces/interface[name=0/3/0][unit=5]");
        let first = encoder.build_get_filter(&path).unwrap();
        for _ in 0..10 {
            assert_eq!(encoder.build_get_filter(&path).unwrap(), first);
        }
        assert_eq!(
            first.as_deref(),
            Some(
                "<configuration><interfaces><interface><name>0/3/0</name><unit>5</unit>\
                 </interface></interfaces></configuration>"
            )
        );
    }

    #[test]
    fn test_get_filter_escapes_key_values() {
        let encoder = Encoder::default();
        let filter = encoder
            .build_get_filter(&elems("/components/component[name=a<b&c]"))
            .unwrap();
        assert_eq!(
            filter.as_deref(),
            Some("<components><component><name>a&lt;b&amp;c</name></component></components>")
        );
    }

    #[test]
    fn test_namespace_table() {
        let encoder = Encoder::new(HashMap::from([(
            "interfaces".to_string(),
            "urn:ietf:params:xml:ns:yang:ietf-interfaces".to_string(),
        )]));
        let filter = encoder
            .build_get_filter(&elems("/interfaces/interface[name=sw0p5]"))
            .unwrap();
        assert_eq!(
            filter.as_deref(),
            Some(
                "<interfaces xmlns=\"urn:ietf:params:xml:ns:yang:ietf-interfaces\">\
                 <interface><name>sw0p5</name></interface></interfaces>"
            )
        );
    }

    #[test]
    fn test_edit_merge_subtree() {
        let encoder = Encoder::default();
        let value = object(&[("max-sessions-per-connection", Node::Scalar(Scalar::Int(16)))]);
        let xml = encoder
            .build_edit_fragment(
                EditOperation::Merge,
                &elems("/configuration/system/services/ssh"),
                Some(&value),
            )
            .unwrap();
        assert_eq!(
            xml,
            "<configuration><system><services><ssh operation=\"merge\">\
             <max-sessions-per-connection>16</max-sessions-per-connection>\
             </ssh></services></system></configuration>"
        );
    }

    #[test]
    fn test_edit_leaf_value_inside_element() {
        let encoder = Encoder::default();
        let xml = encoder
            .build_edit_fragment(
                EditOperation::Replace,
                &elems("/configuration/version"),
                Some(&text("ABC")),
            )
            .unwrap();
        assert_eq!(
            xml,
            "<configuration><version operation=\"replace\">ABC</version></configuration>"
        );
    }

    #[test]
    fn test_edit_delete_has_no_body() {
        let encoder = Encoder::default();
        let xml = encoder
            .build_edit_fragment(
                EditOperation::Delete,
                &elems("/configuration/system/services/ssh"),
                Some(&text("ignored")),
            )
            .unwrap();
        assert_eq!(
            xml,
            "<configuration><system><services><ssh operation=\"delete\"></ssh>\
             </services></system></configuration>"
        );
    }

    #[test]
    fn test_edit_operation_only_on_last_element() {
        let encoder = Encoder::default();
        for op in [
            EditOperation::Merge,
            EditOperation::Replace,
            EditOperation::Delete,
        ] {
            let xml = encoder
                .build_edit_fragment(
                    op,
                    &elems("/configuration/interfaces/interface[name=0/3/0]/otn-options"),
                    Some(&object(&[("rate", text("otu4"))])),
                )
                .unwrap();
            assert_eq!(xml.matches("operation=").count(), 1);
            assert!(xml.contains(&format!("<otn-options operation=\"{}\">", op)));
            assert!(xml.starts_with("<configuration><interfaces><interface><name>0/3/0</name>"));
        }
    }

    #[test]
    fn test_edit_sorted_members_and_empty_leaf() {
        let encoder = Encoder::default();
        let value = object(&[("rate", text("otu4")), ("laser-enable", text(""))]);
        let xml = encoder
            .build_edit_fragment(
                EditOperation::Replace,
                &elems("/configuration/interfaces/interface[name=0/3/0]/otn-options"),
                Some(&value),
            )
            .unwrap();
        assert_eq!(
            xml,
            "<configuration><interfaces><interface><name>0/3/0</name>\
             <otn-options operation=\"replace\"><laser-enable></laser-enable><rate>otu4</rate>\
             </otn-options></interface></interfaces></configuration>"
        );
    }

    #[test]
    fn test_edit_keyed_target_skips_duplicate_key_member() {
        let encoder = Encoder::default();
        let value = object(&[("name", text("0/3/0")), ("description", text("uplink"))]);
        let xml = encoder
            .build_edit_fragment(
                EditOperation::Merge,
                &elems("/configuration/interfaces/interface[name=0/3/0]"),
                Some(&value),
            )
            .unwrap();
        assert_eq!(
            xml,
            "<configuration><interfaces><interface operation=\"merge\"><name>0/3/0</name>\
             <description>uplink</description></interface></interfaces></configuration>"
        );
    }

    #[test]
    fn test_edit_arrays_repeat_elements() {
        let encoder = Encoder::default();
        let value = object(&[(
            "protocol-version",
            Node::Array(vec![text("v2"), text("v1")]),
        )]);
        let xml = encoder
            .build_edit_fragment(
                EditOperation::Merge,
                &elems("/configuration/system/services/ssh"),
                Some(&value),
            )
            .unwrap();
        assert!(xml.contains(
            "<protocol-version>v2</protocol-version><protocol-version>v1</protocol-version>"
        ));

        let instances = Node::Array(vec![
            object(&[("name", text("a"))]),
            object(&[("name", text("b"))]),
        ]);
        let xml = encoder
            .build_edit_fragment(
                EditOperation::Merge,
                &elems("/components/component"),
                Some(&instances),
            )
            .unwrap();
        assert_eq!(
            xml,
            "<components><component operation=\"merge\"><name>a</name></component>\
             <component operation=\"merge\"><name>b</name></component></components>"
        );
    }

    #[test]
    fn test_edit_root_is_unimplemented() {
        let encoder = Encoder::default();
        let err = encoder
            .build_edit_fragment(EditOperation::Replace, &[], Some(&text("x")))
            .unwrap_err();
        assert!(matches!(err, AdapterError::Unimplemented(_)));
    }
}
