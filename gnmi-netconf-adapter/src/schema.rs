//! Read-only YANG schema index.
//!
//! The compiled schema arrives as a JSON5 document produced by the model
//! compiler. It is loaded once into an arena of [`SchemaNode`]s addressed by
//! [`EntryId`] and never mutated afterwards, so a single `Arc<Schema>` can be
//! shared by every request without locking.
//!
//! # Document format
//!
//! ```json5
//! {
//!   models: [{ name: "junos-conf-root", organization: "Juniper", version: "18.4R1" }],
//!   enums: { E_Rate: ["otu4", "otu3"] },
//!   root: {
//!     kind: "container",
//!     children: {
//!       configuration: {
//!         kind: "container",
//!         children: {
//!           version: { kind: "leaf", type: { kind: "string" } },
//!         },
//!       },
//!     },
//!   },
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coerce::anchor_pattern;

/// Name given to the schema root entry.
pub const ROOT_NAME: &str = "device";

/// Errors raised while loading a schema document.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse schema document: {0}")]
    Parse(String),

    #[error("invalid pattern '{pattern}' at {path}: {source}")]
    Pattern {
        path: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid schema entry {path}: {message}")]
    Entry { path: String, message: String },
}

/// Stable index of an entry inside a [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(usize);

/// YANG statement kind of a schema entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    Container,
    List,
    Leaf,
    LeafList,
}

/// Built-in YANG type of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TypeKind {
    String,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Boolean,
    Enumeration,
    Union,
    Empty,
    Decimal64,
    Binary,
    Bits,
    Identityref,
    Leafref,
    InstanceIdentifier,
}

impl TypeKind {
    /// Natural bounds of an integer kind, `None` for non-integer kinds.
    pub fn integer_bounds(&self) -> Option<(i128, i128)> {
        let bounds = match self {
            TypeKind::Int8 => (i8::MIN as i128, i8::MAX as i128),
            TypeKind::Int16 => (i16::MIN as i128, i16::MAX as i128),
            TypeKind::Int32 => (i32::MIN as i128, i32::MAX as i128),
            TypeKind::Int64 => (i64::MIN as i128, i64::MAX as i128),
            TypeKind::Uint8 => (0, u8::MAX as i128),
            TypeKind::Uint16 => (0, u16::MAX as i128),
            TypeKind::Uint32 => (0, u32::MAX as i128),
            TypeKind::Uint64 => (0, u64::MAX as i128),
            _ => return None,
        };
        Some(bounds)
    }

    pub fn is_signed_integer(&self) -> bool {
        matches!(
            self,
            TypeKind::Int8 | TypeKind::Int16 | TypeKind::Int32 | TypeKind::Int64
        )
    }
}

/// Model advertised through Capabilities and matched against `use_models`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub version: String,
}

/// A compiled `pattern` restriction.
#[derive(Debug, Clone)]
pub struct Pattern {
    /// Pattern as written in the YANG module.
    pub source: String,
    regex: Regex,
}

impl Pattern {
    fn compile(source: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            source: source.to_string(),
            regex: Regex::new(&anchor_pattern(source))?,
        })
    }

    /// Whether the whole of `value` matches the pattern.
    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

/// Type information of a leaf or leaf-list.
#[derive(Debug, Clone)]
pub struct LeafType {
    pub kind: TypeKind,
    /// All patterns must match (YANG multi-pattern semantics).
    pub patterns: Vec<Pattern>,
    /// Inclusive `(min, max)` ranges; a value must fall in at least one.
    pub ranges: Vec<(i128, i128)>,
    /// Name of the enum symbol table for `enumeration` types.
    pub enum_name: Option<String>,
    /// Member types of a `union`, in declaration order.
    pub members: Vec<LeafType>,
}

#[derive(Debug, Clone)]
pub struct SchemaNode {
    name: String,
    kind: EntryKind,
    parent: Option<EntryId>,
    children: BTreeMap<String, EntryId>,
    keys: Vec<String>,
    leaf_type: Option<LeafType>,
}

/// Immutable schema tree.
#[derive(Debug, Clone)]
pub struct Schema {
    nodes: Vec<SchemaNode>,
    models: Vec<ModelInfo>,
    enums: HashMap<String, Vec<String>>,
}

/// Borrowed view of one schema entry.
#[derive(Clone, Copy)]
pub struct Entry<'a> {
    schema: &'a Schema,
    id: EntryId,
}

impl std::fmt::Debug for Entry<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

impl<'a> Entry<'a> {
    fn node(&self) -> &'a SchemaNode {
        &self.schema.nodes[self.id.0]
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn name(&self) -> &'a str {
        &self.node().name
    }

    pub fn kind(&self) -> EntryKind {
        self.node().kind
    }

    pub fn is_leaf(&self) -> bool {
        self.kind() == EntryKind::Leaf
    }

    pub fn is_leaf_list(&self) -> bool {
        self.kind() == EntryKind::LeafList
    }

    pub fn is_list(&self) -> bool {
        self.kind() == EntryKind::List
    }

    pub fn is_container(&self) -> bool {
        self.kind() == EntryKind::Container
    }

    /// Containers and lists: entries whose values are subtrees.
    pub fn is_dir(&self) -> bool {
        matches!(self.kind(), EntryKind::Container | EntryKind::List)
    }

    /// Entries that repeat under their parent.
    pub fn is_repeated(&self) -> bool {
        matches!(self.kind(), EntryKind::List | EntryKind::LeafList)
    }

    /// Child entry by element name. Absence is not an error.
    pub fn child(&self, name: &str) -> Option<Entry<'a>> {
        self.node()
            .children
            .get(name)
            .map(|id| self.schema.entry(*id))
    }

    pub fn parent(&self) -> Option<Entry<'a>> {
        self.node().parent.map(|id| self.schema.entry(id))
    }

    /// Key leaf names of a list entry.
    pub fn keys(&self) -> &'a [String] {
        &self.node().keys
    }

    /// Type of a leaf or leaf-list; `None` for containers and lists.
    pub fn leaf_type(&self) -> Option<&'a LeafType> {
        self.node().leaf_type.as_ref()
    }

    /// Slash separated path from the root, for diagnostics.
    pub fn path(&self) -> String {
        let mut names = Vec::new();
        let mut current = Some(*self);
        while let Some(entry) = current {
            if entry.parent().is_some() {
                names.push(entry.name());
            }
            current = entry.parent();
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }
}

impl Schema {
    /// Parse a schema document from JSON5 text.
    pub fn parse(content: &str) -> Result<Self, SchemaError> {
        let doc: SchemaDocument =
            json5::from_str(content).map_err(|e| SchemaError::Parse(e.to_string()))?;
        Self::from_document(doc)
    }

    /// Load a schema document from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SchemaError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Build the arena from a deserialized document.
    pub fn from_document(doc: SchemaDocument) -> Result<Self, SchemaError> {
        let mut schema = Schema {
            nodes: Vec::new(),
            models: doc.models,
            enums: doc.enums.into_iter().collect(),
        };
        if !doc.root.kind_is_dir() {
            return Err(SchemaError::Entry {
                path: "/".to_string(),
                message: "root must be a container".to_string(),
            });
        }
        schema.insert(ROOT_NAME, doc.root, None, "")?;
        Ok(schema)
    }

    fn insert(
        &mut self,
        name: &str,
        doc: NodeDocument,
        parent: Option<EntryId>,
        parent_path: &str,
    ) -> Result<EntryId, SchemaError> {
        let path = if parent.is_none() {
            "/".to_string()
        } else {
            format!("{}/{}", parent_path.trim_end_matches('/'), name)
        };
        let entry_err = |message: &str| SchemaError::Entry {
            path: path.clone(),
            message: message.to_string(),
        };

        let is_dir = doc.kind_is_dir();
        let leaf_type = match (doc.kind, doc.leaf_type) {
            (EntryKind::Leaf | EntryKind::LeafList, Some(t)) => Some(self.compile_type(t, &path)?),
            (EntryKind::Leaf | EntryKind::LeafList, None) => {
                return Err(entry_err("leaf without a type"));
            }
            (EntryKind::Container | EntryKind::List, Some(_)) => {
                return Err(entry_err("only leaves carry a type"));
            }
            (EntryKind::Container | EntryKind::List, None) => None,
        };
        if !doc.children.is_empty() && !is_dir {
            return Err(entry_err("leaves cannot have children"));
        }
        for key in &doc.keys {
            if !doc.children.contains_key(key) {
                return Err(entry_err(&format!("list key '{}' is not a child", key)));
            }
        }

        let id = EntryId(self.nodes.len());
        self.nodes.push(SchemaNode {
            name: name.to_string(),
            kind: doc.kind,
            parent,
            children: BTreeMap::new(),
            keys: doc.keys,
            leaf_type,
        });

        for (child_name, child) in doc.children {
            let child_id = self.insert(&child_name, child, Some(id), &path)?;
            self.nodes[id.0].children.insert(child_name, child_id);
        }
        Ok(id)
    }

    fn compile_type(&self, doc: TypeDocument, path: &str) -> Result<LeafType, SchemaError> {
        let patterns = doc
            .patterns
            .iter()
            .map(|p| {
                Pattern::compile(p).map_err(|source| SchemaError::Pattern {
                    path: path.to_string(),
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(name) = &doc.enum_name
            && !self.enums.contains_key(name)
        {
            return Err(SchemaError::Entry {
                path: path.to_string(),
                message: format!("unknown enum table '{}'", name),
            });
        }
        if doc.kind == TypeKind::Union && doc.members.is_empty() {
            return Err(SchemaError::Entry {
                path: path.to_string(),
                message: "union without member types".to_string(),
            });
        }
        let ranges = doc
            .ranges
            .iter()
            .map(|[lo, hi]| -> Result<(i128, i128), SchemaError> {
                Ok((lo.resolve(doc.kind, path)?, hi.resolve(doc.kind, path)?))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if let Some((min, max)) = ranges.iter().find(|(a, b)| a > b) {
            return Err(SchemaError::Entry {
                path: path.to_string(),
                message: format!("empty range {}..{}", min, max),
            });
        }

        let members = doc
            .members
            .into_iter()
            .map(|m| self.compile_type(m, path))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LeafType {
            kind: doc.kind,
            patterns,
            ranges,
            enum_name: doc.enum_name,
            members,
        })
    }

    pub fn entry(&self, id: EntryId) -> Entry<'_> {
        Entry { schema: self, id }
    }

    pub fn root(&self) -> Entry<'_> {
        self.entry(EntryId(0))
    }

    /// Walk the tree by element names from the root.
    ///
    /// Returns `None` as soon as a name is not a child of the current entry.
    /// An empty walk yields the root.
    pub fn entry_for_path<'n>(&self, names: impl IntoIterator<Item = &'n str>) -> Option<Entry<'_>> {
        let mut entry = self.root();
        for name in names {
            entry = entry.child(name)?;
        }
        Some(entry)
    }

    /// Child of `parent` named `name`, if the schema models it.
    pub fn child_entry<'s>(&'s self, name: &str, parent: Entry<'s>) -> Option<Entry<'s>> {
        parent.child(name)
    }

    /// Symbols of a generated enumeration type.
    pub fn enum_symbols(&self, type_name: &str) -> Option<&[String]> {
        self.enums.get(type_name).map(Vec::as_slice)
    }

    pub fn models(&self) -> &[ModelInfo] {
        &self.models
    }

    /// Number of entries in the tree, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Serialized schema as produced by the model compiler.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaDocument {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
    #[serde(default)]
    pub enums: BTreeMap<String, Vec<String>>,
    pub root: NodeDocument,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeDocument {
    pub kind: EntryKind,
    #[serde(default)]
    pub children: BTreeMap<String, NodeDocument>,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default, rename = "type")]
    pub leaf_type: Option<TypeDocument>,
}

impl NodeDocument {
    fn kind_is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Container | EntryKind::List)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypeDocument {
    pub kind: TypeKind,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub ranges: Vec<[RangeBound; 2]>,
    #[serde(default, rename = "enum")]
    pub enum_name: Option<String>,
    #[serde(default)]
    pub members: Vec<TypeDocument>,
}

/// One end of an integer range.
///
/// JSON5 numbers stop at `i64`, so bounds beyond it (the upper half of
/// `uint64`) are written as decimal strings. `"min"` and `"max"` stand for
/// the natural bounds of the type.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RangeBound {
    Int(i64),
    Text(String),
}

impl RangeBound {
    fn resolve(&self, kind: TypeKind, path: &str) -> Result<i128, SchemaError> {
        let value = match self {
            RangeBound::Int(v) => Some(i128::from(*v)),
            RangeBound::Text(text) => match text.as_str() {
                "min" => kind.integer_bounds().map(|(min, _)| min),
                "max" => kind.integer_bounds().map(|(_, max)| max),
                other => other.parse().ok(),
            },
        };
        value.ok_or_else(|| SchemaError::Entry {
            path: path.to_string(),
            message: format!("invalid range bound {:?}", self),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Sample device schema shared by the unit tests of every module.
    pub(crate) fn sample() -> Schema {
        Schema::parse(include_str!("../schema/junos-device.json5")).unwrap()
    }

    #[test]
    fn test_entry_for_path() {
        let schema = sample();

        let entry = schema
            .entry_for_path([
                "configuration",
                "system",
                "services",
                "ssh",
                "max-sessions-per-connection",
            ])
            .unwrap();
        assert!(entry.is_leaf());
        assert_eq!(entry.name(), "max-sessions-per-connection");
        assert_eq!(
            entry.path(),
            "/configuration/system/services/ssh/max-sessions-per-connection"
        );

        let ssh = entry.parent().unwrap();
        assert!(ssh.is_container());
        assert!(ssh.is_dir());
    }

    #[test]
    fn test_entry_for_path_stops_at_first_missing_name() {
        let schema = sample();
        assert!(
            schema
                .entry_for_path(["system", "openflow", "agent", "config", "foo-bar"])
                .is_none()
        );
        assert!(schema.entry_for_path(["components", "component", "bar"]).is_none());
    }

    #[test]
    fn test_empty_path_is_root() {
        let schema = sample();
        let root = schema.entry_for_path(std::iter::empty()).unwrap();
        assert_eq!(root.id(), schema.root().id());
        assert!(root.is_dir());
        assert_eq!(root.path(), "/");
    }

    #[test]
    fn test_list_and_leaf_list_kinds() {
        let schema = sample();
        let interface = schema
            .entry_for_path(["configuration", "interfaces", "interface"])
            .unwrap();
        assert!(interface.is_list());
        assert!(interface.is_repeated());
        assert_eq!(interface.keys(), ["name".to_string()]);

        let versions = schema
            .entry_for_path(["configuration", "system", "services", "ssh", "protocol-version"])
            .unwrap();
        assert!(versions.is_leaf_list());
        assert!(!versions.is_dir());
    }

    #[test]
    fn test_child_entry_absent_is_none() {
        let schema = sample();
        let configuration = schema.root().child("configuration").unwrap();
        assert!(schema.child_entry("version", configuration).is_some());
        assert!(schema.child_entry("notintheschema", configuration).is_none());
    }

    #[test]
    fn test_enum_symbols_and_models() {
        let schema = sample();
        let symbols = schema.enum_symbols("E_Rate").unwrap();
        assert!(symbols.contains(&"otu4".to_string()));
        assert!(schema.enum_symbols("E_Missing").is_none());
        assert!(!schema.models().is_empty());
    }

    #[test]
    fn test_union_members_in_declaration_order() {
        let schema = sample();
        let leaf = schema
            .entry_for_path([
                "configuration",
                "system",
                "services",
                "ssh",
                "max-sessions-per-connection",
            ])
            .unwrap();
        let t = leaf.leaf_type().unwrap();
        assert_eq!(t.kind, TypeKind::Union);
        assert_eq!(t.members[0].kind, TypeKind::String);
        assert_eq!(t.members[1].kind, TypeKind::Int32);
        assert_eq!(t.members[1].ranges, vec![(1, 65535)]);
    }

    #[test]
    fn test_uint64_range_bounds_beyond_i64() {
        let doc = r#"{ root: { kind: "container", children: {
            a: { kind: "leaf", type: { kind: "uint64", ranges: [["9223372036854775808", "max"]] } },
            b: { kind: "leaf", type: { kind: "int8", ranges: [["min", -1], [1, 5]] } },
        } } }"#;
        let schema = Schema::parse(doc).unwrap();
        let a = schema.entry_for_path(["a"]).unwrap().leaf_type().unwrap();
        assert_eq!(a.ranges, vec![(1 << 63, u64::MAX as i128)]);
        let b = schema.entry_for_path(["b"]).unwrap().leaf_type().unwrap();
        assert_eq!(b.ranges, vec![(-128, -1), (1, 5)]);
    }

    #[test]
    fn test_invalid_range_bound_rejected() {
        let doc = r#"{ root: { kind: "container", children: {
            a: { kind: "leaf", type: { kind: "uint64", ranges: [[0, "lots"]] } },
        } } }"#;
        let err = Schema::parse(doc).unwrap_err();
        assert!(matches!(err, SchemaError::Entry { ref path, .. } if path == "/a"));

        let doc = r#"{ root: { kind: "container", children: {
            a: { kind: "leaf", type: { kind: "uint8", ranges: [[9, 3]] } },
        } } }"#;
        assert!(Schema::parse(doc).is_err());
    }

    #[test]
    fn test_leaf_without_type_rejected() {
        let doc = r#"{ root: { kind: "container", children: { a: { kind: "leaf" } } } }"#;
        let err = Schema::parse(doc).unwrap_err();
        assert!(matches!(err, SchemaError::Entry { ref path, .. } if path == "/a"));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let doc = r#"{ root: { kind: "container", children: {
            a: { kind: "leaf", type: { kind: "string", patterns: ["[a-z"] } } } } }"#;
        assert!(matches!(
            Schema::parse(doc),
            Err(SchemaError::Pattern { .. })
        ));
    }

    #[test]
    fn test_unknown_enum_table_rejected() {
        let doc = r#"{ root: { kind: "container", children: {
            a: { kind: "leaf", type: { kind: "enumeration", enum: "E_Nope" } } } } }"#;
        assert!(matches!(Schema::parse(doc), Err(SchemaError::Entry { .. })));
    }

    #[test]
    fn test_list_key_must_be_child() {
        let doc = r#"{ root: { kind: "container", children: {
            l: { kind: "list", keys: ["id"], children: {
                name: { kind: "leaf", type: { kind: "string" } } } } } } }"#;
        assert!(matches!(Schema::parse(doc), Err(SchemaError::Entry { .. })));
    }

    #[test]
    fn test_integer_bounds() {
        assert_eq!(TypeKind::Uint8.integer_bounds(), Some((0, 255)));
        assert_eq!(
            TypeKind::Int32.integer_bounds(),
            Some((i32::MIN as i128, i32::MAX as i128))
        );
        assert!(TypeKind::String.integer_bounds().is_none());
        assert!(TypeKind::Int16.is_signed_integer());
        assert!(!TypeKind::Uint16.is_signed_integer());
    }
}
