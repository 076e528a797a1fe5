//! Decoded configuration values and their mapping to and from gNMI.
//!
//! A [`Node`] is the request-scoped tree produced by the response decoder and
//! consumed by the edit encoder. Reads turn the node at a path into a
//! [`TypedValue`]; writes turn a [`TypedValue`] into a schema-checked node.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value as Json;

use crate::coerce::validate_text;
use crate::error::{AdapterError, Result};
use crate::gnmi::{Decimal64, PathElem, ScalarArray, TypedValue, typed_value};
use crate::schema::{Entry, Schema, TypeKind};

/// A leaf value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
    String(String),
    Int(i64),
    Uint(u64),
    Bool(bool),
    /// Element present without character data.
    Empty,
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::String(s) => f.write_str(s),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Uint(u) => write!(f, "{}", u),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Empty => Ok(()),
        }
    }
}

impl Scalar {
    fn to_json(&self) -> Json {
        match self {
            Scalar::String(s) => Json::String(s.clone()),
            Scalar::Int(i) => Json::from(*i),
            Scalar::Uint(u) => Json::from(*u),
            Scalar::Bool(b) => Json::Bool(*b),
            Scalar::Empty => Json::Null,
        }
    }
}

/// A configuration subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Scalar(Scalar),
    Object(BTreeMap<String, Node>),
    /// Instances of a list or leaf-list, in document order.
    Array(Vec<Node>),
}

impl Node {
    pub fn as_object(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Node::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Node::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Node::Scalar(s) => s.to_json(),
            Node::Object(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Node::Array(items) => Json::Array(items.iter().map(Node::to_json).collect()),
        }
    }
}

/// Walk a decoded tree down to the node named by `path`.
///
/// A list element carrying key predicates selects the instance whose key
/// leaves equal them. Without predicates the first instance is used when the
/// walk continues past the list, and the whole array is returned when the
/// list is the last element.
pub fn navigate<'n>(root: &'n Node, path: &[PathElem]) -> Result<&'n Node> {
    let mut current = root;
    for (i, elem) in path.iter().enumerate() {
        let last = i + 1 == path.len();
        let child = current
            .as_object()
            .and_then(|map| map.get(&elem.name))
            .ok_or_else(|| AdapterError::not_found(format!("node '{}' not found", elem.name)))?;

        current = match child {
            Node::Array(items) if !elem.key.is_empty() => items
                .iter()
                .find(|item| keys_match(item, elem))
                .ok_or_else(|| {
                    AdapterError::not_found(format!(
                        "no '{}' instance matches {:?}",
                        elem.name, elem.key
                    ))
                })?,
            Node::Array(_) if last => child,
            Node::Array(items) => items.first().ok_or_else(|| {
                AdapterError::not_found(format!("list '{}' has no instances", elem.name))
            })?,
            other => other,
        };
    }
    Ok(current)
}

fn keys_match(item: &Node, elem: &PathElem) -> bool {
    let Some(map) = item.as_object() else {
        return false;
    };
    elem.key.iter().all(|(name, want)| {
        map.get(name)
            .and_then(Node::as_scalar)
            .is_some_and(|have| have.to_string() == *want)
    })
}

/// Map the decoded node at a schema entry to a gNMI value.
pub fn to_typed_value(node: &Node, entry: Entry<'_>, schema: &Schema) -> Result<TypedValue> {
    let value = if entry.is_leaf() {
        let scalar = node.as_scalar().ok_or_else(|| {
            AdapterError::internal(format!("leaf {} holds a non-scalar value", entry.path()))
        })?;
        scalar_to_typed(scalar, entry, schema)?
    } else if entry.is_leaf_list() {
        let items: Vec<&Node> = match node {
            Node::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        let element = items
            .into_iter()
            .map(|item| {
                let scalar = item.as_scalar().ok_or_else(|| {
                    AdapterError::internal(format!(
                        "leaf-list {} holds a non-scalar value",
                        entry.path()
                    ))
                })?;
                Ok(TypedValue {
                    value: Some(scalar_to_typed(scalar, entry, schema)?),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        typed_value::Value::LeaflistVal(ScalarArray { element })
    } else {
        let json = serde_json::to_vec(&node.to_json())
            .map_err(|e| AdapterError::internal(format!("failed to encode JSON: {}", e)))?;
        typed_value::Value::JsonVal(json)
    };
    Ok(TypedValue { value: Some(value) })
}

fn scalar_to_typed(scalar: &Scalar, entry: Entry<'_>, schema: &Schema) -> Result<typed_value::Value> {
    let leaf_type = entry.leaf_type();
    if let (Some(t), Scalar::String(token)) = (leaf_type, scalar)
        && t.kind == TypeKind::Enumeration
        && let Some(symbols) = t.enum_name.as_deref().and_then(|n| schema.enum_symbols(n))
        && !symbols.contains(token)
    {
        return Err(AdapterError::invalid_argument(format!(
            "'{}' is not a symbol of {}",
            token,
            t.enum_name.as_deref().unwrap_or_default()
        )));
    }

    Ok(match scalar {
        Scalar::String(s) => typed_value::Value::StringVal(s.clone()),
        Scalar::Int(i) => typed_value::Value::IntVal(*i),
        Scalar::Uint(u) => typed_value::Value::UintVal(*u),
        Scalar::Bool(b) => typed_value::Value::BoolVal(*b),
        Scalar::Empty if leaf_type.is_some_and(|t| t.kind == TypeKind::Empty) => {
            typed_value::Value::BoolVal(true)
        }
        Scalar::Empty => typed_value::Value::StringVal(String::new()),
    })
}

/// Turn a gNMI value into a schema-checked node for an edit at `entry`.
pub fn from_typed_value(val: &TypedValue, entry: Entry<'_>, schema: &Schema) -> Result<Node> {
    let value = val
        .value
        .as_ref()
        .ok_or_else(|| AdapterError::invalid_argument("update carries no value"))?;

    if entry.is_dir() {
        let json = match value {
            typed_value::Value::JsonVal(bytes) | typed_value::Value::JsonIetfVal(bytes) => {
                parse_json(bytes)?
            }
            other => {
                return Err(AdapterError::invalid_argument(format!(
                    "{} expects a JSON value, got {}",
                    entry.path(),
                    value_kind(other)
                )));
            }
        };
        return match (&json, entry.is_list()) {
            (Json::Object(_), _) => json_to_node(&json, entry, schema),
            (Json::Array(items), true) => items
                .iter()
                .map(|item| match item {
                    Json::Object(_) => json_to_node(item, entry, schema),
                    _ => Err(AdapterError::invalid_argument(format!(
                        "{} instances must be JSON objects",
                        entry.path()
                    ))),
                })
                .collect::<Result<Vec<_>>>()
                .map(Node::Array),
            _ => Err(AdapterError::invalid_argument(format!(
                "{} expects a JSON object",
                entry.path()
            ))),
        };
    }

    if entry.is_leaf_list() {
        let items = match value {
            typed_value::Value::LeaflistVal(array) => array
                .element
                .iter()
                .map(|v| {
                    v.value
                        .as_ref()
                        .ok_or_else(|| AdapterError::invalid_argument("empty leaf-list element"))
                        .and_then(typed_to_scalar)
                })
                .collect::<Result<Vec<_>>>()?,
            typed_value::Value::JsonVal(bytes) | typed_value::Value::JsonIetfVal(bytes) => {
                match parse_json(bytes)? {
                    Json::Array(items) => items
                        .iter()
                        .map(json_to_scalar)
                        .collect::<Result<Vec<_>>>()?,
                    single => vec![json_to_scalar(&single)?],
                }
            }
            other => vec![typed_to_scalar(other)?],
        };
        return items
            .into_iter()
            .map(|scalar| checked_leaf(scalar, entry, schema).map(Node::Scalar))
            .collect::<Result<Vec<_>>>()
            .map(Node::Array);
    }

    let scalar = match value {
        typed_value::Value::JsonVal(bytes) | typed_value::Value::JsonIetfVal(bytes) => {
            json_to_scalar(&parse_json(bytes)?)?
        }
        other => typed_to_scalar(other)?,
    };
    checked_leaf(scalar, entry, schema).map(Node::Scalar)
}

fn parse_json(bytes: &[u8]) -> Result<Json> {
    serde_json::from_slice(bytes)
        .map_err(|e| AdapterError::invalid_argument(format!("malformed JSON payload: {}", e)))
}

fn typed_to_scalar(value: &typed_value::Value) -> Result<Scalar> {
    use typed_value::Value;

    Ok(match value {
        Value::StringVal(s) | Value::AsciiVal(s) => Scalar::String(s.clone()),
        Value::IntVal(i) => Scalar::Int(*i),
        Value::UintVal(u) => Scalar::Uint(*u),
        Value::BoolVal(b) => Scalar::Bool(*b),
        Value::FloatVal(f) => Scalar::String(f.to_string()),
        Value::DoubleVal(d) => Scalar::String(d.to_string()),
        Value::DecimalVal(d) => Scalar::String(format_decimal(d)?),
        other => {
            return Err(AdapterError::invalid_argument(format!(
                "unsupported value type {} for a leaf",
                value_kind(other)
            )));
        }
    })
}

fn json_to_scalar(json: &Json) -> Result<Scalar> {
    Ok(match json {
        Json::String(s) => Scalar::String(s.clone()),
        Json::Bool(b) => Scalar::Bool(*b),
        Json::Null => Scalar::Empty,
        Json::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => Scalar::Int(i),
            (None, Some(u)) => Scalar::Uint(u),
            _ => Scalar::String(n.to_string()),
        },
        // RFC 7951 encodes an `empty` leaf as [null].
        Json::Array(items) if matches!(items.as_slice(), [Json::Null]) => Scalar::Empty,
        Json::Array(_) | Json::Object(_) => {
            return Err(AdapterError::invalid_argument(
                "expected a scalar JSON value for a leaf",
            ));
        }
    })
}

/// Recursively convert a JSON object into a node, rejecting names the schema
/// does not model and validating every leaf.
fn json_to_node(json: &Json, entry: Entry<'_>, schema: &Schema) -> Result<Node> {
    match json {
        Json::Object(members) => {
            let mut map = BTreeMap::new();
            for (key, value) in members {
                // RFC 7951 member names may carry a module prefix.
                let name = key.rsplit_once(':').map_or(key.as_str(), |(_, n)| n);
                let child = entry.child(name).ok_or_else(|| {
                    AdapterError::invalid_argument(format!(
                        "'{}' is not a child of {}",
                        name,
                        entry.path()
                    ))
                })?;
                map.insert(name.to_string(), json_to_child(value, child, schema)?);
            }
            Ok(Node::Object(map))
        }
        _ => Err(AdapterError::invalid_argument(format!(
            "{} expects a JSON object",
            entry.path()
        ))),
    }
}

fn json_to_child(json: &Json, entry: Entry<'_>, schema: &Schema) -> Result<Node> {
    if entry.is_dir() {
        return match json {
            Json::Array(items) if entry.is_list() => items
                .iter()
                .map(|item| json_to_node(item, entry, schema))
                .collect::<Result<Vec<_>>>()
                .map(Node::Array),
            _ => json_to_node(json, entry, schema),
        };
    }
    if entry.is_leaf_list() {
        let items = match json {
            Json::Array(items) => items.iter().map(json_to_scalar).collect::<Result<Vec<_>>>()?,
            single => vec![json_to_scalar(single)?],
        };
        return items
            .into_iter()
            .map(|scalar| checked_leaf(scalar, entry, schema).map(Node::Scalar))
            .collect::<Result<Vec<_>>>()
            .map(Node::Array);
    }
    let scalar = json_to_scalar(json)?;
    checked_leaf(scalar, entry, schema).map(Node::Scalar)
}

/// Validate a scalar against its leaf type and return it in the form the
/// encoder writes.
///
/// `true` on an `empty` leaf is how Get reports a present flag, so it is
/// accepted back and written as the empty element.
fn checked_leaf(scalar: Scalar, entry: Entry<'_>, schema: &Schema) -> Result<Scalar> {
    let leaf_type = entry
        .leaf_type()
        .ok_or_else(|| AdapterError::internal(format!("leaf {} has no type", entry.path())))?;
    if leaf_type.kind == TypeKind::Empty && scalar == Scalar::Bool(true) {
        return Ok(Scalar::Empty);
    }
    validate_text(&scalar.to_string(), leaf_type, schema)?;
    Ok(scalar)
}

/// decimal64 carries at most 18 fraction digits.
const MAX_DECIMAL_PRECISION: u32 = 18;

fn format_decimal(d: &Decimal64) -> Result<String> {
    if d.precision > MAX_DECIMAL_PRECISION {
        return Err(AdapterError::invalid_argument(format!(
            "decimal precision {} exceeds {} fraction digits",
            d.precision, MAX_DECIMAL_PRECISION
        )));
    }
    let sign = if d.digits < 0 { "-" } else { "" };
    let digits = d.digits.unsigned_abs().to_string();
    let precision = d.precision as usize;
    if precision == 0 {
        return Ok(format!("{}{}", sign, digits));
    }
    let padded = if digits.len() > precision {
        digits
    } else {
        format!("{}{}", "0".repeat(precision + 1 - digits.len()), digits)
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - precision);
    Ok(format!("{}{}.{}", sign, int_part, frac_part))
}

fn value_kind(value: &typed_value::Value) -> &'static str {
    use typed_value::Value;

    match value {
        Value::StringVal(_) => "string_val",
        Value::IntVal(_) => "int_val",
        Value::UintVal(_) => "uint_val",
        Value::BoolVal(_) => "bool_val",
        Value::BytesVal(_) => "bytes_val",
        Value::FloatVal(_) => "float_val",
        Value::DecimalVal(_) => "decimal_val",
        Value::LeaflistVal(_) => "leaflist_val",
        Value::AnyVal(_) => "any_val",
        Value::JsonVal(_) => "json_val",
        Value::JsonIetfVal(_) => "json_ietf_val",
        Value::AsciiVal(_) => "ascii_val",
        Value::ProtoBytes(_) => "proto_bytes",
        Value::DoubleVal(_) => "double_val",
    }
}
