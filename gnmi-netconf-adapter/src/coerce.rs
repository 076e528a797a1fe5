//! Leaf value coercion.
//!
//! Turns the character data of a NETCONF leaf into a typed [`Scalar`] guided
//! by the leaf's [`LeafType`], and converts YANG (W3C XSD) patterns into
//! fully anchored `regex` syntax.

use crate::error::{AdapterError, Result};
use crate::schema::{LeafType, Schema, TypeKind};
use crate::value::Scalar;

/// Coerce raw leaf text into a scalar of the declared type.
///
/// Unions try their member types in declaration order and the first match
/// wins; enumeration members only match symbols of their table. Kinds without
/// dedicated handling pass through as the trimmed string.
pub fn coerce_leaf(raw: &str, leaf_type: &LeafType, schema: &Schema) -> Result<Scalar> {
    let text = raw.trim();
    match leaf_type.kind {
        TypeKind::Union => coerce_union(text, leaf_type, schema),
        TypeKind::Boolean => parse_bool(text),
        TypeKind::Empty => Ok(Scalar::Empty),
        kind if kind.integer_bounds().is_some() => parse_integer(text, leaf_type).ok_or_else(|| {
            AdapterError::invalid_argument(format!(
                "'{}' is not a valid {:?} value",
                text, leaf_type.kind
            ))
        }),
        _ => Ok(Scalar::String(text.to_string())),
    }
}

fn coerce_union(text: &str, leaf_type: &LeafType, schema: &Schema) -> Result<Scalar> {
    for member in &leaf_type.members {
        if let Some(scalar) = try_member(text, member, schema) {
            return Ok(scalar);
        }
    }
    Err(AdapterError::not_found(format!(
        "no union member type matches '{}'",
        text
    )))
}

fn try_member(text: &str, member: &LeafType, schema: &Schema) -> Option<Scalar> {
    match member.kind {
        TypeKind::String => member
            .patterns
            .iter()
            .all(|p| p.matches(text))
            .then(|| Scalar::String(text.to_string())),
        TypeKind::Enumeration => {
            is_symbol(text, member, schema).then(|| Scalar::String(text.to_string()))
        }
        TypeKind::Union => coerce_union(text, member, schema).ok(),
        TypeKind::Boolean => parse_bool(text).ok(),
        TypeKind::Empty => text.is_empty().then_some(Scalar::Empty),
        kind if kind.integer_bounds().is_some() => parse_integer(text, member),
        _ => Some(Scalar::String(text.to_string())),
    }
}

/// Parse an integer in the width of its kind and check declared ranges.
///
/// With no declared range any value of the natural width is accepted.
fn parse_integer(text: &str, leaf_type: &LeafType) -> Option<Scalar> {
    let (min, max) = leaf_type.kind.integer_bounds()?;
    let value: i128 = text.parse().ok()?;
    if value < min || value > max {
        return None;
    }
    let in_range = leaf_type.ranges.is_empty()
        || leaf_type
            .ranges
            .iter()
            .any(|(lo, hi)| value >= *lo && value <= *hi);
    if !in_range {
        return None;
    }
    if leaf_type.kind.is_signed_integer() {
        i64::try_from(value).ok().map(Scalar::Int)
    } else {
        u64::try_from(value).ok().map(Scalar::Uint)
    }
}

/// Whether `text` is a symbol of the enumeration's table. A type naming no
/// table accepts any symbol.
fn is_symbol(text: &str, leaf_type: &LeafType, schema: &Schema) -> bool {
    leaf_type
        .enum_name
        .as_deref()
        .and_then(|name| schema.enum_symbols(name))
        .is_none_or(|symbols| symbols.iter().any(|s| s == text))
}

fn parse_bool(text: &str) -> Result<Scalar> {
    match text {
        "true" => Ok(Scalar::Bool(true)),
        "false" => Ok(Scalar::Bool(false)),
        _ => Err(AdapterError::invalid_argument(format!(
            "'{}' is not a valid boolean",
            text
        ))),
    }
}

/// Validate the textual form of a value about to be written to a leaf.
///
/// Enumerations are checked against their symbol table, strings against
/// every pattern, integers against width and ranges.
pub fn validate_text(text: &str, leaf_type: &LeafType, schema: &Schema) -> Result<()> {
    let valid = match leaf_type.kind {
        TypeKind::Enumeration => is_symbol(text, leaf_type, schema),
        TypeKind::String => leaf_type.patterns.iter().all(|p| p.matches(text)),
        TypeKind::Union => coerce_union(text, leaf_type, schema).is_ok(),
        TypeKind::Boolean => parse_bool(text).is_ok(),
        TypeKind::Empty => text.is_empty(),
        kind if kind.integer_bounds().is_some() => parse_integer(text, leaf_type).is_some(),
        _ => true,
    };
    if valid {
        Ok(())
    } else {
        Err(AdapterError::invalid_argument(format!(
            "value '{}' does not satisfy type {:?}",
            text, leaf_type.kind
        )))
    }
}

/// Rewrite a YANG pattern so that it matches the whole input string.
///
/// XSD patterns are implicitly anchored. Unanchored patterns are wrapped in
/// `^(...)$`, and `^`/`$` characters that are not anchors are escaped.
pub fn anchor_pattern(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let last = chars.len().saturating_sub(1);
    let mut out = String::with_capacity(pattern.len() + 6);
    let mut in_escape = false;
    let mut prev: Option<char> = None;
    let mut wrapped = false;

    if chars.is_empty() {
        return "^$".to_string();
    }

    for (i, &ch) in chars.iter().enumerate() {
        if i == 0 && ch != '^' {
            out.push_str("^(");
            wrapped = true;
        }

        let escaped = in_escape;
        match ch {
            '$' if !escaped && i != last => out.push('\\'),
            '^' if !escaped && prev != Some('[') && i != 0 => out.push('\\'),
            _ => {}
        }

        in_escape = !escaped && ch == '\\';
        out.push(ch);

        if i == last {
            if wrapped {
                out.push(')');
            }
            if ch != '$' || escaped || wrapped {
                out.push('$');
            }
        }
        prev = Some(ch);
    }
    out
}
