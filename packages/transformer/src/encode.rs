//! Leaf values to store strings and back.

use xlate_core::{join_list, split_list, Error, Value};
use xlate_schema::{SchemaNode, ValueType};

use crate::config::TranslatorConfig;

/// Encode a leaf or leaf-list payload value for storage.
pub fn encode_leaf(
    node: &SchemaNode,
    value: &Value,
    config: &TranslatorConfig,
) -> Result<String, Error> {
    if node.is_leaf_list() {
        let items = match value {
            Value::Array(items) => items
                .iter()
                .map(|item| encode_scalar(node, item, config))
                .collect::<Result<Vec<_>, _>>()?,
            single => vec![encode_scalar(node, single, config)?],
        };
        return Ok(join_list(&items));
    }
    encode_scalar(node, value, config)
}

fn encode_scalar(
    node: &SchemaNode,
    value: &Value,
    config: &TranslatorConfig,
) -> Result<String, Error> {
    match (node.value_type, value) {
        // An empty-typed leaf is present as `null` or `[null]`.
        (ValueType::Empty, Value::Null | Value::Array(_)) => Ok("true".to_string()),
        (ValueType::Enum | ValueType::Identityref, Value::String(s)) => {
            Ok(config.strip_value_prefix(s).to_string())
        }
        (_, scalar) => scalar.to_scalar_string().ok_or_else(|| {
            Error::not_supported(format!("{}: expected a scalar value", node.path))
        }),
    }
}

/// Decode a stored field into a leaf or leaf-list value.
pub fn decode_field(node: &SchemaNode, raw: &str) -> Value {
    if node.is_leaf_list() {
        return Value::Array(
            split_list(raw)
                .iter()
                .map(|item| decode_scalar(node.value_type, item))
                .collect(),
        );
    }
    decode_scalar(node.value_type, raw)
}

fn decode_scalar(ty: ValueType, raw: &str) -> Value {
    match ty {
        ValueType::Int => raw
            .parse::<i64>()
            .map(Value::Integer)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        ValueType::Uint => raw
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        ValueType::Decimal => raw
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        ValueType::Bool => match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            other => Value::String(other.to_string()),
        },
        ValueType::Empty => Value::Array(vec![Value::Null]),
        _ => Value::String(raw.to_string()),
    }
}

/// Parse a declared default into a payload value of the leaf's type.
pub fn default_value(node: &SchemaNode) -> Option<Value> {
    node.default.as_deref().map(|d| decode_field(node, d))
}
