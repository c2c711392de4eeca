//! Payload to rows, for CREATE, UPDATE and the write half of REPLACE.

use log::debug;
use xlate_core::{Error, Fields, Operation, Path, Value};
use xlate_schema::{FieldBinding, NodeKind, SchemaNode};

use crate::context::{Accumulator, RequestContext};
use crate::encode::encode_leaf;
use crate::resolver::{is_table_owner, resolve, TableBinding};
use crate::walk::{invoke_subtree_to_db, is_delegation_point, path_segment, validate_passes};

/// Translate the request payload at the request path into `acc.ops`.
pub(crate) fn write_tree(ctx: &RequestContext<'_>, acc: &mut Accumulator) -> Result<(), Error> {
    let uri = ctx.request_uri;
    let node = ctx.index.node_for(uri)?;
    if node.read_only {
        return Err(Error::not_supported(format!(
            "{} {}: node is read-only",
            ctx.oper, uri
        )));
    }
    let empty = Value::map();
    let payload = ctx.payload.unwrap_or(&empty);
    debug!("{} {}: write walk", ctx.oper, uri);
    write_node(ctx, acc, uri, node, payload, false)
}

fn write_node(
    ctx: &RequestContext<'_>,
    acc: &mut Accumulator,
    uri: &Path,
    node: &SchemaNode,
    payload: &Value,
    delegated: bool,
) -> Result<(), Error> {
    match node.kind {
        NodeKind::Leaf | NodeKind::LeafList => write_leaf(ctx, acc, uri, node, payload, delegated),
        NodeKind::List if !uri.ends_with_keys() => write_list(ctx, acc, uri, node, payload, delegated),
        _ => write_complex(ctx, acc, uri, node, payload, delegated),
    }
}

/// Entries of a whole-list payload, one instance each.
fn write_list(
    ctx: &RequestContext<'_>,
    acc: &mut Accumulator,
    uri: &Path,
    node: &SchemaNode,
    payload: &Value,
    delegated: bool,
) -> Result<(), Error> {
    let entries: Vec<&Value> = match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Map(_) => vec![payload],
        Value::Null => Vec::new(),
        _ => {
            return Err(Error::not_supported(format!(
                "{}: expected list entries",
                uri
            )))
        }
    };

    for entry in entries {
        let mut keys = Vec::with_capacity(node.keys.len());
        for key in &node.keys {
            let value = entry.get(key).ok_or_else(|| {
                Error::not_supported(format!("{}: list entry without key '{}'", uri, key))
            })?;
            let encoded = match ctx.index.child(node, key) {
                Some(key_node) => encode_leaf(key_node, value, ctx.config)?,
                None => value.to_scalar_string().unwrap_or_default(),
            };
            keys.push((key.clone(), encoded));
        }
        let mut instance = uri.clone();
        if let Some(last) = instance.components.last_mut() {
            last.keys = keys;
        }
        write_complex(ctx, acc, &instance, node, entry, delegated)?;
    }
    Ok(())
}

/// A container or one list instance.
fn write_complex(
    ctx: &RequestContext<'_>,
    acc: &mut Accumulator,
    uri: &Path,
    node: &SchemaNode,
    payload: &Value,
    delegated: bool,
) -> Result<(), Error> {
    if !validate_passes(ctx, uri, node, Some(payload))? {
        return Ok(());
    }

    let mut delegated = delegated;
    if is_delegation_point(node, delegated) {
        invoke_subtree_to_db(ctx, acc, uri, node, Some(payload))?;
        if !node.has_child_subtree {
            return Ok(());
        }
        delegated = true;
    } else if delegated && !node.has_child_subtree {
        return Ok(());
    }

    if !delegated {
        let binding = resolve(ctx, &mut acc.cache, uri)?;
        if binding.has_rows() {
            place_rows(ctx, acc, uri, &binding)?;
        }
    }

    let members = match payload {
        Value::Map(members) => members,
        Value::Null => return Ok(()),
        _ => {
            return Err(Error::not_supported(format!(
                "{}: expected container content",
                uri
            )))
        }
    };

    for (member, value) in members {
        let child = ctx.index.child(node, member).ok_or_else(|| {
            Error::not_supported(format!("{}: unknown node '{}'", uri, member))
        })?;
        if child.is_key_leaf() {
            continue;
        }
        if child.read_only {
            debug!("{}: skipping read-only '{}'", uri, member);
            continue;
        }
        let child_uri = uri.child(path_segment(child));
        write_node(ctx, acc, &child_uri, child, value, delegated)?;
    }
    Ok(())
}

/// Claim the rows a container or list instance maps to.
///
/// In a replace, an owner's rows are replaced whole and any field updates
/// already collected for them move over. Elsewhere a list instance claims
/// its row so that an entry with nothing but keys is still created.
fn place_rows(
    ctx: &RequestContext<'_>,
    acc: &mut Accumulator,
    uri: &Path,
    binding: &TableBinding,
) -> Result<(), Error> {
    match ctx.oper {
        Operation::Replace => {
            if is_table_owner(ctx, &mut acc.cache, uri, binding)? {
                for table in &binding.tables {
                    let moved = acc
                        .ops
                        .entry(Operation::Update)
                        .remove_row(table, &binding.key);
                    acc.claim_row(Operation::Replace, table, &binding.key);
                    if let Some(fields) = moved {
                        let row = acc.ops.entry(Operation::Replace).ensure_row(table, &binding.key);
                        row.extend(fields);
                    }
                }
            }
        }
        op => {
            if uri.ends_with_keys() {
                for table in &binding.tables {
                    acc.claim_row(op, table, &binding.key);
                }
            }
        }
    }
    for table in &binding.tables {
        acc.touch(table, &binding.key, uri);
    }
    Ok(())
}

/// The operation a field write for `table|key` lands in.
pub(crate) fn sink_op(ctx: &RequestContext<'_>, acc: &Accumulator, table: &str, key: &str) -> Operation {
    match ctx.oper {
        Operation::Replace
            if acc
                .ops
                .get(Operation::Replace)
                .is_some_and(|rows| rows.contains_row(table, key)) =>
        {
            Operation::Replace
        }
        Operation::Replace => Operation::Update,
        op => op,
    }
}

fn write_leaf(
    ctx: &RequestContext<'_>,
    acc: &mut Accumulator,
    uri: &Path,
    node: &SchemaNode,
    value: &Value,
    delegated: bool,
) -> Result<(), Error> {
    if delegated {
        return Ok(());
    }
    if node.in_subtree() {
        return invoke_subtree_to_db(ctx, acc, uri, node, Some(value));
    }
    let binding = resolve(ctx, &mut acc.cache, uri)?;
    if !binding.has_rows() {
        debug!("{}: no row binding, leaf ignored", uri);
        return Ok(());
    }

    let fields = leaf_fields(ctx, uri, node, value, &binding)?;
    let parent = uri.parent().unwrap_or_default();
    for table in &binding.tables {
        let op = sink_op(ctx, acc, table, &binding.key);
        let rows = acc.ops.entry(op);
        for (field, v) in &fields {
            rows.insert_field(table, &binding.key, field, v);
        }
        acc.touch(table, &binding.key, &parent);
    }
    Ok(())
}

/// The store fields one leaf value maps to.
pub(crate) fn leaf_fields(
    ctx: &RequestContext<'_>,
    uri: &Path,
    node: &SchemaNode,
    value: &Value,
    binding: &TableBinding,
) -> Result<Fields, Error> {
    match &node.field {
        FieldBinding::Transformer(name) => {
            let mut params = ctx.params(uri);
            params.param = Some(value);
            params.table = binding.tables.first().map(String::as_str);
            params.key = Some(binding.key.as_str());
            ctx.registry.field_to_db(name, &params)
        }
        FieldBinding::Name(_) => {
            let mut fields = Fields::new();
            if let Some(field) = node.store_field_name() {
                fields.insert(field, encode_leaf(node, value, ctx.config)?);
            }
            Ok(fields)
        }
        FieldBinding::ListKey | FieldBinding::None => Ok(Fields::new()),
    }
}
