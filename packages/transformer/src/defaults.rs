//! Declared defaults for leaves a write left out.

use std::collections::BTreeSet;

use log::{debug, warn};
use xlate_core::{Error, Fields, Operation, Path};
use xlate_schema::{FieldBinding, SchemaNode};

use crate::context::{Accumulator, RequestContext};
use crate::encode::default_value;
use crate::resolver::{resolve, TableBinding};
use crate::walk::path_segment;
use crate::write::leaf_fields;

/// A leaf bound to one particular row.
struct RowLeaf<'n> {
    uri: Path,
    node: &'n SchemaNode,
    binding: TableBinding,
}

/// Fill defaults for a CREATE or UPDATE.
///
/// Only rows the walk touched and that a non-delete operation writes get
/// defaults, and only for fields neither the payload nor the stored row
/// already carries.
pub(crate) fn fill_defaults(ctx: &RequestContext<'_>, acc: &mut Accumulator) -> Result<(), Error> {
    if ctx.index.node_for(ctx.request_uri)?.is_terminal() {
        return Ok(());
    }
    for (table, key, uris) in touched_rows(acc) {
        if !matches!(acc.ops.find_row(&table, &key), Some(op) if op != Operation::Delete) {
            continue;
        }
        let leaves = row_leaves(ctx, acc, &table, &key, &uris)?;
        let Some(db) = leaves.first().map(|l| l.binding.db) else {
            continue;
        };
        let stored = acc.cache.row(ctx, db, &table, &key)?.unwrap_or_default();
        for leaf in &leaves {
            let Some(fields) = default_fields(ctx, leaf, &table)? else {
                continue;
            };
            for (field, value) in fields {
                if acc.ops.writes_field(&table, &key, &field) || stored.contains_key(&field) {
                    continue;
                }
                debug!("{}: default {}={}", leaf.uri, field, value);
                acc.defaults.insert_field(&table, &key, &field, &value);
            }
        }
    }
    Ok(())
}

/// Fill defaults for a REPLACE.
///
/// Rows replaced whole get their defaults in `acc.defaults` and every other
/// unset mapped leaf recorded as `""` in `acc.aux`. Rows updated in place
/// get their defaults as updates and their unset stored fields deleted.
pub(crate) fn fill_replace_defaults(
    ctx: &RequestContext<'_>,
    acc: &mut Accumulator,
) -> Result<(), Error> {
    for (table, key, uris) in touched_rows(acc) {
        let replaced = acc
            .ops
            .get(Operation::Replace)
            .is_some_and(|rows| rows.contains_row(&table, &key));
        let leaves = row_leaves(ctx, acc, &table, &key, &uris)?;
        let Some(db) = leaves.first().map(|l| l.binding.db) else {
            continue;
        };
        let stored = if replaced {
            Fields::new()
        } else {
            acc.cache.row(ctx, db, &table, &key)?.unwrap_or_default()
        };

        for leaf in &leaves {
            if let Some(fields) = default_fields(ctx, leaf, &table)? {
                for (field, value) in fields {
                    if acc.ops.writes_field(&table, &key, &field) {
                        continue;
                    }
                    if replaced {
                        acc.defaults.insert_field(&table, &key, &field, &value);
                    } else if stored.get(&field) != Some(&value) {
                        acc.ops
                            .entry(Operation::Update)
                            .insert_field(&table, &key, &field, &value);
                    }
                }
                continue;
            }
            let Some(field) = leaf.node.store_field_name() else {
                continue;
            };
            if !known_field(ctx, &table, &field) || acc.ops.writes_field(&table, &key, &field) {
                continue;
            }
            if replaced {
                acc.aux.insert_field(&table, &key, &field, "");
            } else if stored.contains_key(&field) {
                acc.ops
                    .entry(Operation::Delete)
                    .insert_field(&table, &key, &field, "");
            }
        }
    }
    Ok(())
}

fn touched_rows(acc: &Accumulator) -> Vec<(String, String, Vec<Path>)> {
    acc.touched
        .iter()
        .map(|((table, key), uris)| (table.clone(), key.clone(), uris.values().cloned().collect()))
        .collect()
}

/// Config leaves below `uris` that map onto `table|key`, descending into
/// containers that stay on the same row.
fn row_leaves<'n>(
    ctx: &RequestContext<'n>,
    acc: &mut Accumulator,
    table: &str,
    key: &str,
    uris: &[Path],
) -> Result<Vec<RowLeaf<'n>>, Error> {
    let mut out = Vec::new();
    let mut visited = BTreeSet::new();
    let mut pending: Vec<Path> = uris.to_vec();

    while let Some(uri) = pending.pop() {
        if !visited.insert(uri.to_string()) {
            continue;
        }
        let node = ctx.index.node_for(&uri)?;
        if node.is_terminal() {
            continue;
        }
        for child in ctx.index.children(node) {
            if child.read_only || child.in_subtree() || child.is_key_leaf() || child.is_list() {
                continue;
            }
            let child_uri = uri.child(path_segment(child));
            let binding = resolve(ctx, &mut acc.cache, &child_uri)?;
            if binding.key != key || !binding.tables.iter().any(|t| t == table) {
                continue;
            }
            if child.is_terminal() {
                out.push(RowLeaf {
                    uri: child_uri,
                    node: child,
                    binding,
                });
            } else {
                pending.push(child_uri);
            }
        }
    }
    Ok(out)
}

/// A described table must list the field as a non-key field. Tables
/// without a description accept any field.
fn known_field(ctx: &RequestContext<'_>, table: &str, field: &str) -> bool {
    ctx.index
        .table(table)
        .map_or(true, |def| def.field(field).is_some() && !def.is_key_field(field))
}

/// The store fields a leaf's declared default maps to, if it has one.
fn default_fields(
    ctx: &RequestContext<'_>,
    leaf: &RowLeaf<'_>,
    table: &str,
) -> Result<Option<Fields>, Error> {
    let Some(value) = default_value(leaf.node) else {
        return Ok(None);
    };
    match &leaf.node.field {
        FieldBinding::Transformer(name) => {
            match leaf_fields(ctx, &leaf.uri, leaf.node, &value, &leaf.binding) {
                Ok(fields) => Ok(Some(fields)),
                Err(e) => {
                    warn!("{}: default via '{}' failed: {}", leaf.uri, name, e);
                    Ok(None)
                }
            }
        }
        FieldBinding::Name(_) => {
            let Some(field) = leaf.node.store_field_name() else {
                return Ok(None);
            };
            if !known_field(ctx, table, &field) {
                debug!("{}: {} has no field '{}', default skipped", leaf.uri, table, field);
                return Ok(None);
            }
            leaf_fields(ctx, &leaf.uri, leaf.node, &value, &leaf.binding).map(Some)
        }
        _ => Ok(None),
    }
}
