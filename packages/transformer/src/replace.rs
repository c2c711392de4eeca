//! REPLACE: write the payload, then delete whatever it no longer names.

use log::debug;
use xlate_core::{Error, Fields, Operation, FILL_FIELDS, NULL_FIELD};

use crate::context::{Accumulator, RequestContext};
use crate::defaults::{fill_defaults, fill_replace_defaults};
use crate::delete::delete_subtree;
use crate::resolver::{resolve, TableBinding};
use crate::write::write_tree;

/// Translate a REPLACE at the request path into `acc.ops`.
///
/// Returns the operation the request was effectively translated as: a
/// replace of a leaf is an update.
pub(crate) fn replace_tree(ctx: &RequestContext<'_>, acc: &mut Accumulator) -> Result<Operation, Error> {
    let uri = ctx.request_uri;
    let node = ctx.index.node_for(uri)?;
    if node.is_terminal() {
        debug!("{}: replace of a leaf, translating as update", uri);
        let update = ctx.with_oper(Operation::Update);
        write_tree(&update, acc)?;
        fill_defaults(&update, acc)?;
        return Ok(Operation::Update);
    }

    let target = resolve(ctx, &mut acc.cache, uri)?;
    let mut skip_delete = !node.has_non_terminal || (node.in_subtree() && !node.has_child_subtree);
    if !skip_delete && uri.ends_with_keys() && target.has_rows() {
        skip_delete = !acc
            .cache
            .row_exists(ctx, target.db, &target.tables[0], &target.key)?;
    }

    write_tree(ctx, acc)?;
    if target.has_rows() && !node.in_subtree() {
        for table in &target.tables {
            acc.touch(table, &target.key, uri);
        }
    }
    fill_replace_defaults(ctx, acc)?;
    drop_container_only_rows(acc);

    if skip_delete {
        return Ok(Operation::Replace);
    }

    let mut stale = Accumulator::new();
    delete_subtree(&ctx.with_oper(Operation::Delete), &mut stale)?;
    let guard = match uri.parent() {
        Some(parent) if !parent.is_empty() => resolve(ctx, &mut acc.cache, &parent)?,
        _ => TableBinding::default(),
    };
    reconcile(acc, stale, &guard);
    Ok(Operation::Replace)
}

/// A container that claimed a row but wrote nothing into it leaves no row.
fn drop_container_only_rows(acc: &mut Accumulator) {
    let Some(replace) = acc.ops.get(Operation::Replace) else {
        return;
    };
    let empty: Vec<(String, String)> = replace
        .rows()
        .filter(|(_, _, fields)| fields.len() == 1 && fields.contains_key(NULL_FIELD))
        .filter(|(table, key, _)| !acc.defaults.contains_row(table, key))
        .filter(|(table, key, _)| {
            acc.touched
                .get(&(table.to_string(), key.to_string()))
                .is_some_and(|uris| uris.values().all(|u| !u.ends_with_keys()))
        })
        .map(|(table, key, _)| (table.to_string(), key.to_string()))
        .collect();
    for (table, key) in empty {
        debug!("{}|{}: container-only row dropped", table, key);
        acc.ops.entry(Operation::Replace).remove_row(&table, &key);
    }
}

/// Fold the deletes of the stale tree into `acc`, keeping everything the
/// replace itself writes.
fn reconcile(acc: &mut Accumulator, mut stale: Accumulator, guard: &TableBinding) {
    let deletes = stale.ops.take(Operation::Delete);
    for (table, key, fields) in deletes.rows() {
        let replaced = acc
            .ops
            .get(Operation::Replace)
            .is_some_and(|rows| rows.contains_row(table, key));
        if replaced {
            continue;
        }

        if fields.is_empty() {
            let written = matches!(acc.ops.find_row(table, key), Some(op) if op != Operation::Delete);
            let guarded = guard.key == key && guard.tables.iter().any(|t| t == table);
            if written || guarded {
                debug!("{}|{}: kept, still written", table, key);
                continue;
            }
            acc.ops.entry(Operation::Delete).mark_row_delete(table, key);
            continue;
        }

        let kept: Fields = fields
            .iter()
            .filter(|(field, _)| field.as_str() != FILL_FIELDS)
            .filter(|(field, _)| {
                !acc.ops.writes_field(table, key, field) && !acc.defaults.contains_field(table, key, field)
            })
            .map(|(f, v)| (f.clone(), v.clone()))
            .collect();
        if kept.is_empty() {
            continue;
        }
        let rows = acc.ops.entry(Operation::Delete);
        if fields.contains_key(FILL_FIELDS) {
            rows.insert_field(table, key, FILL_FIELDS, "true");
        }
        for (field, value) in &kept {
            rows.insert_field(table, key, field, value);
        }
    }
    acc.ops.merge_all(&stale.ops);
}
