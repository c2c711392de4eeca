//! Cascade delete over rows that reference deleted rows.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::{debug, info};
use xlate_core::{join_list, split_list, DbIndex, Error, Operation, RowMap, LEAF_LIST_SUFFIX};
use xlate_kvstore::{DependentRow, ValidationSession};

use crate::callbacks::{cascade_callback_name, CascadeParams};
use crate::context::{Accumulator, RequestContext};

/// Resolve the dependents of every whole-row delete in a cascade table.
///
/// A dependent table with a registered `<TABLE>_cascade_cfg_hdl` decides
/// its own mutations. Otherwise a dependent whose whole row references the
/// deleted key is deleted too, and referencing fields are cleared (only the
/// matching element, for leaf-lists). Rows deleted this way cascade in turn.
/// The lookups for one store all run inside one validation session.
pub(crate) fn cascade_deletes(ctx: &RequestContext<'_>, acc: &mut Accumulator) -> Result<(), Error> {
    let mut pending: VecDeque<(String, String)> = whole_row_deletes(acc)
        .into_iter()
        .filter(|(table, _)| ctx.index.is_cascade_table(table))
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    let mut sessions: BTreeMap<DbIndex, Box<dyn ValidationSession + '_>> = BTreeMap::new();
    let mut seen: BTreeSet<(String, String)> = pending.iter().cloned().collect();

    while let Some((table, key)) = pending.pop_front() {
        let db = ctx.index.table(&table).map(|t| t.db).unwrap_or_default();
        if !sessions.contains_key(&db) {
            sessions.insert(db, ctx.store(db)?.validation_session()?);
        }
        let Some(session) = sessions.get(&db) else {
            continue;
        };
        let dependents = session.get_dependent_rows(&table, &key)?;
        debug!("{}|{}: {} dependent rows", table, key, dependents.len());

        for dep in dependents {
            if is_row_deleted(acc, &dep.table, &dep.key) {
                continue;
            }
            let name = cascade_callback_name(&dep.table);
            if ctx.registry.is_registered(&name) {
                let separator = ctx.separator(db)?;
                let ref_key = format!("{}{}{}", table, separator, key);
                let deletes = acc.ops.get(Operation::Delete).cloned().unwrap_or_default();
                let params = CascadeParams {
                    stores: ctx.stores,
                    oper: ctx.oper,
                    ref_key: &ref_key,
                    table: &dep.table,
                    key: &dep.key,
                    fields: &dep.fields,
                    deletes: &deletes,
                };
                let ops = ctx.registry.cascade(&name, &params).map_err(|e| Error::Callback {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
                info!("{}: cascade handler for {}|{} ran", name, dep.table, dep.key);
                acc.ops.merge_all(&ops);
            } else {
                apply_default(acc.ops.entry(Operation::Delete), &dep);
            }

            if is_row_deleted(acc, &dep.table, &dep.key)
                && ctx.index.is_cascade_table(&dep.table)
                && seen.insert((dep.table.clone(), dep.key.clone()))
            {
                pending.push_back((dep.table, dep.key));
            }
        }
    }
    Ok(())
}

fn whole_row_deletes(acc: &Accumulator) -> Vec<(String, String)> {
    acc.ops
        .get(Operation::Delete)
        .map(|rows| {
            rows.rows()
                .filter(|(_, _, fields)| fields.is_empty())
                .map(|(table, key, _)| (table.to_string(), key.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn is_row_deleted(acc: &Accumulator, table: &str, key: &str) -> bool {
    acc.ops
        .get(Operation::Delete)
        .and_then(|rows| rows.row(table, key))
        .is_some_and(|fields| fields.is_empty())
}

/// Delete the dependent row, or clear its referencing fields.
fn apply_default(deletes: &mut RowMap, dep: &DependentRow) {
    if dep.fields.is_empty() {
        deletes.mark_row_delete(&dep.table, &dep.key);
        return;
    }
    let row = deletes.ensure_row(&dep.table, &dep.key);
    for (field, value) in &dep.fields {
        let merged = match row.get(field) {
            // Clearing the whole field already covers any element.
            Some(current) if current.is_empty() => continue,
            Some(current) if field.ends_with(LEAF_LIST_SUFFIX) && !value.is_empty() => {
                let mut items = split_list(current);
                for item in split_list(value) {
                    if !items.contains(&item) {
                        items.push(item);
                    }
                }
                join_list(&items)
            }
            _ => value.clone(),
        };
        row.insert(field.clone(), merged);
    }
}
