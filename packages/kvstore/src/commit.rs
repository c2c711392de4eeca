//! Apply translated row maps to a store.

use log::debug;
use xlate_core::{Error, OpRowMaps, Operation};

use crate::KvStore;

/// Apply `ops` to `store` in DELETE, CREATE, UPDATE, REPLACE order.
///
/// Deletes go first so that a replace which both removes stale rows and
/// rewrites the target lands in its final state.
pub fn commit(store: &mut dyn KvStore, ops: &OpRowMaps) -> Result<(), Error> {
    for op in [
        Operation::Delete,
        Operation::Create,
        Operation::Update,
        Operation::Replace,
    ] {
        let Some(rows) = ops.get(op) else {
            continue;
        };
        for (table, key, fields) in rows.rows() {
            debug!("commit {} {}|{} {:?}", op, table, key, fields);
            match op {
                Operation::Delete if fields.is_empty() => store.delete_entry(table, key)?,
                Operation::Delete => {
                    if store.exists(table, key)? {
                        store.delete_entry_fields(table, key, fields)?;
                    }
                }
                Operation::Create => store.create_entry(table, key, fields)?,
                Operation::Update => store.mod_entry(table, key, fields)?,
                Operation::Replace => store.set_entry(table, key, fields)?,
                Operation::Get => {}
            }
        }
    }
    Ok(())
}
