//! Row maps: the exchange format between the translator and the store.
//!
//! A `RowMap` is table -> row key -> field -> value. An `OpRowMaps` holds one
//! `RowMap` per operation, since a single request can yield creates, updates
//! and deletes at once.
//!
//! Conventions shared by every producer and consumer:
//! - `"NULL": "NULL"` marks a row that exists but carries no fields.
//! - In a DELETE map an empty field map deletes the whole row; a field with
//!   value `""` clears that field; a leaf-list field (`name@`) with a value
//!   removes only the listed elements.
//! - `"FillFields": "true"` tags a field-level delete issued by a node that
//!   does not own the row.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::db::Operation;

pub type Fields = BTreeMap<String, String>;

pub const NULL_FIELD: &str = "NULL";
pub const FILL_FIELDS: &str = "FillFields";
pub const LEAF_LIST_SUFFIX: char = '@';

/// Split a stored leaf-list value into its elements.
pub fn split_list(value: &str) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }
    value.split(',').map(|s| s.to_string()).collect()
}

pub fn join_list<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(|v| v.as_ref())
        .collect::<Vec<_>>()
        .join(",")
}

fn union_list(existing: &str, incoming: &str) -> String {
    let mut values = split_list(existing);
    for v in split_list(incoming) {
        if !values.contains(&v) {
            values.push(v);
        }
    }
    join_list(&values)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowMap {
    tables: BTreeMap<String, BTreeMap<String, Fields>>,
}

impl RowMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(|rows| rows.is_empty())
    }

    /// Number of rows across all tables.
    pub fn len(&self) -> usize {
        self.tables.values().map(|rows| rows.len()).sum()
    }

    pub fn table(&self, table: &str) -> Option<&BTreeMap<String, Fields>> {
        self.tables.get(table)
    }

    pub fn row(&self, table: &str, key: &str) -> Option<&Fields> {
        self.tables.get(table)?.get(key)
    }

    pub fn row_mut(&mut self, table: &str, key: &str) -> Option<&mut Fields> {
        self.tables.get_mut(table)?.get_mut(key)
    }

    pub fn contains_row(&self, table: &str, key: &str) -> bool {
        self.row(table, key).is_some()
    }

    pub fn contains_field(&self, table: &str, key: &str, field: &str) -> bool {
        self.row(table, key).is_some_and(|f| f.contains_key(field))
    }

    /// Get the row, creating an empty one if needed.
    pub fn ensure_row(&mut self, table: &str, key: &str) -> &mut Fields {
        self.tables
            .entry(table.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
    }

    pub fn insert_field(&mut self, table: &str, key: &str, field: &str, value: &str) {
        self.ensure_row(table, key)
            .insert(field.to_string(), value.to_string());
    }

    /// Mark a whole-row delete. Any field-level marks for the row are dropped.
    pub fn mark_row_delete(&mut self, table: &str, key: &str) {
        self.ensure_row(table, key).clear();
    }

    pub fn remove_row(&mut self, table: &str, key: &str) -> Option<Fields> {
        let rows = self.tables.get_mut(table)?;
        let removed = rows.remove(key);
        if rows.is_empty() {
            self.tables.remove(table);
        }
        removed
    }

    pub fn tables(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, Fields>)> {
        self.tables.iter()
    }

    /// Iterate `(table, key, fields)` for every row.
    pub fn rows(&self) -> impl Iterator<Item = (&str, &str, &Fields)> {
        self.tables.iter().flat_map(|(table, rows)| {
            rows.iter()
                .map(move |(key, fields)| (table.as_str(), key.as_str(), fields))
        })
    }

    /// Merge `other` into `self` following the rules of `op`.
    ///
    /// For DELETE a whole-row mark absorbs field marks from either side. For
    /// the other operations leaf-list fields union their elements and scalar
    /// fields take the incoming value.
    pub fn merge_for(&mut self, other: &RowMap, op: Operation) {
        for (table, key, fields) in other.rows() {
            let Some(existing) = self.row_mut(table, key) else {
                *self.ensure_row(table, key) = fields.clone();
                continue;
            };
            if op == Operation::Delete {
                if existing.is_empty() {
                    continue;
                }
                if fields.is_empty() {
                    existing.clear();
                    continue;
                }
            }
            for (field, value) in fields {
                let merged = match existing.get(field) {
                    Some(current)
                        if op != Operation::Delete && field.ends_with(LEAF_LIST_SUFFIX) =>
                    {
                        union_list(current, value)
                    }
                    _ => value.clone(),
                };
                existing.insert(field.clone(), merged);
            }
        }
    }

    /// Copy rows from `other`, overwriting fields that both maps carry.
    pub fn copy_from(&mut self, other: &RowMap) {
        for (table, key, fields) in other.rows() {
            let row = self.ensure_row(table, key);
            for (field, value) in fields {
                row.insert(field.clone(), value.clone());
            }
        }
    }

    /// Drop the `NULL` placeholder from rows that also carry real fields.
    pub fn strip_null_placeholders(&mut self) {
        for rows in self.tables.values_mut() {
            for fields in rows.values_mut() {
                if fields.len() > 1 {
                    fields.remove(NULL_FIELD);
                }
            }
        }
    }

    /// Remove tables left without rows.
    pub fn prune(&mut self) {
        self.tables.retain(|_, rows| !rows.is_empty());
    }
}

/// One `RowMap` per operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpRowMaps {
    maps: BTreeMap<Operation, RowMap>,
}

impl OpRowMaps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, op: Operation) -> Option<&RowMap> {
        self.maps.get(&op)
    }

    pub fn entry(&mut self, op: Operation) -> &mut RowMap {
        self.maps.entry(op).or_default()
    }

    pub fn take(&mut self, op: Operation) -> RowMap {
        self.maps.remove(&op).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.values().all(RowMap::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Operation, &RowMap)> {
        self.maps.iter()
    }

    pub fn merge(&mut self, op: Operation, rows: &RowMap) {
        if rows.is_empty() {
            return;
        }
        self.entry(op).merge_for(rows, op);
    }

    pub fn merge_all(&mut self, other: &OpRowMaps) {
        for (op, rows) in other.iter() {
            self.merge(*op, rows);
        }
    }

    /// The first operation (in `Operation` order) holding this row.
    pub fn find_row(&self, table: &str, key: &str) -> Option<Operation> {
        self.maps
            .iter()
            .find(|(_, rows)| rows.contains_row(table, key))
            .map(|(op, _)| *op)
    }

    /// True if any operation other than DELETE already writes this field.
    pub fn writes_field(&self, table: &str, key: &str, field: &str) -> bool {
        self.maps
            .iter()
            .filter(|(op, _)| **op != Operation::Delete)
            .any(|(_, rows)| rows.contains_field(table, key, field))
    }

    /// Drop empty maps and empty tables.
    pub fn prune(&mut self) {
        for rows in self.maps.values_mut() {
            rows.prune();
        }
        self.maps.retain(|_, rows| !rows.is_empty());
    }
}
