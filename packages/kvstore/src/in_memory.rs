//! In-memory table store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use xlate_core::{join_list, split_list, Error, Fields, FILL_FIELDS, LEAF_LIST_SUFFIX, NULL_FIELD};

use crate::{DependentRow, KvStore, ValidationSession};

/// A foreign-key-like reference declared between two tables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Dependency {
    /// The referencing table.
    pub table: String,
    /// The referencing field. `None` means the referencing row's first key
    /// component is the referenced key, so the whole row depends on it.
    #[serde(default)]
    pub field: Option<String>,
    /// The referenced table.
    pub target: String,
}

/// An in-memory store keyed by table, then row key.
///
/// # Example
///
/// ```rust
/// use collection_literals::btree;
/// use xlate_kvstore::{InMemoryStore, KvStore};
///
/// let mut store = InMemoryStore::new();
/// store
///     .set_entry("PORT", "Ethernet0", &btree! {"mtu".to_string() => "9100".to_string()})
///     .unwrap();
/// assert_eq!(store.get_keys("PORT", Some("Ether*")).unwrap(), vec!["Ethernet0"]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: BTreeMap<String, BTreeMap<String, Fields>>,
    dependencies: Vec<Dependency>,
    separator: String,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
            dependencies: Vec::new(),
            separator: "|".to_string(),
        }
    }

    #[must_use]
    pub fn with_separator(mut self, separator: &str) -> Self {
        self.separator = separator.to_string();
        self
    }

    /// Declare that rows of `dependency.table` reference rows of
    /// `dependency.target`.
    pub fn add_dependency(&mut self, dependency: Dependency) {
        self.dependencies.push(dependency);
    }

    /// Seed a row without going through the create/mod rules.
    pub fn insert_row(&mut self, table: &str, key: &str, fields: Fields) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), fields);
    }

    pub fn table(&self, table: &str) -> Option<&BTreeMap<String, Fields>> {
        self.tables.get(table)
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    fn row_mut(&mut self, table: &str, key: &str) -> &mut Fields {
        self.tables
            .entry(table.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
    }

    fn first_key_component<'k>(&self, key: &'k str) -> &'k str {
        key.split(self.separator.as_str()).next().unwrap_or(key)
    }
}

fn normalize(fields: &mut Fields) {
    if fields.len() > 1 {
        fields.remove(NULL_FIELD);
    }
    if fields.is_empty() {
        fields.insert(NULL_FIELD.to_string(), NULL_FIELD.to_string());
    }
}

lazy_static! {
    /// Compiled `get_keys` patterns, by glob.
    static ref GLOB_CACHE: Mutex<BTreeMap<String, Regex>> = Mutex::new(BTreeMap::new());
}

/// The anchored regex for a `*` glob, compiled on first use.
fn glob_regex(pattern: &str) -> Result<Regex, Error> {
    let mut cache = GLOB_CACHE
        .lock()
        .map_err(|_| Error::store("glob cache lock poisoned"))?;
    if let Some(re) = cache.get(pattern) {
        return Ok(re.clone());
    }
    let expr = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
    let re = Regex::new(&expr)
        .map_err(|e| Error::internal(format!("bad key pattern '{}': {}", pattern, e)))?;
    cache.insert(pattern.to_string(), re.clone());
    Ok(re)
}

impl KvStore for InMemoryStore {
    fn get_entry(&self, table: &str, key: &str) -> Result<Option<Fields>, Error> {
        Ok(self.tables.get(table).and_then(|rows| rows.get(key)).cloned())
    }

    fn get_keys(&self, table: &str, pattern: Option<&str>) -> Result<Vec<String>, Error> {
        let Some(rows) = self.tables.get(table) else {
            return Ok(Vec::new());
        };
        let re = pattern.map(glob_regex).transpose()?;
        Ok(rows
            .keys()
            .filter(|k| re.as_ref().map_or(true, |re| re.is_match(k)))
            .cloned()
            .collect())
    }

    fn create_entry(&mut self, table: &str, key: &str, fields: &Fields) -> Result<(), Error> {
        let row = self.row_mut(table, key);
        for (f, v) in fields {
            row.insert(f.clone(), v.clone());
        }
        normalize(row);
        Ok(())
    }

    fn mod_entry(&mut self, table: &str, key: &str, fields: &Fields) -> Result<(), Error> {
        let row = self.row_mut(table, key);
        for (f, v) in fields {
            let merged = match row.get(f) {
                Some(existing) if f.ends_with(LEAF_LIST_SUFFIX) => {
                    let mut values = split_list(existing);
                    for item in split_list(v) {
                        if !values.contains(&item) {
                            values.push(item);
                        }
                    }
                    join_list(&values)
                }
                _ => v.clone(),
            };
            row.insert(f.clone(), merged);
        }
        normalize(row);
        Ok(())
    }

    fn set_entry(&mut self, table: &str, key: &str, fields: &Fields) -> Result<(), Error> {
        let mut row = fields.clone();
        normalize(&mut row);
        self.insert_row(table, key, row);
        Ok(())
    }

    fn delete_entry(&mut self, table: &str, key: &str) -> Result<(), Error> {
        if let Some(rows) = self.tables.get_mut(table) {
            rows.remove(key);
            if rows.is_empty() {
                self.tables.remove(table);
            }
        }
        Ok(())
    }

    fn delete_entry_fields(
        &mut self,
        table: &str,
        key: &str,
        fields: &Fields,
    ) -> Result<(), Error> {
        let Some(row) = self.tables.get_mut(table).and_then(|rows| rows.get_mut(key)) else {
            return Err(Error::not_found(format!("{}{}{}", table, self.separator, key)));
        };
        for (f, v) in fields {
            if f == FILL_FIELDS {
                continue;
            }
            if f.ends_with(LEAF_LIST_SUFFIX) && !v.is_empty() {
                let remove = split_list(v);
                let kept: Vec<String> = row
                    .get(f)
                    .map(|current| split_list(current))
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|item| !remove.contains(item))
                    .collect();
                if kept.is_empty() {
                    row.remove(f);
                } else {
                    row.insert(f.clone(), join_list(&kept));
                }
            } else {
                row.remove(f);
            }
        }
        normalize(row);
        Ok(())
    }

    fn key_separator(&self) -> &str {
        &self.separator
    }

    fn validation_session(&self) -> Result<Box<dyn ValidationSession + '_>, Error> {
        Ok(Box::new(InMemorySession { store: self }))
    }
}

struct InMemorySession<'a> {
    store: &'a InMemoryStore,
}

impl ValidationSession for InMemorySession<'_> {
    fn get_dependent_rows(&self, table: &str, key: &str) -> Result<Vec<DependentRow>, Error> {
        let mut found = Vec::new();
        for dep in self.store.dependencies.iter().filter(|d| d.target == table) {
            let Some(rows) = self.store.tables.get(&dep.table) else {
                continue;
            };
            for (row_key, row) in rows {
                match &dep.field {
                    None => {
                        if self.store.first_key_component(row_key) == key {
                            found.push(DependentRow {
                                table: dep.table.clone(),
                                key: row_key.clone(),
                                fields: Fields::new(),
                            });
                        }
                    }
                    Some(field) => {
                        let Some(value) = row.get(field) else {
                            continue;
                        };
                        let references = if field.ends_with(LEAF_LIST_SUFFIX) {
                            split_list(value).iter().any(|v| v == key)
                        } else {
                            value == key
                        };
                        if references {
                            let marker = if field.ends_with(LEAF_LIST_SUFFIX) {
                                key.to_string()
                            } else {
                                String::new()
                            };
                            let mut fields = Fields::new();
                            fields.insert(field.clone(), marker);
                            found.push(DependentRow {
                                table: dep.table.clone(),
                                key: row_key.clone(),
                                fields,
                            });
                        }
                    }
                }
            }
        }
        debug!(
            "dependents of {}{}{}: {} row(s)",
            table,
            self.store.separator,
            key,
            found.len()
        );
        Ok(found)
    }
}
