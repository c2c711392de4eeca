//! Store client traits.

use xlate_core::{Error, Fields};

/// A row in another table that references a row being deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependentRow {
    pub table: String,
    pub key: String,
    /// Empty when the whole dependent row must go. Otherwise the referencing
    /// fields: a leaf-list field (`name@`) carries the element to remove and
    /// a scalar field carries `""`.
    pub fields: Fields,
}

/// A consistency session over the store, used by cascade delete.
///
/// Implementations serialize concurrent structural mutations for as long as
/// the session is open.
pub trait ValidationSession {
    /// Rows in other tables that reference `table|key`.
    fn get_dependent_rows(&self, table: &str, key: &str) -> Result<Vec<DependentRow>, Error>;
}

/// The table/key/field store.
///
/// Read methods take `&self` so a single handle can be shared by a whole
/// request walk; mutations go through `commit`.
pub trait KvStore: Send + Sync {
    /// Fetch a row.
    ///
    /// # Returns
    ///
    /// * `Ok(None)` - The row does not exist.
    /// * `Ok(Some(fields))` - The row's fields.
    /// * `Err(Error)` - The store failed.
    fn get_entry(&self, table: &str, key: &str) -> Result<Option<Fields>, Error>;

    /// Row keys of a table, optionally filtered by a `*` glob pattern.
    fn get_keys(&self, table: &str, pattern: Option<&str>) -> Result<Vec<String>, Error>;

    fn exists(&self, table: &str, key: &str) -> Result<bool, Error> {
        Ok(self.get_entry(table, key)?.is_some())
    }

    /// Create a row, merging into it if it already exists.
    fn create_entry(&mut self, table: &str, key: &str, fields: &Fields) -> Result<(), Error>;

    /// Update fields of a row, creating it if needed.
    fn mod_entry(&mut self, table: &str, key: &str, fields: &Fields) -> Result<(), Error>;

    /// Replace a row wholesale.
    fn set_entry(&mut self, table: &str, key: &str, fields: &Fields) -> Result<(), Error>;

    fn delete_entry(&mut self, table: &str, key: &str) -> Result<(), Error>;

    /// Delete individual fields. Leaf-list fields with a value remove only
    /// the listed elements.
    fn delete_entry_fields(&mut self, table: &str, key: &str, fields: &Fields)
        -> Result<(), Error>;

    /// Separator between the components of a row key.
    fn key_separator(&self) -> &str {
        "|"
    }

    fn validation_session(&self) -> Result<Box<dyn ValidationSession + '_>, Error>;
}
