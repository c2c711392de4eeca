//! Per-request set of store handles, one per logical database.

use std::collections::BTreeMap;

use xlate_core::{DbIndex, Error};

use crate::KvStore;

#[derive(Clone, Default)]
pub struct DbHandles<'a> {
    stores: BTreeMap<DbIndex, &'a dyn KvStore>,
}

impl<'a> DbHandles<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve every logical database from one store.
    pub fn all(store: &'a dyn KvStore) -> Self {
        let mut handles = Self::new();
        for db in [
            DbIndex::ApplDb,
            DbIndex::AsicDb,
            DbIndex::CountersDb,
            DbIndex::ConfigDb,
            DbIndex::StateDb,
        ] {
            handles.stores.insert(db, store);
        }
        handles
    }

    #[must_use]
    pub fn with(mut self, db: DbIndex, store: &'a dyn KvStore) -> Self {
        self.stores.insert(db, store);
        self
    }

    pub fn get(&self, db: DbIndex) -> Result<&'a dyn KvStore, Error> {
        self.stores
            .get(&db)
            .copied()
            .ok_or_else(|| Error::store(format!("no store handle for {}", db)))
    }

    pub fn config(&self) -> Result<&'a dyn KvStore, Error> {
        self.get(DbIndex::ConfigDb)
    }
}
