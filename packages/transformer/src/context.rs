//! Per-request state: the immutable context and the mutable accumulator.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use xlate_core::{DbIndex, Error, Fields, OpRowMaps, Operation, Path, RowMap, Value};
use xlate_kvstore::{DbHandles, KvStore};
use xlate_schema::SchemaIndex;

use crate::callbacks::{Registry, TxCache, XfmrParams};
use crate::config::TranslatorConfig;
use crate::resolver::TableBinding;

/// Everything a translation walk reads but never changes.
#[derive(Clone, Copy)]
pub struct RequestContext<'a> {
    pub index: &'a SchemaIndex,
    pub registry: &'a Registry,
    pub config: &'a TranslatorConfig,
    pub stores: &'a DbHandles<'a>,
    pub oper: Operation,
    pub request_uri: &'a Path,
    /// Payload addressed at `request_uri`.
    pub payload: Option<&'a Value>,
    pub tx_cache: &'a RefCell<TxCache>,
}

impl<'a> RequestContext<'a> {
    /// Same request, translated as another operation.
    #[must_use]
    pub fn with_oper(&self, oper: Operation) -> Self {
        Self { oper, ..*self }
    }

    /// A callback envelope for `uri` with nothing but the request filled in.
    pub fn params<'p>(&'p self, uri: &'p Path) -> XfmrParams<'p> {
        XfmrParams {
            stores: self.stores,
            oper: self.oper,
            uri,
            request_uri: self.request_uri,
            payload: None,
            param: None,
            table: None,
            key: None,
            row: None,
            cache: self.tx_cache,
        }
    }

    pub fn store(&self, db: DbIndex) -> Result<&'a dyn KvStore, Error> {
        self.stores.get(db)
    }

    /// Key separator for rows of `db`.
    pub fn separator(&self, db: DbIndex) -> Result<String, Error> {
        match &self.config.key_separator {
            Some(sep) => Ok(sep.clone()),
            None => Ok(self.store(db)?.key_separator().to_string()),
        }
    }
}

/// Lookups remembered for the duration of one request.
#[derive(Debug, Default)]
pub struct RequestCache {
    pub bindings: BTreeMap<String, TableBinding>,
    pub keys: BTreeMap<String, String>,
    rows: BTreeMap<(DbIndex, String, String), Option<Fields>>,
    /// Subtree transformer invocations already made, as `name#uri`.
    pub subtrees: BTreeSet<String>,
    pub store_reads: usize,
}

impl RequestCache {
    /// Read a row through the cache.
    pub fn row(
        &mut self,
        ctx: &RequestContext<'_>,
        db: DbIndex,
        table: &str,
        key: &str,
    ) -> Result<Option<Fields>, Error> {
        let slot = (db, table.to_string(), key.to_string());
        if let Some(row) = self.rows.get(&slot) {
            return Ok(row.clone());
        }
        self.store_reads += 1;
        let row = ctx.store(db)?.get_entry(table, key)?;
        self.rows.insert(slot, row.clone());
        Ok(row)
    }

    pub fn row_exists(
        &mut self,
        ctx: &RequestContext<'_>,
        db: DbIndex,
        table: &str,
        key: &str,
    ) -> Result<bool, Error> {
        Ok(self.row(ctx, db, table, key)?.is_some())
    }
}

/// What a walk produces, threaded through the recursion by `&mut`.
#[derive(Debug, Default)]
pub struct Accumulator {
    pub ops: OpRowMaps,
    /// Declared defaults for leaves the payload left out.
    pub defaults: RowMap,
    /// Mapped leaves left unset by a replace, recorded with `""`.
    pub aux: RowMap,
    /// Instance paths that mapped onto each touched row.
    pub touched: BTreeMap<(String, String), BTreeMap<String, Path>>,
    pub cache: RequestCache,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&mut self, table: &str, key: &str, uri: &Path) {
        self.touched
            .entry((table.to_string(), key.to_string()))
            .or_default()
            .insert(uri.to_string(), uri.clone());
    }

    /// Make sure `table|key` exists in the map of `op`, holding the `NULL`
    /// placeholder if it has no fields yet.
    pub fn claim_row(&mut self, op: Operation, table: &str, key: &str) {
        let row = self.ops.entry(op).ensure_row(table, key);
        if row.is_empty() {
            row.insert(xlate_core::NULL_FIELD.to_string(), xlate_core::NULL_FIELD.to_string());
        }
    }
}
