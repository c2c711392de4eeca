//! The translator entry points.

use std::cell::RefCell;
use std::sync::Arc;

use log::{debug, info};
use xlate_core::{Error, OpRowMaps, Operation, Path, RowMap, Value, NULL_FIELD};
use xlate_kvstore::DbHandles;
use xlate_schema::SchemaIndex;

use crate::callbacks::{Registry, TxCache};
use crate::cascade::cascade_deletes;
use crate::config::TranslatorConfig;
use crate::context::{Accumulator, RequestCache, RequestContext};
use crate::defaults::fill_defaults;
use crate::delete::delete_tree;
use crate::read::{read_tree, QueryOptions};
use crate::replace::replace_tree;
use crate::walk::verify_parents;
use crate::write::write_tree;

/// Row mutations of one write or delete request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteResult {
    /// The operation the request was translated as.
    pub oper: Operation,
    pub ops: OpRowMaps,
    /// Declared defaults for leaves the payload left out. Never overrides
    /// anything in `ops`.
    pub defaults: RowMap,
    /// Mapped leaves a replace left unset, each recorded as `""`.
    pub aux: RowMap,
}

impl WriteResult {
    /// `ops` with the defaults folded in.
    ///
    /// A default lands in the first of REPLACE, UPDATE and CREATE that
    /// already writes its row, and otherwise in the request's own operation
    /// (UPDATE for a replace). Fields already present are left alone.
    pub fn merged_with_defaults(&self) -> OpRowMaps {
        let mut ops = self.ops.clone();
        let fallback = match self.oper {
            Operation::Create => Operation::Create,
            _ => Operation::Update,
        };
        for (table, key, fields) in self.defaults.rows() {
            let op = [Operation::Replace, Operation::Update, Operation::Create]
                .into_iter()
                .find(|op| ops.get(*op).is_some_and(|rows| rows.contains_row(table, key)))
                .unwrap_or(fallback);
            let row = ops.entry(op).ensure_row(table, key);
            for (field, value) in fields {
                row.entry(field.clone()).or_insert_with(|| value.clone());
            }
            if row.len() > 1 {
                row.remove(NULL_FIELD);
            }
        }
        ops
    }
}

/// Translates tree requests into row mutations and rows back into trees.
///
/// Holds only immutable, shareable state; every request gets its own
/// caches and accumulator.
pub struct Translator {
    index: Arc<SchemaIndex>,
    registry: Arc<Registry>,
    config: TranslatorConfig,
}

impl Translator {
    pub fn new(index: Arc<SchemaIndex>, registry: Arc<Registry>, config: TranslatorConfig) -> Self {
        Self {
            index,
            registry,
            config,
        }
    }

    pub fn index(&self) -> &SchemaIndex {
        &self.index
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    /// Translate a CREATE, UPDATE or REPLACE of `payload` at `path`. A
    /// DELETE is handed to [`Translator::translate_delete`].
    ///
    /// # Errors
    ///
    /// * `NotFound` - A list instance on the path, or the UPDATE target
    ///   itself, does not exist.
    /// * `NotSupported` - The target is read-only, the payload names an
    ///   unknown node, or `op` is GET.
    /// * Any error a callback raises.
    pub fn translate_write(
        &self,
        stores: &DbHandles<'_>,
        path: &Path,
        op: Operation,
        payload: &Value,
    ) -> Result<WriteResult, Error> {
        match op {
            Operation::Delete => return self.translate_delete(stores, path),
            Operation::Get => {
                return Err(Error::not_supported(format!(
                    "{}: GET is not a write",
                    path
                )))
            }
            _ => {}
        }
        info!("{} {}", op, path);

        let tx = RefCell::new(TxCache::new());
        let ctx = self.context(stores, path, op, Some(payload), &tx);
        let mut acc = Accumulator::new();
        verify_parents(&ctx, &mut acc.cache, path)?;
        self.pre_hook(&ctx)?;

        let oper = if op == Operation::Replace {
            replace_tree(&ctx, &mut acc)?
        } else {
            write_tree(&ctx, &mut acc)?;
            fill_defaults(&ctx, &mut acc)?;
            op
        };
        self.finish(&ctx, &mut acc)?;
        debug!("{} {}: {} store reads", op, path, acc.cache.store_reads);

        Ok(WriteResult {
            oper,
            ops: acc.ops,
            defaults: acc.defaults,
            aux: acc.aux,
        })
    }

    /// Translate a DELETE at `path`, cascade included.
    ///
    /// # Errors
    ///
    /// * `NotFound` - The target does not exist or holds nothing to delete.
    /// * `Callback` - A cascade handler failed; nothing is returned.
    pub fn translate_delete(&self, stores: &DbHandles<'_>, path: &Path) -> Result<WriteResult, Error> {
        info!("{} {}", Operation::Delete, path);
        let tx = RefCell::new(TxCache::new());
        let ctx = self.context(stores, path, Operation::Delete, None, &tx);
        let mut acc = Accumulator::new();
        verify_parents(&ctx, &mut acc.cache, path)?;
        self.pre_hook(&ctx)?;
        delete_tree(&ctx, &mut acc)?;
        self.finish(&ctx, &mut acc)?;

        Ok(WriteResult {
            oper: Operation::Delete,
            ops: acc.ops,
            defaults: acc.defaults,
            aux: acc.aux,
        })
    }

    /// Read the tree at `path`.
    pub fn translate_read(
        &self,
        stores: &DbHandles<'_>,
        path: &Path,
        options: &QueryOptions,
    ) -> Result<Value, Error> {
        info!("{} {}", Operation::Get, path);
        let tx = RefCell::new(TxCache::new());
        let ctx = self.context(stores, path, Operation::Get, None, &tx);
        let mut cache = RequestCache::default();
        let tree = read_tree(&ctx, &mut cache, options)?;
        debug!("{} {}: {} store reads", Operation::Get, path, cache.store_reads);
        Ok(tree)
    }

    fn context<'a>(
        &'a self,
        stores: &'a DbHandles<'a>,
        path: &'a Path,
        oper: Operation,
        payload: Option<&'a Value>,
        tx: &'a RefCell<TxCache>,
    ) -> RequestContext<'a> {
        RequestContext {
            index: &self.index,
            registry: &self.registry,
            config: &self.config,
            stores,
            oper,
            request_uri: path,
            payload,
            tx_cache: tx,
        }
    }

    fn pre_hook(&self, ctx: &RequestContext<'_>) -> Result<(), Error> {
        let hook = self
            .index
            .module_for(ctx.request_uri)
            .and_then(|m| m.pre_transformer.as_deref());
        if let Some(name) = hook {
            let mut params = ctx.params(ctx.request_uri);
            params.payload = ctx.payload;
            ctx.registry.pre(name, &params)?;
        }
        Ok(())
    }

    /// Post hook, cascade, then cleanup of placeholders and empty maps.
    fn finish(&self, ctx: &RequestContext<'_>, acc: &mut Accumulator) -> Result<(), Error> {
        let hook = self
            .index
            .module_for(ctx.request_uri)
            .and_then(|m| m.post_transformer.as_deref());
        if let Some(name) = hook {
            let mut params = ctx.params(ctx.request_uri);
            params.payload = ctx.payload;
            ctx.registry.post(name, &params, &mut acc.ops)?;
        }
        cascade_deletes(ctx, acc)?;
        for op in [Operation::Replace, Operation::Update, Operation::Create] {
            if acc.ops.get(op).is_some() {
                acc.ops.entry(op).strip_null_placeholders();
            }
        }
        acc.ops.prune();
        acc.defaults.prune();
        acc.aux.prune();
        Ok(())
    }
}
