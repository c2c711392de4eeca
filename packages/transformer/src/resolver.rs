//! Path/key resolution: which table(s) and row key an instance path maps to.

use std::collections::BTreeMap;
use std::sync::Mutex;

use lazy_static::lazy_static;
use log::debug;
use xlate_core::{DbIndex, Error, Path};
use xlate_schema::{Ownership, SchemaNode, TableSource};

use crate::callbacks::TableXfmrOutput;
use crate::context::{RequestCache, RequestContext};

/// Table name that marks a node with no physical row.
pub const VIRTUAL_TABLE: &str = "NONE";

/// A schema node applied to one concrete instance path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableBinding {
    /// Several when a table transformer fans the node out.
    pub tables: Vec<String>,
    /// Empty when no list key or key annotation applies.
    pub key: String,
    pub virtual_table: bool,
    /// A table transformer reported the row belongs to another node.
    pub not_owner: bool,
    pub db: DbIndex,
}

impl TableBinding {
    /// The instance maps onto at least one physical table.
    pub fn is_bound(&self) -> bool {
        !self.virtual_table && !self.tables.is_empty()
    }

    /// The instance addresses concrete rows.
    pub fn has_rows(&self) -> bool {
        self.is_bound() && !self.key.is_empty()
    }
}

lazy_static! {
    static ref TABLE_MEMO: Mutex<BTreeMap<String, TableXfmrOutput>> = Mutex::new(BTreeMap::new());
}

/// Forget every memoized table-transformer result.
pub fn clear_table_memo() {
    if let Ok(mut memo) = TABLE_MEMO.lock() {
        memo.clear();
    }
}

/// Resolve the table(s) and row key of `uri`.
pub fn resolve(
    ctx: &RequestContext<'_>,
    cache: &mut RequestCache,
    uri: &Path,
) -> Result<TableBinding, Error> {
    let cache_key = uri.to_string();
    if let Some(binding) = cache.bindings.get(&cache_key) {
        return Ok(binding.clone());
    }

    let node = ctx.index.node_for(uri)?;
    let key = resolve_key(ctx, cache, uri)?;
    let mut binding = TableBinding {
        key,
        db: node.db,
        virtual_table: node.virtual_table == Some(true),
        ..Default::default()
    };

    match &node.table {
        TableSource::None => {}
        TableSource::Static(table) if table == VIRTUAL_TABLE => binding.virtual_table = true,
        TableSource::Static(table) => binding.tables.push(table.clone()),
        TableSource::Transformer(name) => {
            let out = invoke_table_xfmr(ctx, name, uri, &binding.key)?;
            binding.not_owner = out.not_owner;
            binding.virtual_table |= out.virtual_table;
            for table in out.tables {
                if table == VIRTUAL_TABLE {
                    binding.virtual_table = true;
                } else {
                    binding.tables.push(table);
                }
            }
        }
    }

    debug!(
        "resolved {} -> tables {:?} key \"{}\"{}",
        uri,
        binding.tables,
        binding.key,
        if binding.virtual_table { " (virtual)" } else { "" }
    );
    cache.bindings.insert(cache_key, binding.clone());
    Ok(binding)
}

/// The row key of `uri`, built from its ancestry.
///
/// A `key-name` annotation fixes the key; a key transformer computes it for
/// its instance; otherwise each list instance appends its key values, joined
/// by the list's `key-delimiter`, to the key inherited from above.
pub fn resolve_key(
    ctx: &RequestContext<'_>,
    cache: &mut RequestCache,
    uri: &Path,
) -> Result<String, Error> {
    if uri.is_empty() {
        return Ok(String::new());
    }
    let cache_key = uri.to_string();
    if let Some(key) = cache.keys.get(&cache_key) {
        return Ok(key.clone());
    }

    let parent_key = match uri.parent() {
        Some(parent) => resolve_key(ctx, cache, &parent)?,
        None => String::new(),
    };
    let node = ctx.index.node_for(uri)?;
    let instance = uri.ends_with_keys();

    let key = if let Some(name) = &node.key_name {
        name.clone()
    } else if let Some(xfmr) = &node.key_transformer {
        if node.is_list() && !instance {
            parent_key
        } else {
            ctx.registry.key_to_db(xfmr, &ctx.params(uri))?
        }
    } else if node.is_list() && instance {
        let separator = ctx.separator(node.db)?;
        let segment = key_segment(node, uri, &separator)?;
        if parent_key.is_empty() || node.key_lists.len() <= 1 {
            segment
        } else {
            format!("{}{}{}", parent_key, separator, segment)
        }
    } else {
        parent_key
    };

    cache.keys.insert(cache_key, key.clone());
    Ok(key)
}

fn key_segment(node: &SchemaNode, uri: &Path, separator: &str) -> Result<String, Error> {
    let Some(component) = uri.last() else {
        return Err(Error::internal("empty path has no list keys"));
    };
    let mut values = Vec::with_capacity(node.keys.len());
    for key in &node.keys {
        let value = component.key(key).ok_or_else(|| {
            Error::internal(format!("{}: missing value for list key '{}'", uri, key))
        })?;
        values.push(value);
    }
    Ok(values.join(node.key_delimiter.as_deref().unwrap_or(separator)))
}

fn invoke_table_xfmr(
    ctx: &RequestContext<'_>,
    name: &str,
    uri: &Path,
    key: &str,
) -> Result<TableXfmrOutput, Error> {
    let memo_key = format!("{}|{}|{}", name, ctx.oper, uri);
    if ctx.config.memoize_table_transformers {
        let memo = TABLE_MEMO
            .lock()
            .map_err(|_| Error::internal("table transformer memo lock poisoned"))?;
        if let Some(out) = memo.get(&memo_key) {
            return Ok(out.clone());
        }
    }

    let mut params = ctx.params(uri);
    params.key = Some(key);
    let out = ctx.registry.table(name, &params)?;

    if ctx.config.memoize_table_transformers {
        TABLE_MEMO
            .lock()
            .map_err(|_| Error::internal("table transformer memo lock poisoned"))?
            .insert(memo_key, out.clone());
    }
    Ok(out)
}

/// Whether the instance at `uri` owns the rows of `binding`.
///
/// An explicit annotation decides. Otherwise the node owns its rows only
/// when its key differs from its parent's; a different table under the
/// same key still writes into a row owned elsewhere.
pub fn is_table_owner(
    ctx: &RequestContext<'_>,
    cache: &mut RequestCache,
    uri: &Path,
    binding: &TableBinding,
) -> Result<bool, Error> {
    let node = ctx.index.node_for(uri)?;
    match node.ownership {
        Ownership::Owner => return Ok(true),
        Ownership::NotOwner => return Ok(false),
        Ownership::Inherit => {}
    }
    if binding.not_owner {
        return Ok(false);
    }
    let parent = match uri.parent() {
        Some(parent) if !parent.is_empty() => parent,
        _ => return Ok(true),
    };
    Ok(resolve_key(ctx, cache, &parent)? != binding.key)
}

/// Split a stored key into its components.
///
/// With `components` set, the last component keeps any further separators,
/// which lets key values that embed the separator survive.
///
/// ```rust
/// use xlate_transformer::split_key;
///
/// assert_eq!(split_key("a|b|c", "|", None), vec!["a", "b", "c"]);
/// assert_eq!(split_key("a|b|c", "|", Some(2)), vec!["a", "b|c"]);
/// ```
pub fn split_key(key: &str, separator: &str, components: Option<usize>) -> Vec<String> {
    match components {
        Some(n) if n > 0 => key.splitn(n, separator).map(str::to_string).collect(),
        _ => key.split(separator).map(str::to_string).collect(),
    }
}

/// Glob matching every row below `parent_key`.
pub fn instance_pattern(parent_key: &str, separator: &str) -> String {
    if parent_key.is_empty() {
        "*".to_string()
    } else {
        format!("{}{}*", parent_key, separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::{Callback, KeyXfmr, Registry, TxCache};
    use crate::config::TranslatorConfig;
    use std::cell::RefCell;
    use xlate_core::Operation;
    use xlate_kvstore::{DbHandles, InMemoryStore};
    use xlate_schema::{SchemaDef, SchemaIndex};

    fn index() -> SchemaIndex {
        let def = SchemaDef::from_json(serde_json::json!({
            "modules": [{
                "name": "acl",
                "kind": "module",
                "children": [
                    {"name": "acl-sets", "children": [{
                        "name": "acl-set",
                        "kind": "list",
                        "keys": ["name", "type"],
                        "table-name": "ACL_TABLE",
                        "key-delimiter": "_",
                        "children": [
                            {"name": "name", "kind": "leaf"},
                            {"name": "type", "kind": "leaf"},
                            {"name": "config", "children": [
                                {"name": "description", "kind": "leaf"}
                            ]},
                            {"name": "entries", "children": [{
                                "name": "entry",
                                "kind": "list",
                                "keys": ["id"],
                                "table-name": "ACL_RULE",
                                "children": [
                                    {"name": "id", "kind": "leaf"},
                                    {"name": "actions", "table-name": "ACL_ACTION",
                                     "children": [{"name": "fwd", "kind": "leaf"}]}
                                ]
                            }]}
                        ]
                    }]},
                    {"name": "global", "table-name": "ACL_GLOBAL", "key-name": "GLOBAL",
                     "children": [
                        {"name": "mode", "kind": "leaf"},
                        {"name": "bindings", "children": [{
                            "name": "binding", "kind": "list", "keys": ["port"],
                            "table-name": "ACL_BINDING",
                            "children": [{"name": "port", "kind": "leaf"}]
                        }]}
                     ]},
                    {"name": "ports", "children": [{
                        "name": "port",
                        "kind": "list",
                        "keys": ["name"],
                        "table-transformer": "port_tbl",
                        "key-transformer": "port_key",
                        "children": [{"name": "name", "kind": "leaf"}]
                    }]}
                ]
            }]
        }))
        .unwrap();
        SchemaIndex::build(&def).unwrap()
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register(
            "port_key",
            KeyXfmr::new().with_to_db(|p| {
                Ok(format!("P{}", p.uri.key_value("name").unwrap_or_default()))
            }),
        );
        registry.register(
            "port_tbl",
            Callback::table(|p| {
                if p.uri.key_value("name") == Some("cpu") {
                    Ok(TableXfmrOutput::table(VIRTUAL_TABLE))
                } else {
                    Ok(TableXfmrOutput {
                        tables: vec!["PORT".to_string(), "PORT_QOS".to_string()],
                        ..Default::default()
                    })
                }
            }),
        );
        registry
    }

    fn with_ctx(f: impl FnOnce(&RequestContext<'_>)) {
        let index = index();
        let registry = registry();
        let config = TranslatorConfig::default();
        let store = InMemoryStore::new();
        let stores = DbHandles::all(&store);
        let uri = Path::root();
        let tx = RefCell::new(TxCache::new());
        let ctx = RequestContext {
            index: &index,
            registry: &registry,
            config: &config,
            stores: &stores,
            oper: Operation::Create,
            request_uri: &uri,
            payload: None,
            tx_cache: &tx,
        };
        f(&ctx);
    }

    fn path(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    #[test]
    fn multi_key_list_uses_its_delimiter() {
        with_ctx(|ctx| {
            let mut cache = RequestCache::default();
            let b = resolve(
                ctx,
                &mut cache,
                &path("/acl:acl-sets/acl-set[name=A1][type=ACL_IPV4]/config"),
            )
            .unwrap();
            assert_eq!(b.tables, vec!["ACL_TABLE".to_string()]);
            assert_eq!(b.key, "A1_ACL_IPV4");
        });
    }

    #[test]
    fn nested_list_appends_its_segment() {
        with_ctx(|ctx| {
            let mut cache = RequestCache::default();
            let b = resolve(
                ctx,
                &mut cache,
                &path("/acl:acl-sets/acl-set[name=A1][type=L3]/entries/entry[id=10]"),
            )
            .unwrap();
            assert_eq!(b.tables, vec!["ACL_RULE".to_string()]);
            assert_eq!(b.key, "A1_L3|10");
        });
    }

    #[test]
    fn key_name_resets_the_key() {
        with_ctx(|ctx| {
            let mut cache = RequestCache::default();
            let g = resolve(ctx, &mut cache, &path("/acl:global/mode")).unwrap();
            assert_eq!(g.key, "GLOBAL");
            let b = resolve(
                ctx,
                &mut cache,
                &path("/acl:global/bindings/binding[port=Ethernet0]"),
            )
            .unwrap();
            assert_eq!(b.key, "Ethernet0");
        });
    }

    #[test]
    fn transformers_supply_table_and_key() {
        with_ctx(|ctx| {
            let mut cache = RequestCache::default();
            let b = resolve(ctx, &mut cache, &path("/acl:ports/port[name=7]")).unwrap();
            assert_eq!(b.key, "P7");
            assert_eq!(b.tables.len(), 2);
            assert!(b.is_bound());

            let cpu = resolve(ctx, &mut cache, &path("/acl:ports/port[name=cpu]")).unwrap();
            assert!(cpu.virtual_table);
            assert!(!cpu.is_bound());
        });
    }

    #[test]
    fn whole_list_has_no_instance_key() {
        with_ctx(|ctx| {
            let mut cache = RequestCache::default();
            let b = resolve(ctx, &mut cache, &path("/acl:acl-sets/acl-set")).unwrap();
            assert_eq!(b.key, "");
            assert!(!b.has_rows());
        });
    }

    #[test]
    fn ownership_follows_key_changes() {
        with_ctx(|ctx| {
            let mut cache = RequestCache::default();
            let set = path("/acl:acl-sets/acl-set[name=A1][type=L3]");
            let b = resolve(ctx, &mut cache, &set).unwrap();
            assert!(is_table_owner(ctx, &mut cache, &set, &b).unwrap());

            let config = set.child("config");
            let b = resolve(ctx, &mut cache, &config).unwrap();
            assert!(!is_table_owner(ctx, &mut cache, &config, &b).unwrap());
        });
    }

    #[test]
    fn other_table_same_key_is_not_owner() {
        with_ctx(|ctx| {
            let mut cache = RequestCache::default();
            let actions = path("/acl:acl-sets/acl-set[name=A1][type=L3]/entries/entry[id=1]/actions");
            let b = resolve(ctx, &mut cache, &actions).unwrap();
            assert_eq!(b.tables, vec!["ACL_ACTION".to_string()]);
            assert_eq!(b.key, "A1_L3|1");
            assert!(!is_table_owner(ctx, &mut cache, &actions, &b).unwrap());
        });
    }

    #[test]
    fn missing_list_key_is_internal_error() {
        with_ctx(|ctx| {
            let mut cache = RequestCache::default();
            let err = resolve(ctx, &mut cache, &path("/acl:acl-sets/acl-set[name=A1]")).unwrap_err();
            assert!(matches!(err, Error::Internal { .. }));
        });
    }

    #[test]
    fn memo_serves_repeat_lookups() {
        let index = index();
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut registry = registry();
        let counter = calls.clone();
        registry.register(
            "port_tbl",
            Callback::table(move |_| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(TableXfmrOutput::table("PORT"))
            }),
        );
        let config = TranslatorConfig {
            memoize_table_transformers: true,
            ..Default::default()
        };
        let store = InMemoryStore::new();
        let stores = DbHandles::all(&store);
        let root = Path::root();
        let tx = RefCell::new(TxCache::new());
        let ctx = RequestContext {
            index: &index,
            registry: &registry,
            config: &config,
            stores: &stores,
            oper: Operation::Update,
            request_uri: &root,
            payload: None,
            tx_cache: &tx,
        };
        let uri = path("/acl:ports/port[name=memo-only]");
        resolve(&ctx, &mut RequestCache::default(), &uri).unwrap();
        resolve(&ctx, &mut RequestCache::default(), &uri).unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        clear_table_memo();
        resolve(&ctx, &mut RequestCache::default(), &uri).unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn split_key_respects_component_count() {
        assert_eq!(split_key("Vlan10|Ethernet0", "|", Some(2)), vec!["Vlan10", "Ethernet0"]);
        assert_eq!(split_key("k", "|", None), vec!["k"]);
        assert_eq!(instance_pattern("", "|"), "*");
        assert_eq!(instance_pattern("A1", "|"), "A1|*");
    }
}
