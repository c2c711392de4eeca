//! Row and field deletes for DELETE, and the delete half of REPLACE.

use log::debug;
use xlate_core::{Error, Fields, Operation, Path, FILL_FIELDS};
use xlate_schema::{FieldBinding, NodeKind, SchemaNode};

use crate::context::{Accumulator, RequestContext};
use crate::encode::{default_value, encode_leaf};
use crate::resolver::{is_table_owner, resolve, TableBinding};
use crate::walk::{invoke_subtree_to_db, is_delegation_point, list_instances, path_segment, validate_passes};

/// Delete what the request path addresses. Nothing to delete is `NotFound`.
pub(crate) fn delete_tree(ctx: &RequestContext<'_>, acc: &mut Accumulator) -> Result<(), Error> {
    delete_subtree(ctx, acc)?;
    if acc.ops.is_empty() {
        return Err(Error::not_found(format!(
            "{}: nothing to delete",
            ctx.request_uri
        )));
    }
    Ok(())
}

/// Collect the deletes below the request path into `acc.ops`.
pub(crate) fn delete_subtree(ctx: &RequestContext<'_>, acc: &mut Accumulator) -> Result<(), Error> {
    let uri = ctx.request_uri;
    let node = ctx.index.node_for(uri)?;
    debug!("{} {}: delete walk", ctx.oper, uri);
    match node.kind {
        NodeKind::Leaf | NodeKind::LeafList => delete_leaf(ctx, acc, uri, node),
        NodeKind::List if !uri.ends_with_keys() => delete_list(ctx, acc, uri, node, false),
        _ => delete_complex(ctx, acc, uri, node, false),
    }
}

fn delete_list(
    ctx: &RequestContext<'_>,
    acc: &mut Accumulator,
    uri: &Path,
    node: &SchemaNode,
    delegated: bool,
) -> Result<(), Error> {
    for instance in list_instances(ctx, &mut acc.cache, uri, node)? {
        delete_complex(ctx, acc, &instance, node, delegated)?;
    }
    Ok(())
}

fn delete_complex(
    ctx: &RequestContext<'_>,
    acc: &mut Accumulator,
    uri: &Path,
    node: &SchemaNode,
    delegated: bool,
) -> Result<(), Error> {
    if !validate_passes(ctx, uri, node, None)? {
        return Ok(());
    }

    let mut delegated = delegated;
    if is_delegation_point(node, delegated) {
        invoke_subtree_to_db(ctx, acc, uri, node, None)?;
        if !node.has_child_subtree {
            return Ok(());
        }
        delegated = true;
    } else if delegated && !node.has_child_subtree {
        return Ok(());
    }

    if !delegated {
        let binding = resolve(ctx, &mut acc.cache, uri)?;
        if binding.has_rows() {
            if is_table_owner(ctx, &mut acc.cache, uri, &binding)? {
                delete_rows(ctx, acc, uri, &binding)?;
            } else {
                delete_own_fields(ctx, acc, uri, node, &binding)?;
            }
        }
    }

    for child in ctx.index.children(node) {
        if child.read_only || child.is_terminal() {
            continue;
        }
        if delegated && !child.subtree_declared && !child.has_child_subtree {
            continue;
        }
        let child_uri = uri.child(path_segment(child));
        if child.is_list() {
            delete_list(ctx, acc, &child_uri, child, delegated)?;
        } else {
            delete_complex(ctx, acc, &child_uri, child, delegated)?;
        }
    }
    Ok(())
}

/// Whole-row deletes for an owner, for the rows that exist.
fn delete_rows(
    ctx: &RequestContext<'_>,
    acc: &mut Accumulator,
    uri: &Path,
    binding: &TableBinding,
) -> Result<(), Error> {
    for table in &binding.tables {
        if !acc.cache.row_exists(ctx, binding.db, table, &binding.key)? {
            debug!("{}: {} \"{}\" absent, nothing to delete", uri, table, binding.key);
            continue;
        }
        acc.ops
            .entry(Operation::Delete)
            .mark_row_delete(table, &binding.key);
        acc.touch(table, &binding.key, uri);
    }
    Ok(())
}

/// Field deletes for a node sharing another node's row: only the stored
/// fields of its own leaves go.
fn delete_own_fields(
    ctx: &RequestContext<'_>,
    acc: &mut Accumulator,
    uri: &Path,
    node: &SchemaNode,
    binding: &TableBinding,
) -> Result<(), Error> {
    let mut leaves = Vec::new();
    for child in ctx.index.children(node) {
        if child.is_terminal() && !child.read_only && !child.is_key_leaf() && !child.in_subtree() {
            leaves.push((uri.child(path_segment(child)), child));
        }
    }

    for table in &binding.tables {
        let whole_row = acc
            .ops
            .get(Operation::Delete)
            .and_then(|rows| rows.row(table, &binding.key))
            .is_some_and(Fields::is_empty);
        if whole_row {
            continue;
        }
        let Some(stored) = acc.cache.row(ctx, binding.db, table, &binding.key)? else {
            continue;
        };

        let mut fields = Fields::new();
        for (leaf_uri, leaf) in &leaves {
            for field in leaf_store_fields(ctx, leaf_uri, leaf, table, &binding.key, &stored)? {
                fields.insert(field, String::new());
            }
        }
        if fields.is_empty() {
            continue;
        }
        let rows = acc.ops.entry(Operation::Delete);
        rows.insert_field(table, &binding.key, FILL_FIELDS, "true");
        for (field, value) in &fields {
            rows.insert_field(table, &binding.key, field, value);
        }
        acc.touch(table, &binding.key, uri);
    }
    Ok(())
}

/// Stored fields a leaf maps to in `table|key`.
fn leaf_store_fields(
    ctx: &RequestContext<'_>,
    uri: &Path,
    leaf: &SchemaNode,
    table: &str,
    key: &str,
    stored: &Fields,
) -> Result<Vec<String>, Error> {
    let names: Vec<String> = match &leaf.field {
        FieldBinding::Name(_) => leaf.store_field_name().into_iter().collect(),
        FieldBinding::Transformer(name) => {
            let mut params = ctx.params(uri);
            params.table = Some(table);
            params.key = Some(key);
            params.row = Some(stored);
            ctx.registry
                .field_to_db(name, &params)?
                .into_keys()
                .collect()
        }
        FieldBinding::ListKey | FieldBinding::None => Vec::new(),
    };
    Ok(names
        .into_iter()
        .filter(|f| stored.contains_key(f))
        .collect())
}

/// A leaf target. Leaves with a declared default go back to it instead of
/// losing the field.
fn delete_leaf(
    ctx: &RequestContext<'_>,
    acc: &mut Accumulator,
    uri: &Path,
    node: &SchemaNode,
) -> Result<(), Error> {
    if node.is_key_leaf() {
        return Err(Error::not_supported(format!(
            "{}: list keys cannot be deleted on their own",
            uri
        )));
    }
    if node.in_subtree() {
        return invoke_subtree_to_db(ctx, acc, uri, node, None);
    }
    let binding = resolve(ctx, &mut acc.cache, uri)?;
    if !binding.has_rows() {
        return Ok(());
    }

    for table in &binding.tables {
        let Some(stored) = acc.cache.row(ctx, binding.db, table, &binding.key)? else {
            continue;
        };
        let fields = leaf_store_fields(ctx, uri, node, table, &binding.key, &stored)?;
        if fields.is_empty() {
            continue;
        }

        if let (FieldBinding::Name(_), Some(default)) = (&node.field, default_value(node)) {
            let encoded = encode_leaf(node, &default, ctx.config)?;
            debug!("{}: reset to default \"{}\"", uri, encoded);
            for field in &fields {
                acc.ops
                    .entry(Operation::Update)
                    .insert_field(table, &binding.key, field, &encoded);
            }
        } else {
            for field in &fields {
                acc.ops
                    .entry(Operation::Delete)
                    .insert_field(table, &binding.key, field, "");
            }
        }
        acc.touch(table, &binding.key, &uri.parent().unwrap_or_default());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::{FieldXfmr, Registry, TxCache};
    use crate::config::TranslatorConfig;
    use collection_literals::btree;
    use std::cell::RefCell;
    use xlate_kvstore::{DbHandles, InMemoryStore};
    use xlate_schema::{SchemaDef, SchemaIndex};

    fn index() -> SchemaIndex {
        let def = SchemaDef::from_json(serde_json::json!({
            "modules": [{
                "name": "oc-acl",
                "kind": "module",
                "children": [{
                    "name": "acl",
                    "children": [{
                        "name": "acl-set",
                        "kind": "list",
                        "keys": ["name"],
                        "table-name": "ACL_TABLE",
                        "children": [
                            {"name": "name", "kind": "leaf"},
                            {"name": "config", "children": [
                                {"name": "description", "kind": "leaf", "field-name": "policy_desc"},
                                {"name": "stage", "kind": "leaf", "default": "INGRESS"},
                                {"name": "ports", "kind": "leaf-list"},
                                {"name": "mode", "kind": "leaf", "field-transformer": "mode_xfmr"}
                            ]},
                            {"name": "entries", "children": [{
                                "name": "entry",
                                "kind": "list",
                                "keys": ["seq"],
                                "table-name": "ACL_RULE",
                                "children": [
                                    {"name": "seq", "kind": "leaf", "value-type": "uint"},
                                    {"name": "action", "kind": "leaf"}
                                ]
                            }]}
                        ]
                    }]
                }]
            }]
        }))
        .unwrap();
        SchemaIndex::build(&def).unwrap()
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register(
            "mode_xfmr",
            FieldXfmr::new().with_to_db(|_| Ok(btree! { "type".to_string() => String::new() })),
        );
        registry
    }

    fn store() -> InMemoryStore {
        let mut store = InMemoryStore::new();
        store.insert_row(
            "ACL_TABLE",
            "DATAACL",
            btree! {
                "policy_desc".to_string() => "data plane".to_string(),
                "stage".to_string() => "EGRESS".to_string(),
                "ports@".to_string() => "Ethernet0,Ethernet4".to_string(),
                "type".to_string() => "L3".to_string(),
            },
        );
        store.insert_row("ACL_TABLE", "EVERFLOW", btree! { "type".to_string() => "MIRROR".to_string() });
        store.insert_row("ACL_RULE", "DATAACL|10", btree! { "action".to_string() => "DROP".to_string() });
        store.insert_row("ACL_RULE", "DATAACL|20", btree! { "action".to_string() => "FORWARD".to_string() });
        store.insert_row("ACL_RULE", "EVERFLOW|10", btree! { "action".to_string() => "MIRROR".to_string() });
        store
    }

    fn delete(uri: &str) -> Result<Accumulator, Error> {
        let index = index();
        let registry = registry();
        let config = TranslatorConfig::default();
        let store = store();
        let stores = DbHandles::all(&store);
        let uri = Path::parse(uri).unwrap();
        let tx = RefCell::new(TxCache::new());
        let ctx = RequestContext {
            index: &index,
            registry: &registry,
            config: &config,
            stores: &stores,
            oper: Operation::Delete,
            request_uri: &uri,
            payload: None,
            tx_cache: &tx,
        };
        let mut acc = Accumulator::new();
        delete_tree(&ctx, &mut acc)?;
        Ok(acc)
    }

    fn deletes(acc: &Accumulator) -> &xlate_core::RowMap {
        acc.ops.get(Operation::Delete).unwrap()
    }

    #[test]
    fn container_on_parent_row_deletes_fields() {
        let acc = delete("/oc-acl:acl/acl-set[name=DATAACL]/config").unwrap();
        assert_eq!(
            deletes(&acc).row("ACL_TABLE", "DATAACL"),
            Some(&btree! {
                "FillFields".to_string() => "true".to_string(),
                "policy_desc".to_string() => String::new(),
                "stage".to_string() => String::new(),
                "ports@".to_string() => String::new(),
                "type".to_string() => String::new(),
            })
        );
    }

    #[test]
    fn owner_instance_deletes_rows_and_children() {
        let acc = delete("/oc-acl:acl/acl-set[name=DATAACL]").unwrap();
        let rows = deletes(&acc);
        assert_eq!(rows.row("ACL_TABLE", "DATAACL"), Some(&Fields::new()));
        assert_eq!(rows.row("ACL_RULE", "DATAACL|10"), Some(&Fields::new()));
        assert_eq!(rows.row("ACL_RULE", "DATAACL|20"), Some(&Fields::new()));
        assert!(!rows.contains_row("ACL_RULE", "EVERFLOW|10"));
    }

    #[test]
    fn whole_list_deletes_every_instance() {
        let acc = delete("/oc-acl:acl/acl-set").unwrap();
        let rows = deletes(&acc);
        assert!(rows.contains_row("ACL_TABLE", "EVERFLOW"));
        assert!(rows.contains_row("ACL_RULE", "EVERFLOW|10"));
        assert_eq!(rows.len(), 5);
    }

    #[test]
    fn leaf_delete_clears_the_field() {
        let acc = delete("/oc-acl:acl/acl-set[name=DATAACL]/config/description").unwrap();
        assert_eq!(
            deletes(&acc).row("ACL_TABLE", "DATAACL"),
            Some(&btree! { "policy_desc".to_string() => String::new() })
        );
    }

    #[test]
    fn leaf_with_default_is_reset() {
        let acc = delete("/oc-acl:acl/acl-set[name=DATAACL]/config/stage").unwrap();
        assert!(acc.ops.get(Operation::Delete).is_none());
        assert_eq!(
            acc.ops
                .get(Operation::Update)
                .and_then(|rows| rows.row("ACL_TABLE", "DATAACL")),
            Some(&btree! { "stage".to_string() => "INGRESS".to_string() })
        );
    }

    #[test]
    fn absent_targets_are_not_found() {
        let err = delete("/oc-acl:acl/acl-set[name=EVERFLOW]/config/description").unwrap_err();
        assert!(err.is_not_found());
        let err = delete("/oc-acl:acl/acl-set[name=NOPE]").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn key_leaf_cannot_be_deleted() {
        let err = delete("/oc-acl:acl/acl-set[name=DATAACL]/name").unwrap_err();
        assert!(matches!(err, Error::NotSupported { .. }));
    }
}
