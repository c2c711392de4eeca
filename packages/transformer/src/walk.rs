//! Helpers shared by the write, delete and read walks.

use log::debug;
use xlate_core::{local_name, Error, Path, Value};
use xlate_schema::SchemaNode;

use crate::context::{Accumulator, RequestCache, RequestContext};
use crate::resolver::{instance_pattern, resolve, resolve_key, split_key};

/// The name a node takes in instance paths.
pub(crate) fn path_segment(node: &SchemaNode) -> &str {
    node.path.rsplit('/').next().unwrap_or(&node.name)
}

/// The name a node takes in payload trees.
pub(crate) fn member_name(node: &SchemaNode) -> &str {
    local_name(path_segment(node))
}

/// Run the node's validate callback, if any. `false` means the walk skips
/// the subtree.
pub(crate) fn validate_passes(
    ctx: &RequestContext<'_>,
    uri: &Path,
    node: &SchemaNode,
    payload: Option<&Value>,
) -> Result<bool, Error> {
    let Some(name) = &node.validate else {
        return Ok(true);
    };
    let mut params = ctx.params(uri);
    params.payload = payload;
    let ok = ctx.registry.validate(name, &params)?;
    if !ok {
        debug!("{}: validation '{}' rejected, skipping subtree", uri, name);
    }
    Ok(ok)
}

/// Whether `node` is a point where a subtree transformer takes over.
///
/// A node declaring the transformer always is; a node merely inside a
/// delegated subtree is one only when the walk starts there.
pub(crate) fn is_delegation_point(node: &SchemaNode, delegated: bool) -> bool {
    node.subtree_declared || (!delegated && node.in_subtree())
}

/// Invoke the subtree transformer in effect at `uri` in the to-db
/// direction, at most once per instance path, and merge its rows.
pub(crate) fn invoke_subtree_to_db(
    ctx: &RequestContext<'_>,
    acc: &mut Accumulator,
    uri: &Path,
    node: &SchemaNode,
    payload: Option<&Value>,
) -> Result<(), Error> {
    let Some(name) = &node.subtree else {
        return Ok(());
    };
    if !acc.cache.subtrees.insert(format!("{}#{}", name, uri)) {
        debug!("{}: subtree '{}' already invoked", uri, name);
        return Ok(());
    }
    let mut params = ctx.params(uri);
    params.payload = payload;
    let out = ctx.registry.subtree_to_db(name, &params)?;
    acc.ops.merge(ctx.oper, &out.rows);
    acc.ops.merge_all(&out.sub_ops);
    Ok(())
}

/// Every ancestor list instance of `uri` bound to a physical row must
/// exist, and so must the target instance itself for UPDATE and DELETE.
pub(crate) fn verify_parents(
    ctx: &RequestContext<'_>,
    cache: &mut RequestCache,
    uri: &Path,
) -> Result<(), Error> {
    for depth in 1..uri.len() {
        let prefix = uri.prefix(depth);
        if prefix.ends_with_keys() {
            verify_instance(ctx, cache, &prefix)?;
        }
    }
    if uri.ends_with_keys()
        && matches!(
            ctx.oper,
            xlate_core::Operation::Update | xlate_core::Operation::Delete
        )
    {
        verify_instance(ctx, cache, uri)?;
    }
    Ok(())
}

fn verify_instance(
    ctx: &RequestContext<'_>,
    cache: &mut RequestCache,
    uri: &Path,
) -> Result<(), Error> {
    let node = ctx.index.node_for(uri)?;
    if node.in_subtree() {
        return Ok(());
    }
    let binding = resolve(ctx, cache, uri)?;
    if !binding.has_rows() {
        return Ok(());
    }
    let table = &binding.tables[0];
    if !cache.row_exists(ctx, binding.db, table, &binding.key)? {
        return Err(Error::not_found(format!(
            "{}: no {} entry for key \"{}\"",
            uri, table, binding.key
        )));
    }
    Ok(())
}

/// Instance paths of the stored entries of the list at `uri`.
pub(crate) fn list_instances(
    ctx: &RequestContext<'_>,
    cache: &mut RequestCache,
    uri: &Path,
    node: &SchemaNode,
) -> Result<Vec<Path>, Error> {
    let list_uri = uri.without_last_keys();
    let binding = resolve(ctx, cache, &list_uri)?;
    if !binding.is_bound() {
        debug!("{}: list has no physical table, nothing to enumerate", list_uri);
        return Ok(Vec::new());
    }
    let table = &binding.tables[0];
    let separator = ctx.separator(binding.db)?;
    let parent_key = match list_uri.parent() {
        Some(parent) => resolve_key(ctx, cache, &parent)?,
        None => String::new(),
    };
    let nested = node.key_transformer.is_none()
        && node.key_name.is_none()
        && node.key_lists.len() > 1
        && !parent_key.is_empty();
    // A key transformer under a keyed parent still sees only that parent's rows.
    let scoped = nested || (node.key_transformer.is_some() && !parent_key.is_empty());
    let pattern = if scoped {
        instance_pattern(&parent_key, &separator)
    } else {
        "*".to_string()
    };

    cache.store_reads += 1;
    let keys = ctx.store(binding.db)?.get_keys(table, Some(&pattern))?;
    let mut out = Vec::with_capacity(keys.len());
    for stored in keys {
        let values = if let Some(xfmr) = &node.key_transformer {
            let mut params = ctx.params(&list_uri);
            params.table = Some(table.as_str());
            params.key = Some(stored.as_str());
            let leaves = ctx.registry.key_from_db(xfmr, &params)?;
            let mut values = Vec::with_capacity(node.keys.len());
            for key in &node.keys {
                let value = leaves
                    .get(key)
                    .and_then(Value::to_scalar_string)
                    .ok_or_else(|| {
                        Error::internal(format!(
                            "{}: key transformer '{}' gave no value for '{}'",
                            list_uri, xfmr, key
                        ))
                    })?;
                values.push(value);
            }
            values
        } else {
            let own = if nested {
                stored
                    .strip_prefix(&format!("{}{}", parent_key, separator))
                    .unwrap_or(&stored)
                    .to_string()
            } else if let Some(n) = node.key_components {
                split_key(&stored, &separator, Some(n))
                    .into_iter()
                    .next()
                    .unwrap_or_default()
            } else {
                stored.clone()
            };
            let delimiter = node.key_delimiter.as_deref().unwrap_or(&separator);
            // Only the last key value may contain the delimiter.
            let parts = split_key(&own, delimiter, Some(node.keys.len()));
            if parts.len() != node.keys.len() {
                debug!("{}: stored key \"{}\" does not fit the list keys", list_uri, stored);
                continue;
            }
            parts
        };
        let mut instance = list_uri.clone();
        if let Some(last) = instance.components.last_mut() {
            last.keys = node.keys.iter().cloned().zip(values).collect();
        }
        out.push(instance);
    }
    Ok(out)
}
