//! Rows back to a payload tree, for GET.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use xlate_core::{local_name, Error, Path, PathTrie, Value};
use xlate_schema::{FieldBinding, NodeKind, SchemaNode};

use crate::context::{RequestCache, RequestContext};
use crate::encode::decode_field;
use crate::resolver::resolve;
use crate::walk::{is_delegation_point, list_instances, member_name, path_segment, validate_passes};

/// Which part of the tree a read returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Content {
    #[default]
    All,
    Config,
    /// State leaves only. Containers are still walked.
    NonConfig,
    /// Treated as `NonConfig`.
    Operational,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct QueryOptions {
    /// Levels below the target to return. `0` means unlimited and `1`
    /// returns a complex target empty.
    pub depth: u32,
    /// Sub-paths relative to the target, `/`-separated. Empty means all.
    pub fields: Vec<String>,
    pub content: Content,
    /// Skip subtrees whose resolver reports `Unimplemented` instead of
    /// failing the whole read.
    pub lenient: bool,
}

impl QueryOptions {
    pub fn with_depth(depth: u32) -> Self {
        Self {
            depth,
            ..Default::default()
        }
    }

    fn projection(&self) -> PathTrie<()> {
        let mut trie = PathTrie::new();
        for field in &self.fields {
            let segments: Vec<&str> = field
                .split('/')
                .filter(|s| !s.is_empty())
                .map(local_name)
                .collect();
            if !segments.is_empty() {
                trie.insert(&segments, ());
            }
        }
        trie
    }
}

/// Read the tree at the request path.
///
/// Containers and list instances come back as maps, a whole list as an
/// array of entries and a leaf as its value.
pub(crate) fn read_tree(
    ctx: &RequestContext<'_>,
    cache: &mut RequestCache,
    options: &QueryOptions,
) -> Result<Value, Error> {
    let uri = ctx.request_uri;
    let node = ctx.index.node_for(uri)?;
    let mut reader = Reader {
        ctx,
        cache,
        content: options.content,
        projection: options.projection(),
        lenient: options.lenient,
    };
    let remaining = (options.depth > 0).then_some(options.depth);

    match node.kind {
        NodeKind::Leaf | NodeKind::LeafList => reader
            .read_leaf(uri, node)?
            .ok_or_else(|| Error::not_found(format!("{}: no value", uri))),
        NodeKind::List if !uri.ends_with_keys() => {
            if remaining == Some(1) {
                return Ok(Value::array());
            }
            reader.read_list(uri, node, remaining, &[], false)
        }
        _ => {
            if remaining == Some(1) {
                return Ok(Value::map());
            }
            if uri.ends_with_keys() && !node.in_subtree() {
                let binding = resolve(ctx, reader.cache, uri)?;
                if binding.has_rows()
                    && !reader
                        .cache
                        .row_exists(ctx, binding.db, &binding.tables[0], &binding.key)?
                {
                    return Err(Error::not_found(format!(
                        "{}: no {} entry for key \"{}\"",
                        uri, binding.tables[0], binding.key
                    )));
                }
            }
            reader.read_complex(uri, node, remaining, &[], false)
        }
    }
}

struct Reader<'c, 'a> {
    ctx: &'c RequestContext<'a>,
    cache: &'c mut RequestCache,
    content: Content,
    projection: PathTrie<()>,
    lenient: bool,
}

impl Reader<'_, '_> {
    /// A child is read when it lies on, above or below a requested path.
    fn projected(&self, rel: &[String]) -> bool {
        self.projection.is_empty()
            || self.projection.find_ancestor(rel).is_some()
            || self.projection.get_subtrie(rel).is_some()
    }

    fn wanted(&self, node: &SchemaNode) -> bool {
        match self.content {
            Content::All => true,
            Content::Config => !node.read_only,
            Content::NonConfig | Content::Operational => {
                !node.is_terminal() || node.read_only || node.is_key_leaf()
            }
        }
    }

    /// Turn a resolver's `Unimplemented` into a skipped subtree when reads
    /// are lenient.
    fn lenient<T>(&self, uri: &Path, result: Result<T, Error>) -> Result<Option<T>, Error> {
        match result {
            Ok(v) => Ok(Some(v)),
            Err(e) if self.lenient && e.is_unimplemented() => {
                warn!("{}: skipped, {}", uri, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn read_list(
        &mut self,
        uri: &Path,
        node: &SchemaNode,
        remaining: Option<u32>,
        rel: &[String],
        delegated: bool,
    ) -> Result<Value, Error> {
        let instances = list_instances(self.ctx, self.cache, uri, node);
        let Some(instances) = self.lenient(uri, instances)? else {
            return Ok(Value::array());
        };
        let mut entries = Vec::with_capacity(instances.len());
        for instance in instances {
            let entry = self.read_complex(&instance, node, remaining, rel, delegated)?;
            if !entry.is_empty() {
                entries.push(entry);
            }
        }
        Ok(Value::Array(entries))
    }

    fn read_complex(
        &mut self,
        uri: &Path,
        node: &SchemaNode,
        remaining: Option<u32>,
        rel: &[String],
        delegated: bool,
    ) -> Result<Value, Error> {
        let mut out = Value::map();
        if remaining == Some(1) || !validate_passes(self.ctx, uri, node, None)? {
            return Ok(out);
        }

        let mut delegated = delegated;
        if is_delegation_point(node, delegated) {
            if let Some(name) = &node.subtree {
                let params = self.ctx.params(uri);
                let tree = self.ctx.registry.subtree_from_db(name, &params);
                if let Some(tree) = self.lenient(uri, tree)? {
                    out.merge(tree);
                }
            }
            if !node.has_child_subtree {
                return Ok(out);
            }
            delegated = true;
        } else if delegated && !node.has_child_subtree {
            return Ok(out);
        }

        let index = self.ctx.index;
        let child_remaining = remaining.map(|d| d - 1);
        for child in index.children(node) {
            if !self.wanted(child) {
                continue;
            }
            let mut child_rel = rel.to_vec();
            child_rel.push(member_name(child).to_string());
            if !child.is_key_leaf() && !self.projected(&child_rel) {
                continue;
            }
            if delegated && !child.is_terminal() && !child.subtree_declared && !child.has_child_subtree {
                continue;
            }
            let child_uri = uri.child(path_segment(child));

            let value = match child.kind {
                NodeKind::Leaf | NodeKind::LeafList => {
                    if delegated && !child.is_key_leaf() {
                        continue;
                    }
                    match self.read_leaf(&child_uri, child)? {
                        Some(v) => v,
                        None => continue,
                    }
                }
                NodeKind::List => {
                    if child_remaining == Some(1) {
                        continue;
                    }
                    self.read_list(&child_uri, child, child_remaining, &child_rel, delegated)?
                }
                _ => self.read_complex(&child_uri, child, child_remaining, &child_rel, delegated)?,
            };
            if !value.is_empty() {
                // Keep whatever an enclosing subtree transformer already
                // produced under this member.
                let mut member = Value::map();
                member.insert(member_name(child), value);
                out.merge(member);
            }
        }
        Ok(out)
    }

    fn read_leaf(&mut self, uri: &Path, node: &SchemaNode) -> Result<Option<Value>, Error> {
        if node.is_key_leaf() {
            let parent = uri.parent().unwrap_or_default();
            let name = member_name(node);
            return Ok(parent
                .last()
                .and_then(|c| c.key(&node.name).or_else(|| c.key(name)))
                .map(|raw| decode_field(node, raw)));
        }
        if node.in_subtree() {
            let Some(name) = &node.subtree else {
                return Ok(None);
            };
            let params = self.ctx.params(uri);
            let tree = self.ctx.registry.subtree_from_db(name, &params);
            return Ok(self
                .lenient(uri, tree)?
                .and_then(|t| t.get(member_name(node)).cloned()));
        }

        let binding = resolve(self.ctx, self.cache, uri)?;
        if !binding.has_rows() {
            return Ok(None);
        }
        match &node.field {
            FieldBinding::Name(_) => {
                let Some(field) = node.store_field_name() else {
                    return Ok(None);
                };
                for table in &binding.tables {
                    let row = self.cache.row(self.ctx, binding.db, table, &binding.key)?;
                    if let Some(raw) = row.as_ref().and_then(|r| r.get(&field)) {
                        return Ok(Some(decode_field(node, raw)));
                    }
                }
                Ok(None)
            }
            FieldBinding::Transformer(name) => {
                let table = &binding.tables[0];
                let Some(row) = self.cache.row(self.ctx, binding.db, table, &binding.key)? else {
                    debug!("{}: no {} row, transformer '{}' not called", uri, table, name);
                    return Ok(None);
                };
                let mut params = self.ctx.params(uri);
                params.table = Some(table.as_str());
                params.key = Some(binding.key.as_str());
                params.row = Some(&row);
                let leaves = self.ctx.registry.field_from_db(name, &params);
                let Some(mut leaves) = self.lenient(uri, leaves)? else {
                    return Ok(None);
                };
                let member = member_name(node);
                Ok(match leaves.remove(member) {
                    Some(v) => Some(v),
                    None if leaves.len() == 1 => leaves.into_values().next(),
                    None => None,
                })
            }
            FieldBinding::ListKey | FieldBinding::None => Ok(None),
        }
    }
}
