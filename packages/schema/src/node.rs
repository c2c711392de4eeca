//! Compiled schema nodes.

use serde::Serialize;
use xlate_core::DbIndex;

use crate::def::{NodeKind, ValueType};

/// Where a node's table comes from, after inheritance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "source", content = "name")]
pub enum TableSource {
    #[default]
    None,
    Static(String),
    Transformer(String),
}

/// How a leaf maps onto a store field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "binding", content = "name")]
pub enum FieldBinding {
    /// Containers and lists.
    #[default]
    None,
    Name(String),
    Transformer(String),
    /// The leaf is one of its list's keys and lives in the row key.
    ListKey,
}

/// Explicit table-ownership annotation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ownership {
    Owner,
    NotOwner,
    /// Decided by comparing the resolved key with the parent's.
    #[default]
    Inherit,
}

impl From<Option<bool>> for Ownership {
    fn from(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => Ownership::Owner,
            Some(false) => Ownership::NotOwner,
            None => Ownership::Inherit,
        }
    }
}

/// Binding metadata for one schema path, with inherited attributes resolved.
///
/// Parent and children are referenced by schema path, never by pointer.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchemaNode {
    pub path: String,
    pub name: String,
    pub kind: NodeKind,
    pub parent: Option<String>,
    /// Child names as they appear in instance paths, in declared order.
    pub children: Vec<String>,
    /// Key leaf names, for lists.
    pub keys: Vec<String>,
    /// Paths of the list nodes, outermost first, whose key values compose
    /// this node's row key below its table boundary.
    pub key_lists: Vec<String>,
    pub value_type: ValueType,
    pub default: Option<String>,
    pub read_only: bool,

    pub table: TableSource,
    /// True when the node itself declares `table`, making it a boundary.
    pub table_declared: bool,
    pub virtual_table: Option<bool>,
    pub key_name: Option<String>,
    pub key_transformer: Option<String>,
    pub key_delimiter: Option<String>,
    pub key_components: Option<usize>,
    pub field: FieldBinding,
    pub ownership: Ownership,
    pub cascade_delete: bool,
    pub db: DbIndex,

    /// Effective subtree transformer, inherited by every descendant.
    pub subtree: Option<String>,
    /// True when the node itself declares the subtree transformer.
    pub subtree_declared: bool,
    /// Some descendant declares its own subtree transformer.
    pub has_child_subtree: bool,
    /// A container/list with container or list children.
    pub has_non_terminal: bool,
    pub validate: Option<String>,
}

impl SchemaNode {
    pub fn is_list(&self) -> bool {
        self.kind == NodeKind::List
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    pub fn is_leaf_list(&self) -> bool {
        self.kind == NodeKind::LeafList
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    pub fn is_container(&self) -> bool {
        matches!(self.kind, NodeKind::Container | NodeKind::Module)
    }

    pub fn is_key_leaf(&self) -> bool {
        self.field == FieldBinding::ListKey
    }

    /// The node has a subtree transformer in effect, declared here or above.
    pub fn in_subtree(&self) -> bool {
        self.subtree.is_some()
    }

    /// The field name used for a statically bound leaf, with the leaf-list
    /// suffix applied.
    pub fn store_field_name(&self) -> Option<String> {
        match &self.field {
            FieldBinding::Name(name) if self.is_leaf_list() => {
                Some(format!("{}{}", name, xlate_core::LEAF_LIST_SUFFIX))
            }
            FieldBinding::Name(name) => Some(name.clone()),
            _ => None,
        }
    }
}
