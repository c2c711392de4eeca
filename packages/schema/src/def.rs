//! The annotated schema as loaded from its serialized form.

use serde::{Deserialize, Serialize};
use xlate_core::{DbIndex, Error};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Module,
    #[default]
    Container,
    List,
    Leaf,
    LeafList,
    Choice,
    Case,
}

impl NodeKind {
    /// Leaves and leaf-lists.
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeKind::Leaf | NodeKind::LeafList)
    }

    /// Choice and case nodes never appear in instance paths.
    pub fn is_transparent(&self) -> bool {
        matches!(self, NodeKind::Choice | NodeKind::Case)
    }
}

/// Declared type of a leaf, as far as encoding to and from the store cares.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueType {
    #[default]
    String,
    Int,
    Uint,
    Decimal,
    Bool,
    Empty,
    Enum,
    Identityref,
    Union,
}

/// Per-node extension annotations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Annotations {
    pub table_name: Option<String>,
    pub table_transformer: Option<String>,
    pub key_name: Option<String>,
    pub key_transformer: Option<String>,
    pub key_delimiter: Option<String>,
    /// How many separator-delimited components a stored key splits into.
    pub key_components: Option<usize>,
    pub field_name: Option<String>,
    pub field_transformer: Option<String>,
    pub subtree_transformer: Option<String>,
    pub validate: Option<String>,
    pub table_owner: Option<bool>,
    pub cascade_delete: Option<bool>,
    pub virtual_table: Option<bool>,
    pub db: Option<DbIndex>,
    pub pre_transformer: Option<String>,
    pub post_transformer: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct NodeDef {
    pub name: String,
    pub kind: NodeKind,
    /// Key leaf names of a list, in declared order.
    pub keys: Vec<String>,
    pub value_type: ValueType,
    pub default: Option<String>,
    /// `config false` nodes.
    pub read_only: bool,
    #[serde(flatten)]
    pub annotations: Annotations,
    pub children: Vec<NodeDef>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FieldDef {
    pub name: String,
    pub leaf_list: bool,
}

/// Store-side description of a table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TableDef {
    pub name: String,
    pub db: DbIndex,
    pub key_fields: Vec<String>,
    pub fields: Vec<FieldDef>,
    pub cascade_delete: bool,
}

impl TableDef {
    /// Look up a field by its store name. Leaf-list fields match with or
    /// without the `@` suffix.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        let bare = name.trim_end_matches(xlate_core::LEAF_LIST_SUFFIX);
        self.fields.iter().find(|f| f.name == bare)
    }

    pub fn is_key_field(&self, name: &str) -> bool {
        self.key_fields.iter().any(|k| k == name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SchemaDef {
    pub modules: Vec<NodeDef>,
    pub tables: Vec<TableDef>,
}

impl SchemaDef {
    pub fn from_json(json: serde_json::Value) -> Result<Self, Error> {
        serde_json::from_value(json)
            .map_err(|e| Error::internal(format!("invalid schema definition: {}", e)))
    }

    pub fn from_json_str(s: &str) -> Result<Self, Error> {
        serde_json::from_str(s)
            .map_err(|e| Error::internal(format!("invalid schema definition: {}", e)))
    }
}
