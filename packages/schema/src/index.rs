//! The compiled schema index.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use log::{debug, info};
use serde::Serialize;
use xlate_core::{local_name, DbIndex, Error, Path};

use crate::def::{FieldDef, NodeDef, NodeKind, SchemaDef, TableDef};
use crate::node::{FieldBinding, Ownership, SchemaNode, TableSource};

/// Whole-module hooks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModuleHooks {
    pub name: String,
    pub pre_transformer: Option<String>,
    pub post_transformer: Option<String>,
}

/// Path-indexed binding metadata, immutable once built.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchemaIndex {
    nodes: BTreeMap<String, SchemaNode>,
    tables: BTreeMap<String, TableDef>,
    modules: BTreeMap<String, ModuleHooks>,
    cascade_tables: BTreeSet<String>,
}

lazy_static! {
    static ref PROCESS_INDEX: Mutex<Option<Arc<SchemaIndex>>> = Mutex::new(None);
}

/// Build the process-wide index the first time, and hand back the same
/// index on every later call regardless of `def`.
pub fn build_once(def: &SchemaDef) -> Result<Arc<SchemaIndex>, Error> {
    let mut slot = PROCESS_INDEX
        .lock()
        .map_err(|_| Error::internal("schema index lock poisoned"))?;
    if let Some(index) = slot.as_ref() {
        return Ok(Arc::clone(index));
    }
    let index = Arc::new(SchemaIndex::build(def)?);
    *slot = Some(Arc::clone(&index));
    Ok(index)
}

/// Attributes a child inherits from its parent during the build.
#[derive(Clone, Default)]
struct Inherited {
    path: String,
    table: TableSource,
    db: DbIndex,
    validate: Option<String>,
    cascade_delete: bool,
    subtree: Option<String>,
    key_lists: Vec<String>,
    read_only: bool,
    /// Key leaves of the enclosing list, when the child sits directly in it.
    list_keys: Vec<String>,
}

impl SchemaIndex {
    /// Compile `def` into an index.
    ///
    /// A leaf without a field binding falls back to its own local name. A
    /// list key missing from the list's leaves, or a node declaring both a
    /// static table and a table transformer, fails the build.
    pub fn build(def: &SchemaDef) -> Result<SchemaIndex, Error> {
        let mut index = SchemaIndex::default();

        for table in &def.tables {
            if table.cascade_delete {
                index.cascade_tables.insert(table.name.clone());
            }
            index.tables.insert(table.name.clone(), table.clone());
        }

        for top in &def.modules {
            if top.kind == NodeKind::Module {
                index.modules.insert(
                    top.name.clone(),
                    ModuleHooks {
                        name: top.name.clone(),
                        pre_transformer: top.annotations.pre_transformer.clone(),
                        post_transformer: top.annotations.post_transformer.clone(),
                    },
                );
                let base = Inherited {
                    db: top.annotations.db.unwrap_or_default(),
                    ..Default::default()
                };
                for child in &top.children {
                    let name = if child.name.contains(':') {
                        child.name.clone()
                    } else {
                        format!("{}:{}", top.name, child.name)
                    };
                    index.compile(child, &name, &base)?;
                }
            } else {
                index.compile(top, &top.name, &Inherited::default())?;
            }
        }

        index.mark_child_subtrees();
        info!(
            "schema index built: {} nodes, {} tables, {} modules",
            index.nodes.len(),
            index.tables.len(),
            index.modules.len()
        );
        Ok(index)
    }

    fn compile(&mut self, def: &NodeDef, name: &str, parent: &Inherited) -> Result<(), Error> {
        let path = format!("{}/{}", parent.path, name);
        let ann = &def.annotations;

        if ann.table_name.is_some() && ann.table_transformer.is_some() {
            return Err(Error::internal(format!(
                "{}: table-name and table-transformer are mutually exclusive",
                path
            )));
        }

        let table = match (&ann.table_name, &ann.table_transformer) {
            (Some(t), _) => TableSource::Static(t.clone()),
            (_, Some(x)) => TableSource::Transformer(x.clone()),
            _ => parent.table.clone(),
        };
        let table_declared = ann.table_name.is_some() || ann.table_transformer.is_some();
        let db = match (&ann.db, &table) {
            (Some(db), _) => *db,
            (None, TableSource::Static(t)) if table_declared => {
                self.tables.get(t).map_or(parent.db, |td| td.db)
            }
            _ => parent.db,
        };
        let cascade_delete = ann.cascade_delete.unwrap_or(parent.cascade_delete);
        if cascade_delete && table_declared {
            if let TableSource::Static(t) = &table {
                self.cascade_tables.insert(t.clone());
            }
        }

        let subtree_declared = ann.subtree_transformer.is_some();
        let subtree = ann
            .subtree_transformer
            .clone()
            .or_else(|| parent.subtree.clone());

        let mut key_lists = parent.key_lists.clone();
        if ann.key_name.is_some() || ann.key_transformer.is_some() {
            key_lists.clear();
        }
        if def.kind == NodeKind::List {
            key_lists.push(path.clone());
        }

        let field = if def.kind.is_terminal() {
            if parent.list_keys.iter().any(|k| k == &def.name) {
                FieldBinding::ListKey
            } else if let Some(x) = &ann.field_transformer {
                FieldBinding::Transformer(x.clone())
            } else if let Some(f) = &ann.field_name {
                FieldBinding::Name(f.clone())
            } else {
                debug!("{}: no field binding, using local name", path);
                FieldBinding::Name(local_name(&def.name).to_string())
            }
        } else {
            FieldBinding::None
        };

        if def.kind == NodeKind::List {
            for key in &def.keys {
                let present = data_children(def)
                    .iter()
                    .any(|c| c.kind == NodeKind::Leaf && &c.name == key);
                if !present {
                    return Err(Error::internal(format!(
                        "{}: list key '{}' has no matching leaf",
                        path, key
                    )));
                }
            }
        }

        let children = data_children(def);
        let has_non_terminal = !def.kind.is_terminal()
            && children
                .iter()
                .any(|c| matches!(c.kind, NodeKind::Container | NodeKind::List));

        let node = SchemaNode {
            path: path.clone(),
            name: name.to_string(),
            kind: def.kind,
            parent: if parent.path.is_empty() {
                None
            } else {
                Some(parent.path.clone())
            },
            children: children.iter().map(|c| c.name.clone()).collect(),
            keys: def.keys.clone(),
            key_lists: key_lists.clone(),
            value_type: def.value_type,
            default: def.default.clone(),
            read_only: def.read_only || parent.read_only,
            table: table.clone(),
            table_declared,
            virtual_table: ann.virtual_table,
            key_name: ann.key_name.clone(),
            key_transformer: ann.key_transformer.clone(),
            key_delimiter: ann.key_delimiter.clone(),
            key_components: ann.key_components,
            field,
            ownership: Ownership::from(ann.table_owner),
            cascade_delete,
            db,
            subtree: subtree.clone(),
            subtree_declared,
            has_child_subtree: false,
            has_non_terminal,
            validate: ann.validate.clone().or_else(|| parent.validate.clone()),
        };

        if self.nodes.insert(path.clone(), node).is_some() {
            return Err(Error::internal(format!("{}: duplicate schema path", path)));
        }

        let inherited = Inherited {
            path,
            table,
            db,
            validate: ann.validate.clone().or_else(|| parent.validate.clone()),
            cascade_delete,
            subtree,
            key_lists,
            read_only: def.read_only || parent.read_only,
            list_keys: if def.kind == NodeKind::List {
                def.keys.clone()
            } else {
                Vec::new()
            },
        };
        for child in children {
            self.compile(child, &child.name, &inherited)?;
        }
        Ok(())
    }

    /// Flag every ancestor of a node declaring a subtree transformer, so a
    /// delegated walk keeps descending until it reaches the nested one.
    fn mark_child_subtrees(&mut self) {
        let declared: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.subtree_declared)
            .map(|n| n.path.clone())
            .collect();
        for path in declared {
            let mut parent = self.nodes.get(&path).and_then(|n| n.parent.clone());
            while let Some(p) = parent {
                let Some(node) = self.nodes.get_mut(&p) else {
                    break;
                };
                node.has_child_subtree = true;
                parent = node.parent.clone();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, schema_path: &str) -> Option<&SchemaNode> {
        self.nodes.get(schema_path)
    }

    /// The node an instance path addresses.
    pub fn node_for(&self, path: &Path) -> Result<&SchemaNode, Error> {
        let schema_path = path.schema_path();
        self.nodes
            .get(&schema_path)
            .ok_or_else(|| Error::internal(format!("invalid schema path \"{}\"", schema_path)))
    }

    pub fn parent(&self, node: &SchemaNode) -> Option<&SchemaNode> {
        self.nodes.get(node.parent.as_deref()?)
    }

    /// A child by name, tolerating a `module:` prefix on either side.
    pub fn child(&self, node: &SchemaNode, name: &str) -> Option<&SchemaNode> {
        let exact = format!("{}/{}", node.path, name);
        if let Some(child) = self.nodes.get(&exact) {
            return Some(child);
        }
        let wanted = local_name(name);
        node.children
            .iter()
            .find(|c| local_name(c) == wanted)
            .and_then(|c| self.nodes.get(&format!("{}/{}", node.path, c)))
    }

    pub fn children<'a>(&'a self, node: &'a SchemaNode) -> impl Iterator<Item = &'a SchemaNode> {
        node.children
            .iter()
            .filter_map(move |c| self.nodes.get(&format!("{}/{}", node.path, c)))
    }

    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    pub fn table_field(&self, table: &str, field: &str) -> Option<&FieldDef> {
        self.tables.get(table)?.field(field)
    }

    pub fn is_cascade_table(&self, table: &str) -> bool {
        self.cascade_tables.contains(table)
    }

    pub fn module(&self, name: &str) -> Option<&ModuleHooks> {
        self.modules.get(name)
    }

    /// Hooks of the module owning the first component of `path`.
    pub fn module_for(&self, path: &Path) -> Option<&ModuleHooks> {
        let first = &path.components.first()?.name;
        let (module, _) = first.split_once(':')?;
        self.modules.get(module)
    }

    /// Write the compiled index as pretty JSON. Diagnostic only.
    pub fn dump<W: io::Write>(&self, writer: W) -> Result<(), Error> {
        serde_json::to_writer_pretty(writer, self)
            .map_err(|e| Error::internal(format!("index dump failed: {}", e)))
    }
}

/// Children as they appear in the data tree: choice and case nodes are
/// flattened into their enclosing node.
fn data_children(def: &NodeDef) -> Vec<&NodeDef> {
    let mut out = Vec::new();
    for child in &def.children {
        if child.kind.is_transparent() {
            out.extend(data_children(child));
        } else {
            out.push(child);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::ValueType;

    fn def(json: serde_json::Value) -> SchemaDef {
        SchemaDef::from_json(json).unwrap()
    }

    fn interfaces() -> SchemaDef {
        def(serde_json::json!({
            "tables": [
                {"name": "PORT", "key-fields": ["name"], "fields": [{"name": "mtu"}],
                 "cascade-delete": true}
            ],
            "modules": [{
                "name": "oc-if",
                "kind": "module",
                "pre-transformer": "if_pre",
                "children": [{
                    "name": "interfaces",
                    "children": [{
                        "name": "interface",
                        "kind": "list",
                        "keys": ["name"],
                        "table-name": "PORT",
                        "validate": "if_valid",
                        "children": [
                            {"name": "name", "kind": "leaf"},
                            {"name": "config", "children": [
                                {"name": "mtu", "kind": "leaf", "value-type": "uint",
                                 "default": "9100"},
                                {"name": "description", "kind": "leaf",
                                 "field-name": "alias"},
                                {"name": "choice-a", "kind": "choice", "children": [
                                    {"name": "case-b", "kind": "case", "children": [
                                        {"name": "flag", "kind": "leaf",
                                         "value-type": "bool"}
                                    ]}
                                ]}
                            ]},
                            {"name": "state", "read-only": true, "db": "state-db",
                             "children": [{"name": "oper-status", "kind": "leaf"}]}
                        ]
                    }]
                }]
            }]
        }))
    }

    #[test]
    fn module_prefix_is_applied_to_top_nodes() {
        let index = SchemaIndex::build(&interfaces()).unwrap();
        assert!(index.node("/oc-if:interfaces").is_some());
        let hooks = index.module("oc-if").unwrap();
        assert_eq!(hooks.pre_transformer.as_deref(), Some("if_pre"));
    }

    #[test]
    fn table_and_validate_are_inherited() {
        let index = SchemaIndex::build(&interfaces()).unwrap();
        let mtu = index
            .node("/oc-if:interfaces/interface/config/mtu")
            .unwrap();
        assert_eq!(mtu.table, TableSource::Static("PORT".to_string()));
        assert!(!mtu.table_declared);
        assert_eq!(mtu.validate.as_deref(), Some("if_valid"));
        assert_eq!(mtu.value_type, ValueType::Uint);
        assert_eq!(mtu.key_lists, vec!["/oc-if:interfaces/interface".to_string()]);
        assert!(!mtu.cascade_delete);
    }

    #[test]
    fn field_bindings() {
        let index = SchemaIndex::build(&interfaces()).unwrap();
        let key = index.node("/oc-if:interfaces/interface/name").unwrap();
        assert_eq!(key.field, FieldBinding::ListKey);
        let desc = index
            .node("/oc-if:interfaces/interface/config/description")
            .unwrap();
        assert_eq!(desc.field, FieldBinding::Name("alias".to_string()));
        let mtu = index
            .node("/oc-if:interfaces/interface/config/mtu")
            .unwrap();
        assert_eq!(mtu.field, FieldBinding::Name("mtu".to_string()));
    }

    #[test]
    fn choice_and_case_are_flattened() {
        let index = SchemaIndex::build(&interfaces()).unwrap();
        assert!(index
            .node("/oc-if:interfaces/interface/config/flag")
            .is_some());
        assert!(index
            .node("/oc-if:interfaces/interface/config/choice-a")
            .is_none());
    }

    #[test]
    fn read_only_and_db_propagate() {
        let index = SchemaIndex::build(&interfaces()).unwrap();
        let oper = index
            .node("/oc-if:interfaces/interface/state/oper-status")
            .unwrap();
        assert!(oper.read_only);
        assert_eq!(oper.db, DbIndex::StateDb);
    }

    #[test]
    fn non_terminal_flags() {
        let index = SchemaIndex::build(&interfaces()).unwrap();
        assert!(index
            .node("/oc-if:interfaces/interface")
            .unwrap()
            .has_non_terminal);
        assert!(!index
            .node("/oc-if:interfaces/interface/config")
            .unwrap()
            .has_non_terminal);
    }

    #[test]
    fn cascade_tables_from_table_defs() {
        let index = SchemaIndex::build(&interfaces()).unwrap();
        assert!(index.is_cascade_table("PORT"));
        assert!(!index.is_cascade_table("VLAN"));
    }

    #[test]
    fn missing_list_key_is_fatal() {
        let bad = def(serde_json::json!({
            "modules": [{"name": "m", "kind": "module", "children": [
                {"name": "l", "kind": "list", "keys": ["id"], "table-name": "T",
                 "children": [{"name": "other", "kind": "leaf"}]}
            ]}]
        }));
        let err = SchemaIndex::build(&bad).unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
        assert!(err.to_string().contains("id"));
    }

    #[test]
    fn conflicting_table_bindings_are_fatal() {
        let bad = def(serde_json::json!({
            "modules": [{"name": "m", "kind": "module", "children": [
                {"name": "c", "table-name": "T", "table-transformer": "t_xfmr"}
            ]}]
        }));
        assert!(SchemaIndex::build(&bad).is_err());
    }

    #[test]
    fn nested_subtree_is_flagged() {
        let d = def(serde_json::json!({
            "modules": [{"name": "m", "kind": "module", "children": [
                {"name": "a", "subtree-transformer": "outer", "children": [
                    {"name": "b", "children": [
                        {"name": "c", "subtree-transformer": "inner", "children": []}
                    ]},
                    {"name": "d", "kind": "leaf"}
                ]},
                {"name": "e", "subtree-transformer": "solo", "children": [
                    {"name": "f", "kind": "leaf"}
                ]}
            ]}]
        }));
        let index = SchemaIndex::build(&d).unwrap();
        let a = index.node("/m:a").unwrap();
        assert!(a.subtree_declared && a.has_child_subtree);
        // The plain container between the two declarations is flagged too.
        assert!(index.node("/m:a/b").unwrap().has_child_subtree);
        assert!(!index.node("/m:a/b/c").unwrap().has_child_subtree);
        let d_leaf = index.node("/m:a/d").unwrap();
        assert_eq!(d_leaf.subtree.as_deref(), Some("outer"));
        assert!(!d_leaf.subtree_declared);
        assert!(!index.node("/m:e").unwrap().has_child_subtree);
    }

    #[test]
    fn child_lookup_tolerates_prefix() {
        let index = SchemaIndex::build(&interfaces()).unwrap();
        let list = index.node("/oc-if:interfaces/interface").unwrap();
        assert!(index.child(list, "oc-if:config").is_some());
        assert!(index.child(list, "config").is_some());
        assert_eq!(index.children(list).count(), 3);
        let config = index.child(list, "config").unwrap();
        assert_eq!(index.parent(config).unwrap().path, list.path);
    }

    #[test]
    fn node_for_instance_path() {
        let index = SchemaIndex::build(&interfaces()).unwrap();
        let p = Path::parse("/oc-if:interfaces/interface[name=Ethernet0]/config").unwrap();
        assert!(index.node_for(&p).is_ok());
        assert!(index.module_for(&p).is_some());
        let bad = Path::parse("/oc-if:interfaces/nope").unwrap();
        assert!(matches!(
            index.node_for(&bad).unwrap_err(),
            Error::Internal { .. }
        ));
    }
}
