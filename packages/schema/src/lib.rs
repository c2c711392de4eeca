//! Schema definitions and the compiled schema index.
//!
//! A `SchemaDef` is the annotated schema as handed over by the schema
//! loader: a tree of `NodeDef`s carrying table/key/field bindings and
//! callback names, plus the `TableDef`s describing the store side. The
//! `SchemaIndex` compiles it once into an arena of `SchemaNode`s keyed by
//! schema path, with every inherited attribute already resolved.
//!
//! # Example
//!
//! ```rust
//! use xlate_schema::{SchemaDef, SchemaIndex, TableSource};
//!
//! let def = SchemaDef::from_json(serde_json::json!({
//!     "modules": [{
//!         "name": "sys",
//!         "kind": "module",
//!         "children": [{
//!             "name": "system",
//!             "table-name": "DEVICE_METADATA",
//!             "key-name": "localhost",
//!             "children": [{ "name": "hostname", "kind": "leaf" }]
//!         }]
//!     }]
//! }))
//! .unwrap();
//!
//! let index = SchemaIndex::build(&def).unwrap();
//! let node = index.node("/sys:system/hostname").unwrap();
//! assert_eq!(node.table, TableSource::Static("DEVICE_METADATA".to_string()));
//! ```

mod def;
mod index;
mod node;

pub use def::{Annotations, FieldDef, NodeDef, NodeKind, SchemaDef, TableDef, ValueType};
pub use index::{build_once, ModuleHooks, SchemaIndex};
pub use node::{FieldBinding, Ownership, SchemaNode, TableSource};
