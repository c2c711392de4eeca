//! Schema-driven translation between configuration trees and store rows.
//!
//! A `Translator` walks a request's payload alongside the compiled
//! `SchemaIndex`, resolving each instance path to its table(s), row key and
//! fields, and calling registered callbacks where the schema names them.
//! Writes come back as `OpRowMaps` plus a separate map of defaults; reads
//! come back as a `Value` tree.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use xlate_core::{path, Operation, Value};
//! use xlate_kvstore::{DbHandles, InMemoryStore};
//! use xlate_schema::{SchemaDef, SchemaIndex};
//! use xlate_transformer::{Registry, Translator, TranslatorConfig};
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
//! let translator = Translator::new(
//!     Arc::new(SchemaIndex::build(&def).unwrap()),
//!     Arc::new(Registry::new()),
//!     TranslatorConfig::default(),
//! );
//!
//! let store = InMemoryStore::new();
//! let stores = DbHandles::all(&store);
//! let result = translator
//!     .translate_write(
//!         &stores,
//!         &path!("/sys:system"),
//!         Operation::Update,
//!         &Value::from_json(serde_json::json!({"hostname": "leaf1"})),
//!     )
//!     .unwrap();
//! let rows = result.ops.get(Operation::Update).unwrap();
//! assert!(rows.contains_field("DEVICE_METADATA", "localhost", "hostname"));
//! ```

mod callbacks;
mod cascade;
mod config;
mod context;
mod defaults;
mod delete;
mod encode;
mod read;
mod replace;
mod resolver;
mod translator;
mod walk;
mod write;

pub use callbacks::{
    cascade_callback_name, Callback, CascadeParams, FieldXfmr, Invocation, KeyXfmr, Outcome,
    Registry, SubtreeWrite, SubtreeXfmr, TableXfmrOutput, TxCache, XfmrParams,
};
pub use config::TranslatorConfig;
pub use context::{Accumulator, RequestCache, RequestContext};
pub use encode::{decode_field, default_value, encode_leaf};
pub use read::{Content, QueryOptions};
pub use resolver::{
    clear_table_memo, is_table_owner, resolve, resolve_key, split_key, TableBinding, VIRTUAL_TABLE,
};
pub use translator::{Translator, WriteResult};
