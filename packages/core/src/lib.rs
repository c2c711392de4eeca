//! Core types shared by every layer of the translator:
//! - `Path`: an instance path into the configuration tree, with list key predicates
//! - `Value`: the payload tree handed in by writes and produced by reads
//! - `RowMap`/`OpRowMaps`: table -> key -> field -> value maps exchanged with the store
//! - `Error`: the error kinds surfaced to front ends
//!
//! # Example
//!
//! ```rust
//! use xlate_core::{path, Operation, Path, RowMap};
//!
//! let p = path!("/openconfig-interfaces:interfaces/interface[name=Ethernet0]/config/mtu");
//! assert_eq!(p.schema_path(), "/openconfig-interfaces:interfaces/interface/config/mtu");
//!
//! let mut rows = RowMap::new();
//! rows.insert_field("PORT", "Ethernet0", "mtu", "9100");
//! assert!(rows.contains_field("PORT", "Ethernet0", "mtu"));
//! # let _ = Operation::Create;
//! ```

mod db;
mod error;
mod path;
mod path_trie;
mod rowmap;
mod value;

pub use db::{DbIndex, Operation};
pub use error::Error;
pub use path::{local_name, Component, Path, PathError};
pub use path_trie::PathTrie;
pub use rowmap::{
    join_list, split_list, Fields, OpRowMaps, RowMap, FILL_FIELDS, LEAF_LIST_SUFFIX, NULL_FIELD,
};
pub use value::Value;
