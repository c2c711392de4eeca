//! The store boundary of the translator.
//!
//! The translator never touches storage directly: it reads rows through
//! `KvStore`, discovers dependent rows through a `ValidationSession`, and
//! hands `OpRowMaps` back to the caller. `InMemoryStore` implements the
//! boundary for tests and for front ends without a transactional client.
//!
//! # Example
//!
//! ```rust
//! use xlate_core::{Fields, OpRowMaps, Operation};
//! use xlate_kvstore::{commit, InMemoryStore, KvStore};
//!
//! let mut store = InMemoryStore::new();
//! let mut ops = OpRowMaps::new();
//! ops.entry(Operation::Create).insert_field("PORT", "Ethernet0", "mtu", "9100");
//! commit(&mut store, &ops).unwrap();
//!
//! let row: Fields = store.get_entry("PORT", "Ethernet0").unwrap().unwrap();
//! assert_eq!(row["mtu"], "9100");
//! ```

mod commit;
mod handles;
mod in_memory;
mod traits;

pub use commit::commit;
pub use handles::DbHandles;
pub use in_memory::{Dependency, InMemoryStore};
pub use traits::{DependentRow, KvStore, ValidationSession};
