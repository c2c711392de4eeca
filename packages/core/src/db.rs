//! Logical databases and request operations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which logical database a table lives in.
#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum DbIndex {
    ApplDb,
    AsicDb,
    CountersDb,
    #[default]
    ConfigDb,
    StateDb,
}

impl fmt::Display for DbIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DbIndex::ApplDb => "APPL_DB",
            DbIndex::AsicDb => "ASIC_DB",
            DbIndex::CountersDb => "COUNTERS_DB",
            DbIndex::ConfigDb => "CONFIG_DB",
            DbIndex::StateDb => "STATE_DB",
        };
        write!(f, "{}", name)
    }
}

/// The operation a request or a result row map carries.
///
/// The ordering is significant: `OpRowMaps` iterates operations in this
/// order, which is also the order a replace result is consulted in.
#[derive(
    Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Replace,
    Update,
    Create,
    Delete,
    Get,
}

impl Operation {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Operation::Create | Operation::Update | Operation::Replace
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Replace => "REPLACE",
            Operation::Delete => "DELETE",
            Operation::Get => "GET",
        };
        write!(f, "{}", name)
    }
}
