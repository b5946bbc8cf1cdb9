//! Explicit soft-delete lifecycle shared by every tenant entity.

use serde::{Deserialize, Serialize};

/// Whether a record is part of the active data set.
///
/// Deleted records keep their history but are invisible to active queries,
/// statistics and mutating operations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    #[default]
    Active,
    Deleted,
}

impl Lifecycle {
    pub fn is_active(self) -> bool {
        matches!(self, Lifecycle::Active)
    }

    pub fn is_deleted(self) -> bool {
        !self.is_active()
    }
}
