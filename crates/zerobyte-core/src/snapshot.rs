//! Snapshot records as reported by the backup engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ancestor::find_common_ancestor;
use crate::error::{Error, Result};

/// An immutable point-in-time record produced by the backup engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Full snapshot id
    pub id: String,
    /// Abbreviated id
    pub short_id: String,
    /// Capture time
    pub time: DateTime<Utc>,
    /// Content tree reference
    pub tree: String,
    /// Absolute host paths that were backed up
    #[serde(default)]
    pub paths: Vec<String>,
    /// Source hostname
    #[serde(default)]
    pub hostname: String,
    /// Engine tags
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Snapshot {
    /// True if `id` names this snapshot by its long or short form
    pub fn matches(&self, id: &str) -> bool {
        self.id == id || self.short_id == id
    }

    /// Deepest directory shared by all recorded paths
    pub fn base_path(&self) -> String {
        find_common_ancestor(&self.paths)
    }

    /// Recorded paths, failing for snapshots that recorded nothing
    pub fn recorded_paths(&self) -> Result<&[String]> {
        if self.paths.is_empty() {
            return Err(Error::EmptySnapshot(self.short_id.clone()));
        }
        Ok(&self.paths)
    }
}
