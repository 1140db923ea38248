use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FsError, Result};

/// Sizing for one restore run.
///
/// The pools are fixed for the lifetime of a mount: running out of inode or
/// block slots is reported as [`FsError::NoMem`], never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Upper bound on area descriptors accepted by `restore`.
    pub max_areas:          usize,
    pub max_inodes:         usize,
    pub max_blocks:         usize,
    /// Ceiling for the block payload limit computed after restore.
    pub max_block_data_len: u16,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            max_areas:          256,
            max_inodes:         1024,
            max_blocks:         4096,
            max_block_data_len: 2048,
        }
    }
}

impl RestoreConfig {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| FsError::Invalid(format!("config: {e}")))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = RestoreConfig::from_bytes(br#"{ "max_inodes": 8 }"#).unwrap();
        assert_eq!(cfg.max_inodes, 8);
        assert_eq!(cfg.max_blocks, RestoreConfig::default().max_blocks);
    }

    #[test]
    fn malformed_json_is_invalid() {
        assert!(matches!(RestoreConfig::from_bytes(b"{"), Err(FsError::Invalid(_))));
    }
}
