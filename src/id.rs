//! Object id space and flash locations.
//!
//! A single 32-bit id space is shared by every object on flash; the range an
//! id falls in tells directories, files and data blocks apart.

use serde::{Deserialize, Serialize};

pub const ID_DIR_MIN:   u32 = 0;
pub const ID_DIR_MAX:   u32 = 0x1000_0000;
pub const ID_FILE_MIN:  u32 = 0x1000_0000;
pub const ID_FILE_MAX:  u32 = 0x8000_0000;
pub const ID_BLOCK_MIN: u32 = 0x8000_0000;
pub const ID_BLOCK_MAX: u32 = 0xffff_ffff;

pub const ID_ROOT_DIR: u32 = 0;
/// "No object": no parent, no predecessor block.
pub const ID_NONE:     u32 = 0xffff_ffff;

pub fn is_dir(id: u32) -> bool {
    (ID_DIR_MIN..ID_DIR_MAX).contains(&id)
}

pub fn is_file(id: u32) -> bool {
    (ID_FILE_MIN..ID_FILE_MAX).contains(&id)
}

pub fn is_inode(id: u32) -> bool {
    is_dir(id) || is_file(id)
}

pub fn is_block(id: u32) -> bool {
    (ID_BLOCK_MIN..ID_BLOCK_MAX).contains(&id)
}

/// Where a record lives: area index plus byte offset inside that area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlashLoc {
    pub area_idx: u8,
    pub offset:   u32,
}

impl FlashLoc {
    pub fn new(area_idx: u8, offset: u32) -> Self {
        Self { area_idx, offset }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_are_disjoint() {
        assert!(is_dir(ID_ROOT_DIR));
        assert!(!is_file(ID_ROOT_DIR));
        assert!(is_file(ID_FILE_MIN) && !is_dir(ID_FILE_MIN));
        assert!(is_block(ID_BLOCK_MIN) && !is_inode(ID_BLOCK_MIN));
        assert!(!is_block(ID_NONE));
        assert!(!is_inode(ID_NONE));
    }
}
