//! The restored file system state handed to the caller after a mount.

use serde::Serialize;

use crate::area::Area;
use crate::error::{FsError, Result};
use crate::flash::Flash;
use crate::id::{self, FlashLoc};
use crate::index::{Handle, Index};
use crate::object::{DiskBlock, DiskInode};

#[derive(Debug, Clone)]
pub struct FileSystem {
    pub areas:              Vec<Area>,
    pub scratch_area_idx:   Option<u8>,
    pub index:              Index,
    pub root_dir:           Option<Handle>,
    pub lost_found_dir:     Option<Handle>,
    pub next_dir_id:        u32,
    pub next_file_id:       u32,
    pub next_block_id:      u32,
    /// Largest payload a new data block may carry.
    pub max_block_data_len: u16,
}

/// Counters worth printing after a mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FsSummary {
    pub areas:              usize,
    pub scratch_area_idx:   Option<u8>,
    pub inodes:             usize,
    pub blocks:             usize,
    pub next_dir_id:        u32,
    pub next_file_id:       u32,
    pub next_block_id:      u32,
    pub max_block_data_len: u16,
    pub fingerprint:        String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub id:     u32,
    pub name:   String,
    pub is_dir: bool,
    /// Total data bytes for files; 0 for directories.
    pub len:    u64,
}

impl FileSystem {
    pub fn new(max_inodes: usize, max_blocks: usize) -> Self {
        Self {
            areas:              Vec::new(),
            scratch_area_idx:   None,
            index:              Index::new(max_inodes, max_blocks),
            root_dir:           None,
            lost_found_dir:     None,
            next_dir_id:        id::ID_DIR_MIN,
            next_file_id:       id::ID_FILE_MIN,
            next_block_id:      id::ID_BLOCK_MIN,
            max_block_data_len: 0,
        }
    }

    pub fn area(&self, area_idx: u8) -> Result<&Area> {
        self.areas
            .get(area_idx as usize)
            .ok_or_else(|| FsError::corrupt(format!("no area {area_idx}")))
    }

    pub fn root(&self) -> Result<Handle> {
        self.root_dir.ok_or_else(|| FsError::corrupt("no root directory"))
    }

    pub fn summary(&self) -> FsSummary {
        FsSummary {
            areas:              self.areas.len(),
            scratch_area_idx:   self.scratch_area_idx,
            inodes:             self.index.inode_count(),
            blocks:             self.index.block_count(),
            next_dir_id:        self.next_dir_id,
            next_file_id:       self.next_file_id,
            next_block_id:      self.next_block_id,
            max_block_data_len: self.max_block_data_len,
            fingerprint:        hex::encode(self.index.fingerprint()),
        }
    }

    // ── Flash-backed reads ───────────────────────────────────────────────────

    pub fn read_inode_at<F: Flash>(&self, flash: &mut F, loc: FlashLoc) -> Result<DiskInode> {
        DiskInode::read_at(flash, self.area(loc.area_idx)?, loc.offset)
    }

    pub fn read_block_at<F: Flash>(&self, flash: &mut F, loc: FlashLoc) -> Result<DiskBlock> {
        DiskBlock::read_at(flash, self.area(loc.area_idx)?, loc.offset)
    }

    /// The on-flash record behind a real inode, with its filename.
    pub fn read_inode<F: Flash>(&self, flash: &mut F, handle: Handle) -> Result<(DiskInode, Vec<u8>)> {
        let loc = self
            .index
            .inode(handle)
            .and_then(|i| i.loc())
            .ok_or_else(|| FsError::corrupt("inode has no record on flash"))?;
        let area = self.area(loc.area_idx)?;
        let disk = DiskInode::read_at(flash, area, loc.offset)?;
        let name = disk.read_filename(flash, area, loc.offset)?;
        Ok((disk, name))
    }

    pub fn name_of<F: Flash>(&self, flash: &mut F, handle: Handle) -> Result<String> {
        let (_, name) = self.read_inode(flash, handle)?;
        Ok(String::from_utf8_lossy(&name).into_owned())
    }

    /// Child of `dir` called `name`, ignoring children that are still dummies.
    pub fn find_child<F: Flash>(&self, flash: &mut F, dir: Handle, name: &str) -> Result<Option<Handle>> {
        let children = match self.index.inode(dir) {
            Some(inode) => inode.children.clone(),
            None => return Ok(None),
        };
        for child in children {
            let is_real = self.index.inode(child).is_some_and(|c| !c.is_dummy());
            if is_real && self.name_of(flash, child)? == name {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    /// Block ids of a file, head first.
    pub fn file_blocks<F: Flash>(&self, flash: &mut F, file: Handle) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        let mut cur = self.index.inode(file).and_then(|i| i.last_block);
        while let Some(h) = cur {
            let block = self
                .index
                .block(h)
                .ok_or_else(|| FsError::corrupt("dangling block handle"))?;
            if ids.len() > self.index.block_count() {
                return Err(FsError::corrupt(format!("block chain loops at {:#x}", block.id)));
            }
            ids.push(block.id);
            let disk = self.read_block_at(flash, block.loc)?;
            cur = self.index.find_block(disk.prev_id);
        }
        ids.reverse();
        Ok(ids)
    }

    pub fn file_len<F: Flash>(&self, flash: &mut F, file: Handle) -> Result<u64> {
        let mut len = 0u64;
        for block_id in self.file_blocks(flash, file)? {
            if let Some(h) = self.index.find_block(block_id) {
                let loc = self.index.block(h).map(|b| b.loc).ok_or(FsError::NotFound)?;
                len += self.read_block_at(flash, loc)?.data_len as u64;
            }
        }
        Ok(len)
    }

    pub fn list_dir<F: Flash>(&self, flash: &mut F, dir: Handle) -> Result<Vec<DirEntry>> {
        let children = self.index.inode(dir).map(|i| i.children.clone()).unwrap_or_default();
        let mut out = Vec::with_capacity(children.len());
        for child in children {
            let Some(inode) = self.index.inode(child) else { continue };
            let id = inode.id;
            let is_dir = id::is_dir(id);
            let len = if is_dir { 0 } else { self.file_len(flash, child)? };
            out.push(DirEntry { id, name: self.name_of(flash, child)?, is_dir, len });
        }
        Ok(out)
    }

    /// Looks up an absolute `/`-separated path.
    pub fn lookup<F: Flash>(&self, flash: &mut F, path: &str) -> Result<Handle> {
        let mut cur = self.root()?;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            cur = self.find_child(flash, cur, part)?.ok_or(FsError::NotFound)?;
        }
        Ok(cur)
    }
}
