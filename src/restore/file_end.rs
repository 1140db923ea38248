//! File-end resolution: find the tail of every file's block chain.
//!
//! Each block is compared against its owner's current tail by walking the
//! block's predecessor chain on flash.  That is O(file length) per block;
//! files here are small, so the walk stays linear and uncached.

use tracing::{debug, trace};

use super::RestoreSession;
use crate::error::{FsError, Result};
use crate::flash::Flash;
use crate::id;
use crate::index::Handle;

impl<F: Flash> RestoreSession<'_, F> {
    pub(super) fn resolve_file_ends(&mut self) -> Result<()> {
        for (block_id, handle) in self.fs.index.block_handles() {
            self.resolve_file_end_block(block_id, handle)?;
        }
        Ok(())
    }

    /// Makes `handle` its owner's last block if it comes after the current
    /// one.  Blocks are visited in ascending id order; when two intact chains
    /// never meet, the block visited first stays.  A block whose own chain is
    /// broken takes over unless it is an ancestor of the current tail, so
    /// the sweep walks into the break.
    fn resolve_file_end_block(&mut self, block_id: u32, handle: Handle) -> Result<()> {
        let loc = self
            .fs
            .index
            .block(handle)
            .map(|b| b.loc)
            .ok_or(FsError::NotFound)?;
        let owner_id = self.fs.read_block_at(self.flash, loc)?.inode_id;
        let Some(owner) = self.fs.index.find_inode(owner_id) else {
            trace!("block {:#x} has no owner {:#x}", block_id, owner_id);
            return Ok(());
        };

        let current = self
            .fs
            .index
            .inode(owner)
            .and_then(|i| i.last_block)
            .and_then(|h| self.fs.index.block(h).map(|b| b.id));

        let replace = match current {
            None => {
                debug!("setting last block of {:#x}: {:#x}", owner_id, block_id);
                true
            }
            Some(current_id) => match self.find_predecessor(handle, current_id) {
                Ok(true) => {
                    debug!(
                        "replacing last block of {:#x}: {:#x} --> {:#x}",
                        owner_id, current_id, block_id
                    );
                    true
                }
                Ok(false) => false,
                Err(FsError::Corrupt(reason)) => {
                    trace!("chain of {:#x} is broken: {}", block_id, reason);
                    let current = self.fs.index.find_block(current_id).ok_or(FsError::NotFound)?;
                    match self.find_predecessor(current, block_id) {
                        Ok(true) => false,
                        Ok(false) | Err(FsError::Corrupt(_)) => true,
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            },
        };

        if replace {
            if let Some(inode) = self.fs.index.inode_mut(owner) {
                inode.last_block = Some(handle);
            }
        }
        Ok(())
    }

    /// Walks back from `start` looking for `sought_id`.
    ///
    /// A predecessor id missing from the index is `Corrupt`; reaching the
    /// head of the chain is `Ok(false)`.
    pub(super) fn find_predecessor(&mut self, start: Handle, sought_id: u32) -> Result<bool> {
        let mut cur = start;
        for _ in 0..=self.fs.index.block_count() {
            let loc = self
                .fs
                .index
                .block(cur)
                .map(|b| b.loc)
                .ok_or_else(|| FsError::corrupt("dangling block handle"))?;
            let prev_id = self.fs.read_block_at(self.flash, loc)?.prev_id;
            if prev_id == sought_id {
                return Ok(true);
            }
            if prev_id == id::ID_NONE {
                return Ok(false);
            }
            cur = self
                .fs
                .index
                .find_block(prev_id)
                .ok_or_else(|| FsError::corrupt(format!("missing predecessor {prev_id:#x}")))?;
        }
        Err(FsError::corrupt("block chain loops"))
    }
}
