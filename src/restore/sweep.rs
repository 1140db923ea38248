//! Consistency sweep.
//!
//! Visits every inode once, in ascending id order:
//!
//! 1. A dummy directory with children gets its children moved into
//!    `/lost+found/<id in hex>` before anything else happens to it.
//! 2. The inode is deleted if it is a dummy, if it is not the root and no
//!    surviving parent claims it, or if it is a file whose block chain fails
//!    validation.
//!
//! Deleting a directory takes its remaining subtree with it; deleting a file
//! drops whatever part of its block chain is still indexed.  Corruption in
//! one inode never fails the sweep; flash and pool errors do.  Last, every
//! block that no surviving file reaches by walking back from its tail is
//! dropped, which also covers blocks of unrelated chains that lost the
//! file-end tie-break.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::RestoreSession;
use crate::error::{FsError, Result};
use crate::flash::Flash;
use crate::id;
use crate::index::Handle;

impl<F: Flash> RestoreSession<'_, F> {
    pub(super) fn sweep(&mut self) -> Result<()> {
        for inode_id in self.fs.index.inode_ids() {
            // Already gone with an earlier subtree.
            let Some(handle) = self.fs.index.find_inode(inode_id) else { continue };

            self.migrate_orphan_children(handle)?;

            if let Some(reason) = self.should_sweep(handle)? {
                info!("sweeping inode {:#x}: {}", inode_id, reason);
                self.unlink_corrupt_ok(handle)?;
            }
        }
        self.drop_unreachable_blocks()
    }

    /// Moves the children of a dummy directory into lost+found.
    fn migrate_orphan_children(&mut self, handle: Handle) -> Result<()> {
        let (dir_id, children) = match self.fs.index.inode(handle) {
            Some(inode) if id::is_dir(inode.id) && inode.is_dummy() && !inode.children.is_empty() => {
                (inode.id, inode.children.clone())
            }
            _ => return Ok(()),
        };

        let lost_found = self
            .fs
            .lost_found_dir
            .ok_or_else(|| FsError::corrupt("no lost+found directory"))?;
        let sub_name = format!("{dir_id:x}");
        let sub = match self.fs.find_child(self.flash, lost_found, &sub_name)? {
            Some(sub) if self.fs.index.inode(sub).is_some_and(|s| id::is_dir(s.id)) => sub,
            _ => self.new_dir(lost_found, &sub_name)?,
        };

        warn!(
            "directory {:#x} was never restored; moving {} children to /{}/{}",
            dir_id,
            children.len(),
            super::LOST_FOUND_NAME,
            sub_name
        );
        for child in children {
            self.rename(child, sub)?;
        }
        Ok(())
    }

    /// Why `handle` should go, or `None` to keep it.
    fn should_sweep(&mut self, handle: Handle) -> Result<Option<&'static str>> {
        let Some(inode) = self.fs.index.inode(handle) else { return Ok(None) };
        let inode_id = inode.id;
        let last_block = inode.last_block;

        if inode.is_dummy() {
            return Ok(Some("never restored"));
        }
        if inode_id != id::ID_ROOT_DIR && self.fs.index.parent_of(handle).is_none() {
            return Ok(Some("no parent"));
        }
        if id::is_file(inode_id) {
            match self.validate_block_chain(inode_id, last_block) {
                Ok(()) => {}
                Err(FsError::Corrupt(reason)) => {
                    debug!("file {:#x}: {}", inode_id, reason);
                    return Ok(Some("corrupt block chain"));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Re-reads every block from the tail back to the head.
    fn validate_block_chain(&mut self, inode_id: u32, last_block: Option<Handle>) -> Result<()> {
        let mut cur = last_block;
        let mut steps = 0usize;
        while let Some(handle) = cur {
            steps += 1;
            if steps > self.fs.index.block_count() {
                return Err(FsError::corrupt("block chain loops"));
            }
            let block = *self
                .fs
                .index
                .block(handle)
                .ok_or_else(|| FsError::corrupt("dangling block handle"))?;
            let area = self.fs.area(block.loc.area_idx)?;
            let disk = match self.fs.read_block_at(self.flash, block.loc) {
                Err(FsError::Offset) => return Err(FsError::corrupt("block runs past area end")),
                other => other?,
            };
            if disk.id != block.id || disk.inode_id != inode_id {
                return Err(FsError::corrupt(format!("block {:#x} does not belong here", block.id)));
            }
            match disk.validate(self.flash, area, block.loc.offset) {
                Err(FsError::Offset) => return Err(FsError::corrupt("block payload truncated")),
                other => other?,
            }
            if disk.prev_id == id::ID_NONE {
                break;
            }
            cur = Some(
                self.fs
                    .index
                    .find_block(disk.prev_id)
                    .ok_or_else(|| FsError::corrupt(format!("missing block {:#x}", disk.prev_id)))?,
            );
        }
        Ok(())
    }

    /// Deletes an inode and everything below it, tolerating blocks that are
    /// already missing.
    fn unlink_corrupt_ok(&mut self, handle: Handle) -> Result<()> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![handle];
        while let Some(h) = stack.pop() {
            if !seen.insert(h) {
                continue;
            }
            if let Some(inode) = self.fs.index.inode(h) {
                stack.extend(inode.children.iter().copied());
                order.push(h);
            }
        }

        for h in order.into_iter().rev() {
            let last_block = self.fs.index.inode(h).and_then(|i| i.last_block);
            self.drop_block_chain(last_block)?;
            if let Some(inode) = self.fs.index.inode(h) {
                debug!("removing inode {:#x}", inode.id);
            }
            self.fs.index.remove(h);
        }
        Ok(())
    }

    fn drop_block_chain(&mut self, last_block: Option<Handle>) -> Result<()> {
        let mut cur = last_block;
        while let Some(handle) = cur {
            let Some(block) = self.fs.index.block(handle).copied() else { break };
            cur = match self.fs.read_block_at(self.flash, block.loc) {
                Ok(disk) => self.fs.index.find_block(disk.prev_id),
                Err(FsError::Corrupt(_)) | Err(FsError::Offset) => {
                    debug!("block {:#x} unreadable; chain ends here", block.id);
                    None
                }
                Err(e) => return Err(e),
            };
            self.fs.index.remove(handle);
        }
        Ok(())
    }

    fn drop_unreachable_blocks(&mut self) -> Result<()> {
        let mut reachable = HashSet::new();
        for inode_id in self.fs.index.inode_ids() {
            if !id::is_file(inode_id) {
                continue;
            }
            let Some(file) = self.fs.index.find_inode(inode_id) else { continue };
            match self.fs.file_blocks(self.flash, file) {
                Ok(ids) => reachable.extend(ids),
                Err(FsError::Corrupt(_)) | Err(FsError::Offset) => {}
                Err(e) => return Err(e),
            }
        }

        for (block_id, handle) in self.fs.index.block_handles() {
            if !reachable.contains(&block_id) {
                debug!("dropping unreachable block {:#x}", block_id);
                self.fs.index.remove(handle);
            }
        }
        Ok(())
    }
}
