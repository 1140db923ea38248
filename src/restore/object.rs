//! Inode and block restorers.
//!
//! Records can arrive in any order: a child before its parent, a block
//! before its file, an old version after a newer one.  Unknown parents and
//! owners get dummy entries that a later record promotes; among records
//! sharing an id the highest sequence number wins.

use tracing::{debug, trace};

use super::RestoreSession;
use crate::error::{FsError, Result};
use crate::flash::Flash;
use crate::id::{self, FlashLoc};
use crate::index::{BlockEntry, Handle, InodeEntry, InodeState};
use crate::object::{DiskBlock, DiskInode};

impl<F: Flash> RestoreSession<'_, F> {
    // ── Inodes ───────────────────────────────────────────────────────────────

    pub(super) fn restore_inode(&mut self, disk: &DiskInode, loc: FlashLoc) -> Result<()> {
        let parent_ok = disk.parent_id == id::ID_NONE
            || (id::is_dir(disk.parent_id) && disk.parent_id != disk.id);
        if !id::is_inode(disk.id) || !parent_ok {
            debug!("discarding inode record with bad ids at {:?}", loc);
            return Ok(());
        }
        let area = self.fs.area(loc.area_idx)?;
        if !checksum_ok(disk.validate(self.flash, area, loc.offset))? {
            debug!("discarding corrupt inode {:#x} at {:?}", disk.id, loc);
            return Ok(());
        }

        self.bump_inode_counter(disk.id);

        let (handle, is_new) = match self.fs.index.find_inode(disk.id) {
            Some(handle) => {
                if !self.inode_gets_replaced(handle, disk, loc)? {
                    trace!("inode {:#x} seq {} is stale", disk.id, disk.seq);
                    return Ok(());
                }
                self.fs.index.detach(handle);
                (handle, false)
            }
            None => (self.fs.index.insert_inode(InodeEntry::dummy(disk.id))?, true),
        };

        if let Err(e) = self.attach_inode(handle, disk, loc) {
            if is_new {
                self.fs.index.remove(handle);
            }
            return Err(e);
        }
        debug!(
            "restored {} {:#x} seq={} parent={:#x}",
            if id::is_file(disk.id) { "file" } else { "dir" },
            disk.id,
            disk.seq,
            disk.parent_id
        );
        Ok(())
    }

    /// A dummy is always replaced; a real inode only by a higher sequence.
    fn inode_gets_replaced(&mut self, handle: Handle, disk: &DiskInode, loc: FlashLoc) -> Result<bool> {
        let old_loc = match self.fs.index.inode(handle).map(|i| i.state) {
            Some(InodeState::Real { loc }) => loc,
            _ => return Ok(true),
        };
        let old = self.fs.read_inode_at(self.flash, old_loc)?;

        if old.seq < disk.seq {
            Ok(true)
        } else if old.seq == disk.seq {
            if self.tolerate_copy(old_loc, loc, old == *disk) {
                Ok(false)
            } else {
                Err(FsError::corrupt(format!(
                    "duplicate inode {:#x} seq {} at {:?} and {:?}",
                    disk.id, disk.seq, old_loc, loc
                )))
            }
        } else {
            Ok(false)
        }
    }

    fn attach_inode(&mut self, handle: Handle, disk: &DiskInode, loc: FlashLoc) -> Result<()> {
        if let Some(inode) = self.fs.index.inode_mut(handle) {
            inode.state = InodeState::Real { loc };
        }

        if disk.parent_id != id::ID_NONE {
            let parent = match self.fs.index.find_inode(disk.parent_id) {
                Some(parent) => parent,
                None => {
                    trace!("creating dummy parent {:#x}", disk.parent_id);
                    self.fs.index.insert_inode(InodeEntry::dummy(disk.parent_id))?
                }
            };
            self.fs.index.attach(parent, handle);
        }

        if disk.id == id::ID_ROOT_DIR {
            self.fs.root_dir = Some(handle);
        }
        Ok(())
    }

    fn bump_inode_counter(&mut self, inode_id: u32) {
        if id::is_file(inode_id) {
            if inode_id >= self.fs.next_file_id {
                self.fs.next_file_id = inode_id + 1;
            }
        } else if inode_id >= self.fs.next_dir_id {
            self.fs.next_dir_id = inode_id + 1;
        }
    }

    // ── Blocks ───────────────────────────────────────────────────────────────

    pub(super) fn restore_block(&mut self, disk: &DiskBlock, loc: FlashLoc) -> Result<()> {
        if !id::is_block(disk.id) || !id::is_file(disk.inode_id) {
            debug!("discarding block record with bad ids at {:?}", loc);
            return Ok(());
        }
        let area = self.fs.area(loc.area_idx)?;
        if !checksum_ok(disk.validate(self.flash, area, loc.offset))? {
            debug!("discarding corrupt block {:#x} at {:?}", disk.id, loc);
            return Ok(());
        }

        if let Some(old) = self.fs.index.find_block(disk.id) {
            let old_loc = self
                .fs
                .index
                .block(old)
                .map(|b| b.loc)
                .ok_or(FsError::NotFound)?;
            let old_disk = self.fs.read_block_at(self.flash, old_loc)?;

            if old_disk.seq > disk.seq {
                trace!("block {:#x} seq {} is stale", disk.id, disk.seq);
                return Ok(());
            }
            if old_disk.seq == disk.seq {
                if self.tolerate_copy(old_loc, loc, old_disk == *disk) {
                    return Ok(());
                }
                return Err(FsError::corrupt(format!(
                    "duplicate block {:#x} seq {} at {:?} and {:?}",
                    disk.id, disk.seq, old_loc, loc
                )));
            }
            trace!("block {:#x} superseded by seq {}", disk.id, disk.seq);
            self.fs.index.remove(old);
        }

        let handle = self.fs.index.insert_block(BlockEntry { id: disk.id, loc })?;

        if disk.id >= self.fs.next_block_id {
            self.fs.next_block_id = disk.id + 1;
        }
        if disk.data_len > self.largest_block_data_len {
            self.largest_block_data_len = disk.data_len;
        }

        if self.fs.index.find_inode(disk.inode_id).is_none() {
            trace!("creating dummy owner {:#x}", disk.inode_id);
            if let Err(e) = self.fs.index.insert_inode(InodeEntry::dummy(disk.inode_id)) {
                self.fs.index.remove(handle);
                return Err(e);
            }
        }

        debug!(
            "restored block {:#x} seq={} inode={:#x} prev={:#x} len={}",
            disk.id, disk.seq, disk.inode_id, disk.prev_id, disk.data_len
        );
        Ok(())
    }

    /// Two records with the same id and sequence are legitimate only when one
    /// is the other re-read, or when they are identical and sit in two areas
    /// carrying the same area id: the source and destination of an
    /// unfinished garbage collection.  Such area pairs are remembered so the
    /// scratch repair can confirm it reclaims exactly that pair.
    fn tolerate_copy(&mut self, old: FlashLoc, new: FlashLoc, same_record: bool) -> bool {
        if old == new {
            return true;
        }
        let areas = &self.fs.areas;
        let shared_area_id = match (areas.get(old.area_idx as usize), areas.get(new.area_idx as usize)) {
            (Some(a), Some(b)) => old.area_idx != new.area_idx && a.id == b.id,
            _ => false,
        };
        if !shared_area_id || !same_record {
            return false;
        }
        trace!("copy of an object in areas {} and {}", old.area_idx, new.area_idx);
        self.gc_copies
            .insert((old.area_idx.min(new.area_idx), old.area_idx.max(new.area_idx)));
        true
    }
}

/// Folds a checksum verdict: bad or torn records are `false`, hardware
/// failures propagate.
fn checksum_ok(result: Result<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(FsError::Corrupt(_)) | Err(FsError::Offset) => Ok(false),
        Err(e) => Err(e),
    }
}
