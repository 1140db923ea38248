//! The few writes a restore makes: creating `/lost+found` and its
//! per-directory subfolders, and re-parenting orphans into them.
//!
//! Records are appended at the write cursor of the data area with the most
//! room left; the scratch area is never written here.

use tracing::{debug, info};

use super::{RestoreSession, LOST_FOUND_NAME};
use crate::error::{FsError, Result};
use crate::flash::Flash;
use crate::id::{self, FlashLoc};
use crate::index::{Handle, InodeEntry, InodeState};
use crate::object::encode_inode;

impl<F: Flash> RestoreSession<'_, F> {
    /// Finds `/lost+found`, creating it if the image has none.
    pub(super) fn ensure_lost_found(&mut self) -> Result<()> {
        let root = self.fs.root()?;
        let dir = match self.fs.find_child(self.flash, root, LOST_FOUND_NAME)? {
            Some(h) if self.fs.index.inode(h).is_some_and(|i| id::is_dir(i.id)) => h,
            _ => {
                info!("creating /{}", LOST_FOUND_NAME);
                self.new_dir(root, LOST_FOUND_NAME)?
            }
        };
        self.fs.lost_found_dir = Some(dir);
        Ok(())
    }

    /// Writes a new, empty directory under `parent`.
    pub(super) fn new_dir(&mut self, parent: Handle, name: &str) -> Result<Handle> {
        let parent_id = self.fs.index.inode(parent).map(|p| p.id).ok_or(FsError::NotFound)?;
        let dir_id = self.fs.next_dir_id;
        if !id::is_dir(dir_id) {
            return Err(FsError::Full);
        }

        let handle = self.fs.index.insert_inode(InodeEntry::dummy(dir_id))?;
        let loc = match self.append_inode(dir_id, 0, parent_id, name.as_bytes()) {
            Ok(loc) => loc,
            Err(e) => {
                self.fs.index.remove(handle);
                return Err(e);
            }
        };
        if let Some(inode) = self.fs.index.inode_mut(handle) {
            inode.state = InodeState::Real { loc };
        }
        self.fs.next_dir_id += 1;
        self.fs.index.attach(parent, handle);
        debug!("new directory {:#x} {:?} under {:#x}", dir_id, name, parent_id);
        Ok(handle)
    }

    /// Moves `child` under `new_parent`.
    ///
    /// A real inode is rewritten with the next sequence number so the move
    /// survives the next mount; a dummy only moves in memory.
    pub(super) fn rename(&mut self, child: Handle, new_parent: Handle) -> Result<()> {
        let is_dummy = self.fs.index.inode(child).map(|c| c.is_dummy()).ok_or(FsError::NotFound)?;
        if !is_dummy {
            let parent_id = self.fs.index.inode(new_parent).map(|p| p.id).ok_or(FsError::NotFound)?;
            let (disk, name) = self.fs.read_inode(self.flash, child)?;
            let seq = disk.seq.wrapping_add(1);
            let loc = self.append_inode(disk.id, seq, parent_id, &name)?;
            if let Some(inode) = self.fs.index.inode_mut(child) {
                inode.state = InodeState::Real { loc };
            }
            debug!("moved {:#x} under {:#x} (seq {})", disk.id, parent_id, seq);
        }
        self.fs.index.attach(new_parent, child);
        Ok(())
    }

    fn append_inode(&mut self, inode_id: u32, seq: u32, parent_id: u32, name: &[u8]) -> Result<FlashLoc> {
        let record = encode_inode(inode_id, seq, parent_id, name);
        let len = record.len() as u32;

        let area_idx = self
            .fs
            .areas
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.is_scratch() && a.free_space() >= len)
            .max_by_key(|&(idx, a)| (a.free_space(), std::cmp::Reverse(idx)))
            .map(|(idx, _)| idx)
            .ok_or(FsError::Full)?;

        let area = &mut self.fs.areas[area_idx];
        let offset = area.cur;
        area.write(self.flash, offset, &record)?;
        area.cur += len;
        Ok(FlashLoc::new(area_idx as u8, offset))
    }
}
