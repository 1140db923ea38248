//! Recovery from a garbage-collection cycle that never finished.
//!
//! GC copies the live contents of a source area into the scratch area,
//! which takes over the source's area id and the next gc sequence.  Power
//! lost in between leaves two areas with one id and no scratch area.  The
//! source still holds everything, so its copy wins: objects restored from
//! the destination are dropped, the source is scanned again, and the
//! destination is reformatted as the new scratch area.

use tracing::{debug, info};

use super::RestoreSession;
use crate::error::{FsError, Result};
use crate::flash::Flash;
use crate::index::{Entry, InodeState};

impl<F: Flash> RestoreSession<'_, F> {
    pub(super) fn repair_scratch(&mut self) -> Result<()> {
        let (good, bad) = self.find_corrupt_scratch().ok_or(FsError::NotFound)?;
        let pair = (good.min(bad), good.max(bad));
        if let Some(&(a, b)) = self.gc_copies.iter().find(|&&p| p != pair) {
            return Err(FsError::corrupt(format!(
                "areas {a} and {b} hold the same objects, but areas {good} and {bad} are the collection pair"
            )));
        }
        self.gc_copies.clear();
        info!(
            "areas {} and {} share id {}; keeping {} and reclaiming {} as scratch",
            good, bad, self.fs.area(good)?.id, good, bad
        );

        for (entry_id, handle) in self.fs.index.handles() {
            let in_bad_area = self
                .fs
                .index
                .get(handle)
                .and_then(Entry::loc)
                .is_some_and(|loc| loc.area_idx == bad);
            if !in_bad_area {
                continue;
            }
            match self.fs.index.get(handle) {
                Some(Entry::Block(_)) => {
                    debug!("invalidating block {:#x}", entry_id);
                    self.fs.index.remove(handle);
                }
                Some(Entry::Inode(_)) => {
                    debug!("invalidating inode {:#x}", entry_id);
                    if let Some(inode) = self.fs.index.inode_mut(handle) {
                        inode.state = InodeState::Dummy;
                    }
                }
                None => {}
            }
        }

        self.scan_area(good)?;

        let area = self
            .fs
            .areas
            .get_mut(bad as usize)
            .ok_or_else(|| FsError::corrupt(format!("no area {bad}")))?;
        area.format(self.flash, true)?;
        self.fs.scratch_area_idx = Some(bad);
        Ok(())
    }

    /// `(source, destination)` of the first pair of areas sharing an id.
    ///
    /// The destination is the shorter of the two.  If both were written to
    /// the same length, the one whose gc sequence is one ahead is the
    /// destination.
    fn find_corrupt_scratch(&self) -> Option<(u8, u8)> {
        let areas = &self.fs.areas;
        for (i, a) in areas.iter().enumerate() {
            if a.is_scratch() {
                continue;
            }
            for (j, b) in areas.iter().enumerate().skip(i + 1) {
                if b.id != a.id {
                    continue;
                }
                let (i, j) = (i as u8, j as u8);
                let a_is_dest = if a.cur != b.cur {
                    a.cur < b.cur
                } else {
                    a.gc_seq.wrapping_sub(b.gc_seq) == 1
                };
                return Some(if a_is_dest { (j, i) } else { (i, j) });
            }
        }
        None
    }
}
