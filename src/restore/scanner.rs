//! Area scanner: walks one area's record stream.
//!
//! Starting right after the area header, the scanner decodes one record at
//! a time and hands it to the object restorers, then skips over the
//! record's header and payload.  An unrecognized magic advances the cursor
//! by a single byte and tries again, which finds the next valid record after
//! a run of garbage.  Erased flash or the area end stops the scan.
//!
//! The scan is O(area size) in the worst case; areas are small and this only
//! happens at mount.

use tracing::{debug, trace};

use super::RestoreSession;
use crate::area::AREA_HEADER_SIZE;
use crate::error::{FsError, Result};
use crate::flash::Flash;
use crate::object::{read_object, DiskObject, DiskRecord, Probe};

impl<F: Flash> RestoreSession<'_, F> {
    /// Restores every record in area `area_idx` and leaves the area's cursor
    /// just past the last one.
    pub(super) fn scan_area(&mut self, area_idx: u8) -> Result<()> {
        let mut cur = AREA_HEADER_SIZE;
        let mut corrupt_bytes = 0u32;

        loop {
            let area = self.fs.area(area_idx)?;
            match read_object(self.flash, area, area_idx, cur) {
                Ok(Probe::Object(object)) => {
                    self.restore_object(&object)?;
                    cur += object.disk_size();
                }
                Ok(Probe::Corrupt) => {
                    corrupt_bytes += 1;
                    cur += 1;
                }
                Ok(Probe::Empty) | Err(FsError::Offset) => break,
                Err(e) => return Err(e),
            }
        }

        if corrupt_bytes > 0 {
            debug!("area {}: skipped {} unreadable bytes", area_idx, corrupt_bytes);
        }
        trace!("area {} restored up to offset {}", area_idx, cur);
        if let Some(area) = self.fs.areas.get_mut(area_idx as usize) {
            area.cur = cur.min(area.length);
        }
        Ok(())
    }

    /// Folds one record into the index.
    ///
    /// A record whose payload runs past the area end is a torn write and is
    /// dropped; every other error is fatal.
    fn restore_object(&mut self, object: &DiskObject) -> Result<()> {
        let result = match &object.record {
            DiskRecord::Inode(inode) => self.restore_inode(inode, object.loc),
            DiskRecord::Block(block) => self.restore_block(block, object.loc),
        };
        match result {
            Err(FsError::Offset) => {
                debug!("dropping torn record at {:?}", object.loc);
                Ok(())
            }
            other => other,
        }
    }
}
