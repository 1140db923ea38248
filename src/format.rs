//! Fresh format: an empty file system with a root directory.
//!
//! The last area becomes the scratch area; the others get area ids 0..n-1
//! in order.  The root directory record goes at the start of area 0.

use tracing::info;

use crate::area::{Area, AreaDesc, DiskArea, AREA_ID_NONE};
use crate::error::{FsError, Result};
use crate::flash::Flash;
use crate::id;
use crate::object::encode_inode;

pub fn format_full<F: Flash>(flash: &mut F, area_descs: &[AreaDesc]) -> Result<()> {
    if area_descs.len() < 2 {
        return Err(FsError::Invalid("at least two areas are required".into()));
    }
    if area_descs.len() > AREA_ID_NONE as usize {
        return Err(FsError::Invalid(format!("{} areas supplied", area_descs.len())));
    }
    let scratch_len = area_descs.last().map_or(0, |d| d.length);
    if area_descs.iter().any(|d| d.length > scratch_len) {
        return Err(FsError::Invalid("the last area must be the largest".into()));
    }

    let mut areas = Vec::with_capacity(area_descs.len());
    for (idx, desc) in area_descs.iter().enumerate() {
        let is_scratch = idx == area_descs.len() - 1;
        let mut area = Area::from_disk(desc, &DiskArea::new(desc.length, 0, idx as u8));
        area.format(flash, is_scratch)?;
        areas.push(area);
    }

    let root = encode_inode(id::ID_ROOT_DIR, 0, id::ID_NONE, b"");
    let first = &areas[0];
    if first.free_space() < root.len() as u32 {
        return Err(FsError::Full);
    }
    let offset = first.cur;
    first.write(flash, offset, &root)?;

    info!("formatted {} areas; area {} is scratch", areas.len(), areas.len() - 1);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::read_disk_area;
    use crate::flash::MemFlash;

    #[test]
    fn last_area_is_scratch() {
        let mut flash = MemFlash::new(3 * 256);
        format_full(&mut flash, &AreaDesc::split(0, 256, 3)).unwrap();

        assert_eq!(read_disk_area(&mut flash, 0, 0).unwrap().id, 0);
        assert_eq!(read_disk_area(&mut flash, 0, 256).unwrap().id, 1);
        assert!(read_disk_area(&mut flash, 0, 512).unwrap().is_scratch());
    }

    #[test]
    fn single_area_is_rejected() {
        let mut flash = MemFlash::new(256);
        let err = format_full(&mut flash, &AreaDesc::split(0, 256, 1)).unwrap_err();
        assert!(matches!(err, FsError::Invalid(_)));
    }
}
