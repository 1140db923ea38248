//! Area headers and the in-memory area table.
//!
//! Every area starts with a fixed 24-byte header:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0  | 16 | four magic words |
//! | 16 | 4  | area length |
//! | 20 | 1  | format version |
//! | 21 | 1  | garbage-collection sequence |
//! | 22 | 1  | reserved |
//! | 23 | 1  | area id, `0xff` for the scratch area |
//!
//! The scratch area is formatted without its id byte, so the byte stays
//! erased until a garbage-collection cycle claims the area.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Cursor, Read, Write};

use crate::error::{FsError, Result};
use crate::flash::Flash;

pub const AREA_MAGIC: [u32; 4] = [0xb98a_31e2, 0x7fb0_428c, 0xace0_8253, 0xb185_fc8e];
pub const AREA_VERSION: u8 = 0;
pub const AREA_HEADER_SIZE: u32 = 24;
/// Offset of the id byte; also where a scratch area's cursor rests.
pub const AREA_OFFSET_ID: u32 = 23;
pub const AREA_ID_NONE: u8 = 0xff;

/// Where an area lives on the raw flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaDesc {
    pub flash_id: u8,
    pub offset:   u32,
    pub length:   u32,
}

impl AreaDesc {
    pub fn new(flash_id: u8, offset: u32, length: u32) -> Self {
        Self { flash_id, offset, length }
    }

    /// `count` equally sized, back-to-back areas on one device.
    pub fn split(flash_id: u8, area_size: u32, count: usize) -> Vec<Self> {
        (0..count)
            .map(|i| Self::new(flash_id, i as u32 * area_size, area_size))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskArea {
    pub magic:   [u32; 4],
    pub length:  u32,
    pub version: u8,
    pub gc_seq:  u8,
    pub id:      u8,
}

impl DiskArea {
    pub fn new(length: u32, gc_seq: u8, id: u8) -> Self {
        Self {
            magic: AREA_MAGIC,
            length,
            version: AREA_VERSION,
            gc_seq,
            id,
        }
    }

    pub fn is_scratch(&self) -> bool {
        self.id == AREA_ID_NONE
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for word in self.magic {
            writer.write_u32::<LittleEndian>(word)?;
        }
        writer.write_u32::<LittleEndian>(self.length)?;
        writer.write_u8(self.version)?;
        writer.write_u8(self.gc_seq)?;
        writer.write_u8(0xff)?;
        writer.write_u8(self.id)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut magic = [0u32; 4];
        for word in magic.iter_mut() {
            *word = reader.read_u32::<LittleEndian>()?;
        }
        let length = reader.read_u32::<LittleEndian>()?;
        let version = reader.read_u8()?;
        let gc_seq = reader.read_u8()?;
        let _reserved = reader.read_u8()?;
        let id = reader.read_u8()?;
        Ok(Self { magic, length, version, gc_seq, id })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(AREA_HEADER_SIZE as usize);
        // Writing into a Vec cannot fail.
        let _ = self.write(&mut buf);
        buf
    }
}

/// Reads and checks the header at the start of an area.
///
/// A missing magic or an unknown version is `Corrupt`; the caller decides
/// whether that simply means "not one of ours".
pub fn read_disk_area<F: Flash>(flash: &mut F, flash_id: u8, offset: u32) -> Result<DiskArea> {
    let mut buf = [0u8; AREA_HEADER_SIZE as usize];
    flash.read(flash_id, offset, &mut buf)?;
    let disk = DiskArea::read(Cursor::new(&buf[..]))?;
    if disk.magic != AREA_MAGIC {
        return Err(FsError::corrupt("area magic not set"));
    }
    if disk.version != AREA_VERSION {
        return Err(FsError::corrupt(format!("unsupported area version {}", disk.version)));
    }
    Ok(disk)
}

/// A restored area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Area {
    pub flash_id: u8,
    pub offset:   u32,
    pub length:   u32,
    pub gc_seq:   u8,
    pub id:       u8,
    /// Write cursor: first byte past the last restored record.
    pub cur:      u32,
}

impl Area {
    pub fn from_disk(desc: &AreaDesc, disk: &DiskArea) -> Self {
        let cur = if disk.is_scratch() { AREA_OFFSET_ID } else { AREA_HEADER_SIZE };
        Self {
            flash_id: desc.flash_id,
            offset:   desc.offset,
            length:   desc.length,
            gc_seq:   disk.gc_seq,
            id:       disk.id,
            cur,
        }
    }

    pub fn is_scratch(&self) -> bool {
        self.id == AREA_ID_NONE
    }

    pub fn free_space(&self) -> u32 {
        self.length.saturating_sub(self.cur)
    }

    /// Area-relative read; running past the area end is `Offset`.
    pub fn read<F: Flash>(&self, flash: &mut F, offset: u32, buf: &mut [u8]) -> Result<()> {
        let addr = self.flash_addr(offset, buf.len())?;
        flash.read(self.flash_id, addr, buf)?;
        Ok(())
    }

    pub fn write<F: Flash>(&self, flash: &mut F, offset: u32, data: &[u8]) -> Result<()> {
        let addr = self.flash_addr(offset, data.len())?;
        flash.write(self.flash_id, addr, data)?;
        Ok(())
    }

    /// Device address of `len` bytes at area offset `offset`.
    fn flash_addr(&self, offset: u32, len: usize) -> Result<u32> {
        match (offset as u64).checked_add(len as u64) {
            Some(end) if end <= self.length as u64 => {}
            _ => return Err(FsError::Offset),
        }
        self.offset.checked_add(offset).ok_or(FsError::Offset)
    }

    /// Erases the area and writes a fresh header.
    ///
    /// A scratch header omits the id byte; a data area keeps its id.
    pub fn format<F: Flash>(&mut self, flash: &mut F, is_scratch: bool) -> Result<()> {
        flash.erase(self.flash_id, self.offset, self.length)?;
        let id = if is_scratch { AREA_ID_NONE } else { self.id };
        let bytes = DiskArea::new(self.length, self.gc_seq, id).to_bytes();
        if is_scratch {
            flash.write(self.flash_id, self.offset, &bytes[..AREA_OFFSET_ID as usize])?;
            self.cur = AREA_OFFSET_ID;
        } else {
            flash.write(self.flash_id, self.offset, &bytes)?;
            self.cur = AREA_HEADER_SIZE;
        }
        self.id = id;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::MemFlash;

    #[test]
    fn header_is_24_bytes_little_endian() {
        let bytes = DiskArea::new(4096, 7, 3).to_bytes();
        assert_eq!(bytes.len(), AREA_HEADER_SIZE as usize);
        assert_eq!(&bytes[..4], &0xb98a_31e2u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &4096u32.to_le_bytes());
        assert_eq!(bytes[21], 7);
        assert_eq!(bytes[AREA_OFFSET_ID as usize], 3);
    }

    #[test]
    fn erased_area_has_no_magic() {
        let mut flash = MemFlash::new(256);
        assert!(matches!(read_disk_area(&mut flash, 0, 0), Err(FsError::Corrupt(_))));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut flash = MemFlash::new(256);
        let mut disk = DiskArea::new(256, 0, 1);
        disk.version = 9;
        flash.write(0, 0, &disk.to_bytes()).unwrap();
        assert!(read_disk_area(&mut flash, 0, 0).is_err());
    }

    #[test]
    fn scratch_format_leaves_id_erased() {
        let mut flash = MemFlash::new(512);
        let desc = AreaDesc::new(0, 256, 256);
        let mut area = Area::from_disk(&desc, &DiskArea::new(256, 4, 2));
        area.format(&mut flash, true).unwrap();

        let disk = read_disk_area(&mut flash, 0, 256).unwrap();
        assert!(disk.is_scratch());
        assert_eq!(disk.gc_seq, 4);
        assert!(area.is_scratch());
        assert_eq!(area.cur, AREA_OFFSET_ID);
    }

    #[test]
    fn area_reads_are_bounded() {
        let mut flash = MemFlash::new(512);
        let area = Area::from_disk(&AreaDesc::new(0, 0, 64), &DiskArea::new(64, 0, 0));
        let mut buf = [0u8; 8];
        assert!(area.read(&mut flash, 56, &mut buf).is_ok());
        assert!(matches!(area.read(&mut flash, 57, &mut buf), Err(FsError::Offset)));
    }

    #[test]
    fn area_at_top_of_address_space_reports_offset() {
        let mut flash = MemFlash::new(64);
        let area = Area::from_disk(&AreaDesc::new(0, u32::MAX - 16, 64), &DiskArea::new(64, 0, 0));
        let mut buf = [0u8; 8];
        assert!(matches!(area.read(&mut flash, 32, &mut buf), Err(FsError::Offset)));
        assert!(matches!(area.write(&mut flash, 32, &buf), Err(FsError::Offset)));
    }
}
