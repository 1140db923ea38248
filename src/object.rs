//! On-flash records and the disk-object decoder.
//!
//! Every record opens with a 4-byte magic; the fixed header is followed by
//! a variable payload (a filename for inodes, file data for blocks).  The
//! header ends in a CRC-32 covering the rest of the header and the payload.
//!
//! Inode header (24 bytes): magic, id, seq, parent_id (u32 each), filename
//! length (u8), 3 reserved bytes, crc (u32).
//!
//! Block header (28 bytes): magic, id, seq, inode_id, prev_id (u32 each),
//! data length (u16), reserved (u16), crc (u32).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use std::io::{self, Cursor, Read, Write};

use crate::area::Area;
use crate::error::{FsError, Result};
use crate::flash::Flash;
use crate::id::FlashLoc;

pub const INODE_MAGIC:  u32 = 0x925f_8bc0;
pub const BLOCK_MAGIC:  u32 = 0x53ba_23b9;
pub const ERASED_MAGIC: u32 = 0xffff_ffff;

pub const INODE_HEADER_SIZE: u32 = 24;
pub const BLOCK_HEADER_SIZE: u32 = 28;

/// Payload bytes are checksummed through a buffer of this size.
const CRC_CHUNK: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInode {
    pub id:           u32,
    pub seq:          u32,
    pub parent_id:    u32,
    pub filename_len: u8,
    pub crc:          u32,
}

impl DiskInode {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        self.write_unsealed(&mut writer)?;
        writer.write_u32::<LittleEndian>(self.crc)?;
        Ok(())
    }

    fn write_unsealed<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(INODE_MAGIC)?;
        writer.write_u32::<LittleEndian>(self.id)?;
        writer.write_u32::<LittleEndian>(self.seq)?;
        writer.write_u32::<LittleEndian>(self.parent_id)?;
        writer.write_u8(self.filename_len)?;
        writer.write_all(&[0xff; 3])?;
        Ok(())
    }

    /// Parses a header whose magic has already been checked.
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let _magic = reader.read_u32::<LittleEndian>()?;
        let id = reader.read_u32::<LittleEndian>()?;
        let seq = reader.read_u32::<LittleEndian>()?;
        let parent_id = reader.read_u32::<LittleEndian>()?;
        let filename_len = reader.read_u8()?;
        let mut reserved = [0u8; 3];
        reader.read_exact(&mut reserved)?;
        let crc = reader.read_u32::<LittleEndian>()?;
        Ok(Self { id, seq, parent_id, filename_len, crc })
    }

    /// Reads the inode header at `offset`; a wrong magic is `Corrupt`.
    pub fn read_at<F: Flash>(flash: &mut F, area: &Area, offset: u32) -> Result<Self> {
        let mut buf = [0u8; INODE_HEADER_SIZE as usize];
        area.read(flash, offset, &mut buf)?;
        if magic_of(&buf) != INODE_MAGIC {
            return Err(FsError::corrupt(format!("no inode at offset {offset}")));
        }
        Ok(Self::read(Cursor::new(&buf[..]))?)
    }

    pub fn disk_size(&self) -> u32 {
        INODE_HEADER_SIZE + self.filename_len as u32
    }

    pub fn compute_crc(&self, filename: &[u8]) -> u32 {
        let mut header = Vec::with_capacity(INODE_HEADER_SIZE as usize);
        let _ = self.write_unsealed(&mut header);
        let mut hasher = Hasher::new();
        hasher.update(&header);
        hasher.update(filename);
        hasher.finalize()
    }

    pub fn read_filename<F: Flash>(&self, flash: &mut F, area: &Area, offset: u32) -> Result<Vec<u8>> {
        let mut name = vec![0u8; self.filename_len as usize];
        let pos = offset.checked_add(INODE_HEADER_SIZE).ok_or(FsError::Offset)?;
        area.read(flash, pos, &mut name)?;
        Ok(name)
    }

    /// Checks the stored CRC against the header and the filename on flash.
    pub fn validate<F: Flash>(&self, flash: &mut F, area: &Area, offset: u32) -> Result<()> {
        let name = self.read_filename(flash, area, offset)?;
        if self.compute_crc(&name) != self.crc {
            return Err(FsError::corrupt(format!("inode {:#x}: checksum mismatch", self.id)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskBlock {
    pub id:       u32,
    pub seq:      u32,
    pub inode_id: u32,
    pub prev_id:  u32,
    pub data_len: u16,
    pub crc:      u32,
}

impl DiskBlock {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        self.write_unsealed(&mut writer)?;
        writer.write_u32::<LittleEndian>(self.crc)?;
        Ok(())
    }

    fn write_unsealed<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(BLOCK_MAGIC)?;
        writer.write_u32::<LittleEndian>(self.id)?;
        writer.write_u32::<LittleEndian>(self.seq)?;
        writer.write_u32::<LittleEndian>(self.inode_id)?;
        writer.write_u32::<LittleEndian>(self.prev_id)?;
        writer.write_u16::<LittleEndian>(self.data_len)?;
        writer.write_u16::<LittleEndian>(0xffff)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let _magic = reader.read_u32::<LittleEndian>()?;
        let id = reader.read_u32::<LittleEndian>()?;
        let seq = reader.read_u32::<LittleEndian>()?;
        let inode_id = reader.read_u32::<LittleEndian>()?;
        let prev_id = reader.read_u32::<LittleEndian>()?;
        let data_len = reader.read_u16::<LittleEndian>()?;
        let _reserved = reader.read_u16::<LittleEndian>()?;
        let crc = reader.read_u32::<LittleEndian>()?;
        Ok(Self { id, seq, inode_id, prev_id, data_len, crc })
    }

    pub fn read_at<F: Flash>(flash: &mut F, area: &Area, offset: u32) -> Result<Self> {
        let mut buf = [0u8; BLOCK_HEADER_SIZE as usize];
        area.read(flash, offset, &mut buf)?;
        if magic_of(&buf) != BLOCK_MAGIC {
            return Err(FsError::corrupt(format!("no data block at offset {offset}")));
        }
        Ok(Self::read(Cursor::new(&buf[..]))?)
    }

    pub fn disk_size(&self) -> u32 {
        BLOCK_HEADER_SIZE + self.data_len as u32
    }

    fn crc_hasher(&self) -> Hasher {
        let mut header = Vec::with_capacity(BLOCK_HEADER_SIZE as usize);
        let _ = self.write_unsealed(&mut header);
        let mut hasher = Hasher::new();
        hasher.update(&header);
        hasher
    }

    pub fn compute_crc(&self, data: &[u8]) -> u32 {
        let mut hasher = self.crc_hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Checks the stored CRC, streaming the payload off flash in chunks.
    pub fn validate<F: Flash>(&self, flash: &mut F, area: &Area, offset: u32) -> Result<()> {
        let mut hasher = self.crc_hasher();
        let mut buf = [0u8; CRC_CHUNK];
        let mut pos = offset.checked_add(BLOCK_HEADER_SIZE).ok_or(FsError::Offset)?;
        let mut left = self.data_len as usize;
        while left > 0 {
            let n = left.min(CRC_CHUNK);
            area.read(flash, pos, &mut buf[..n])?;
            hasher.update(&buf[..n]);
            pos += n as u32;
            left -= n;
        }
        if hasher.finalize() != self.crc {
            return Err(FsError::corrupt(format!("block {:#x}: checksum mismatch", self.id)));
        }
        Ok(())
    }
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Serializes a sealed inode record: header plus filename.
pub fn encode_inode(id: u32, seq: u32, parent_id: u32, filename: &[u8]) -> Vec<u8> {
    let filename = &filename[..filename.len().min(u8::MAX as usize)];
    let mut inode = DiskInode {
        id,
        seq,
        parent_id,
        filename_len: filename.len() as u8,
        crc: 0,
    };
    inode.crc = inode.compute_crc(filename);
    let mut out = Vec::with_capacity(inode.disk_size() as usize);
    let _ = inode.write(&mut out);
    out.extend_from_slice(filename);
    out
}

/// Serializes a sealed block record: header plus data.
pub fn encode_block(id: u32, seq: u32, inode_id: u32, prev_id: u32, data: &[u8]) -> Vec<u8> {
    let data = &data[..data.len().min(u16::MAX as usize)];
    let mut block = DiskBlock {
        id,
        seq,
        inode_id,
        prev_id,
        data_len: data.len() as u16,
        crc: 0,
    };
    block.crc = block.compute_crc(data);
    let mut out = Vec::with_capacity(block.disk_size() as usize);
    let _ = block.write(&mut out);
    out.extend_from_slice(data);
    out
}

// ── Decoder ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskRecord {
    Inode(DiskInode),
    Block(DiskBlock),
}

/// A record just read off flash, with the place it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskObject {
    pub record: DiskRecord,
    pub loc:    FlashLoc,
}

impl DiskObject {
    /// Header plus payload: the distance to the next record.
    pub fn disk_size(&self) -> u32 {
        match &self.record {
            DiskRecord::Inode(inode) => inode.disk_size(),
            DiskRecord::Block(block) => block.disk_size(),
        }
    }
}

/// What sits at a given offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Object(DiskObject),
    /// Erased flash: nothing has been written here yet.
    Empty,
    /// Unrecognized magic.
    Corrupt,
}

/// Reads the record at `offset` of area `area_idx`.
///
/// A header cut off by the area end surfaces as `Offset`.
pub fn read_object<F: Flash>(flash: &mut F, area: &Area, area_idx: u8, offset: u32) -> Result<Probe> {
    let mut magic = [0u8; 4];
    area.read(flash, offset, &mut magic)?;

    let record = match u32::from_le_bytes(magic) {
        INODE_MAGIC => DiskRecord::Inode(DiskInode::read_at(flash, area, offset)?),
        BLOCK_MAGIC => DiskRecord::Block(DiskBlock::read_at(flash, area, offset)?),
        ERASED_MAGIC => return Ok(Probe::Empty),
        _ => return Ok(Probe::Corrupt),
    };

    Ok(Probe::Object(DiskObject {
        record,
        loc: FlashLoc::new(area_idx, offset),
    }))
}

fn magic_of(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}
