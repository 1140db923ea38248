//! Raw flash collaborator.
//!
//! The restore path only ever talks to storage through [`Flash`]: blocking,
//! all-or-nothing reads, writes and erases addressed by `(flash_id, offset)`.
//! Two implementations ship with the crate: [`MemFlash`] for tests and
//! benches, [`FileFlash`] for disk images used by the CLI.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;

/// Value of an erased flash byte.
pub const ERASED_BYTE: u8 = 0xff;

#[derive(Error, Debug)]
pub enum FlashError {
    #[error("unknown flash device {0}")]
    NoDevice(u8),
    #[error("access out of range: device {flash_id}, offset {offset}, length {len}")]
    OutOfRange { flash_id: u8, offset: u32, len: usize },
    #[error("device IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Synchronous flash driver interface.
///
/// Reads return exactly `buf.len()` bytes or an error; partial reads do not
/// exist at this level.
pub trait Flash {
    fn read(&mut self, flash_id: u8, offset: u32, buf: &mut [u8]) -> Result<(), FlashError>;
    fn write(&mut self, flash_id: u8, offset: u32, data: &[u8]) -> Result<(), FlashError>;
    /// Sets `len` bytes starting at `offset` to [`ERASED_BYTE`].
    fn erase(&mut self, flash_id: u8, offset: u32, len: u32) -> Result<(), FlashError>;
}

impl<F: Flash + ?Sized> Flash for &mut F {
    fn read(&mut self, flash_id: u8, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(flash_id, offset, buf)
    }

    fn write(&mut self, flash_id: u8, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        (**self).write(flash_id, offset, data)
    }

    fn erase(&mut self, flash_id: u8, offset: u32, len: u32) -> Result<(), FlashError> {
        (**self).erase(flash_id, offset, len)
    }
}

// ── In-memory flash ──────────────────────────────────────────────────────────

/// RAM-backed flash: one byte vector per device, erased on creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemFlash {
    devices: Vec<Vec<u8>>,
}

impl MemFlash {
    /// One erased device (`flash_id` 0) of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self::with_devices(&[size])
    }

    pub fn with_devices(sizes: &[usize]) -> Self {
        Self {
            devices: sizes.iter().map(|&n| vec![ERASED_BYTE; n]).collect(),
        }
    }

    pub fn device(&self, flash_id: u8) -> Option<&[u8]> {
        self.devices.get(flash_id as usize).map(Vec::as_slice)
    }

    fn range(&mut self, flash_id: u8, offset: u32, len: usize) -> Result<&mut [u8], FlashError> {
        let dev = self
            .devices
            .get_mut(flash_id as usize)
            .ok_or(FlashError::NoDevice(flash_id))?;
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= dev.len())
            .ok_or(FlashError::OutOfRange { flash_id, offset, len })?;
        Ok(&mut dev[start..end])
    }
}

impl Flash for MemFlash {
    fn read(&mut self, flash_id: u8, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let src = self.range(flash_id, offset, buf.len())?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write(&mut self, flash_id: u8, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        self.range(flash_id, offset, data.len())?.copy_from_slice(data);
        Ok(())
    }

    fn erase(&mut self, flash_id: u8, offset: u32, len: u32) -> Result<(), FlashError> {
        self.range(flash_id, offset, len as usize)?.fill(ERASED_BYTE);
        Ok(())
    }
}

// ── File-backed flash ────────────────────────────────────────────────────────

/// A single flash device (`flash_id` 0) stored in a regular file.
pub struct FileFlash {
    file: File,
    size: u64,
}

impl FileFlash {
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }

    /// Create (or truncate) an image of `size` erased bytes.
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> std::io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let chunk = vec![ERASED_BYTE; 4096];
        let mut left = size;
        while left > 0 {
            let n = left.min(chunk.len() as u64) as usize;
            file.write_all(&chunk[..n])?;
            left -= n as u64;
        }
        file.flush()?;
        Ok(Self { file, size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn seek_checked(&mut self, flash_id: u8, offset: u32, len: usize) -> Result<(), FlashError> {
        if flash_id != 0 {
            return Err(FlashError::NoDevice(flash_id));
        }
        if offset as u64 + len as u64 > self.size {
            return Err(FlashError::OutOfRange { flash_id, offset, len });
        }
        self.file.seek(SeekFrom::Start(offset as u64))?;
        Ok(())
    }
}

impl Flash for FileFlash {
    fn read(&mut self, flash_id: u8, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.seek_checked(flash_id, offset, buf.len())?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write(&mut self, flash_id: u8, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        self.seek_checked(flash_id, offset, data.len())?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn erase(&mut self, flash_id: u8, offset: u32, len: u32) -> Result<(), FlashError> {
        self.seek_checked(flash_id, offset, len as usize)?;
        self.file.write_all(&vec![ERASED_BYTE; len as usize])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_flash_starts_erased_and_rejects_out_of_range() {
        let mut flash = MemFlash::new(16);
        let mut buf = [0u8; 4];
        flash.read(0, 12, &mut buf).unwrap();
        assert_eq!(buf, [ERASED_BYTE; 4]);

        assert!(matches!(flash.read(0, 14, &mut buf), Err(FlashError::OutOfRange { .. })));
        assert!(matches!(flash.read(1, 0, &mut buf), Err(FlashError::NoDevice(1))));
    }

    #[test]
    fn mem_flash_write_then_erase() {
        let mut flash = MemFlash::new(8);
        flash.write(0, 2, &[1, 2, 3]).unwrap();
        assert_eq!(flash.device(0).unwrap()[2..5], [1, 2, 3]);
        flash.erase(0, 0, 8).unwrap();
        assert!(flash.device(0).unwrap().iter().all(|&b| b == ERASED_BYTE));
    }

    #[test]
    fn file_flash_round_trip() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut flash = FileFlash::create(tmp.path(), 64).unwrap();
        flash.write(0, 10, b"abc").unwrap();
        drop(flash);

        let mut flash = FileFlash::open(tmp.path()).unwrap();
        assert_eq!(flash.size(), 64);
        let mut buf = [0u8; 5];
        flash.read(0, 9, &mut buf).unwrap();
        assert_eq!(&buf, &[ERASED_BYTE, b'a', b'b', b'c', ERASED_BYTE]);
        assert!(flash.read(0, 62, &mut buf).is_err());
    }
}
