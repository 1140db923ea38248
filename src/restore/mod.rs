//! Mount-time restore: rebuilds the object index from the raw record stream.
//!
//! # Passes
//!
//! 1. Read every area header; scan each data area record by record
//!    ([`scanner`]), folding inodes and blocks into the index ([`object`]).
//! 2. If no scratch area turned up, repair the area pair left behind by an
//!    interrupted garbage-collection cycle ([`scratch`]).
//! 3. Check the scratch area and the root directory; make sure
//!    `/lost+found` exists ([`write`]).
//! 4. Point every file at the tail of its block chain ([`file_end`]).
//! 5. Sweep dummies, orphans and files with broken chains ([`sweep`]).
//! 6. Derive the block payload limit.
//!
//! All state lives in a [`RestoreSession`]; it becomes the caller's
//! [`FileSystem`] on success and is dropped on any error, so a failed
//! restore never leaves a half-built index behind.

mod file_end;
mod object;
mod scanner;
mod scratch;
mod sweep;
mod write;

use std::collections::BTreeSet;

use tracing::{debug, info, trace, warn};

use crate::area::{read_disk_area, Area, AreaDesc, AREA_ID_NONE};
use crate::config::RestoreConfig;
use crate::error::{FsError, Result};
use crate::flash::Flash;
use crate::fs::FileSystem;
use crate::id;
use crate::index::Entry;
use crate::object::BLOCK_HEADER_SIZE;

pub const LOST_FOUND_NAME: &str = "lost+found";

/// Restores the file system stored in `area_descs`.
///
/// Succeeds if a file system is found among any subset of the areas.  On
/// error nothing survives; the caller's only recovery is a fresh format.
pub fn restore<F: Flash>(
    flash:      &mut F,
    area_descs: &[AreaDesc],
    config:     &RestoreConfig,
) -> Result<FileSystem> {
    let mut session = RestoreSession::new(flash, config);
    match session.run(area_descs, config) {
        Ok(()) => Ok(session.fs),
        Err(e) => {
            warn!("restore failed: {}", e);
            Err(e)
        }
    }
}

/// Everything one restore run mutates.
pub struct RestoreSession<'f, F: Flash> {
    flash: &'f mut F,
    fs:    FileSystem,
    /// Largest block payload seen on flash.
    largest_block_data_len: u16,
    /// Area pairs, lower index first, that hold identical copies of an
    /// object.
    gc_copies: BTreeSet<(u8, u8)>,
}

impl<'f, F: Flash> RestoreSession<'f, F> {
    fn new(flash: &'f mut F, config: &RestoreConfig) -> Self {
        Self {
            flash,
            fs: FileSystem::new(config.max_inodes, config.max_blocks),
            largest_block_data_len: 0,
            gc_copies: BTreeSet::new(),
        }
    }

    fn run(&mut self, area_descs: &[AreaDesc], config: &RestoreConfig) -> Result<()> {
        let max_areas = config.max_areas.min(AREA_ID_NONE as usize);
        if area_descs.len() > max_areas {
            return Err(FsError::Invalid(format!(
                "{} areas supplied, at most {} supported",
                area_descs.len(),
                max_areas
            )));
        }

        for desc in area_descs {
            self.detect_area(desc)?;
        }

        if self.fs.scratch_area_idx.is_some() {
            if let Some(&(a, b)) = self.gc_copies.iter().next() {
                return Err(FsError::corrupt(format!(
                    "areas {a} and {b} hold the same objects but no garbage collection is pending"
                )));
            }
        } else {
            info!("no scratch area; looking for an interrupted garbage collection");
            self.repair_scratch().map_err(|e| match e {
                FsError::NotFound => FsError::corrupt("no scratch area and no area pair to repair"),
                e => e,
            })?;
        }

        self.validate_scratch()?;
        self.validate_root_dir()?;
        self.ensure_lost_found()?;
        self.resolve_file_ends()?;
        self.sweep()?;
        self.set_max_block_data_len(config.max_block_data_len);

        info!(
            "restored {} inodes and {} blocks from {} areas",
            self.fs.index.inode_count(),
            self.fs.index.block_count(),
            self.fs.areas.len()
        );
        self.log_contents();
        Ok(())
    }

    /// Reads one area header and, for data areas, the area's records.
    fn detect_area(&mut self, desc: &AreaDesc) -> Result<()> {
        let disk = match read_disk_area(self.flash, desc.flash_id, desc.offset) {
            Ok(disk) => disk,
            Err(FsError::Corrupt(reason)) => {
                debug!("skipping area at {}:{:#x}: {}", desc.flash_id, desc.offset, reason);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if disk.is_scratch() && self.fs.scratch_area_idx.is_some() {
            warn!("ignoring second scratch area at {}:{:#x}", desc.flash_id, desc.offset);
            return Ok(());
        }

        let area_idx = self.fs.areas.len() as u8;
        self.fs.areas.push(Area::from_disk(desc, &disk));

        if disk.is_scratch() {
            debug!("area {} is the scratch area", area_idx);
            self.fs.scratch_area_idx = Some(area_idx);
            Ok(())
        } else {
            debug!("area {}: id={} gc_seq={}", area_idx, disk.id, disk.gc_seq);
            self.scan_area(area_idx)
        }
    }

    /// The scratch area must be able to take the contents of any other area.
    fn validate_scratch(&self) -> Result<()> {
        let idx = self
            .fs
            .scratch_area_idx
            .ok_or_else(|| FsError::corrupt("no scratch area"))?;
        let scratch_len = self.fs.area(idx)?.length;
        if self.fs.areas.iter().any(|a| a.length > scratch_len) {
            return Err(FsError::corrupt("scratch area smaller than a data area"));
        }
        Ok(())
    }

    fn validate_root_dir(&self) -> Result<()> {
        let root = self.fs.root()?;
        match self.fs.index.inode(root) {
            Some(inode) if !inode.is_dummy() => Ok(()),
            _ => Err(FsError::corrupt("root directory never restored")),
        }
    }

    /// Half the smallest data area, capped by configuration, but never below
    /// a block that already exists on flash.
    fn set_max_block_data_len(&mut self, ceiling: u16) {
        let smallest = self
            .fs
            .areas
            .iter()
            .filter(|a| !a.is_scratch())
            .map(|a| a.length)
            .min()
            .unwrap_or(0);
        let half = (smallest / 2).saturating_sub(BLOCK_HEADER_SIZE);
        let limit = half.min(ceiling as u32) as u16;
        self.fs.max_block_data_len = limit.max(self.largest_block_data_len);
        debug!("max block data length: {}", self.fs.max_block_data_len);
    }

    fn log_contents(&self) {
        if !tracing::enabled!(tracing::Level::TRACE) {
            return;
        }
        for (id, handle) in self.fs.index.handles() {
            match self.fs.index.get(handle) {
                Some(Entry::Block(block)) => trace!("block; id={:#x} loc={:?}", id, block.loc),
                Some(Entry::Inode(inode)) => trace!(
                    "{}; id={:#x} dummy={} children={} last_block={:?}",
                    if id::is_file(id) { "file" } else { "dir" },
                    id,
                    inode.is_dummy(),
                    inode.children.len(),
                    inode.last_block.and_then(|h| self.fs.index.block(h)).map(|b| b.id),
                ),
                None => {}
            }
        }
    }
}
