//! In-memory image builder shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;

use areafs::area::{AreaDesc, DiskArea, AREA_HEADER_SIZE, AREA_ID_NONE, AREA_OFFSET_ID};
use areafs::flash::{Flash, MemFlash};
use areafs::id::ID_NONE;
use areafs::object::{encode_block, encode_inode};
use areafs::{restore, EntrySummary, FileSystem, RestoreConfig, Result};

pub const ROOT: u32 = 0;
pub const AREA_SIZE: u32 = 1024;

/// Areas laid out back to back on device 0; every area starts erased and
/// headerless.
#[derive(Clone)]
pub struct Image {
    pub flash: MemFlash,
    pub descs: Vec<AreaDesc>,
    cursors:   Vec<u32>,
}

impl Image {
    pub fn new(area_count: usize) -> Self {
        Self {
            flash:   MemFlash::new(AREA_SIZE as usize * area_count),
            descs:   AreaDesc::split(0, AREA_SIZE, area_count),
            cursors: vec![0; area_count],
        }
    }

    /// Three data areas (ids 0..2), a scratch area last, root in area 0.
    pub fn standard() -> Self {
        let mut img = Self::new(4);
        img.data_area(0, 0, 0).data_area(1, 1, 0).data_area(2, 2, 0).scratch(3);
        img.root(0);
        img
    }

    pub fn data_area(&mut self, idx: usize, area_id: u8, gc_seq: u8) -> &mut Self {
        let bytes = DiskArea::new(AREA_SIZE, gc_seq, area_id).to_bytes();
        self.put(idx, 0, &bytes);
        self.cursors[idx] = AREA_HEADER_SIZE;
        self
    }

    pub fn scratch(&mut self, idx: usize) -> &mut Self {
        let bytes = DiskArea::new(AREA_SIZE, 0, AREA_ID_NONE).to_bytes();
        self.put(idx, 0, &bytes[..AREA_OFFSET_ID as usize]);
        self.cursors[idx] = AREA_OFFSET_ID;
        self
    }

    pub fn root(&mut self, idx: usize) -> &mut Self {
        self.inode(idx, ROOT, 0, ID_NONE, "")
    }

    pub fn inode(&mut self, idx: usize, id: u32, seq: u32, parent: u32, name: &str) -> &mut Self {
        self.raw(idx, &encode_inode(id, seq, parent, name.as_bytes()))
    }

    pub fn block(&mut self, idx: usize, id: u32, seq: u32, owner: u32, prev: u32, data: &[u8]) -> &mut Self {
        self.raw(idx, &encode_block(id, seq, owner, prev, data))
    }

    /// Appends arbitrary bytes at the area's cursor.
    pub fn raw(&mut self, idx: usize, bytes: &[u8]) -> &mut Self {
        let at = self.cursors[idx];
        self.put(idx, at, bytes);
        self.cursors[idx] += bytes.len() as u32;
        self
    }

    pub fn cursor(&self, idx: usize) -> u32 {
        self.cursors[idx]
    }

    fn put(&mut self, idx: usize, offset: u32, bytes: &[u8]) {
        let desc = self.descs[idx];
        self.flash.write(desc.flash_id, desc.offset + offset, bytes).unwrap();
    }

    pub fn restore(&mut self) -> Result<FileSystem> {
        self.restore_with(&RestoreConfig::default())
    }

    pub fn restore_with(&mut self, config: &RestoreConfig) -> Result<FileSystem> {
        restore(&mut self.flash, &self.descs, config)
    }
}

/// The index with flash locations left out, so restores that placed areas
/// at different indices compare equal.
pub fn shape(fs: &FileSystem) -> BTreeMap<u32, String> {
    fs.index
        .snapshot()
        .into_iter()
        .map(|(id, entry)| {
            let text = match entry {
                EntrySummary::Inode { dummy, parent, children, last_block, .. } => {
                    format!("inode dummy={dummy} parent={parent:?} children={children:?} last={last_block:?}")
                }
                EntrySummary::Block { .. } => "block".to_string(),
            };
            (id, text)
        })
        .collect()
}
