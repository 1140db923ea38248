//! The in-memory object index.
//!
//! Entries live in an arena of slots and refer to one another through
//! generation-checked [`Handle`]s, so a handle to a deleted entry simply
//! stops resolving.  A `BTreeMap` maps object ids to handles; iterating it
//! visits objects in ascending id order, which keeps every restore pass
//! deterministic regardless of the order areas were scanned in.
//!
//! The inode and block pools have fixed capacities taken from
//! [`crate::config::RestoreConfig`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{FsError, Result};
use crate::id::{self, FlashLoc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    slot:       u32,
    generation: u32,
}

/// Whether an inode's record has been seen yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeState {
    /// Referenced (as a parent or block owner) before its record was read.
    Dummy,
    Real { loc: FlashLoc },
}

#[derive(Debug, Clone)]
pub struct InodeEntry {
    pub id:         u32,
    pub state:      InodeState,
    pub parent:     Option<Handle>,
    /// Directories only; kept sorted by child id.
    pub children:   Vec<Handle>,
    /// Files only; tail of the block chain once file ends are resolved.
    pub last_block: Option<Handle>,
}

impl InodeEntry {
    pub fn dummy(id: u32) -> Self {
        Self {
            id,
            state: InodeState::Dummy,
            parent: None,
            children: Vec::new(),
            last_block: None,
        }
    }

    pub fn is_dummy(&self) -> bool {
        self.state == InodeState::Dummy
    }

    pub fn loc(&self) -> Option<FlashLoc> {
        match self.state {
            InodeState::Real { loc } => Some(loc),
            InodeState::Dummy => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    pub id:  u32,
    pub loc: FlashLoc,
}

#[derive(Debug, Clone)]
pub enum Entry {
    Inode(InodeEntry),
    Block(BlockEntry),
}

impl Entry {
    pub fn id(&self) -> u32 {
        match self {
            Entry::Inode(inode) => inode.id,
            Entry::Block(block) => block.id,
        }
    }

    pub fn loc(&self) -> Option<FlashLoc> {
        match self {
            Entry::Inode(inode) => inode.loc(),
            Entry::Block(block) => Some(block.loc),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    entry:      Option<Entry>,
}

#[derive(Debug, Clone)]
pub struct Index {
    slots:       Vec<Slot>,
    free:        Vec<u32>,
    by_id:       BTreeMap<u32, Handle>,
    inode_count: usize,
    block_count: usize,
    max_inodes:  usize,
    max_blocks:  usize,
}

impl Index {
    pub fn new(max_inodes: usize, max_blocks: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_id: BTreeMap::new(),
            inode_count: 0,
            block_count: 0,
            max_inodes,
            max_blocks,
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn inode_count(&self) -> usize {
        self.inode_count
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    pub fn find(&self, id: u32) -> Option<Handle> {
        self.by_id.get(&id).copied()
    }

    pub fn find_inode(&self, id: u32) -> Option<Handle> {
        if id::is_inode(id) { self.find(id) } else { None }
    }

    pub fn find_block(&self, id: u32) -> Option<Handle> {
        if id::is_block(id) { self.find(id) } else { None }
    }

    pub fn get(&self, handle: Handle) -> Option<&Entry> {
        self.slots
            .get(handle.slot as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn get_mut(&mut self, handle: Handle) -> Option<&mut Entry> {
        self.slots
            .get_mut(handle.slot as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    pub fn inode(&self, handle: Handle) -> Option<&InodeEntry> {
        match self.get(handle)? {
            Entry::Inode(inode) => Some(inode),
            Entry::Block(_) => None,
        }
    }

    pub fn inode_mut(&mut self, handle: Handle) -> Option<&mut InodeEntry> {
        match self.get_mut(handle)? {
            Entry::Inode(inode) => Some(inode),
            Entry::Block(_) => None,
        }
    }

    pub fn block(&self, handle: Handle) -> Option<&BlockEntry> {
        match self.get(handle)? {
            Entry::Block(block) => Some(block),
            Entry::Inode(_) => None,
        }
    }

    /// Snapshot of every `(id, handle)` pair, ascending by id.
    pub fn handles(&self) -> Vec<(u32, Handle)> {
        self.by_id.iter().map(|(&id, &h)| (id, h)).collect()
    }

    pub fn inode_ids(&self) -> Vec<u32> {
        self.by_id.keys().copied().filter(|&k| id::is_inode(k)).collect()
    }

    pub fn block_handles(&self) -> Vec<(u32, Handle)> {
        self.by_id
            .range(id::ID_BLOCK_MIN..)
            .filter(|&(&k, _)| id::is_block(k))
            .map(|(&k, &h)| (k, h))
            .collect()
    }

    // ── Allocation ───────────────────────────────────────────────────────────

    pub fn insert_inode(&mut self, inode: InodeEntry) -> Result<Handle> {
        if self.inode_count >= self.max_inodes {
            return Err(FsError::NoMem);
        }
        self.inode_count += 1;
        Ok(self.insert(Entry::Inode(inode)))
    }

    pub fn insert_block(&mut self, block: BlockEntry) -> Result<Handle> {
        if self.block_count >= self.max_blocks {
            return Err(FsError::NoMem);
        }
        self.block_count += 1;
        Ok(self.insert(Entry::Block(block)))
    }

    fn insert(&mut self, entry: Entry) -> Handle {
        let id = entry.id();
        debug_assert!(!self.by_id.contains_key(&id), "id {id:#x} inserted twice");
        let handle = match self.free.pop() {
            Some(slot) => {
                let s = &mut self.slots[slot as usize];
                s.entry = Some(entry);
                Handle { slot, generation: s.generation }
            }
            None => {
                self.slots.push(Slot { generation: 0, entry: Some(entry) });
                Handle { slot: self.slots.len() as u32 - 1, generation: 0 }
            }
        };
        self.by_id.insert(id, handle);
        handle
    }

    /// Frees a slot.  Inodes are detached from their parent first; their own
    /// children keep dangling parent handles, which no longer resolve.
    pub fn remove(&mut self, handle: Handle) -> Option<Entry> {
        if matches!(self.get(handle), Some(Entry::Inode(_))) {
            self.detach(handle);
        }
        let slot = self.slots.get_mut(handle.slot as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.slot);
        self.by_id.remove(&entry.id());
        match entry {
            Entry::Inode(_) => self.inode_count -= 1,
            Entry::Block(_) => self.block_count -= 1,
        }
        Some(entry)
    }

    // ── Tree links ───────────────────────────────────────────────────────────

    /// Makes `child` a child of `parent`, detaching it from any old parent.
    pub fn attach(&mut self, parent: Handle, child: Handle) {
        self.detach(child);
        let Some(child_id) = self.inode(child).map(|c| c.id) else { return };
        let pos = match self.inode(parent) {
            Some(p) => p.children.partition_point(|&h| self.id_of(h) < child_id),
            None => return,
        };
        if let Some(p) = self.inode_mut(parent) {
            p.children.insert(pos, child);
        }
        if let Some(c) = self.inode_mut(child) {
            c.parent = Some(parent);
        }
    }

    /// Removes `child` from its parent's child list.
    pub fn detach(&mut self, child: Handle) {
        let Some(parent) = self.inode_mut(child).and_then(|c| c.parent.take()) else {
            return;
        };
        if let Some(p) = self.inode_mut(parent) {
            p.children.retain(|&h| h != child);
        }
    }

    /// Parent handle, if it still resolves.
    pub fn parent_of(&self, handle: Handle) -> Option<Handle> {
        let parent = self.inode(handle)?.parent?;
        self.inode(parent).map(|_| parent)
    }

    fn id_of(&self, handle: Handle) -> u32 {
        self.get(handle).map_or(id::ID_NONE, Entry::id)
    }

    // ── Snapshots ────────────────────────────────────────────────────────────

    /// Id-keyed description of every entry, independent of slot layout.
    pub fn snapshot(&self) -> BTreeMap<u32, EntrySummary> {
        self.by_id
            .iter()
            .filter_map(|(&id, &h)| Some((id, self.summarize(self.get(h)?))))
            .collect()
    }

    fn summarize(&self, entry: &Entry) -> EntrySummary {
        match entry {
            Entry::Block(block) => EntrySummary::Block { loc: block.loc },
            Entry::Inode(inode) => EntrySummary::Inode {
                loc: inode.loc(),
                dummy: inode.is_dummy(),
                parent: inode.parent.and_then(|h| self.get(h)).map(Entry::id),
                children: inode.children.iter().map(|&h| self.id_of(h)).collect(),
                last_block: inode.last_block.and_then(|h| self.get(h)).map(Entry::id),
            },
        }
    }

    /// BLAKE3 over the serialized snapshot.
    pub fn fingerprint(&self) -> [u8; 32] {
        let bytes = serde_json::to_vec(&self.snapshot()).unwrap_or_default();
        blake3::hash(&bytes).into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntrySummary {
    Inode {
        loc:        Option<FlashLoc>,
        dummy:      bool,
        parent:     Option<u32>,
        children:   Vec<u32>,
        last_block: Option<u32>,
    },
    Block {
        loc: FlashLoc,
    },
}
