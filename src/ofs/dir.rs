//! The directory protocol and the directory operations.
//!
//! A directory is a meta slot whose chain payload is a packed array of
//! `u32` child slot indices; zero entries are holes. The protocol keeps all
//! children of a directory in the single head block, which caps a directory
//! at `floor((block_size - 4) / 4)` children; exceeding the cap is reported
//! as no-space. Child arrays are written raw, never transcoded.

use crate::error::{OfsError, OfsResult};
use crate::instance::FsInstance;
use crate::layout::{KIND_DIRECTORY, MetaEntry, SLOT_FREE, SLOT_IN_USE};
use crate::meta::{PathIndex, split_path};
use crate::util::now_secs;
use crate::views::FileEntryView;
use log::warn;

impl FsInstance {
    /// Returns the number of children one directory can hold.
    pub(crate) fn dir_capacity(&self) -> usize {
        (self.dev.payload_size() / 4) as usize
    }

    /// Collects the nonzero child indices stored in a directory's chain.
    pub(crate) fn dir_children(&mut self, dir: &MetaEntry) -> OfsResult<Vec<u32>> {
        let mut children = Vec::new();
        for block in self.dev.chain(dir.start_index)? {
            let (_, payload) = self.dev.read_block(block)?;
            for chunk in payload.chunks_exact(4) {
                let idx = u32::from_le_bytes(chunk.try_into().unwrap());
                if idx != 0 {
                    children.push(idx);
                }
            }
        }
        Ok(children)
    }

    /// Rewrites a directory's head block with the given child array.
    fn dir_write_children(&mut self, head: u32, children: &[u32]) -> OfsResult<()> {
        let mut payload = Vec::with_capacity(children.len() * 4);
        for idx in children {
            payload.extend_from_slice(&idx.to_le_bytes());
        }
        self.dev.write_block(head, 0, &payload)
    }

    /// Appends `child` to the directory at `parent_idx`, allocating the head
    /// block on first use.
    pub(crate) fn dir_add_child(&mut self, parent_idx: u32, child: u32) -> OfsResult<()> {
        let mut parent = self.meta.slot(parent_idx)?;
        let mut children = self.dir_children(&parent)?;
        children.push(child);
        if children.len() > self.dir_capacity() {
            return Err(OfsError::NoSpace);
        }
        let mut allocated = 0;
        if parent.start_index == 0 {
            let blocks = self.bitmap.allocate(1);
            let Some(&head) = blocks.first() else {
                return Err(OfsError::NoSpace);
            };
            parent.start_index = head;
            allocated = head;
        }
        if let Err(err) = self.dir_write_children(parent.start_index, &children) {
            self.bitmap.free(&[allocated]);
            return Err(err);
        }
        self.meta.set(parent_idx, parent);
        Ok(())
    }

    /// Removes `child` from the directory at `parent_idx`.
    ///
    /// A child that is not listed means the parent/child invariant is
    /// already broken, which is surfaced as an I/O error.
    pub(crate) fn dir_remove_child(&mut self, parent_idx: u32, child: u32) -> OfsResult<()> {
        let parent = self.meta.slot(parent_idx)?;
        let mut children = self.dir_children(&parent)?;
        let Some(pos) = children.iter().position(|&c| c == child) else {
            warn!("slot {child} is not a child of directory slot {parent_idx}");
            return Err(OfsError::Io);
        };
        children.remove(pos);
        if parent.start_index == 0 {
            return Err(OfsError::Io);
        }
        self.dir_write_children(parent.start_index, &children)
    }

    /// Creates a directory at the given absolute path.
    pub fn dir_create(&mut self, session: &str, path: &str) -> OfsResult<()> {
        let owner_id = self.session(session)?.user_slot;
        let (parent_path, basename) = split_path(path)?;
        let parent_idx = self.resolve(&parent_path)?;
        if !self.meta.slot(parent_idx)?.is_dir() {
            return Err(OfsError::InvalidOperation);
        }
        if self.path_index.contains(path) {
            return Err(OfsError::FileExists);
        }
        let slot = self.meta.find_free_slot();
        if slot == 0 {
            return Err(OfsError::NoSpace);
        }

        let now = now_secs();
        let mut entry = MetaEntry::free();
        entry.valid = SLOT_IN_USE;
        entry.kind = KIND_DIRECTORY;
        entry.parent = parent_idx;
        entry.set_name(&basename);
        entry.permissions = 0o755;
        entry.owner_id = owner_id;
        entry.created_time = now;
        entry.modified_time = now;
        self.meta.set(slot, entry);

        if let Err(err) = self.dir_add_child(parent_idx, slot) {
            self.meta.set(slot, MetaEntry::free());
            return Err(err);
        }
        self.bump_meta_hint(slot);
        self.persist_meta()?;
        self.persist_bitmap()?;
        self.persist_header()?;
        self.flush()?;
        self.path_index.insert(path.to_owned(), slot);
        Ok(())
    }

    /// Lists the live children of a directory.
    pub fn dir_list(&mut self, session: &str, path: &str) -> OfsResult<Vec<FileEntryView>> {
        self.session(session)?;
        let idx = self.resolve(path)?;
        let dir = self.meta.slot(idx)?;
        if dir.kind != KIND_DIRECTORY {
            return Err(OfsError::InvalidOperation);
        }
        let children = self.dir_children(&dir)?;
        let mut entries = Vec::with_capacity(children.len());
        for child in children {
            let Some(entry) = self.meta.get(child) else {
                continue;
            };
            if entry.is_in_use() {
                entries.push(self.entry_view(child, entry));
            }
        }
        Ok(entries)
    }

    /// Deletes an empty directory.
    pub fn dir_delete(&mut self, session: &str, path: &str) -> OfsResult<()> {
        self.session(session)?;
        if path == "/" {
            return Err(OfsError::InvalidOperation);
        }
        let idx = self.resolve(path)?;
        let mut dir = self.meta.slot(idx)?;
        if dir.kind != KIND_DIRECTORY {
            return Err(OfsError::InvalidOperation);
        }
        if !self.dir_children(&dir)?.is_empty() {
            return Err(OfsError::DirectoryNotEmpty);
        }
        let parent_idx = dir.parent;
        if self.meta.get(parent_idx).is_none_or(|p| !p.is_dir()) {
            return Err(OfsError::InvalidOperation);
        }
        self.dir_remove_child(parent_idx, idx)?;
        if dir.start_index != 0 {
            self.bitmap.free(&[dir.start_index]);
        }
        dir.valid = SLOT_FREE;
        dir.start_index = 0;
        self.meta.set(idx, dir);
        self.persist_meta()?;
        self.persist_bitmap()?;
        self.flush()?;
        self.path_index = PathIndex::rebuild(&self.meta);
        Ok(())
    }

    /// Succeeds iff the path resolves to a live directory.
    pub fn dir_exists(&mut self, session: &str, path: &str) -> OfsResult<()> {
        self.session(session)?;
        let idx = self.resolve(path)?;
        if self.meta.slot(idx)?.is_dir() {
            Ok(())
        } else {
            Err(OfsError::NotFound)
        }
    }
}
