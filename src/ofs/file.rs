//! The file operations: create, read, edit-at-offset, truncate, rename,
//! delete.
//!
//! Every multi-step mutation rolls back the steps already taken when a later
//! step fails, so the on-disk invariants survive single-operation failures.
//! The one documented exception is the cross-parent move in
//! [`FsInstance::file_rename`].

use crate::error::{OfsError, OfsResult};
use crate::instance::FsInstance;
use crate::layout::{KIND_FILE, MetaEntry, SLOT_FREE, SLOT_IN_USE};
use crate::meta::{PathIndex, split_path};
use crate::util::{ceil_division, now_secs};
use log::warn;

impl FsInstance {
    /// Resolves a path to a live file slot.
    fn resolve_file(&self, path: &str) -> OfsResult<(u32, MetaEntry)> {
        let idx = self.resolve(path)?;
        let entry = self.meta.slot(idx)?;
        if !entry.is_in_use() {
            return Err(OfsError::NotFound);
        }
        if entry.kind != KIND_FILE {
            return Err(OfsError::InvalidOperation);
        }
        Ok((idx, entry))
    }

    /// Creates a file holding `data` at the given absolute path.
    pub fn file_create(&mut self, session: &str, path: &str, data: &[u8]) -> OfsResult<()> {
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
        entry.kind = KIND_FILE;
        entry.parent = parent_idx;
        entry.set_name(&basename);
        entry.total_size = data.len() as u64;
        entry.permissions = 0o644;
        entry.owner_id = owner_id;
        entry.created_time = now;
        entry.modified_time = now;

        let payload_size = self.dev.payload_size() as usize;
        let needed = ceil_division(data.len() as u64, payload_size as u64) as u32;
        let blocks = self.bitmap.allocate(needed);
        if needed > 0 && blocks.is_empty() {
            return Err(OfsError::NoSpace);
        }
        for (i, chunk) in data.chunks(payload_size).enumerate() {
            let next = blocks.get(i + 1).copied().unwrap_or(0);
            let mut encoded = chunk.to_vec();
            self.transcoder.encode(&mut encoded);
            if let Err(err) = self.dev.write_block(blocks[i], next, &encoded) {
                self.bitmap.free(&blocks);
                return Err(err);
            }
        }
        entry.start_index = blocks.first().copied().unwrap_or(0);
        self.meta.set(slot, entry);

        if let Err(err) = self.dir_add_child(parent_idx, slot) {
            self.meta.set(slot, MetaEntry::free());
            self.bitmap.free(&blocks);
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

    /// Reads a file's full content.
    pub fn file_read(&mut self, session: &str, path: &str) -> OfsResult<Vec<u8>> {
        self.session(session)?;
        let (_, entry) = self.resolve_file(path)?;
        let total = entry.total_size as usize;
        if total == 0 {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(total);
        let mut remaining = total;
        let mut cur = entry.start_index;
        let mut visited = 0usize;
        while remaining > 0 {
            if cur == 0 {
                warn!("chain of `{path}` ends {remaining} bytes short of its recorded size");
                return Err(OfsError::Io);
            }
            visited += 1;
            if visited > self.dev.num_blocks() as usize + 2 {
                return Err(OfsError::Io);
            }
            let (next, mut payload) = self.dev.read_block(cur)?;
            payload.truncate(remaining.min(payload.len()));
            self.transcoder.decode(&mut payload);
            remaining -= payload.len();
            out.append(&mut payload);
            cur = next;
        }
        Ok(out)
    }

    /// Patches `data` into the file at byte `index`.
    ///
    /// The write is bounded to the single block containing `index`: the
    /// effective length is `min(data.len(), payload_size - index % payload_size)`.
    /// Larger writes go through truncate + edit, or delete + create.
    pub fn file_edit(&mut self, session: &str, path: &str, data: &[u8], index: u64) -> OfsResult<()> {
        self.session(session)?;
        let (idx, mut entry) = self.resolve_file(path)?;
        if index > entry.total_size {
            return Err(OfsError::InvalidOperation);
        }
        let payload_size = u64::from(self.dev.payload_size());
        let block_no = index / payload_size;
        let offset = (index % payload_size) as usize;

        let mut cur = entry.start_index;
        for _ in 0..block_no {
            if cur == 0 {
                break;
            }
            cur = self.dev.read_next(cur)?;
        }
        if cur == 0 {
            return Err(OfsError::InvalidOperation);
        }
        let (next, mut payload) = self.dev.read_block(cur)?;
        self.transcoder.decode(&mut payload);
        let write_len = data.len().min(payload.len() - offset);
        payload[offset..offset + write_len].copy_from_slice(&data[..write_len]);
        self.transcoder.encode(&mut payload);
        self.dev.write_block(cur, next, &payload)?;

        entry.modified_time = now_secs();
        self.meta.set(idx, entry);
        self.persist_meta()?;
        self.flush()
    }

    /// Truncates a file to `new_size`, shrinking or growing its chain.
    ///
    /// Grown bytes read back as zeros: readers stop at `total_size` and new
    /// tail blocks are written with zero-filled payloads.
    pub fn file_truncate(&mut self, session: &str, path: &str, new_size: u64) -> OfsResult<()> {
        self.session(session)?;
        let (idx, mut entry) = self.resolve_file(path)?;
        let payload_size = u64::from(self.dev.payload_size());
        let required = ceil_division(new_size, payload_size) as u32;
        let chain = self.dev.chain(entry.start_index)?;
        let current = chain.len() as u32;
        entry.total_size = new_size;
        entry.modified_time = now_secs();

        if required < current {
            if required == 0 {
                self.bitmap.free(&chain);
                entry.start_index = 0;
            } else {
                self.bitmap.free(&chain[required as usize..]);
                self.dev.set_next(chain[required as usize - 1], 0)?;
            }
        } else if required > current {
            let new_blocks = self.bitmap.allocate(required - current);
            if new_blocks.is_empty() {
                return Err(OfsError::NoSpace);
            }
            for (i, &block) in new_blocks.iter().enumerate() {
                let next = new_blocks.get(i + 1).copied().unwrap_or(0);
                if let Err(err) = self.dev.write_block(block, next, &[]) {
                    self.bitmap.free(&new_blocks);
                    return Err(err);
                }
            }
            // Splice the new tail in only once it is fully written, so a
            // failure above leaves the old chain untouched
            if current == 0 {
                entry.start_index = new_blocks[0];
            } else if let Err(err) = self.dev.set_next(chain[current as usize - 1], new_blocks[0]) {
                self.bitmap.free(&new_blocks);
                return Err(err);
            }
        }

        self.meta.set(idx, entry);
        self.persist_meta()?;
        self.persist_bitmap()?;
        self.persist_header()?;
        self.flush()
    }

    /// Deletes a file, freeing its chain.
    pub fn file_delete(&mut self, session: &str, path: &str) -> OfsResult<()> {
        self.session(session)?;
        let idx = self.resolve(path)?;
        let mut entry = self.meta.slot(idx)?;
        if !entry.is_file() {
            return Err(OfsError::NotFound);
        }
        let chain = self.dev.chain(entry.start_index)?;
        self.bitmap.free(&chain);
        if self.meta.get(entry.parent).is_some_and(MetaEntry::is_dir) {
            if let Err(err) = self.dir_remove_child(entry.parent, idx) {
                warn!("file `{path}` was missing from its parent directory: {err}");
            }
        }
        entry.valid = SLOT_FREE;
        entry.start_index = 0;
        entry.total_size = 0;
        self.meta.set(idx, entry);
        self.persist_meta()?;
        self.persist_bitmap()?;
        self.flush()?;
        self.path_index = PathIndex::rebuild(&self.meta);
        Ok(())
    }

    /// Renames or moves an entry to a new absolute path.
    ///
    /// The move across parents is not atomic: when attaching to the new
    /// parent fails, the entry is re-attached to its old parent best-effort;
    /// if that fails as well the slot is left dangling and the failure is
    /// reported as an I/O error.
    pub fn file_rename(&mut self, session: &str, old_path: &str, new_path: &str) -> OfsResult<()> {
        self.session(session)?;
        let idx = self.resolve(old_path)?;
        let mut entry = self.meta.slot(idx)?;
        if !entry.is_in_use() {
            return Err(OfsError::NotFound);
        }
        if self.path_index.contains(new_path) {
            return Err(OfsError::FileExists);
        }
        let (new_parent_path, new_basename) = split_path(new_path)?;
        let new_parent_idx = self.resolve(&new_parent_path)?;
        if !self.meta.slot(new_parent_idx)?.is_dir() {
            return Err(OfsError::InvalidOperation);
        }
        let old_parent_idx = entry.parent;
        if self.meta.get(old_parent_idx).is_none_or(|p| !p.is_dir()) {
            return Err(OfsError::InvalidOperation);
        }
        let old_name = entry.name();

        self.dir_remove_child(old_parent_idx, idx)?;
        entry.set_name(&new_basename);
        entry.parent = new_parent_idx;
        entry.modified_time = now_secs();
        self.meta.set(idx, entry);
        if let Err(err) = self.dir_add_child(new_parent_idx, idx) {
            entry.set_name(&old_name);
            entry.parent = old_parent_idx;
            self.meta.set(idx, entry);
            if let Err(reattach) = self.dir_add_child(old_parent_idx, idx) {
                warn!("rename of `{old_path}` left slot {idx} dangling: {reattach}");
                let _ = self.persist_meta();
                let _ = self.flush();
            }
            return Err(err);
        }
        self.persist_meta()?;
        self.flush()?;
        self.path_index = PathIndex::rebuild(&self.meta);
        Ok(())
    }

    /// Succeeds iff the path resolves to a live file.
    pub fn file_exists(&mut self, session: &str, path: &str) -> OfsResult<()> {
        self.session(session)?;
        self.resolve_file(path).map(|_| ())
    }
}
