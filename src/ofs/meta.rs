//! The metadata slot table and the derived path index.

use crate::error::{OfsError, OfsResult};
use crate::layout::{MetaEntry, NAME_MAX, ROOT_SLOT, records_as_bytes, records_from_bytes};
use std::collections::HashMap;
use std::mem::size_of;

/// The fixed array of metadata slots, indexed 1-based.
pub struct MetaTable {
    entries: Vec<MetaEntry>,
}

impl MetaTable {
    /// Returns a table of `max_files` free slots.
    pub fn new(max_files: u32) -> Self {
        Self {
            entries: vec![MetaEntry::free(); max_files as usize],
        }
    }

    /// Reads the table back from its persisted region.
    pub fn from_bytes(buf: &[u8], max_files: u32) -> Self {
        Self {
            entries: records_from_bytes(buf, max_files as usize),
        }
    }

    /// Returns the persisted form of the whole table.
    pub fn as_bytes(&self) -> &[u8] {
        records_as_bytes(&self.entries)
    }

    /// Returns the on-disk size of a table of `max_files` slots.
    pub fn byte_len(max_files: u32) -> usize {
        max_files as usize * size_of::<MetaEntry>()
    }

    /// Returns the number of slots.
    pub fn len(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Tells whether the table has no slots.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the slot at the 1-based index `idx`.
    pub fn get(&self, idx: u32) -> Option<&MetaEntry> {
        idx.checked_sub(1)
            .and_then(|i| self.entries.get(i as usize))
    }

    /// Returns the slot at `idx`, failing with [`OfsError::NotFound`] when
    /// out of range.
    pub fn slot(&self, idx: u32) -> OfsResult<MetaEntry> {
        self.get(idx).copied().ok_or(OfsError::NotFound)
    }

    /// Overwrites the slot at the 1-based index `idx`.
    pub fn set(&mut self, idx: u32, entry: MetaEntry) {
        self.entries[(idx - 1) as usize] = entry;
    }

    /// Returns the 1-based index of the first free slot, or `0` when the
    /// table is full.
    pub fn find_free_slot(&self) -> u32 {
        self.entries
            .iter()
            .position(|e| !e.is_in_use())
            .map(|i| i as u32 + 1)
            .unwrap_or(0)
    }

    /// Iterates over `(1-based index, entry)` pairs of in-use slots.
    pub fn in_use(&self) -> impl Iterator<Item = (u32, &MetaEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_in_use())
            .map(|(i, e)| (i as u32 + 1, e))
    }

    /// Rebuilds the absolute path of the slot at `idx` by walking `parent`
    /// links. The walk is bounded by the table size, so a corrupt parent
    /// cycle degrades to a partial path instead of hanging.
    pub fn full_path(&self, idx: u32) -> String {
        if idx == ROOT_SLOT {
            return "/".to_owned();
        }
        let mut parts = Vec::new();
        let mut cur = idx;
        let mut guard = 0;
        while cur != 0 && cur != ROOT_SLOT && guard < self.len() {
            let Some(entry) = self.get(cur) else {
                break;
            };
            if !entry.is_in_use() {
                break;
            }
            let name = entry.name();
            parts.push(if name.is_empty() {
                "unnamed".to_owned()
            } else {
                name
            });
            cur = entry.parent;
            guard += 1;
        }
        if parts.is_empty() {
            return "/".to_owned();
        }
        let mut path = String::new();
        for part in parts.iter().rev() {
            path.push('/');
            path.push_str(part);
        }
        path
    }
}

/// The in-memory map from absolute path to 1-based meta slot index.
///
/// Derived state: rebuilt from the table on mount and after any rename or
/// delete, maintained incrementally on create.
#[derive(Default)]
pub struct PathIndex {
    map: HashMap<String, u32>,
}

impl PathIndex {
    /// Rebuilds the index from every in-use slot of the table.
    pub fn rebuild(table: &MetaTable) -> Self {
        let mut map = HashMap::new();
        for (idx, _) in table.in_use() {
            map.insert(table.full_path(idx), idx);
        }
        Self { map }
    }

    /// Resolves an absolute path to its slot index.
    pub fn get(&self, path: &str) -> Option<u32> {
        self.map.get(path).copied()
    }

    /// Tells whether the path resolves.
    pub fn contains(&self, path: &str) -> bool {
        self.map.contains_key(path)
    }

    /// Registers a freshly created entry.
    pub fn insert(&mut self, path: String, idx: u32) {
        self.map.insert(path, idx);
    }

    /// Returns the number of indexed paths.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Tells whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Splits an absolute path into its parent path and basename.
///
/// Paths must start with `/` and have at least one component; there are no
/// `.` or `..` semantics. The basename must fit the on-disk name slot.
pub fn split_path(path: &str) -> OfsResult<(String, String)> {
    if !path.starts_with('/') {
        return Err(OfsError::InvalidPath);
    }
    let tokens: Vec<&str> = path.split('/').filter(|t| !t.is_empty()).collect();
    let Some(basename) = tokens.last() else {
        return Err(OfsError::InvalidPath);
    };
    if basename.len() > NAME_MAX {
        return Err(OfsError::InvalidOperation);
    }
    let parent = if tokens.len() == 1 {
        "/".to_owned()
    } else {
        let mut parent = String::new();
        for token in &tokens[..tokens.len() - 1] {
            parent.push('/');
            parent.push_str(token);
        }
        parent
    };
    Ok((parent, (*basename).to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{KIND_DIRECTORY, KIND_FILE, SLOT_IN_USE};

    fn entry(kind: u8, parent: u32, name: &str) -> MetaEntry {
        let mut e = MetaEntry::free();
        e.valid = SLOT_IN_USE;
        e.kind = kind;
        e.parent = parent;
        e.set_name(name);
        e
    }

    fn sample_table() -> MetaTable {
        let mut table = MetaTable::new(8);
        table.set(1, entry(KIND_DIRECTORY, 0, "root"));
        table.set(2, entry(KIND_DIRECTORY, 1, "docs"));
        table.set(3, entry(KIND_FILE, 2, "test.txt"));
        table
    }

    #[test]
    fn full_path_walks_parents() {
        let table = sample_table();
        assert_eq!(table.full_path(1), "/");
        assert_eq!(table.full_path(2), "/docs");
        assert_eq!(table.full_path(3), "/docs/test.txt");
    }

    #[test]
    fn full_path_survives_parent_cycles() {
        let mut table = sample_table();
        let mut looped = entry(KIND_DIRECTORY, 4, "loop");
        looped.parent = 4;
        table.set(4, looped);
        // Must terminate; the exact result is unspecified
        let _ = table.full_path(4);
    }

    #[test]
    fn rebuild_indexes_all_live_slots() {
        let table = sample_table();
        let index = PathIndex::rebuild(&table);
        assert_eq!(index.len(), 3);
        assert_eq!(index.get("/"), Some(1));
        assert_eq!(index.get("/docs"), Some(2));
        assert_eq!(index.get("/docs/test.txt"), Some(3));
        assert!(!index.contains("/docs/other.txt"));
    }

    #[test]
    fn find_free_slot_skips_live_entries() {
        let table = sample_table();
        assert_eq!(table.find_free_slot(), 4);
        let full = {
            let mut t = MetaTable::new(2);
            t.set(1, entry(KIND_DIRECTORY, 0, "root"));
            t.set(2, entry(KIND_FILE, 1, "f"));
            t
        };
        assert_eq!(full.find_free_slot(), 0);
    }

    #[test]
    fn split_path_components() {
        assert_eq!(
            split_path("/a").unwrap(),
            ("/".to_owned(), "a".to_owned())
        );
        assert_eq!(
            split_path("/docs/test.txt").unwrap(),
            ("/docs".to_owned(), "test.txt".to_owned())
        );
        assert_eq!(
            split_path("//docs//x").unwrap(),
            ("/docs".to_owned(), "x".to_owned())
        );
        assert_eq!(split_path("docs").unwrap_err(), OfsError::InvalidPath);
        assert_eq!(split_path("/").unwrap_err(), OfsError::InvalidPath);
        assert_eq!(
            split_path("/a-name-too-long").unwrap_err(),
            OfsError::InvalidOperation
        );
    }
}
