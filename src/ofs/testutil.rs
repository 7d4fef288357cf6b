//! Shared test helpers.

use crate::instance::FsInstance;
use crate::layout::{KIND_FILE, MetaEntry, ROOT_SLOT};
use crate::meta::PathIndex;
use crate::util::ceil_division;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process;

/// A container file under the system temporary directory, removed on drop.
pub struct TempContainer {
    path: PathBuf,
}

impl TempContainer {
    /// Reserves a process-unique path for the test `name`.
    pub fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!("ofs-{name}-{}.omni", process::id()));
        let _ = fs::remove_file(&path);
        Self { path }
    }

    /// Returns the container path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the file with `size` zero-filled bytes and returns the open
    /// handle.
    pub fn create(&self, size: u64) -> File {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .unwrap();
        file.set_len(size).unwrap();
        file
    }
}

impl Drop for TempContainer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Asserts the structural invariants of a mounted container: root shape,
/// parent/child consistency, chain-length law, bitmap agreement and path
/// uniqueness.
pub fn check_invariants(inst: &mut FsInstance) {
    let root = inst.meta.slot(ROOT_SLOT).unwrap();
    assert!(root.is_dir(), "root slot must be a live directory");
    assert_eq!({ root.parent }, 0);

    let live: Vec<(u32, MetaEntry)> = inst.meta.in_use().map(|(idx, e)| (idx, *e)).collect();
    let mut reachable = Vec::new();
    for (idx, entry) in &live {
        if *idx != ROOT_SLOT {
            let parent = inst.meta.slot(entry.parent).unwrap();
            assert!(parent.is_dir(), "parent of slot {idx} must be a directory");
            let children = inst.dir_children(&parent).unwrap();
            assert_eq!(
                children.iter().filter(|&&c| c == *idx).count(),
                1,
                "slot {idx} must appear exactly once in its parent"
            );
        }
        let chain = inst.dev.chain(entry.start_index).unwrap();
        if entry.kind == KIND_FILE {
            let payload = u64::from(inst.dev.payload_size());
            assert_eq!(
                chain.len() as u64,
                ceil_division(entry.total_size, payload),
                "chain length of slot {idx} must match its size"
            );
            if entry.total_size == 0 {
                assert_eq!({ entry.start_index }, 0);
            }
        }
        reachable.extend(chain);
    }
    reachable.sort_unstable();
    let total = reachable.len();
    reachable.dedup();
    assert_eq!(total, reachable.len(), "no two chains may share a block");
    assert_eq!(
        inst.bitmap.used_count(),
        reachable.len() as u64,
        "bitmap population must equal the reachable set"
    );
    for &block in &reachable {
        assert!(inst.bitmap.is_allocated(block));
    }

    let index = PathIndex::rebuild(&inst.meta);
    assert_eq!(
        index.len(),
        live.len(),
        "absolute paths of live slots must be unique"
    );
}
