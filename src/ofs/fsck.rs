//! Offline consistency check and repair.
//!
//! There is no journal: a crash between two region flushes can leak
//! allocated blocks, lose allocated bits, or leave a slot pointing at a
//! half-linked chain. The repair pass walks every chain reachable from the
//! live meta slots, clears slots whose parent no longer resolves, and
//! rebuilds the bitmap from the reachable set. It must run on an unmounted
//! container.

use crate::bitmap::Bitmap;
use crate::device::BlockDevice;
use crate::error::{OfsError, OfsResult};
use crate::instance::Geometry;
use crate::layout::{OmniHeader, ROOT_SLOT, Record, SLOT_FREE};
use crate::meta::MetaTable;
use log::{info, warn};
use std::collections::HashSet;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Read;
use std::mem::size_of;
use std::path::Path;

/// Summary of one repair pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsckReport {
    /// Slots cleared because their parent no longer resolves to a live
    /// directory.
    pub cleared_slots: u32,
    /// Blocks that were marked allocated but are unreachable; freed.
    pub leaked_blocks: u64,
    /// Blocks that were reachable but marked free; re-marked allocated.
    pub lost_blocks: u64,
}

impl FsckReport {
    /// Tells whether the pass changed anything.
    pub fn clean(&self) -> bool {
        self.cleared_slots == 0 && self.leaked_blocks == 0 && self.lost_blocks == 0
    }
}

impl fmt::Display for FsckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clean() {
            write!(f, "clean")
        } else {
            write!(
                f,
                "{} slots cleared, {} blocks freed, {} blocks recovered",
                self.cleared_slots, self.leaked_blocks, self.lost_blocks
            )
        }
    }
}

/// Checks and repairs the container at `path`, persisting the repaired meta
/// table and bitmap.
pub fn fsck(path: &Path) -> OfsResult<FsckReport> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut buf = [0; size_of::<OmniHeader>()];
    file.read_exact(&mut buf)?;
    let header = OmniHeader::from_bytes(&buf);
    if !header.magic_ok() {
        return Err(OfsError::InvalidConfig);
    }
    let geom = Geometry::from_header(&header)?;
    let mut dev = BlockDevice::new(
        file,
        geom.block_size as u32,
        geom.blocks_offset,
        geom.num_blocks,
    );

    let mut buf = vec![0; MetaTable::byte_len(geom.max_files)];
    dev.read_at(geom.meta_table_offset, &mut buf)?;
    let mut meta = MetaTable::from_bytes(&buf, geom.max_files);

    let mut buf = vec![0; geom.bitmap_bytes()];
    dev.read_at(geom.bitmap_offset, &mut buf)?;
    let bitmap = Bitmap::from_bytes(buf, geom.num_blocks);

    if !meta.slot(ROOT_SLOT)?.is_dir() {
        warn!("root slot is not a live directory, refusing to repair");
        return Err(OfsError::InvalidConfig);
    }

    let mut report = FsckReport::default();

    // Clear slots whose parent is gone. Clearing a directory orphans its
    // children, so iterate until the table settles.
    loop {
        let dangling: Vec<u32> = meta
            .in_use()
            .filter(|&(idx, entry)| {
                idx != ROOT_SLOT && meta.get(entry.parent).is_none_or(|p| !p.is_dir())
            })
            .map(|(idx, _)| idx)
            .collect();
        if dangling.is_empty() {
            break;
        }
        for idx in dangling {
            warn!("clearing dangling slot {idx} (`{}`)", meta.full_path(idx));
            let mut entry = meta.slot(idx)?;
            entry.valid = SLOT_FREE;
            entry.start_index = 0;
            entry.total_size = 0;
            meta.set(idx, entry);
            report.cleared_slots += 1;
        }
    }

    // Union of the blocks reachable from every live slot
    let mut reachable = HashSet::new();
    for (idx, start) in meta
        .in_use()
        .map(|(idx, entry)| (idx, entry.start_index))
        .collect::<Vec<_>>()
    {
        let mut cur = start;
        while cur != 0 && cur <= geom.num_blocks {
            if !reachable.insert(cur) {
                warn!("chain of slot {idx} revisits block {cur}, truncating the walk");
                break;
            }
            match dev.read_next(cur) {
                Ok(next) => cur = next,
                Err(_) => break,
            }
        }
    }

    for idx in 1..=geom.num_blocks {
        match (bitmap.is_allocated(idx), reachable.contains(&idx)) {
            (true, false) => report.leaked_blocks += 1,
            (false, true) => report.lost_blocks += 1,
            _ => {}
        }
    }
    let mut bitmap = bitmap;
    bitmap.reset_to(&reachable.iter().copied().collect::<Vec<_>>());

    let bytes = meta.as_bytes().to_vec();
    dev.write_at(geom.meta_table_offset, &bytes)?;
    let bytes = bitmap.as_bytes().to_vec();
    dev.write_at(geom.bitmap_offset, &bytes)?;
    dev.flush()?;
    info!("fsck of `{}`: {report}", path.display());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::instance::FsInstance;
    use crate::testutil::TempContainer;

    fn setup(name: &str) -> (TempContainer, Config) {
        let cfg = Config {
            total_size: 1 << 20,
            block_size: 512,
            max_files: 64,
            max_users: 8,
            ..Config::default()
        };
        let tmp = TempContainer::new(name);
        (tmp, cfg)
    }

    fn populate(tmp: &TempContainer, cfg: &Config) {
        let mut inst = FsInstance::mount(tmp.path(), cfg).unwrap();
        let s = inst.user_login("admin", "admin123").unwrap().session_id;
        inst.dir_create(&s, "/docs").unwrap();
        inst.file_create(&s, "/docs/a.txt", &[7u8; 2000]).unwrap();
        inst.file_create(&s, "/b.txt", b"top-level").unwrap();
        inst.shutdown().unwrap();
    }

    #[test]
    fn clean_container_stays_clean() {
        let (tmp, cfg) = setup("fsck-clean");
        populate(&tmp, &cfg);
        let report = fsck(tmp.path()).unwrap();
        assert!(report.clean());

        // The container must still mount and read back
        let mut inst = FsInstance::mount(tmp.path(), &cfg).unwrap();
        let s = inst.user_login("admin", "admin123").unwrap().session_id;
        assert_eq!(inst.file_read(&s, "/b.txt").unwrap(), b"top-level");
        inst.shutdown().unwrap();
    }

    #[test]
    fn leaked_blocks_are_freed() {
        let (tmp, cfg) = setup("fsck-leak");
        populate(&tmp, &cfg);
        // Simulate a crash window: mark two free blocks as allocated
        {
            let mut inst = FsInstance::mount(tmp.path(), &cfg).unwrap();
            let leaked = inst.bitmap.allocate(2);
            assert_eq!(leaked.len(), 2);
            inst.persist_bitmap().unwrap();
            inst.shutdown().unwrap();
        }
        let report = fsck(tmp.path()).unwrap();
        assert_eq!(report.leaked_blocks, 2);
        assert_eq!(report.cleared_slots, 0);
        assert!(fsck(tmp.path()).unwrap().clean());
    }

    #[test]
    fn dangling_slots_are_cleared() {
        let (tmp, cfg) = setup("fsck-dangling");
        populate(&tmp, &cfg);
        {
            // Break /docs by freeing its slot behind the engine's back,
            // orphaning /docs/a.txt
            let mut inst = FsInstance::mount(tmp.path(), &cfg).unwrap();
            let docs = inst.path_index.get("/docs").unwrap();
            let mut entry = inst.meta.slot(docs).unwrap();
            entry.valid = SLOT_FREE;
            inst.meta.set(docs, entry);
            inst.persist_meta().unwrap();
            inst.shutdown().unwrap();
        }
        let report = fsck(tmp.path()).unwrap();
        assert_eq!(report.cleared_slots, 1);
        // The orphan's blocks are unreachable now and must have been freed
        assert!(report.leaked_blocks > 0);

        let mut inst = FsInstance::mount(tmp.path(), &cfg).unwrap();
        let s = inst.user_login("admin", "admin123").unwrap().session_id;
        assert_eq!(
            inst.file_read(&s, "/docs/a.txt").unwrap_err(),
            OfsError::NotFound
        );
        assert_eq!(inst.file_read(&s, "/b.txt").unwrap(), b"top-level");
        inst.shutdown().unwrap();
    }
}
