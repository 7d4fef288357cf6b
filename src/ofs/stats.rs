//! Aggregate statistics, metadata views and permission updates.

use crate::error::{OfsError, OfsResult};
use crate::instance::FsInstance;
use crate::layout::MetaEntry;
use crate::util::now_secs;
use crate::views::{FileEntryView, FileMetadataView, FsStats};

impl FsInstance {
    /// Builds the observable view of a meta slot.
    pub(crate) fn entry_view(&self, idx: u32, entry: &MetaEntry) -> FileEntryView {
        let owner = self
            .users
            .get(entry.owner_id)
            .map(|user| user.username())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "unknown".to_owned());
        FileEntryView {
            name: entry.name(),
            kind: entry.kind,
            size: entry.total_size,
            permissions: entry.permissions,
            created_time: entry.created_time,
            modified_time: entry.modified_time,
            owner,
            inode: idx,
        }
    }

    /// Returns the metadata view of the entry at `path`, including its chain
    /// footprint on the device.
    pub fn get_metadata(&mut self, session: &str, path: &str) -> OfsResult<FileMetadataView> {
        self.session(session)?;
        let idx = self.resolve(path)?;
        let entry = self.meta.slot(idx)?;
        if !entry.is_in_use() {
            return Err(OfsError::NotFound);
        }
        let blocks_used = self.dev.chain(entry.start_index)?.len() as u64;
        Ok(FileMetadataView {
            path: path.to_owned(),
            entry: self.entry_view(idx, &entry),
            blocks_used,
            actual_size: blocks_used * self.geom.block_size,
        })
    }

    /// Overwrites the permission bits of the entry at `path`.
    ///
    /// No access-control side effect is applied retroactively; the bits are
    /// metadata only.
    pub fn set_permissions(&mut self, session: &str, path: &str, mode: u32) -> OfsResult<()> {
        self.session(session)?;
        let idx = self.resolve(path)?;
        let mut entry = self.meta.slot(idx)?;
        if !entry.is_in_use() {
            return Err(OfsError::NotFound);
        }
        entry.permissions = mode;
        entry.modified_time = now_secs();
        self.meta.set(idx, entry);
        self.persist_meta()?;
        self.flush()
    }

    /// Returns the aggregate counters of the mounted container.
    pub fn get_stats(&self, session: &str) -> OfsResult<FsStats> {
        self.session(session)?;
        let num_blocks = u64::from(self.dev.num_blocks());
        let used_blocks = self.bitmap.used_count();
        let free_blocks = num_blocks - used_blocks;
        let mut total_files = 0;
        let mut total_directories = 0;
        for (_, entry) in self.meta.in_use() {
            if entry.kind == crate::layout::KIND_FILE {
                total_files += 1;
            } else {
                total_directories += 1;
            }
        }
        let fragmentation = if free_blocks > 0 {
            100.0 * (1.0 - used_blocks as f64 / num_blocks as f64)
        } else {
            0.0
        };
        Ok(FsStats {
            total_size: self.geom.total_size,
            used_space: used_blocks * self.geom.block_size,
            free_space: free_blocks * self.geom.block_size,
            total_files,
            total_directories,
            total_users: self.users.active().count() as u32,
            active_sessions: self.sessions.len() as u32,
            fragmentation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::instance::FsInstance;
    use crate::testutil::TempContainer;

    fn mounted(name: &str) -> (TempContainer, FsInstance, String) {
        let cfg = Config {
            total_size: 1 << 18,
            block_size: 512,
            max_files: 32,
            max_users: 4,
            ..Config::default()
        };
        let tmp = TempContainer::new(name);
        let mut inst = FsInstance::mount(tmp.path(), &cfg).unwrap();
        let session = inst.user_login("admin", "admin123").unwrap().session_id;
        (tmp, inst, session)
    }

    #[test]
    fn metadata_reports_the_chain_footprint() {
        let (_tmp, mut inst, s) = mounted("stats-metadata");
        inst.file_create(&s, "/blob", &[5; 1500]).unwrap();
        let meta = inst.get_metadata(&s, "/blob").unwrap();
        assert_eq!(meta.path, "/blob");
        assert_eq!(meta.entry.name, "blob");
        assert_eq!(meta.entry.size, 1500);
        assert_eq!(meta.entry.permissions, 0o644);
        assert_eq!(meta.entry.owner, "admin");
        assert_eq!(meta.blocks_used, 3);
        assert_eq!(meta.actual_size, 3 * 512);

        let root = inst.get_metadata(&s, "/").unwrap();
        assert_eq!(root.entry.kind, crate::layout::KIND_DIRECTORY);
        assert_eq!(root.blocks_used, 1);
        inst.shutdown().unwrap();
    }

    #[test]
    fn set_permissions_is_idempotent() {
        let (_tmp, mut inst, s) = mounted("stats-perms");
        inst.file_create(&s, "/f", b"x").unwrap();
        inst.set_permissions(&s, "/f", 0o600).unwrap();
        let once = inst.get_metadata(&s, "/f").unwrap().entry.permissions;
        inst.set_permissions(&s, "/f", 0o600).unwrap();
        let twice = inst.get_metadata(&s, "/f").unwrap().entry.permissions;
        assert_eq!(once, 0o600);
        assert_eq!(once, twice);
        assert_eq!(
            inst.set_permissions(&s, "/missing", 0o600).unwrap_err(),
            OfsError::NotFound
        );
        inst.shutdown().unwrap();
    }

    #[test]
    fn stats_track_usage_and_fragmentation() {
        let (_tmp, mut inst, s) = mounted("stats-usage");
        let empty = inst.get_stats(&s).unwrap();
        assert_eq!(empty.total_files, 0);
        assert_eq!(empty.total_directories, 1);
        assert_eq!(empty.total_users, 1);
        assert_eq!(empty.active_sessions, 1);
        assert_eq!(empty.used_space, 0);
        // An all-free container reads as fully fragmented by the formula
        assert_eq!(empty.fragmentation, 100.0);

        inst.file_create(&s, "/blob", &[1; 1500]).unwrap();
        let stats = inst.get_stats(&s).unwrap();
        assert_eq!(stats.total_files, 1);
        // Three content blocks plus the root head block
        assert_eq!(stats.used_space, 4 * 512);
        assert_eq!(stats.free_space, stats.total_size - 4 * 512 - reserved(&inst));
        assert!(stats.fragmentation < 100.0);
        inst.shutdown().unwrap();
    }

    /// Bytes of the container that are not block storage.
    fn reserved(inst: &FsInstance) -> u64 {
        inst.geometry().total_size
            - u64::from(inst.geometry().num_blocks) * inst.geometry().block_size
    }
}
