/*
 * Copyright 2025 OmniFS contributors
 *
 * This file is part of OmniFS.
 *
 * OmniFS is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * OmniFS is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * OmniFS. If not, see <https://www.gnu.org/licenses/>.
 */

//! The mounted container instance: geometry, format, mount and the
//! persistence of the fixed regions.
//!
//! The container regions are, in order:
//! `[Header][UserTable][MetaTable][BlockBitmap][BlockRegion]`.

use crate::bitmap::Bitmap;
use crate::codec::Transcoder;
use crate::config::Config;
use crate::device::BlockDevice;
use crate::error::{OfsError, OfsResult};
use crate::layout::{
    FORMAT_VERSION, KIND_DIRECTORY, MetaEntry, OmniHeader, ROOT_SLOT, Record, SLOT_IN_USE,
    UserInfo,
};
use crate::meta::{MetaTable, PathIndex};
use crate::session::SessionRegistry;
use crate::user::{ROLE_ADMIN, UserIndex, UserTable, fingerprint};
use crate::util::{ceil_division, now_secs};
use log::{info, warn};
use rand_core::OsRng;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::mem::size_of;
use std::path::Path;

/// Smallest accepted block size.
pub const BLOCK_SIZE_MIN: u64 = 128;

/// The resolved region layout of a container.
#[derive(Clone, Copy, Debug)]
pub struct Geometry {
    /// Total size of the container file.
    pub total_size: u64,
    /// Size of the header region.
    pub header_size: u64,
    /// Size of one block.
    pub block_size: u64,
    /// Number of user table slots.
    pub max_users: u32,
    /// Number of meta table slots.
    pub max_files: u32,
    /// Number of blocks in the block region.
    pub num_blocks: u32,
    /// Offset of the user table.
    pub user_table_offset: u64,
    /// Offset of the meta table.
    pub meta_table_offset: u64,
    /// Offset of the allocation bitmap.
    pub bitmap_offset: u64,
    /// Offset of the block region.
    pub blocks_offset: u64,
}

impl Geometry {
    /// Solves the region layout for the given configuration.
    ///
    /// The bitmap size and the block count depend on each other, so both are
    /// iterated to a fixed point. Format and mount share this solver, which
    /// keeps `blocks_offset` identical on both paths.
    pub fn solve(
        total_size: u64,
        header_size: u64,
        block_size: u64,
        max_files: u32,
        max_users: u32,
    ) -> OfsResult<Self> {
        if header_size < size_of::<OmniHeader>() as u64
            || block_size < BLOCK_SIZE_MIN
            || total_size <= header_size
            || max_files == 0
            || max_users == 0
        {
            return Err(OfsError::InvalidConfig);
        }
        let user_table_size = UserTable::byte_len(max_users) as u64;
        let meta_table_size = MetaTable::byte_len(max_files) as u64;
        let fixed = header_size + user_table_size + meta_table_size;
        let available = total_size.checked_sub(fixed).ok_or(OfsError::InvalidConfig)?;
        if available < block_size {
            return Err(OfsError::InvalidConfig);
        }

        let mut num_blocks = available / block_size;
        let mut bitmap_bytes = ceil_division(num_blocks, 8);
        loop {
            let content = available
                .checked_sub(bitmap_bytes)
                .ok_or(OfsError::InvalidConfig)?;
            let blocks = content / block_size;
            let bitmap = ceil_division(blocks, 8);
            if blocks == num_blocks && bitmap == bitmap_bytes {
                break;
            }
            num_blocks = blocks;
            bitmap_bytes = bitmap;
        }
        if num_blocks == 0 || num_blocks > u64::from(u32::MAX) {
            return Err(OfsError::InvalidConfig);
        }

        let user_table_offset = header_size;
        let meta_table_offset = user_table_offset + user_table_size;
        let bitmap_offset = meta_table_offset + meta_table_size;
        Ok(Self {
            total_size,
            header_size,
            block_size,
            max_users,
            max_files,
            num_blocks: num_blocks as u32,
            user_table_offset,
            meta_table_offset,
            bitmap_offset,
            blocks_offset: bitmap_offset + bitmap_bytes,
        })
    }

    /// Derives the layout back from a persisted header, cross-checking the
    /// stored offsets against the solver.
    pub fn from_header(header: &OmniHeader) -> OfsResult<Self> {
        let meta_region = u64::from(header.bitmap_offset)
            .checked_sub(u64::from(header.meta_table_offset))
            .ok_or(OfsError::InvalidConfig)?;
        let entry_size = size_of::<MetaEntry>() as u64;
        if meta_region == 0 || meta_region % entry_size != 0 {
            return Err(OfsError::InvalidConfig);
        }
        let max_files = (meta_region / entry_size) as u32;

        let geom = Self::solve(
            header.total_size,
            header.header_size,
            header.block_size,
            max_files,
            header.max_users,
        )?;
        if geom.user_table_offset != u64::from(header.user_table_offset)
            || geom.meta_table_offset != u64::from(header.meta_table_offset)
            || geom.bitmap_offset != u64::from(header.bitmap_offset)
        {
            return Err(OfsError::InvalidConfig);
        }
        Ok(geom)
    }

    /// Returns the payload capacity of one block.
    pub fn payload_size(&self) -> u64 {
        self.block_size - 4
    }

    /// Returns the on-disk size of the bitmap region.
    pub fn bitmap_bytes(&self) -> usize {
        (self.blocks_offset - self.bitmap_offset) as usize
    }
}

/// A mounted container.
///
/// The instance exclusively owns the container file and every derived table
/// for the lifetime of the mount. Callers must never run two operations
/// against the same instance concurrently; [`crate::dispatch`] provides the
/// serializing queue that upholds this.
pub struct FsInstance {
    pub(crate) header: OmniHeader,
    pub(crate) geom: Geometry,
    pub(crate) dev: BlockDevice,
    pub(crate) users: UserTable,
    pub(crate) user_index: UserIndex,
    pub(crate) meta: MetaTable,
    pub(crate) bitmap: Bitmap,
    pub(crate) transcoder: Transcoder,
    pub(crate) path_index: PathIndex,
    pub(crate) sessions: SessionRegistry,
    pub(crate) next_meta_index: u64,
}

impl FsInstance {
    /// Formats a fresh container at `path` from the configuration.
    ///
    /// The file is truncated to exactly `total_size` zero-filled bytes, then
    /// the header, the user table (slot 0 = administrator), the meta table
    /// (slot 1 = root directory) and an all-free bitmap are written.
    pub fn format(path: &Path, cfg: &Config) -> OfsResult<()> {
        let geom = Geometry::solve(
            cfg.total_size,
            cfg.header_size,
            cfg.block_size,
            cfg.max_files,
            cfg.max_users,
        )?;
        info!(
            "formatting `{}`: {} blocks of {} bytes, {} meta slots, {} user slots",
            path.display(),
            geom.num_blocks,
            geom.block_size,
            geom.max_files,
            geom.max_users
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(geom.total_size)?;

        let now = now_secs();
        let mut header = OmniHeader::zeroed();
        header.magic = crate::layout::MAGIC;
        header.format_version = FORMAT_VERSION;
        header.total_size = geom.total_size;
        header.header_size = geom.header_size;
        header.block_size = geom.block_size;
        header.config_hash = fingerprint(&cfg.canonical());
        header.config_timestamp = now;
        header.user_table_offset = geom.user_table_offset as u32;
        header.max_users = geom.max_users;
        header.meta_table_offset = geom.meta_table_offset as u32;
        header.bitmap_offset = geom.bitmap_offset as u32;
        header.set_next_meta_index(u64::from(ROOT_SLOT) + 1);
        if cfg.encode_content {
            header.set_encoding_map(&Transcoder::random_map(&mut OsRng));
            info!("content encoding enabled with a random permutation");
        }

        let mut users = UserTable::new(geom.max_users);
        users.set(
            0,
            UserInfo::new(
                &cfg.admin_username,
                &fingerprint(&cfg.admin_password),
                ROLE_ADMIN,
                now,
            ),
        );

        let mut meta = MetaTable::new(geom.max_files);
        let mut root = MetaEntry::free();
        root.valid = SLOT_IN_USE;
        root.kind = KIND_DIRECTORY;
        root.parent = 0;
        root.set_name("root");
        root.permissions = 0o755;
        root.created_time = now;
        root.modified_time = now;
        meta.set(ROOT_SLOT, root);

        let mut dev = BlockDevice::new(
            file,
            geom.block_size as u32,
            geom.blocks_offset,
            geom.num_blocks,
        );
        dev.write_at(0, header.as_bytes())?;
        dev.write_at(geom.user_table_offset, users.as_bytes())?;
        dev.write_at(geom.meta_table_offset, meta.as_bytes())?;
        dev.write_at(geom.bitmap_offset, &vec![0; geom.bitmap_bytes()])?;
        dev.flush()?;
        Ok(())
    }

    /// Mounts the container at `path`, formatting it first when the file is
    /// missing, carries a bad magic, or has lost its root directory.
    pub fn mount(path: &Path, cfg: &Config) -> OfsResult<Self> {
        if !Self::is_formatted(path) {
            warn!(
                "container `{}` is missing or unusable, reformatting",
                path.display()
            );
            Self::format(path, cfg)?;
        }
        Self::open_mounted(path)
    }

    /// Tells whether `path` holds a container with a sane root slot.
    fn is_formatted(path: &Path) -> bool {
        let Ok(mut file) = File::open(path) else {
            return false;
        };
        let mut buf = [0; size_of::<OmniHeader>()];
        if file.read_exact(&mut buf).is_err() {
            return false;
        }
        let header = OmniHeader::from_bytes(&buf);
        if !header.magic_ok() {
            return false;
        }
        let Ok(geom) = Geometry::from_header(&header) else {
            return false;
        };
        let mut dev = BlockDevice::new(file, geom.block_size as u32, geom.blocks_offset, 1);
        let mut buf = [0; size_of::<MetaEntry>()];
        if dev.read_at(geom.meta_table_offset, &mut buf).is_err() {
            return false;
        }
        let root = MetaEntry::from_bytes(&buf);
        root.is_dir()
    }

    /// Opens an already formatted container.
    fn open_mounted(path: &Path) -> OfsResult<Self> {
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

        let mut buf = vec![0; UserTable::byte_len(geom.max_users)];
        dev.read_at(geom.user_table_offset, &mut buf)?;
        let users = UserTable::from_bytes(&buf, geom.max_users);

        let mut buf = vec![0; MetaTable::byte_len(geom.max_files)];
        dev.read_at(geom.meta_table_offset, &mut buf)?;
        let meta = MetaTable::from_bytes(&buf, geom.max_files);

        let mut buf = vec![0; geom.bitmap_bytes()];
        dev.read_at(geom.bitmap_offset, &mut buf)?;
        let bitmap = Bitmap::from_bytes(buf, geom.num_blocks);

        let transcoder = Transcoder::new(header.encoding_map())?;
        let next_meta_index = match header.next_meta_index() {
            0 => u64::from(ROOT_SLOT) + 1,
            n => n,
        };

        let user_index = UserIndex::rebuild(&users);
        let path_index = PathIndex::rebuild(&meta);
        info!(
            "mounted `{}`: {} paths indexed, {} of {} blocks in use",
            path.display(),
            path_index.len(),
            bitmap.used_count(),
            geom.num_blocks
        );
        Ok(Self {
            header,
            geom,
            dev,
            users,
            user_index,
            meta,
            bitmap,
            transcoder,
            path_index,
            sessions: SessionRegistry::default(),
            next_meta_index,
        })
    }

    /// Persists every region and releases the container.
    pub fn shutdown(mut self) -> OfsResult<()> {
        self.persist_header()?;
        self.persist_users()?;
        self.persist_meta()?;
        self.persist_bitmap()?;
        self.flush()
    }

    /// Returns the container geometry.
    pub fn geometry(&self) -> &Geometry {
        &self.geom
    }

    pub(crate) fn persist_header(&mut self) -> OfsResult<()> {
        self.header.set_next_meta_index(self.next_meta_index);
        let bytes = self.header.as_bytes().to_vec();
        self.dev.write_at(0, &bytes)
    }

    pub(crate) fn persist_users(&mut self) -> OfsResult<()> {
        let bytes = self.users.as_bytes().to_vec();
        self.dev.write_at(self.geom.user_table_offset, &bytes)
    }

    pub(crate) fn persist_meta(&mut self) -> OfsResult<()> {
        let bytes = self.meta.as_bytes().to_vec();
        self.dev.write_at(self.geom.meta_table_offset, &bytes)
    }

    pub(crate) fn persist_bitmap(&mut self) -> OfsResult<()> {
        let bytes = self.bitmap.as_bytes().to_vec();
        self.dev.write_at(self.geom.bitmap_offset, &bytes)
    }

    pub(crate) fn flush(&mut self) -> OfsResult<()> {
        self.dev.flush()
    }

    /// Resolves an absolute path through the path index.
    pub(crate) fn resolve(&self, path: &str) -> OfsResult<u32> {
        self.path_index.get(path).ok_or(OfsError::NotFound)
    }

    /// Bumps the persisted next-meta-index hint past `slot`.
    pub(crate) fn bump_meta_hint(&mut self, slot: u32) {
        if self.next_meta_index <= u64::from(slot) {
            self.next_meta_index = u64::from(slot) + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TempContainer;

    #[test]
    fn solve_fixed_point_defaults() {
        let geom = Geometry::solve(104_857_600, 512, 4096, 1000, 50).unwrap();
        assert_eq!(geom.user_table_offset, 512);
        assert_eq!(geom.meta_table_offset, 512 + 50 * 128);
        assert_eq!(geom.bitmap_offset, geom.meta_table_offset + 1000 * 72);
        // The bitmap must cover every block and fit between its offset and
        // the block region
        let bitmap_bytes = (geom.blocks_offset - geom.bitmap_offset) as u64;
        assert!(bitmap_bytes * 8 >= u64::from(geom.num_blocks));
        assert!(
            geom.blocks_offset + u64::from(geom.num_blocks) * geom.block_size <= geom.total_size
        );
        // No full block is wasted after the bitmap
        assert!(
            geom.total_size - (geom.blocks_offset + u64::from(geom.num_blocks) * geom.block_size)
                < geom.block_size
        );
    }

    #[test]
    fn solve_rejects_bad_configs() {
        assert_eq!(
            Geometry::solve(100, 512, 4096, 10, 5).unwrap_err(),
            OfsError::InvalidConfig
        );
        assert_eq!(
            Geometry::solve(1 << 20, 256, 4096, 10, 5).unwrap_err(),
            OfsError::InvalidConfig
        );
        assert_eq!(
            Geometry::solve(1 << 20, 512, 64, 10, 5).unwrap_err(),
            OfsError::InvalidConfig
        );
        // Tables larger than the container
        assert_eq!(
            Geometry::solve(1 << 16, 512, 4096, 1000, 50).unwrap_err(),
            OfsError::InvalidConfig
        );
    }

    #[test]
    fn format_then_mount_roundtrip() {
        let tmp = TempContainer::new("instance-roundtrip");
        let cfg = Config {
            total_size: 1 << 20,
            ..Config::default()
        };
        FsInstance::format(tmp.path(), &cfg).unwrap();

        let inst = FsInstance::mount(tmp.path(), &cfg).unwrap();
        assert_eq!(inst.geom.max_files, 1000);
        assert_eq!(inst.geom.max_users, 50);
        let root = inst.meta.slot(ROOT_SLOT).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.name(), "root");
        assert_eq!({ root.parent }, 0);
        assert_eq!(inst.path_index.get("/"), Some(ROOT_SLOT));
        assert_eq!(inst.users.find_active("admin"), Some(0));
        assert_eq!(inst.bitmap.used_count(), 0);
        assert_eq!(inst.next_meta_index, 2);
        assert!(inst.transcoder.is_identity());
        inst.shutdown().unwrap();
    }

    #[test]
    fn mount_formats_a_missing_container() {
        let tmp = TempContainer::new("instance-autoformat");
        let cfg = Config {
            total_size: 1 << 20,
            ..Config::default()
        };
        let inst = FsInstance::mount(tmp.path(), &cfg).unwrap();
        assert_eq!(inst.path_index.len(), 1);
        inst.shutdown().unwrap();
    }

    #[test]
    fn mount_reformats_a_torn_container() {
        let tmp = TempContainer::new("instance-reformat");
        let cfg = Config {
            total_size: 1 << 20,
            ..Config::default()
        };
        // Something that is not a container at all
        std::fs::write(tmp.path(), b"garbage").unwrap();
        let inst = FsInstance::mount(tmp.path(), &cfg).unwrap();
        assert!(inst.header.magic_ok());
        inst.shutdown().unwrap();
    }

    #[test]
    fn format_with_content_encoding() {
        let tmp = TempContainer::new("instance-encoded");
        let cfg = Config {
            total_size: 1 << 20,
            encode_content: true,
            ..Config::default()
        };
        let inst = FsInstance::mount(tmp.path(), &cfg).unwrap();
        assert!(!inst.transcoder.is_identity());
        inst.shutdown().unwrap();
    }
}
