//! On-disk record layouts of the container format.
//!
//! Every structure in this module is stored packed, without padding, in the
//! byte order of the machine that formatted the container (little-endian on
//! every supported target; see the guard at the bottom). Sizes are asserted
//! at build time.

use std::mem::{size_of, size_of_val};
use std::{ptr, slice};

/// Magic at the start of every container.
pub const MAGIC: [u8; 8] = *b"OMNIFS01";
/// Container format version written at format time.
pub const FORMAT_VERSION: u32 = 0x0001_0000;

/// `valid` value of a meta slot that is in use.
///
/// The on-disk semantics are inverted: `0` marks a live entry and `1` a free
/// one. Keep the constants, never the literals, in the code.
pub const SLOT_IN_USE: u8 = 0;
/// `valid` value of a free meta slot.
pub const SLOT_FREE: u8 = 1;

/// Entry kind of a regular file.
pub const KIND_FILE: u8 = 0;
/// Entry kind of a directory.
pub const KIND_DIRECTORY: u8 = 1;

/// 1-based meta slot index of the root directory.
pub const ROOT_SLOT: u32 = 1;
/// Maximum byte length of one path component. The name slot is 12 bytes and
/// keeps a trailing NUL.
pub const NAME_MAX: usize = 11;

/// Byte offset of the private-key placeholder inside [`OmniHeader::reserved`].
pub const RESERVED_PRIVATE_KEY: usize = 0;
/// Byte offset of the 256-byte encoding map inside [`OmniHeader::reserved`].
pub const RESERVED_ENCODING_MAP: usize = 64;
/// Byte offset of the next-meta-index hint inside [`OmniHeader::reserved`].
pub const RESERVED_NEXT_META: usize = 320;

/// The container header, stored at offset 0.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct OmniHeader {
    /// Must equal [`MAGIC`].
    pub magic: [u8; 8],
    /// Format version, see [`FORMAT_VERSION`].
    pub format_version: u32,
    /// Total size of the container file in bytes.
    pub total_size: u64,
    /// Size of the header region in bytes (at least 512).
    pub header_size: u64,
    /// Size of one block in bytes (at least 128).
    pub block_size: u64,
    /// Zero-filled placeholder.
    pub student_id: [u8; 32],
    /// Zero-filled placeholder.
    pub submission_date: [u8; 16],
    /// Fingerprint of the configuration the container was formatted with.
    pub config_hash: [u8; 64],
    /// Timestamp of the format operation.
    pub config_timestamp: u64,
    /// Offset of the user table region.
    pub user_table_offset: u32,
    /// Number of slots in the user table.
    pub max_users: u32,
    /// Offset of the meta table region.
    pub meta_table_offset: u32,
    /// Offset of the allocation bitmap region.
    pub bitmap_offset: u32,
    /// Reserved bytes; sub-fields at [`RESERVED_PRIVATE_KEY`],
    /// [`RESERVED_ENCODING_MAP`] and [`RESERVED_NEXT_META`].
    pub reserved: [u8; 340],
}

impl OmniHeader {
    /// Returns a zeroed header.
    pub fn zeroed() -> Self {
        Self::from_bytes(&[0; 512])
    }

    /// Tells whether the magic matches.
    pub fn magic_ok(&self) -> bool {
        self.magic == MAGIC
    }

    /// Returns the encoding map stored in the reserved region.
    pub fn encoding_map(&self) -> [u8; 256] {
        let mut map = [0; 256];
        map.copy_from_slice(&self.reserved[RESERVED_ENCODING_MAP..RESERVED_ENCODING_MAP + 256]);
        map
    }

    /// Stores the encoding map in the reserved region.
    pub fn set_encoding_map(&mut self, map: &[u8; 256]) {
        self.reserved[RESERVED_ENCODING_MAP..RESERVED_ENCODING_MAP + 256].copy_from_slice(map);
    }

    /// Returns the next-meta-index hint stored in the reserved region.
    pub fn next_meta_index(&self) -> u64 {
        let mut buf = [0; 8];
        buf.copy_from_slice(&self.reserved[RESERVED_NEXT_META..RESERVED_NEXT_META + 8]);
        u64::from_le_bytes(buf)
    }

    /// Stores the next-meta-index hint in the reserved region.
    pub fn set_next_meta_index(&mut self, index: u64) {
        self.reserved[RESERVED_NEXT_META..RESERVED_NEXT_META + 8]
            .copy_from_slice(&index.to_le_bytes());
    }
}

/// One record of the user table.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct UserInfo {
    /// NUL-padded login name.
    pub username: [u8; 32],
    /// Password fingerprint, see [`crate::user::fingerprint`].
    pub password_hash: [u8; 64],
    /// `0` for a normal user, `1` for an administrator.
    pub role: u32,
    /// Timestamp of the record's creation.
    pub created_time: u64,
    /// Timestamp of the last successful login.
    pub last_login: u64,
    /// `1` while the slot is in use.
    pub is_active: u8,
    /// Reserved bytes.
    pub reserved: [u8; 11],
}

impl UserInfo {
    /// Returns an inactive, zeroed record.
    pub fn inactive() -> Self {
        Self::from_bytes(&[0; 128])
    }

    /// Returns an active record with the given name, fingerprint and role.
    pub fn new(username: &str, password_hash: &[u8; 64], role: u32, now: u64) -> Self {
        let mut user = Self::inactive();
        let name = username.as_bytes();
        let len = name.len().min(user.username.len() - 1);
        user.username[..len].copy_from_slice(&name[..len]);
        user.password_hash = *password_hash;
        user.role = role;
        user.created_time = now;
        user.is_active = 1;
        user
    }

    /// Returns the login name up to the first NUL.
    pub fn username(&self) -> String {
        str_field(&self.username)
    }
}

/// One slot of the metadata table, describing a file or a directory.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct MetaEntry {
    /// [`SLOT_IN_USE`] or [`SLOT_FREE`]; note the inverted semantics.
    pub valid: u8,
    /// [`KIND_FILE`] or [`KIND_DIRECTORY`].
    pub kind: u8,
    /// 1-based slot index of the parent directory; `0` for the root's parent.
    pub parent: u32,
    /// NUL-padded entry name, at most [`NAME_MAX`] bytes.
    pub name: [u8; 12],
    /// 1-based index of the first block of the chain; `0` when empty.
    pub start_index: u32,
    /// Byte length of a file's content; `0` for directories.
    pub total_size: u64,
    /// Index of the owning record in the user table.
    pub owner_id: u32,
    /// Unix-style permission bits.
    pub permissions: u32,
    /// Timestamp of the entry's creation.
    pub created_time: u64,
    /// Timestamp of the last modification.
    pub modified_time: u64,
    /// Reserved bytes.
    pub reserved: [u8; 18],
}

impl MetaEntry {
    /// Returns a free slot.
    pub fn free() -> Self {
        let mut entry = Self::from_bytes(&[0; 72]);
        entry.valid = SLOT_FREE;
        entry.permissions = 0o644;
        entry
    }

    /// Tells whether the slot holds a live entry.
    pub fn is_in_use(&self) -> bool {
        self.valid == SLOT_IN_USE
    }

    /// Tells whether the slot holds a live directory.
    pub fn is_dir(&self) -> bool {
        self.is_in_use() && self.kind == KIND_DIRECTORY
    }

    /// Tells whether the slot holds a live regular file.
    pub fn is_file(&self) -> bool {
        self.is_in_use() && self.kind == KIND_FILE
    }

    /// Returns the entry name up to the first NUL.
    pub fn name(&self) -> String {
        str_field(&self.name)
    }

    /// Sets the entry name. The caller must have validated its length against
    /// [`NAME_MAX`].
    pub fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_MAX);
        self.name = [0; 12];
        self.name[..len].copy_from_slice(&bytes[..len]);
    }
}

/// Decodes a NUL-padded fixed-size string field.
fn str_field(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Marker for fixed-layout records that may be reinterpreted as raw bytes.
///
/// # Safety
///
/// Implementors must be `#[repr(C, packed)]` and valid for every bit pattern.
pub unsafe trait Record: Copy {
    /// Reinterprets the record as its on-disk bytes.
    fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts((self as *const Self).cast(), size_of::<Self>()) }
    }

    /// Reads one record back from a byte buffer.
    ///
    /// The buffer must hold at least `size_of::<Self>()` bytes.
    fn from_bytes(buf: &[u8]) -> Self {
        assert!(buf.len() >= size_of::<Self>());
        unsafe { ptr::read_unaligned(buf.as_ptr().cast()) }
    }
}

unsafe impl Record for OmniHeader {}
unsafe impl Record for UserInfo {}
unsafe impl Record for MetaEntry {}

/// Reinterprets a slice of records as its on-disk bytes.
pub fn records_as_bytes<T: Record>(records: &[T]) -> &[u8] {
    unsafe { slice::from_raw_parts(records.as_ptr().cast(), size_of_val(records)) }
}

/// Reads `n` consecutive records out of a byte buffer.
pub fn records_from_bytes<T: Record>(buf: &[u8], n: usize) -> Vec<T> {
    buf.chunks(size_of::<T>()).take(n).map(T::from_bytes).collect()
}

const _: () = assert!(size_of::<OmniHeader>() == 512);
const _: () = assert!(size_of::<UserInfo>() == 128);
const _: () = assert!(size_of::<MetaEntry>() == 72);

#[cfg(target_endian = "big")]
compile_error!("the container format is little-endian only");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_reserved_fields() {
        let mut header = OmniHeader::zeroed();
        header.set_next_meta_index(42);
        assert_eq!(header.next_meta_index(), 42);

        let mut map = [0u8; 256];
        for (i, b) in map.iter_mut().enumerate() {
            *b = i as u8;
        }
        header.set_encoding_map(&map);
        assert_eq!(header.encoding_map(), map);
        // The two sub-fields must not overlap
        assert_eq!(header.next_meta_index(), 42);
    }

    #[test]
    fn meta_entry_name_roundtrip() {
        let mut entry = MetaEntry::free();
        entry.set_name("test2.txt");
        assert_eq!(entry.name(), "test2.txt");
        entry.set_name("a");
        assert_eq!(entry.name(), "a");
    }

    #[test]
    fn record_bytes_roundtrip() {
        let mut entry = MetaEntry::free();
        entry.valid = SLOT_IN_USE;
        entry.kind = KIND_DIRECTORY;
        entry.parent = 7;
        entry.set_name("docs");
        entry.total_size = 1234;

        let copy = MetaEntry::from_bytes(entry.as_bytes());
        assert_eq!(copy.as_bytes(), entry.as_bytes());
        assert_eq!(copy.name(), "docs");
        assert_eq!({ copy.parent }, 7);
    }

    #[test]
    fn user_info_new() {
        let user = UserInfo::new("admin", &[b'a'; 64], 1, 1000);
        assert_eq!(user.username(), "admin");
        assert_eq!(user.is_active, 1);
        assert_eq!({ user.role }, 1);
    }
}
