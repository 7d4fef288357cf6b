//! Plain in-memory views returned by observational operations.
//!
//! These are the typed results of the operation interface; the on-disk
//! records never leave the engine. All views serialize for the transport.

use serde::Serialize;

/// One entry of a directory listing.
#[derive(Clone, Debug, Serialize)]
pub struct FileEntryView {
    /// Entry name.
    pub name: String,
    /// `0` for a file, `1` for a directory.
    #[serde(rename = "type")]
    pub kind: u8,
    /// Byte length for files, `0` for directories.
    pub size: u64,
    /// Permission bits.
    pub permissions: u32,
    /// Creation timestamp.
    pub created_time: u64,
    /// Last-modification timestamp.
    pub modified_time: u64,
    /// Login name of the owner, or `unknown` when the owner index does not
    /// resolve.
    pub owner: String,
    /// 1-based meta slot index of the entry.
    pub inode: u32,
}

/// The full metadata view of one entry.
#[derive(Clone, Debug, Serialize)]
pub struct FileMetadataView {
    /// Absolute path the entry was resolved from.
    pub path: String,
    /// The entry itself.
    pub entry: FileEntryView,
    /// Number of blocks in the entry's chain.
    pub blocks_used: u64,
    /// Bytes occupied on the device, `blocks_used · block_size`.
    pub actual_size: u64,
}

/// One active record of the user table.
#[derive(Clone, Debug, Serialize)]
pub struct UserView {
    /// Login name.
    pub username: String,
    /// `0` for a normal user, `1` for an administrator.
    pub role: u32,
    /// Creation timestamp.
    pub created_time: u64,
    /// Timestamp of the last successful login.
    pub last_login: u64,
}

/// The state of one live session.
#[derive(Clone, Debug, Serialize)]
pub struct SessionView {
    /// The session token.
    pub session_id: String,
    /// Login name captured at login time.
    pub username: String,
    /// Role captured at login time.
    pub role: u32,
    /// Login timestamp.
    pub login_time: u64,
    /// Timestamp of the session's most recent operation.
    pub last_activity: u64,
    /// Number of operations dispatched under this session.
    pub operations_count: u32,
}

/// Aggregate counters of a mounted container.
#[derive(Clone, Debug, Serialize)]
pub struct FsStats {
    /// Total size of the container file.
    pub total_size: u64,
    /// Bytes of allocated blocks.
    pub used_space: u64,
    /// Bytes of free blocks.
    pub free_space: u64,
    /// Number of live file entries.
    pub total_files: u32,
    /// Number of live directory entries, the root included.
    pub total_directories: u32,
    /// Number of active user records.
    pub total_users: u32,
    /// Number of live sessions.
    pub active_sessions: u32,
    /// `100 · (1 − used / total)` when any block is free, else `0`.
    pub fragmentation: f64,
}
