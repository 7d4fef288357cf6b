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

//! The fixed user table, password fingerprinting, and the account
//! operations.

use crate::error::{OfsError, OfsResult};
use crate::instance::FsInstance;
use crate::layout::{UserInfo, records_as_bytes, records_from_bytes};
use crate::util::now_secs;
use crate::views::{SessionView, UserView};
use log::info;
use std::collections::HashMap;
use std::mem::size_of;

/// Role value of a normal user.
pub const ROLE_NORMAL: u32 = 0;
/// Role value of an administrator.
pub const ROLE_ADMIN: u32 = 1;

/// Computes the password fingerprint stored in user records: FNV-1a 64 over
/// the input bytes, rendered as 16 lowercase hex digits and right-padded
/// with `0` to the 64-byte field.
///
/// This is a placeholder, not a security primitive: it is unsalted, fast and
/// trivially brute-forceable. A production fork must substitute a real
/// password-hashing function here and in [`verify`]; these are the only two
/// call sites that touch the rendering.
pub fn fingerprint(input: &str) -> [u8; 64] {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in input.as_bytes() {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    let hex = format!("{hash:016x}");
    let mut out = [b'0'; 64];
    out[..16].copy_from_slice(hex.as_bytes());
    out
}

/// Compares a candidate password against a stored fingerprint.
pub fn verify(stored: &[u8; 64], password: &str) -> bool {
    fingerprint(password) == *stored
}

/// The fixed array of user records, indexed 0-based.
pub struct UserTable {
    users: Vec<UserInfo>,
}

impl UserTable {
    /// Returns a table of `max_users` inactive records.
    pub fn new(max_users: u32) -> Self {
        Self {
            users: vec![UserInfo::inactive(); max_users as usize],
        }
    }

    /// Reads the table back from its persisted region.
    pub fn from_bytes(buf: &[u8], max_users: u32) -> Self {
        Self {
            users: records_from_bytes(buf, max_users as usize),
        }
    }

    /// Returns the persisted form of the whole table.
    pub fn as_bytes(&self) -> &[u8] {
        records_as_bytes(&self.users)
    }

    /// Returns the on-disk size of a table of `max_users` records.
    pub fn byte_len(max_users: u32) -> usize {
        max_users as usize * size_of::<UserInfo>()
    }

    /// Returns the number of slots.
    pub fn len(&self) -> u32 {
        self.users.len() as u32
    }

    /// Tells whether the table has no slots.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Returns the record at `idx`.
    pub fn get(&self, idx: u32) -> Option<&UserInfo> {
        self.users.get(idx as usize)
    }

    /// Overwrites the record at `idx`.
    pub fn set(&mut self, idx: u32, user: UserInfo) {
        self.users[idx as usize] = user;
    }

    /// Finds an active record by login name with a linear scan.
    pub fn find_active(&self, username: &str) -> Option<u32> {
        self.users
            .iter()
            .position(|u| u.is_active != 0 && u.username() == username)
            .map(|i| i as u32)
    }

    /// Returns the index of the first inactive record.
    pub fn first_inactive(&self) -> Option<u32> {
        self.users
            .iter()
            .position(|u| u.is_active == 0)
            .map(|i| i as u32)
    }

    /// Iterates over `(index, record)` pairs of active records.
    pub fn active(&self) -> impl Iterator<Item = (u32, &UserInfo)> {
        self.users
            .iter()
            .enumerate()
            .filter(|(_, u)| u.is_active != 0)
            .map(|(i, u)| (i as u32, u))
    }
}

/// The in-memory login-name index; derived state, with the table itself as
/// fallback for lookups.
#[derive(Default)]
pub struct UserIndex {
    map: HashMap<String, u32>,
}

impl UserIndex {
    /// Rebuilds the index from every active record of the table.
    pub fn rebuild(table: &UserTable) -> Self {
        let mut map = HashMap::new();
        for (idx, user) in table.active() {
            map.insert(user.username(), idx);
        }
        Self { map }
    }

    /// Resolves a login name to its table index.
    pub fn get(&self, username: &str) -> Option<u32> {
        self.map.get(username).copied()
    }

    /// Registers a freshly created user.
    pub fn insert(&mut self, username: String, idx: u32) {
        self.map.insert(username, idx);
    }

    /// Drops a deactivated user.
    pub fn remove(&mut self, username: &str) {
        self.map.remove(username);
    }
}

impl FsInstance {
    /// Authenticates a user and opens a session.
    ///
    /// Unknown name and wrong password are both reported as
    /// [`OfsError::PermissionDenied`]: login does not reveal which of the
    /// two failed.
    pub fn user_login(&mut self, username: &str, password: &str) -> OfsResult<SessionView> {
        let slot = self
            .user_index
            .get(username)
            .or_else(|| self.users.find_active(username))
            .ok_or(OfsError::PermissionDenied)?;
        let mut user = *self.users.get(slot).ok_or(OfsError::PermissionDenied)?;
        if user.is_active == 0 || !verify(&user.password_hash, password) {
            return Err(OfsError::PermissionDenied);
        }
        user.last_login = now_secs();
        self.users.set(slot, user);
        self.persist_users()?;
        self.flush()?;
        let view = self.sessions.open(slot, user);
        info!("user `{username}` logged in");
        Ok(view)
    }

    /// Closes a session.
    pub fn user_logout(&mut self, session_id: &str) -> OfsResult<()> {
        self.sessions
            .close(session_id)
            .map(|_| ())
            .ok_or(OfsError::InvalidSession)
    }

    /// Creates a user in the first inactive slot. Admin-gated.
    pub fn user_create(
        &mut self,
        admin_session: &str,
        username: &str,
        password: &str,
        role: u32,
    ) -> OfsResult<()> {
        self.admin_session(admin_session)?;
        if self.user_index.get(username).is_some() || self.users.find_active(username).is_some() {
            return Err(OfsError::FileExists);
        }
        let slot = self.users.first_inactive().ok_or(OfsError::NoSpace)?;
        let user = UserInfo::new(username, &fingerprint(password), role, now_secs());
        let stored_name = user.username();
        self.users.set(slot, user);
        self.user_index.insert(stored_name, slot);
        self.persist_users()?;
        self.flush()?;
        info!("user `{username}` created in slot {slot}");
        Ok(())
    }

    /// Deactivates a user. Admin-gated; the user's entries keep their
    /// `owner_id` and are not reclaimed.
    pub fn user_delete(&mut self, admin_session: &str, username: &str) -> OfsResult<()> {
        self.admin_session(admin_session)?;
        let slot = self
            .user_index
            .get(username)
            .or_else(|| self.users.find_active(username))
            .ok_or(OfsError::NotFound)?;
        let mut user = *self.users.get(slot).ok_or(OfsError::NotFound)?;
        user.is_active = 0;
        self.users.set(slot, user);
        self.persist_users()?;
        self.flush()?;
        self.user_index.remove(username);
        info!("user `{username}` deactivated");
        Ok(())
    }

    /// Returns a snapshot of every active user. Admin-gated.
    pub fn user_list(&self, admin_session: &str) -> OfsResult<Vec<UserView>> {
        self.admin_session(admin_session)?;
        Ok(self
            .users
            .active()
            .map(|(_, user)| UserView {
                username: user.username(),
                role: user.role,
                created_time: user.created_time,
                last_login: user.last_login,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_shape() {
        let fp = fingerprint("admin123");
        assert_eq!(fp.len(), 64);
        assert!(fp[..16].iter().all(u8::is_ascii_hexdigit));
        assert!(fp[16..].iter().all(|&b| b == b'0'));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(fingerprint("alice_pass"), fingerprint("alice_pass"));
        assert_ne!(fingerprint("alice_pass"), fingerprint("alice_pasS"));
    }

    #[test]
    fn verify_matches_fingerprint() {
        let stored = fingerprint("secret");
        assert!(verify(&stored, "secret"));
        assert!(!verify(&stored, "Secret"));
    }

    #[test]
    fn table_scan_and_slots() {
        let mut table = UserTable::new(4);
        table.set(0, UserInfo::new("admin", &fingerprint("x"), ROLE_ADMIN, 1));
        table.set(2, UserInfo::new("alice", &fingerprint("y"), ROLE_NORMAL, 2));

        assert_eq!(table.find_active("alice"), Some(2));
        assert_eq!(table.find_active("bob"), None);
        assert_eq!(table.first_inactive(), Some(1));
        assert_eq!(table.active().count(), 2);

        let index = UserIndex::rebuild(&table);
        assert_eq!(index.get("admin"), Some(0));
        assert_eq!(index.get("alice"), Some(2));
    }

    #[test]
    fn table_bytes_roundtrip() {
        let mut table = UserTable::new(3);
        table.set(1, UserInfo::new("bob", &fingerprint("pw"), ROLE_NORMAL, 7));
        let copy = UserTable::from_bytes(table.as_bytes(), 3);
        assert_eq!(copy.find_active("bob"), Some(1));
        assert_eq!(copy.get(1).unwrap().username(), "bob");
    }
}
