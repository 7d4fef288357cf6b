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

//! The in-memory session registry.
//!
//! Sessions live from login to logout or engine shutdown and are never
//! persisted. Each one carries a snapshot of the user record taken at login
//! time; the snapshot, not the live table, answers role checks.

use crate::error::{OfsError, OfsResult};
use crate::instance::FsInstance;
use crate::layout::UserInfo;
use crate::user::ROLE_ADMIN;
use crate::util::now_secs;
use crate::views::SessionView;
use std::collections::HashMap;
use uuid::Uuid;

/// One live session.
pub struct Session {
    /// The session token: 32 hex characters backed by a 128-bit random
    /// value.
    pub id: String,
    /// Index of the user in the user table.
    pub user_slot: u32,
    /// Snapshot of the user record at login time.
    pub user: UserInfo,
    /// Login timestamp.
    pub login_time: u64,
    /// Timestamp of the most recent operation.
    pub last_activity: u64,
    /// Number of operations dispatched under this session.
    pub operations_count: u32,
}

impl Session {
    /// Builds the observable view of the session.
    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.id.clone(),
            username: self.user.username(),
            role: self.user.role,
            login_time: self.login_time,
            last_activity: self.last_activity,
            operations_count: self.operations_count,
        }
    }
}

/// The registry of live sessions, keyed by token.
#[derive(Default)]
pub struct SessionRegistry {
    map: HashMap<String, Session>,
}

impl SessionRegistry {
    /// Opens a session for the given user snapshot and returns its view.
    pub fn open(&mut self, user_slot: u32, user: UserInfo) -> SessionView {
        let id = Uuid::new_v4().simple().to_string();
        let now = now_secs();
        let session = Session {
            id: id.clone(),
            user_slot,
            user,
            login_time: now,
            last_activity: now,
            operations_count: 0,
        };
        let view = session.view();
        self.map.insert(id, session);
        view
    }

    /// Resolves a token to its session.
    pub fn get(&self, id: &str) -> Option<&Session> {
        self.map.get(id)
    }

    /// Resolves a token to its session, mutably.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.map.get_mut(id)
    }

    /// Removes a session, returning it when it existed.
    pub fn close(&mut self, id: &str) -> Option<Session> {
        self.map.remove(id)
    }

    /// Returns the number of live sessions.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Tells whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl FsInstance {
    /// Resolves a session token, failing with [`OfsError::InvalidSession`].
    pub(crate) fn session(&self, id: &str) -> OfsResult<&Session> {
        self.sessions.get(id).ok_or(OfsError::InvalidSession)
    }

    /// Resolves a session token and requires its cached role to be admin.
    pub(crate) fn admin_session(&self, id: &str) -> OfsResult<&Session> {
        let session = self.session(id)?;
        if session.user.role != ROLE_ADMIN {
            return Err(OfsError::PermissionDenied);
        }
        Ok(session)
    }

    /// Returns the cached view of a session.
    pub fn get_session_info(&self, id: &str) -> OfsResult<SessionView> {
        Ok(self.session(id)?.view())
    }

    /// Records one dispatched operation on the session, if it still exists.
    pub fn touch_session(&mut self, id: &str) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.last_activity = now_secs();
            session.operations_count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::{ROLE_NORMAL, fingerprint};

    #[test]
    fn open_and_close() {
        let mut registry = SessionRegistry::default();
        let user = UserInfo::new("alice", &fingerprint("pw"), ROLE_NORMAL, 1);
        let view = registry.open(3, user);

        assert_eq!(view.session_id.len(), 32);
        assert!(view.session_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(view.username, "alice");
        assert_eq!(registry.len(), 1);

        let session = registry.get(&view.session_id).unwrap();
        assert_eq!(session.user_slot, 3);

        registry.close(&view.session_id).unwrap();
        assert!(registry.is_empty());
        assert!(registry.get(&view.session_id).is_none());
    }

    #[test]
    fn tokens_are_unique() {
        let mut registry = SessionRegistry::default();
        let user = UserInfo::new("bob", &fingerprint("pw"), ROLE_NORMAL, 1);
        let a = registry.open(0, user);
        let b = registry.open(0, user);
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(registry.len(), 2);
    }
}
