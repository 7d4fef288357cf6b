//! The request dispatcher: a bounded FIFO channel with one consumer that
//! serializes every operation onto the single mounted container.
//!
//! The transport may run as many producer threads as it likes; the engine
//! worker is the only code that ever touches the instance, so the on-disk
//! invariants rely on channel ordering alone, not on per-table locks.

use crate::error::{OfsError, OfsResult};
use crate::instance::FsInstance;
use crate::views::{FileEntryView, FileMetadataView, FsStats, SessionView, UserView};
use log::{info, warn};
use std::sync::mpsc::{Receiver, Sender, SyncSender, channel, sync_channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Depth of the request queue; producers block once it is full.
const QUEUE_DEPTH: usize = 64;

/// One typed operation request.
#[derive(Clone, Debug)]
pub enum Request {
    UserLogin { username: String, password: String },
    UserLogout { session: String },
    UserCreate { session: String, username: String, password: String, role: u32 },
    UserDelete { session: String, username: String },
    UserList { session: String },
    GetSessionInfo { session: String },
    FileCreate { session: String, path: String, data: Vec<u8> },
    FileRead { session: String, path: String },
    FileEdit { session: String, path: String, data: Vec<u8>, index: u64 },
    FileTruncate { session: String, path: String, new_size: u64 },
    FileDelete { session: String, path: String },
    FileRename { session: String, old_path: String, new_path: String },
    FileExists { session: String, path: String },
    DirCreate { session: String, path: String },
    DirList { session: String, path: String },
    DirDelete { session: String, path: String },
    DirExists { session: String, path: String },
    GetMetadata { session: String, path: String },
    SetPermissions { session: String, path: String, mode: u32 },
    GetStats { session: String },
    /// Persists everything and stops the engine worker.
    Shutdown,
}

impl Request {
    /// Returns the session token the request runs under, if any.
    fn session_id(&self) -> Option<&str> {
        match self {
            Self::UserLogin { .. } | Self::Shutdown => None,
            Self::UserLogout { session }
            | Self::UserCreate { session, .. }
            | Self::UserDelete { session, .. }
            | Self::UserList { session }
            | Self::GetSessionInfo { session }
            | Self::FileCreate { session, .. }
            | Self::FileRead { session, .. }
            | Self::FileEdit { session, .. }
            | Self::FileTruncate { session, .. }
            | Self::FileDelete { session, .. }
            | Self::FileRename { session, .. }
            | Self::FileExists { session, .. }
            | Self::DirCreate { session, .. }
            | Self::DirList { session, .. }
            | Self::DirDelete { session, .. }
            | Self::DirExists { session, .. }
            | Self::GetMetadata { session, .. }
            | Self::SetPermissions { session, .. }
            | Self::GetStats { session } => Some(session),
        }
    }
}

/// The typed result payload of a successful operation.
#[derive(Clone, Debug)]
pub enum Reply {
    /// The operation has no payload.
    Unit,
    /// A freshly opened session.
    Session(SessionView),
    /// The cached state of a session.
    SessionInfo(SessionView),
    /// The active users.
    Users(Vec<UserView>),
    /// A file's content.
    Data(Vec<u8>),
    /// A directory listing.
    Entries(Vec<FileEntryView>),
    /// One entry's metadata.
    Metadata(FileMetadataView),
    /// Aggregate counters.
    Stats(FsStats),
}

/// The outcome of one dispatched request.
pub type Response = OfsResult<Reply>;

/// A queued request together with its reply channel.
struct Envelope {
    request: Request,
    reply: Sender<Response>,
}

/// A cloneable producer handle onto the engine queue.
#[derive(Clone)]
pub struct EngineHandle {
    tx: SyncSender<Envelope>,
}

impl EngineHandle {
    /// Dispatches a request and waits for its response.
    pub fn call(&self, request: Request) -> Response {
        let (reply_tx, reply_rx) = channel();
        self.tx
            .send(Envelope {
                request,
                reply: reply_tx,
            })
            .map_err(|_| OfsError::Io)?;
        reply_rx.recv().map_err(|_| OfsError::Io)?
    }

    /// Dispatches a request and waits at most `timeout` for its response.
    pub fn call_timeout(&self, request: Request, timeout: Duration) -> Response {
        let (reply_tx, reply_rx) = channel();
        self.tx
            .send(Envelope {
                request,
                reply: reply_tx,
            })
            .map_err(|_| OfsError::Io)?;
        reply_rx.recv_timeout(timeout).map_err(|_| OfsError::Io)?
    }
}

/// The engine: one worker thread owning the mounted instance.
pub struct Engine {
    tx: SyncSender<Envelope>,
    worker: Option<JoinHandle<()>>,
}

impl Engine {
    /// Starts the worker for a mounted instance.
    pub fn start(inst: FsInstance) -> Self {
        let (tx, rx) = sync_channel(QUEUE_DEPTH);
        let worker = thread::spawn(move || worker_loop(inst, rx));
        Self {
            tx,
            worker: Some(worker),
        }
    }

    /// Returns a producer handle for transport threads.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.tx.clone(),
        }
    }

    /// Dispatches a request from the owning thread.
    pub fn call(&self, request: Request) -> Response {
        self.handle().call(request)
    }

    /// Stops the worker, persisting the container.
    pub fn stop(mut self) {
        let _ = self.call(Request::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(mut inst: FsInstance, rx: Receiver<Envelope>) {
    let mut running = true;
    while running {
        let Ok(Envelope { request, reply }) = rx.recv() else {
            // Every handle is gone; treat it like a shutdown
            break;
        };
        running = !matches!(request, Request::Shutdown);
        let response = apply(&mut inst, &request);
        if let Some(id) = request.session_id() {
            inst.touch_session(id);
        }
        let _ = reply.send(response);
    }
    info!("engine worker stopping");
    if let Err(err) = inst.shutdown() {
        warn!("container shutdown failed: {err}");
    }
}

/// Applies one request to the instance.
fn apply(inst: &mut FsInstance, request: &Request) -> Response {
    match request {
        Request::UserLogin { username, password } => {
            inst.user_login(username, password).map(Reply::Session)
        }
        Request::UserLogout { session } => inst.user_logout(session).map(|()| Reply::Unit),
        Request::UserCreate {
            session,
            username,
            password,
            role,
        } => inst
            .user_create(session, username, password, *role)
            .map(|()| Reply::Unit),
        Request::UserDelete { session, username } => {
            inst.user_delete(session, username).map(|()| Reply::Unit)
        }
        Request::UserList { session } => inst.user_list(session).map(Reply::Users),
        Request::GetSessionInfo { session } => {
            inst.get_session_info(session).map(Reply::SessionInfo)
        }
        Request::FileCreate {
            session,
            path,
            data,
        } => inst.file_create(session, path, data).map(|()| Reply::Unit),
        Request::FileRead { session, path } => inst.file_read(session, path).map(Reply::Data),
        Request::FileEdit {
            session,
            path,
            data,
            index,
        } => inst
            .file_edit(session, path, data, *index)
            .map(|()| Reply::Unit),
        Request::FileTruncate {
            session,
            path,
            new_size,
        } => inst
            .file_truncate(session, path, *new_size)
            .map(|()| Reply::Unit),
        Request::FileDelete { session, path } => {
            inst.file_delete(session, path).map(|()| Reply::Unit)
        }
        Request::FileRename {
            session,
            old_path,
            new_path,
        } => inst
            .file_rename(session, old_path, new_path)
            .map(|()| Reply::Unit),
        Request::FileExists { session, path } => {
            inst.file_exists(session, path).map(|()| Reply::Unit)
        }
        Request::DirCreate { session, path } => {
            inst.dir_create(session, path).map(|()| Reply::Unit)
        }
        Request::DirList { session, path } => inst.dir_list(session, path).map(Reply::Entries),
        Request::DirDelete { session, path } => {
            inst.dir_delete(session, path).map(|()| Reply::Unit)
        }
        Request::DirExists { session, path } => {
            inst.dir_exists(session, path).map(|()| Reply::Unit)
        }
        Request::GetMetadata { session, path } => {
            inst.get_metadata(session, path).map(Reply::Metadata)
        }
        Request::SetPermissions {
            session,
            path,
            mode,
        } => inst
            .set_permissions(session, path, *mode)
            .map(|()| Reply::Unit),
        Request::GetStats { session } => inst.get_stats(session).map(Reply::Stats),
        Request::Shutdown => Ok(Reply::Unit),
    }
}
