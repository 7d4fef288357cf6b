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

//! The TCP transport: newline-framed JSON requests fanned into the engine
//! queue.
//!
//! Each connection gets its own reader thread; all of them feed the single
//! engine worker, so the transport adds concurrency only in front of the
//! queue, never behind it. A request line looks like
//! `{"operation": "file_read", "parameters": {"path": "/a"}, "session_id":
//! "…", "request_id": "1"}` and the response mirrors it with either a
//! `data` object or an `error_code`/`error_message` pair.

use log::{info, warn};
use ofs::config::Config;
use ofs::dispatch::{EngineHandle, Reply, Request};
use ofs::error::{OfsError, error_message};
use serde::Deserialize;
use serde_json::{Value, json};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

/// One decoded request line.
#[derive(Deserialize)]
struct WireRequest {
    operation: String,
    #[serde(default)]
    parameters: Value,
    #[serde(default)]
    session_id: String,
    #[serde(default = "default_request_id")]
    request_id: String,
}

fn default_request_id() -> String {
    "0".to_owned()
}

/// Accepts connections until the listener fails.
pub fn run(engine: EngineHandle, cfg: &Config) -> io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", cfg.port))?;
    info!("listening on port {}", cfg.port);
    let connections = Arc::new(AtomicU32::new(0));
    let timeout = Duration::from_secs(cfg.queue_timeout);
    let max_connections = cfg.max_connections;
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!("accept failed: {err}");
                continue;
            }
        };
        if connections.load(Ordering::Relaxed) >= max_connections {
            warn!("connection limit of {max_connections} reached, rejecting client");
            let _ = reject(stream);
            continue;
        }
        connections.fetch_add(1, Ordering::Relaxed);
        let engine = engine.clone();
        let connections = Arc::clone(&connections);
        thread::spawn(move || {
            if let Err(err) = handle_client(&engine, stream, timeout) {
                warn!("client failed: {err}");
            }
            connections.fetch_sub(1, Ordering::Relaxed);
        });
    }
    Ok(())
}

fn reject(mut stream: TcpStream) -> io::Result<()> {
    let code = OfsError::NoSpace.code();
    writeln!(
        stream,
        "{}",
        render_error("connect", "0", code, error_message(code))
    )
}

fn handle_client(engine: &EngineHandle, stream: TcpStream, timeout: Duration) -> io::Result<()> {
    let peer = stream.peer_addr()?;
    info!("client {peer} connected");
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut stream = stream;
    // The session opened over this connection, logged out again when the
    // connection goes away
    let mut session: Option<String> = None;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<WireRequest>(trimmed) {
            Ok(wire) => dispatch(engine, &wire, timeout, &mut session),
            Err(_) => render_error("unknown", "0", OfsError::InvalidPath.code(), "JSON parse error"),
        };
        writeln!(stream, "{response}")?;
    }
    if let Some(session) = session {
        let _ = engine.call(Request::UserLogout { session });
    }
    info!("client {peer} disconnected");
    Ok(())
}

/// Converts one wire request into a typed one, runs it, and renders the
/// response line.
fn dispatch(
    engine: &EngineHandle,
    wire: &WireRequest,
    timeout: Duration,
    session: &mut Option<String>,
) -> String {
    let op = wire.operation.as_str();
    let request_id = wire.request_id.as_str();
    let request = match to_request(wire) {
        Ok(request) => request,
        Err(code) => return render_error(op, request_id, code, error_message(code)),
    };
    let logout = matches!(request, Request::UserLogout { .. });
    match engine.call_timeout(request, timeout) {
        Ok(reply) => {
            if let Reply::Session(view) = &reply {
                *session = Some(view.session_id.clone());
            } else if logout {
                *session = None;
            }
            render_success(op, request_id, reply)
        }
        Err(err) => render_error(op, request_id, err.code(), error_message(err.code())),
    }
}

/// Maps a wire request onto the typed operation interface.
fn to_request(wire: &WireRequest) -> Result<Request, i32> {
    let session = wire.session_id.clone();
    let s = |key: &str| {
        wire.parameters
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_owned()
    };
    let n = |key: &str| wire.parameters.get(key).and_then(Value::as_u64).unwrap_or(0);
    Ok(match wire.operation.as_str() {
        "user_login" => Request::UserLogin {
            username: s("username"),
            password: s("password"),
        },
        "user_logout" => Request::UserLogout { session },
        "user_create" => Request::UserCreate {
            session,
            username: s("username"),
            password: s("password"),
            role: n("role") as u32,
        },
        "user_delete" => Request::UserDelete {
            session,
            username: s("username"),
        },
        "user_list" => Request::UserList { session },
        "get_session_info" => Request::GetSessionInfo { session },
        "file_create" => Request::FileCreate {
            session,
            path: s("path"),
            data: s("data").into_bytes(),
        },
        "file_read" => Request::FileRead {
            session,
            path: s("path"),
        },
        "file_edit" => Request::FileEdit {
            session,
            path: s("path"),
            data: s("data").into_bytes(),
            index: n("index"),
        },
        "file_truncate" => Request::FileTruncate {
            session,
            path: s("path"),
            new_size: n("new_size"),
        },
        "file_delete" => Request::FileDelete {
            session,
            path: s("path"),
        },
        "file_rename" => Request::FileRename {
            session,
            old_path: s("old_path"),
            new_path: s("new_path"),
        },
        "file_exists" => Request::FileExists {
            session,
            path: s("path"),
        },
        "dir_create" => Request::DirCreate {
            session,
            path: s("path"),
        },
        "dir_list" => Request::DirList {
            session,
            path: s("path"),
        },
        "dir_delete" => Request::DirDelete {
            session,
            path: s("path"),
        },
        "dir_exists" => Request::DirExists {
            session,
            path: s("path"),
        },
        "get_metadata" => Request::GetMetadata {
            session,
            path: s("path"),
        },
        "set_permissions" => Request::SetPermissions {
            session,
            path: s("path"),
            mode: n("mode") as u32,
        },
        "get_stats" => Request::GetStats { session },
        _ => return Err(OfsError::NotImplemented.code()),
    })
}

/// Renders the `data` object of a successful response.
fn reply_data(reply: Reply) -> Value {
    match reply {
        Reply::Unit => json!({}),
        Reply::Session(view) => json!({
            "session_id": view.session_id,
            "username": view.username,
        }),
        Reply::SessionInfo(view) => serde_json::to_value(view).unwrap_or_default(),
        Reply::Users(users) => json!({ "users": users }),
        Reply::Data(data) => json!({
            "data": String::from_utf8_lossy(&data).into_owned(),
            "size": data.len(),
        }),
        Reply::Entries(entries) => json!({ "entries": entries }),
        Reply::Metadata(meta) => serde_json::to_value(meta).unwrap_or_default(),
        Reply::Stats(stats) => serde_json::to_value(stats).unwrap_or_default(),
    }
}

fn render_success(op: &str, request_id: &str, reply: Reply) -> String {
    json!({
        "status": "success",
        "operation": op,
        "request_id": request_id,
        "data": reply_data(reply),
    })
    .to_string()
}

fn render_error(op: &str, request_id: &str, code: i32, message: &str) -> String {
    json!({
        "status": "error",
        "operation": op,
        "request_id": request_id,
        "error_code": code,
        "error_message": message,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_request_defaults() {
        let wire: WireRequest =
            serde_json::from_str(r#"{"operation": "get_stats"}"#).unwrap();
        assert_eq!(wire.operation, "get_stats");
        assert_eq!(wire.session_id, "");
        assert_eq!(wire.request_id, "0");
    }

    #[test]
    fn unknown_operation_is_not_implemented() {
        let wire: WireRequest =
            serde_json::from_str(r#"{"operation": "frobnicate"}"#).unwrap();
        assert_eq!(to_request(&wire).unwrap_err(), -8);
    }

    #[test]
    fn login_request_mapping() {
        let wire: WireRequest = serde_json::from_str(
            r#"{"operation": "user_login",
                "parameters": {"username": "admin", "password": "admin123"},
                "request_id": "7"}"#,
        )
        .unwrap();
        let Request::UserLogin { username, password } = to_request(&wire).unwrap() else {
            panic!()
        };
        assert_eq!(username, "admin");
        assert_eq!(password, "admin123");
    }

    #[test]
    fn error_rendering_is_stable() {
        let line = render_error("file_read", "3", -1, error_message(-1));
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error_code"], -1);
        assert_eq!(value["error_message"], "Not found");
        assert_eq!(value["request_id"], "3");
    }
}
