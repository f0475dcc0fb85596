//! Standalone control binding (spec.md §6, SPEC_FULL.md §6): a
//! newline-delimited JSON protocol over a Unix domain socket at
//! `<config-dir>/control.sock`. One concrete realization of the
//! wire-format-agnostic control contract — everything here is a thin
//! translation layer over [`crate::supervisor::Supervisor`], which
//! remains usable directly (e.g. from a D-Bus bridge) without this
//! module at all.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::injector::InjectorState;
use crate::supervisor::Supervisor;

/// One request read off a connection. `id` is echoed back on the
/// response so a caller pipelining multiple requests on one connection
/// can match them up.
#[derive(Debug, Deserialize)]
struct Request {
    id: u64,
    #[serde(flatten)]
    method: Method,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
enum Method {
    StartInjecting { group_key: String, preset_name: String },
    StopInjecting { group_key: String },
    StopAll,
    GetState { group_key: String },
    SetConfigDir { path: String },
    Autoload,
    AutoloadSingle { group_key: String },
    Hello { message: String },
}

#[derive(Debug, Serialize)]
struct Response {
    id: u64,
    #[serde(flatten)]
    result: ResponseBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum ResponseBody {
    Started { ok: bool },
    Stopped,
    State { state: String },
    Ack,
    Pong { message: String },
    Error { reason: String },
}

impl From<InjectorState> for ResponseBody {
    fn from(state: InjectorState) -> Self {
        ResponseBody::State {
            state: format!("{state:?}"),
        }
    }
}

/// Binds `<config_dir>/control.sock`, removing a stale socket file left
/// behind by an unclean previous shutdown, and spawns one thread that
/// accepts connections for the lifetime of the process — each
/// connection gets its own handler thread (teacher's
/// `thread::Builder::new().spawn` idiom from `input_manager.rs`), since
/// requests are small and infrequent enough that a thread pool would be
/// over-engineering.
pub fn spawn(supervisor: Arc<Supervisor>, config_dir: &Path, stop: Arc<AtomicBool>) -> std::io::Result<PathBuf> {
    let socket_path = config_dir.join("control.sock");
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)?;
    listener.set_nonblocking(true)?;

    let accept_path = socket_path.clone();
    thread::Builder::new()
        .name("control-listener".into())
        .spawn(move || accept_loop(listener, supervisor, stop))
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    Ok(accept_path)
}

fn accept_loop(listener: UnixListener, supervisor: Arc<Supervisor>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let supervisor = supervisor.clone();
                let _ = thread::Builder::new()
                    .name("control-conn".into())
                    .spawn(move || handle_connection(stream, &supervisor));
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(std::time::Duration::from_millis(50));
            }
            Err(e) => {
                tracing::warn!(error = %e, "control socket accept failed");
                thread::sleep(std::time::Duration::from_millis(200));
            }
        }
    }
}

fn handle_connection(stream: UnixStream, supervisor: &Supervisor) {
    let read_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to clone control connection");
            return;
        }
    };
    let mut writer = stream;
    let reader = BufReader::new(read_stream);

    for line in reader.lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(supervisor, request),
            Err(e) => Response {
                id: 0,
                result: ResponseBody::Error {
                    reason: format!("malformed request: {e}"),
                },
            },
        };
        let Ok(mut encoded) = serde_json::to_string(&response) else {
            continue;
        };
        encoded.push('\n');
        if writer.write_all(encoded.as_bytes()).is_err() {
            break;
        }
    }
}

fn dispatch(supervisor: &Supervisor, request: Request) -> Response {
    let id = request.id;
    let result = match request.method {
        Method::StartInjecting { group_key, preset_name } => ResponseBody::Started {
            ok: supervisor.start_injecting(&group_key, &preset_name),
        },
        Method::StopInjecting { group_key } => {
            supervisor.stop_injecting(&group_key);
            ResponseBody::Stopped
        }
        Method::StopAll => {
            supervisor.stop_all();
            ResponseBody::Stopped
        }
        Method::GetState { group_key } => supervisor.get_state(&group_key).into(),
        Method::SetConfigDir { path } => {
            supervisor.set_config_dir(path);
            ResponseBody::Ack
        }
        Method::Autoload => {
            supervisor.autoload();
            ResponseBody::Ack
        }
        Method::AutoloadSingle { group_key } => {
            supervisor.autoload_single(&group_key);
            ResponseBody::Ack
        }
        Method::Hello { message } => ResponseBody::Pong {
            message: supervisor.hello(&message),
        },
    };
    Response { id, result }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uinput::Mode;

    #[test]
    fn dispatch_hello_echoes_the_message() {
        let supervisor = Supervisor::new(Mode::Introspect);
        let request = Request {
            id: 7,
            method: Method::Hello {
                message: "ping".to_string(),
            },
        };
        let response = dispatch(&supervisor, request);
        assert_eq!(response.id, 7);
        assert!(matches!(response.result, ResponseBody::Pong { message } if message == "ping"));
    }

    #[test]
    fn dispatch_get_state_on_unknown_group_reports_unknown() {
        let supervisor = Supervisor::new(Mode::Introspect);
        let request = Request {
            id: 1,
            method: Method::GetState {
                group_key: "nope".to_string(),
            },
        };
        let response = dispatch(&supervisor, request);
        assert!(matches!(response.result, ResponseBody::State { state } if state == "Unknown"));
    }

    #[test]
    fn malformed_request_json_round_trips_as_readable_error() {
        let err = serde_json::from_str::<Request>("not json").unwrap_err();
        let response = Response {
            id: 0,
            result: ResponseBody::Error {
                reason: format!("malformed request: {err}"),
            },
        };
        let encoded = serde_json::to_string(&response).unwrap();
        assert!(encoded.contains("malformed request"));
    }
}
