//! Language server session over stdio JSON-RPC
//!
//! One [`LspSession`] owns one language server process for one project root.
//! Messages use `Content-Length` framing. A background thread reads the
//! server's output, answers server-to-client requests and forwards responses
//! over a channel; queries wait on that channel with a bounded timeout.
//!
//! ```text
//! LspSession
//!   ├── child: Mutex<Option<Child>>          # server process, taken on close
//!   ├── writer: Arc<Mutex<Box<dyn Write>>>   # shared with the reader thread
//!   └── channel: Mutex<Channel>              # one in-flight query at a time
//!          ├── responses: Receiver<Incoming>
//!          └── opened: HashSet<PathBuf>      # didOpen sent once per file
//! ```

use std::collections::HashSet;
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, info, trace, warn};
use wait_timeout::ChildExt;

use super::position::{path_to_uri, uri_to_path};
use super::{DefinitionOracle, Location, OracleError, Position, Range};
use crate::core::config::OracleConfig;

enum Incoming {
    Response {
        id: u64,
        result: Value,
        error: Option<Value>,
    },
    Closed(String),
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

struct Channel {
    responses: Receiver<Incoming>,
    next_id: u64,
    opened: HashSet<PathBuf>,
    dead: Option<String>,
}

/// A running language server bound to one project root
pub struct LspSession {
    root: PathBuf,
    language_id: String,
    request_timeout: Duration,
    shutdown_grace: Duration,
    child: Mutex<Option<Child>>,
    writer: SharedWriter,
    channel: Mutex<Channel>,
    closed: AtomicBool,
}

impl LspSession {
    /// Spawn the configured server and complete the `initialize` handshake
    pub fn start(root: &Path, language_id: &str, config: &OracleConfig) -> Result<Self, OracleError> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .current_dir(root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| OracleError::Spawn(format!("{}: {}", config.command, e)))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(OracleError::Spawn("stdio pipes unavailable".to_string()));
        };

        Self::connect(
            root,
            language_id,
            config,
            Some(child),
            BufReader::new(stdout),
            Box::new(stdin),
        )
    }

    /// Run the handshake over an already connected transport
    fn connect<R>(
        root: &Path,
        language_id: &str,
        config: &OracleConfig,
        child: Option<Child>,
        reader: R,
        writer: Box<dyn Write + Send>,
    ) -> Result<Self, OracleError>
    where
        R: BufRead + Send + 'static,
    {
        let writer: SharedWriter = Arc::new(Mutex::new(writer));
        let (tx, rx) = mpsc::channel();
        let reader_writer = Arc::clone(&writer);
        let spawned = thread::Builder::new()
            .name("lsp-reader".to_string())
            .spawn(move || reader_loop(reader, tx, reader_writer));
        if let Err(e) = spawned {
            if let Some(mut child) = child {
                let _ = child.kill();
                let _ = child.wait();
            }
            return Err(OracleError::Spawn(e.to_string()));
        }

        let session = Self {
            root: root.to_path_buf(),
            language_id: language_id.to_string(),
            request_timeout: config.request_timeout(),
            shutdown_grace: config.shutdown_grace(),
            child: Mutex::new(child),
            writer,
            channel: Mutex::new(Channel {
                responses: rx,
                next_id: 1,
                opened: HashSet::new(),
                dead: None,
            }),
            closed: AtomicBool::new(false),
        };

        let root_uri = path_to_uri(root);
        let root_name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let params = json!({
            "processId": std::process::id(),
            "rootUri": root_uri,
            "rootPath": root.to_string_lossy(),
            "workspaceFolders": [{ "uri": root_uri, "name": root_name }],
            "capabilities": {
                "textDocument": {
                    "definition": { "linkSupport": true },
                    "synchronization": { "didSave": false }
                },
                "workspace": { "configuration": true, "workspaceFolders": true }
            }
        });

        let handshake = session.lock_channel().and_then(|mut channel| {
            session.request(&mut channel, "initialize", params, config.startup_timeout())?;
            session.notify(&mut channel, "initialized", json!({}))
        });
        if let Err(e) = handshake {
            session.close();
            return Err(OracleError::Spawn(format!("initialize failed: {}", e)));
        }

        info!(root = ?root, command = %config.command, "language server started");
        Ok(session)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shut the server down: `shutdown`, `exit`, then kill after the grace period.
    ///
    /// Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Ok(mut channel) = self.channel.lock() {
            if channel.dead.is_none() {
                if let Err(e) = self.request(&mut channel, "shutdown", Value::Null, self.shutdown_grace) {
                    debug!(error = %e, "shutdown request failed");
                }
                let _ = self.notify(&mut channel, "exit", Value::Null);
            }
            channel.dead = Some("session closed".to_string());
        }

        let child = self.child.lock().ok().and_then(|mut guard| guard.take());
        if let Some(mut child) = child {
            match child.wait_timeout(self.shutdown_grace) {
                Ok(Some(status)) => debug!(?status, "language server exited"),
                Ok(None) | Err(_) => {
                    warn!("language server did not exit in time, killing");
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
        info!(root = ?self.root, "language server stopped");
    }

    fn lock_channel(&self) -> Result<MutexGuard<'_, Channel>, OracleError> {
        self.channel
            .lock()
            .map_err(|_| OracleError::SessionDead("session lock poisoned".to_string()))
    }

    fn send(&self, channel: &mut Channel, message: &Value) -> Result<(), OracleError> {
        let result = match self.writer.lock() {
            Ok(mut stdin) => write_message(&mut *stdin, message),
            Err(_) => Err(io::Error::new(io::ErrorKind::Other, "writer lock poisoned")),
        };
        result.map_err(|e| {
            let reason = format!("write failed: {}", e);
            channel.dead = Some(reason.clone());
            OracleError::SessionDead(reason)
        })
    }

    fn notify(&self, channel: &mut Channel, method: &str, params: Value) -> Result<(), OracleError> {
        self.send(
            channel,
            &json!({ "jsonrpc": "2.0", "method": method, "params": params }),
        )
    }

    fn request(
        &self,
        channel: &mut Channel,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, OracleError> {
        if let Some(reason) = &channel.dead {
            return Err(OracleError::SessionDead(reason.clone()));
        }

        let id = channel.next_id;
        channel.next_id += 1;
        self.send(
            channel,
            &json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }),
        )?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match channel.responses.recv_timeout(remaining) {
                Ok(Incoming::Response {
                    id: got,
                    result,
                    error,
                }) if got == id => {
                    return match error {
                        Some(error) => Err(OracleError::Transport(format!(
                            "{} returned error: {}",
                            method, error
                        ))),
                        None => Ok(result),
                    };
                }
                Ok(Incoming::Response { id: stale, .. }) => {
                    trace!(id = stale, "discarding late response");
                }
                Ok(Incoming::Closed(reason)) => {
                    channel.dead = Some(reason.clone());
                    return Err(OracleError::SessionDead(reason));
                }
                Err(RecvTimeoutError::Timeout) => return Err(OracleError::Timeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => {
                    let reason = "reader thread stopped".to_string();
                    channel.dead = Some(reason.clone());
                    return Err(OracleError::SessionDead(reason));
                }
            }
        }
    }

    fn ensure_open(&self, channel: &mut Channel, file: &Path) -> Result<(), OracleError> {
        if channel.opened.contains(file) {
            return Ok(());
        }
        let text = fs::read_to_string(file)
            .map_err(|e| OracleError::Transport(format!("cannot read {:?}: {}", file, e)))?;
        self.notify(
            channel,
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": path_to_uri(file),
                    "languageId": self.language_id,
                    "version": 1,
                    "text": text
                }
            }),
        )?;
        channel.opened.insert(file.to_path_buf());
        Ok(())
    }
}

impl DefinitionOracle for LspSession {
    fn definition_of(&self, file: &Path, position: Position) -> Result<Vec<Location>, OracleError> {
        let mut channel = self.lock_channel()?;
        self.ensure_open(&mut channel, file)?;

        let result = self.request(
            &mut channel,
            "textDocument/definition",
            json!({
                "textDocument": { "uri": path_to_uri(file) },
                "position": { "line": position.line, "character": position.character }
            }),
            self.request_timeout,
        )?;
        Ok(parse_locations(&result))
    }
}

impl Drop for LspSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn reader_loop(mut reader: impl BufRead, events: Sender<Incoming>, writer: SharedWriter) {
    loop {
        let message = match read_message(&mut reader) {
            Ok(Some(message)) => message,
            Ok(None) => {
                let _ = events.send(Incoming::Closed("language server closed its output".to_string()));
                return;
            }
            Err(e) => {
                let _ = events.send(Incoming::Closed(format!("read failed: {}", e)));
                return;
            }
        };

        if let Some(reply) = server_request_reply(&message) {
            let sent = match writer.lock() {
                Ok(mut stdin) => write_message(&mut *stdin, &reply),
                Err(_) => return,
            };
            if let Err(e) = sent {
                debug!(error = %e, "cannot answer server request");
            }
            continue;
        }

        if let Some(method) = message.get("method").and_then(Value::as_str) {
            trace!(method, "server notification");
            continue;
        }

        let Some(id) = message.get("id").and_then(Value::as_u64) else {
            continue;
        };
        let response = Incoming::Response {
            id,
            result: message.get("result").cloned().unwrap_or(Value::Null),
            error: message.get("error").filter(|e| !e.is_null()).cloned(),
        };
        if events.send(response).is_err() {
            return;
        }
    }
}

/// Reply for a server-to-client request, `None` for anything else
fn server_request_reply(message: &Value) -> Option<Value> {
    let method = message.get("method")?.as_str()?;
    let id = message.get("id")?.clone();

    let result = match method {
        "workspace/configuration" => {
            let items = message
                .pointer("/params/items")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            Value::Array(vec![Value::Null; items])
        }
        _ => Value::Null,
    };
    Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

/// Read one framed message; `Ok(None)` at end of stream
pub fn read_message<R: BufRead>(reader: &mut R) -> io::Result<Option<Value>> {
    let mut content_length: Option<usize> = None;
    let mut line = String::new();
    let mut saw_header = false;

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            if saw_header {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated header"));
            }
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let length = value
                    .trim()
                    .parse()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                content_length = Some(length);
            }
        }
    }

    let length = content_length
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length"))?;
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Write one framed message
pub fn write_message<W: Write>(writer: &mut W, message: &Value) -> io::Result<()> {
    let body = serde_json::to_string(message)?;
    write!(writer, "Content-Length: {}\r\n\r\n{}", body.len(), body)?;
    writer.flush()
}

/// Locations of a definition result: `null`, `Location`, `Location[]` or `LocationLink[]`
pub fn parse_locations(result: &Value) -> Vec<Location> {
    match result {
        Value::Array(items) => items.iter().filter_map(parse_location).collect(),
        Value::Object(_) => parse_location(result).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn parse_location(value: &Value) -> Option<Location> {
    let (uri, range) = match value.get("targetUri") {
        Some(uri) => (
            uri,
            value
                .get("targetSelectionRange")
                .or_else(|| value.get("targetRange"))?,
        ),
        None => (value.get("uri")?, value.get("range")?),
    };
    Some(Location {
        path: uri_to_path(uri.as_str()?)?,
        range: Range {
            start: parse_position(range.get("start")?)?,
            end: parse_position(range.get("end")?)?,
        },
    })
}

fn parse_position(value: &Value) -> Option<Position> {
    Some(Position {
        line: u32::try_from(value.get("line")?.as_u64()?).ok()?,
        character: u32::try_from(value.get("character")?.as_u64()?).ok()?,
    })
}
