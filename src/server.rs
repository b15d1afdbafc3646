//! JSON-lines request server over TCP.
//!
//! Each line a client sends is one [`NestRequest`]; the server answers each
//! with exactly one [`NestResponse`] line. Connections are served on their
//! own threads and share a single [`Nest`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use crate::error::{NestError, NestResult};
use crate::nest::{DiscardOutcome, Nest, PersistOutcome};
use crate::payload::PayloadDescriptor;
use crate::runtime::EnvironmentHandle;

// ── Protocol types ──────────────────────────────────────────────────────

/// Request sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NestRequest {
    Acquire {
        user_id: String,
        #[serde(default)]
        version: Option<u64>,
    },
    Bootstrap {
        user_id: String,
    },
    Persist {
        user_id: String,
    },
    Discard {
        user_id: String,
    },
    Current {
        user_id: String,
    },
    List,
    Run {
        user_id: String,
        file: PayloadDescriptor,
    },
    Trial {
        file: PayloadDescriptor,
    },
}

/// One row of a `List` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentEntry {
    pub user_id: String,
    pub name: String,
    pub image: String,
}

/// Response sent back for each request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NestResponse {
    Environment {
        name: String,
        image: String,
    },
    /// `Current` for a user with nothing live
    Empty,
    Persisted {
        version: u64,
    },
    Discarded {
        saved_version: Option<u64>,
        persist_error: Option<String>,
    },
    NoUser,
    NoLiveEnvironment,
    Environments {
        entries: Vec<EnvironmentEntry>,
    },
    Execution {
        output: String,
        has_heart: Option<bool>,
    },
    Trial {
        score: u32,
    },
    Error {
        message: String,
    },
}

impl From<EnvironmentHandle> for NestResponse {
    fn from(handle: EnvironmentHandle) -> Self {
        NestResponse::Environment {
            name: handle.name,
            image: handle.image,
        }
    }
}

impl From<NestError> for NestResponse {
    fn from(err: NestError) -> Self {
        match err {
            NestError::UserNotFound(_) => NestResponse::NoUser,
            NestError::NoLiveEnvironment(_) => NestResponse::NoLiveEnvironment,
            other => NestResponse::Error {
                message: format!("{:#}", anyhow::Error::from(other)),
            },
        }
    }
}

// ── Server ──────────────────────────────────────────────────────────────

/// TCP server that accepts client connections.
pub struct NestServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl NestServer {
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .with_context(|| format!("Failed to bind request listener on {addr}"))?;
        let addr = listener.local_addr()?;
        info!(%addr, "server:bound");
        Ok(Self { listener, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Accept connections until the listener fails, one thread per connection.
    pub fn serve(self, nest: Arc<Nest>) {
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let nest = Arc::clone(&nest);
                    thread::spawn(move || {
                        if let Err(e) = handle_connection(stream, &nest) {
                            debug!(error = %e, "server:connection ended");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "server:accept error, shutting down");
                    break;
                }
            }
        }
    }

    /// Run [`serve`](Self::serve) on a background thread.
    pub fn spawn(self, nest: Arc<Nest>) -> thread::JoinHandle<()> {
        thread::spawn(move || self.serve(nest))
    }
}

// ── Connection handler ──────────────────────────────────────────────────

fn handle_connection(stream: TcpStream, nest: &Nest) -> Result<()> {
    let peer = stream.peer_addr().ok();
    debug!(?peer, "server:connection accepted");

    let reader = BufReader::new(&stream);
    let mut writer = stream.try_clone().context("Failed to clone TCP stream")?;

    for line in reader.lines() {
        let line = line.context("Failed to read request line")?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<NestRequest>(&line) {
            Ok(request) => {
                debug!(?request, "server:request");
                dispatch_request(request, nest)
            }
            Err(e) => NestResponse::Error {
                message: format!("Failed to parse request: {e}"),
            },
        };
        debug!(?response, "server:response");

        write_line(&mut writer, &response)?;
    }

    Ok(())
}

fn write_line(writer: &mut impl Write, value: &impl Serialize) -> Result<()> {
    let mut json = serde_json::to_string(value)?;
    json.push('\n');
    writer.write_all(json.as_bytes())?;
    writer.flush()?;
    Ok(())
}

// ── Request dispatch ────────────────────────────────────────────────────

fn dispatch_request(request: NestRequest, nest: &Nest) -> NestResponse {
    let starts_work = matches!(
        request,
        NestRequest::Acquire { .. }
            | NestRequest::Bootstrap { .. }
            | NestRequest::Run { .. }
            | NestRequest::Trial { .. }
    );
    if starts_work && nest.is_closing() {
        return NestResponse::Error {
            message: "Server is shutting down".to_string(),
        };
    }

    let result: NestResult<NestResponse> = match request {
        NestRequest::Acquire { user_id, version } => {
            nest.lifecycle.acquire(&user_id, version).map(Into::into)
        }
        NestRequest::Bootstrap { user_id } => nest.lifecycle.bootstrap(&user_id).map(Into::into),
        NestRequest::Persist { user_id } => {
            nest.lifecycle.persist(&user_id).map(|outcome| match outcome {
                PersistOutcome::Saved { version } => NestResponse::Persisted { version },
                PersistOutcome::NoUser => NestResponse::NoUser,
                PersistOutcome::NoLiveEnvironment => NestResponse::NoLiveEnvironment,
            })
        }
        NestRequest::Discard { user_id } => {
            nest.lifecycle.discard(&user_id).map(|outcome| match outcome {
                DiscardOutcome::NothingLive => NestResponse::NoLiveEnvironment,
                DiscardOutcome::Discarded {
                    saved_version,
                    persist_error,
                    ..
                } => NestResponse::Discarded {
                    saved_version,
                    persist_error,
                },
            })
        }
        NestRequest::Current { user_id } => Ok(nest
            .lifecycle
            .current(&user_id)
            .map_or(NestResponse::Empty, Into::into)),
        NestRequest::List => Ok(NestResponse::Environments {
            entries: nest
                .registry
                .snapshot()
                .into_iter()
                .map(|(user_id, handle)| EnvironmentEntry {
                    user_id,
                    name: handle.name,
                    image: handle.image,
                })
                .collect(),
        }),
        NestRequest::Run { user_id, file } => {
            nest.execution
                .run(&user_id, &file)
                .map(|result| NestResponse::Execution {
                    output: result.output,
                    has_heart: result.has_heart,
                })
        }
        NestRequest::Trial { file } => nest
            .trials
            .trial(&file)
            .map(|score| NestResponse::Trial { score }),
    };

    result.unwrap_or_else(Into::into)
}

// ── Client ──────────────────────────────────────────────────────────────

/// Client side of the request protocol, used by the CLI subcommands.
pub struct NestClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl NestClient {
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .with_context(|| format!("Failed to connect to nestbox server at {addr}"))?;
        let writer = stream.try_clone().context("Failed to clone TCP stream")?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    /// Send a request and wait for its response.
    pub fn call(&mut self, request: &NestRequest) -> Result<NestResponse> {
        write_line(&mut self.writer, request)?;

        let mut line = String::new();
        self.reader.read_line(&mut line)?;
        if line.is_empty() {
            anyhow::bail!("Server closed the connection");
        }

        serde_json::from_str(&line).with_context(|| format!("Failed to parse response: {line}"))
    }
}
