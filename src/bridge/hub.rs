//! Shared local socket that all capture sessions connect through.
//!
//! One listener serves every session in the process. It is bound when the
//! first session registers and torn down when the last one leaves. Each
//! accepted connection is routed by the session key in its handshake.

use super::handshake::read_key;
use anyhow::{Context, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use vidbridge_media::Error;

/// How long a new connection may take to send its two keys.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives the media stream of an accepted connection.
pub trait ConnectionSink: Send + Sync {
    /// Consume `stream` until it ends. Called on a thread owned by the hub.
    fn serve(&self, connection_key: &str, stream: UnixStream) -> vidbridge_media::Result<()>;
}

type Registry = DashMap<String, Arc<dyn ConnectionSink>>;

struct Listener {
    shutdown: Arc<AtomicBool>,
    accept_thread: JoinHandle<()>,
}

/// Socket listener plus the session registry behind it.
pub struct SocketHub {
    path: PathBuf,
    sessions: Arc<Registry>,
    listener: Mutex<Option<Listener>>,
}

impl SocketHub {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sessions: Arc::new(DashMap::new()),
            listener: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_listening(&self) -> bool {
        self.listener.lock().is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Route connections carrying `session_key` to `sink`, binding the
    /// socket if this is the first session.
    pub fn register(&self, session_key: &str, sink: Arc<dyn ConnectionSink>) -> Result<()> {
        let mut listener = self.listener.lock();
        if listener.is_none() {
            *listener = Some(self.bind()?);
        }
        self.sessions.insert(session_key.to_string(), sink);
        info!(session_key = %session_key, sessions = self.sessions.len(), "Registered capture session");
        Ok(())
    }

    /// Forget `session_key`; the last one out closes the socket.
    pub fn unregister(&self, session_key: &str) {
        let mut listener = self.listener.lock();
        if self.sessions.remove(session_key).is_some() {
            info!(session_key = %session_key, "Unregistered capture session");
        }
        if self.sessions.is_empty() {
            if let Some(active) = listener.take() {
                self.shut_down(active);
            }
        }
    }

    fn bind(&self) -> Result<Listener> {
        if self.path.exists() {
            debug!(path = ?self.path, "Removing stale socket");
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove stale socket: {:?}", self.path))?;
        }
        let socket = UnixListener::bind(&self.path)
            .with_context(|| format!("Failed to bind socket: {:?}", self.path))?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let accept_thread = {
            let shutdown = Arc::clone(&shutdown);
            let sessions = Arc::clone(&self.sessions);
            thread::Builder::new()
                .name("vidbridge-accept".to_string())
                .spawn(move || accept_loop(socket, sessions, shutdown))
                .context("Failed to spawn accept thread")?
        };

        info!(path = ?self.path, "Listening for capture connections");
        Ok(Listener {
            shutdown,
            accept_thread,
        })
    }

    fn shut_down(&self, active: Listener) {
        active.shutdown.store(true, Ordering::SeqCst);
        // Wake the blocking accept so it sees the flag.
        if let Err(e) = UnixStream::connect(&self.path) {
            debug!(error = %e, "Wake-up connection failed");
        }
        if active.accept_thread.join().is_err() {
            warn!("Accept thread panicked");
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(error = %e, path = ?self.path, "Could not remove socket file");
        }
        info!(path = ?self.path, "Closed capture socket");
    }
}

impl Drop for SocketHub {
    fn drop(&mut self) {
        if let Some(active) = self.listener.get_mut().take() {
            self.shut_down(active);
        }
    }
}

fn accept_loop(socket: UnixListener, sessions: Arc<Registry>, shutdown: Arc<AtomicBool>) {
    for conn in socket.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match conn {
            Ok(stream) => {
                let sessions = Arc::clone(&sessions);
                let spawned = thread::Builder::new()
                    .name("vidbridge-conn".to_string())
                    .spawn(move || match handle_connection(stream, &sessions) {
                        Ok(()) => debug!("Connection finished"),
                        Err(e) if e.is_end_of_stream() => debug!("Connection closed by peer"),
                        Err(e) => warn!(error = %e, "Dropping connection"),
                    });
                if let Err(e) = spawned {
                    warn!(error = %e, "Could not spawn connection handler");
                }
            }
            Err(e) => warn!(error = %e, "Accept failed"),
        }
    }
    debug!("Accept loop exited");
}

fn handle_connection(mut stream: UnixStream, sessions: &Registry) -> vidbridge_media::Result<()> {
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;

    // Consume the whole handshake before routing so a rejected peer sees a
    // clean close.
    let session_key = read_key(&mut stream)?;
    let connection_key = read_key(&mut stream)?;
    let sink = sessions
        .get(&session_key)
        .map(|entry| Arc::clone(entry.value()))
        .ok_or_else(|| Error::unexpected(format!("unknown session key {session_key}")))?;

    stream.set_read_timeout(None)?;
    debug!(session_key = %session_key, "Routing connection");
    sink.serve(&connection_key, stream)
}
