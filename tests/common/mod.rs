//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which owns a scratch directory holding the
//! socket and probe files, an in-memory parameter cache and a config tuned
//! for fast stops, plus [`ScriptedEncoder`], a fake encoder whose output and
//! misbehaviour are chosen per test.

#![allow(dead_code)]

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::TempDir;

use vidbridge::bridge::{
    CaptureBridge, EncoderFactory, EncoderOutput, EncoderSettings, LimitNotifier, SocketHub,
    VideoEncoder,
};
use vidbridge::cache::{MemoryStore, ParameterCache};
use vidbridge::config::Config;
use vidbridge::fixture;

/// What a [`ScriptedEncoder`] was asked to record into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputKind {
    File,
    Socket,
}

/// Knobs and call log shared by every encoder a [`ScriptedFactory`] makes.
#[derive(Default)]
pub struct Script {
    /// Bytes written for a file recording.
    pub probe_bytes: Vec<u8>,
    /// Bytes written into the socket.
    pub stream_bytes: Vec<u8>,
    /// Never report the recording limit.
    pub silent_limit: bool,
    /// Block in `stop` for this long.
    pub stop_delay: Duration,
    /// Fail `start` when handed the live socket.
    pub fail_live_start: bool,
    pub created: AtomicUsize,
    pub released: AtomicUsize,
    pub outputs: Mutex<Vec<OutputKind>>,
}

impl Script {
    pub fn new() -> Self {
        Self {
            probe_bytes: fixture::sample_mp4(vidbridge::config::Resolution::new(640, 480)),
            stream_bytes: fixture::live_stream(10, 5),
            ..Default::default()
        }
    }

    pub fn outputs(&self) -> Vec<OutputKind> {
        self.outputs.lock().clone()
    }
}

pub struct ScriptedFactory(pub Arc<Script>);

impl EncoderFactory for ScriptedFactory {
    fn create(&self) -> anyhow::Result<Box<dyn VideoEncoder>> {
        self.0.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedEncoder {
            script: Arc::clone(&self.0),
            output: None,
            on_limit: None,
            socket: None,
        }))
    }
}

pub struct ScriptedEncoder {
    script: Arc<Script>,
    output: Option<EncoderOutput>,
    on_limit: Option<LimitNotifier>,
    socket: Option<UnixStream>,
}

impl VideoEncoder for ScriptedEncoder {
    fn configure(
        &mut self,
        _settings: &EncoderSettings,
        output: EncoderOutput,
        on_limit: Option<LimitNotifier>,
    ) -> anyhow::Result<()> {
        self.output = Some(output);
        self.on_limit = on_limit;
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        match self.output.take() {
            Some(EncoderOutput::File(path)) => {
                self.script.outputs.lock().push(OutputKind::File);
                std::fs::write(&path, &self.script.probe_bytes)?;
                if !self.script.silent_limit {
                    if let Some(tx) = self.on_limit.take() {
                        let _ = tx.send(());
                    }
                }
            }
            Some(EncoderOutput::Socket(mut socket)) => {
                self.script.outputs.lock().push(OutputKind::Socket);
                if self.script.fail_live_start {
                    anyhow::bail!("encoder refused the socket");
                }
                socket.write_all(&self.script.stream_bytes)?;
                self.socket = Some(socket);
            }
            None => anyhow::bail!("not configured"),
        }
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        if !self.script.stop_delay.is_zero() {
            thread::sleep(self.script.stop_delay);
        }
        Ok(())
    }

    fn release(&mut self) {
        self.socket = None;
        self.script.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scratch directory, config and cache for one test.
pub struct TestHarness {
    pub dir: TempDir,
    pub config: Config,
    pub store: Arc<MemoryStore>,
}

impl TestHarness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let probe_dir = dir.path().join("probe");
        std::fs::create_dir_all(&probe_dir).expect("failed to create probe dir");

        let mut config = Config::default();
        config.socket.path = dir.path().join("hub.sock");
        config.probe.temp_dir = Some(probe_dir);
        config.probe.wait_ceiling_ms = 200;
        config.stream.stop_poll_attempts = 5;
        config.stream.stop_poll_interval_ms = 20;

        Self {
            dir,
            config,
            store: Arc::new(MemoryStore::new()),
        }
    }

    pub fn cache(&self) -> ParameterCache {
        ParameterCache::new(self.store.clone(), self.config.cache.store.clone())
    }

    pub fn hub(&self) -> Arc<SocketHub> {
        Arc::new(SocketHub::new(&self.config.socket.path))
    }

    pub fn bridge(&self, hub: Arc<SocketHub>, script: Arc<Script>) -> CaptureBridge {
        CaptureBridge::new(
            self.config.clone(),
            self.cache(),
            hub,
            Arc::new(ScriptedFactory(script)),
        )
    }

    /// Probe files left behind in the probe directory.
    pub fn leftover_probe_files(&self) -> usize {
        let dir = self.config.probe.temp_dir.as_ref().expect("probe dir set");
        std::fs::read_dir(dir)
            .map(|entries| entries.filter_map(Result::ok).count())
            .unwrap_or(0)
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
