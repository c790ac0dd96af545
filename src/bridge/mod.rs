//! Capture lifecycle.
//!
//! Starting a capture needs the encoder's SPS/PPS, which a live socket
//! recording never yields. They come from the parameter cache or, on a
//! miss, from a short probe recording to a temporary file. The live
//! recording then goes through the shared [`SocketHub`] into a
//! [`LiveSession`], and the transport pulls NAL units from the mailbox.

pub mod encoder;
pub mod handshake;
pub mod hub;
pub mod session;

pub use encoder::{
    spawn_stop, stop_encoder, wait_bounded, EncoderFactory, EncoderOutput, EncoderSettings,
    LimitNotifier, RecordingLimits, VideoEncoder,
};
pub use hub::{ConnectionSink, SocketHub};
pub use session::LiveSession;

use crate::cache::ParameterCache;
use crate::config::Config;
use anyhow::{Context, Result};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use tracing::{debug, info, warn};
use vidbridge_media::{
    extract_parameter_sets_from_path, FrameTiming, NalMailbox, ParameterSets, TransportBuffer,
};

/// Where a [`CaptureBridge`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    /// Recovering parameter sets with a probe recording.
    Configuring,
    Recording,
    Stopping,
    Stopped,
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BridgeState::Idle => "idle",
            BridgeState::Configuring => "configuring",
            BridgeState::Recording => "recording",
            BridgeState::Stopping => "stopping",
            BridgeState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

struct ActiveRecording {
    encoder: Box<dyn VideoEncoder>,
    session: Arc<LiveSession>,
    client: UnixStream,
}

/// One capture source feeding one mailbox.
pub struct CaptureBridge {
    config: Config,
    cache: ParameterCache,
    hub: Arc<SocketHub>,
    factory: Arc<dyn EncoderFactory>,
    session_key: String,
    mailbox: Arc<NalMailbox>,
    state: BridgeState,
    params: Option<ParameterSets>,
    active: Option<ActiveRecording>,
}

impl CaptureBridge {
    pub fn new(
        config: Config,
        cache: ParameterCache,
        hub: Arc<SocketHub>,
        factory: Arc<dyn EncoderFactory>,
    ) -> Self {
        Self {
            config,
            cache,
            hub,
            factory,
            session_key: handshake::new_key(),
            mailbox: Arc::new(NalMailbox::new()),
            state: BridgeState::Idle,
            params: None,
            active: None,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Parameter sets of the current or last recording.
    pub fn parameter_sets(&self) -> Option<&ParameterSets> {
        self.params.as_ref()
    }

    /// Shared handle for consumers on other threads.
    pub fn mailbox(&self) -> Arc<NalMailbox> {
        Arc::clone(&self.mailbox)
    }

    /// Take the latest NAL unit in transport form, if one is waiting.
    pub fn pull(&self) -> Option<TransportBuffer> {
        self.mailbox.pull()
    }

    /// Obtain parameter sets and start the live recording.
    pub fn start(&mut self) -> Result<()> {
        if matches!(
            self.state,
            BridgeState::Configuring | BridgeState::Recording | BridgeState::Stopping
        ) {
            anyhow::bail!("Capture already running ({})", self.state);
        }

        match self.try_start() {
            Ok(()) => {
                self.state = BridgeState::Recording;
                info!(session_key = %self.session_key, "Capture started");
                Ok(())
            }
            Err(e) => {
                self.state = BridgeState::Stopped;
                Err(e)
            }
        }
    }

    fn try_start(&mut self) -> Result<()> {
        let resolution = self.config.capture.resolution();
        let key = resolution.cache_key();

        let params = match self.cache.load(&key) {
            Some(params) => {
                info!(resolution = %resolution, "Using cached parameter sets");
                params
            }
            None => {
                self.state = BridgeState::Configuring;
                info!(resolution = %resolution, "No cached parameter sets, recording a probe");
                let params = self.probe().context("Probe recording failed")?;
                self.cache.store(&params, &key);
                params
            }
        };

        self.params = Some(params.clone());
        self.start_recording(params)
    }

    /// Record a short sample to a temp file and pull SPS/PPS out of it.
    fn probe(&self) -> Result<ParameterSets> {
        let dir = self
            .config
            .probe
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let file = tempfile::Builder::new()
            .prefix("vidbridge-probe-")
            .suffix(".mp4")
            .tempfile_in(&dir)
            .with_context(|| format!("Failed to create probe file in {:?}", dir))?;
        let path = file.into_temp_path();

        let result = self.record_probe(&path).and_then(|()| {
            extract_parameter_sets_from_path(&path)
                .with_context(|| format!("No parameter sets in probe recording {:?}", path))
        });

        if let Err(e) = path.close() {
            warn!(error = %e, "Failed to delete probe recording");
        }
        result
    }

    fn record_probe(&self, path: &Path) -> Result<()> {
        let probe = &self.config.probe;
        let settings = EncoderSettings {
            resolution: self.config.capture.resolution(),
            frame_rate: self.config.capture.frame_rate,
            limits: Some(RecordingLimits {
                max_duration: probe.max_duration(),
                max_file_size: probe.max_file_size,
            }),
        };

        let mut encoder = self.factory.create()?;
        let (tx, rx) = mpsc::channel();
        let started = encoder
            .configure(&settings, EncoderOutput::File(path.to_path_buf()), Some(tx))
            .and_then(|()| encoder.start());
        if let Err(e) = started {
            encoder.release();
            return Err(e);
        }

        match rx.recv_timeout(probe.wait_ceiling()) {
            Ok(()) => debug!("Probe limit reached"),
            Err(RecvTimeoutError::Timeout) => warn!(
                ceiling_ms = probe.wait_ceiling_ms,
                "Probe limit not reported in time, stopping anyway"
            ),
            Err(RecvTimeoutError::Disconnected) => debug!("Encoder dropped its limit notifier"),
        }

        let stream = &self.config.stream;
        if !stop_encoder(encoder, stream.stop_poll_attempts, stream.stop_poll_interval()) {
            warn!("Probe encoder did not stop cleanly");
        }
        Ok(())
    }

    fn start_recording(&mut self, params: ParameterSets) -> Result<()> {
        let connection_key = handshake::new_key();
        let session = Arc::new(LiveSession::new(
            connection_key.clone(),
            params,
            FrameTiming::new(self.config.capture.frame_rate),
            self.config.stream.parameter_set_interval(),
            Arc::clone(&self.mailbox),
        ));
        self.hub.register(&self.session_key, session.clone())?;

        let client = match self.connect(&connection_key) {
            Ok(client) => client,
            Err(e) => {
                session.close();
                self.hub.unregister(&self.session_key);
                return Err(e);
            }
        };

        match self.start_live_encoder(&client) {
            Ok(encoder) => {
                self.active = Some(ActiveRecording {
                    encoder,
                    session,
                    client,
                });
                Ok(())
            }
            Err(e) => {
                if let Err(shutdown) = client.shutdown(Shutdown::Both) {
                    debug!(error = %shutdown, "Client socket already closed");
                }
                session.close();
                self.hub.unregister(&self.session_key);
                Err(e)
            }
        }
    }

    /// Connect to the hub and identify this session and connection.
    fn connect(&self, connection_key: &str) -> Result<UnixStream> {
        let mut client = UnixStream::connect(self.hub.path())
            .with_context(|| format!("Failed to connect to {:?}", self.hub.path()))?;
        handshake::write_keys(&mut client, &self.session_key, connection_key)
            .context("Failed to write handshake")?;
        Ok(client)
    }

    fn start_live_encoder(&self, client: &UnixStream) -> Result<Box<dyn VideoEncoder>> {
        let output = client
            .try_clone()
            .context("Failed to duplicate client socket")?;
        let settings = EncoderSettings {
            resolution: self.config.capture.resolution(),
            frame_rate: self.config.capture.frame_rate,
            limits: None,
        };

        let mut encoder = self.factory.create()?;
        let started = encoder
            .configure(&settings, EncoderOutput::Socket(output), None)
            .and_then(|()| encoder.start());
        if let Err(e) = started {
            encoder.release();
            return Err(e);
        }
        Ok(encoder)
    }

    /// Stop the live recording.
    ///
    /// Encoder shutdown runs on a worker; the sockets close right away so
    /// the demuxer unwinds even if the encoder never returns.
    pub fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.state = BridgeState::Stopping;
        let ActiveRecording {
            encoder,
            session,
            client,
        } = active;

        let worker = spawn_stop(encoder);

        if let Err(e) = client.shutdown(Shutdown::Both) {
            debug!(error = %e, "Client socket already closed");
        }
        session.close();

        if let Some(handle) = worker {
            let stream = &self.config.stream;
            if !wait_bounded(handle, stream.stop_poll_attempts, stream.stop_poll_interval()) {
                warn!("Encoder abandoned after bounded stop");
            }
        }

        self.hub.unregister(&self.session_key);
        self.state = BridgeState::Stopped;
        info!(session_key = %self.session_key, "Capture stopped");
    }
}

impl Drop for CaptureBridge {
    fn drop(&mut self) {
        self.stop();
    }
}
