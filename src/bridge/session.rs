//! Live capture session: the consumer side of one encoder connection.

use super::hub::ConnectionSink;
use parking_lot::Mutex;
use std::io::BufReader;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use vidbridge_media::stream::DemuxStats;
use vidbridge_media::{
    Error, FrameAssembler, FrameTiming, LiveDemuxer, NalMailbox, ParameterSets, Result,
};

/// Demuxes the encoder's socket output into a mailbox.
pub struct LiveSession {
    connection_key: String,
    params: ParameterSets,
    timing: FrameTiming,
    reinject_after: Duration,
    mailbox: Arc<NalMailbox>,
    active: Mutex<Option<UnixStream>>,
    closed: AtomicBool,
    last_stats: Mutex<Option<DemuxStats>>,
}

impl LiveSession {
    pub fn new(
        connection_key: impl Into<String>,
        params: ParameterSets,
        timing: FrameTiming,
        reinject_after: Duration,
        mailbox: Arc<NalMailbox>,
    ) -> Self {
        Self {
            connection_key: connection_key.into(),
            params,
            timing,
            reinject_after,
            mailbox,
            active: Mutex::new(None),
            closed: AtomicBool::new(false),
            last_stats: Mutex::new(None),
        }
    }

    pub fn connection_key(&self) -> &str {
        &self.connection_key
    }

    pub fn is_connected(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Counters from the last finished demux run.
    pub fn last_stats(&self) -> Option<DemuxStats> {
        *self.last_stats.lock()
    }

    /// Refuse further connections and shut the live one down, which makes
    /// the demuxer's next read fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(stream) = self.active.lock().take() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!(error = %e, "Socket already closed");
            }
        }
    }
}

impl ConnectionSink for LiveSession {
    fn serve(&self, connection_key: &str, stream: UnixStream) -> Result<()> {
        if connection_key != self.connection_key {
            return Err(Error::unexpected(format!(
                "unknown connection key {connection_key}"
            )));
        }

        {
            let mut active = self.active.lock();
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::unexpected("session already closed"));
            }
            if active.is_some() {
                return Err(Error::unexpected("session already has a connection"));
            }
            *active = Some(stream.try_clone()?);
        }

        info!(connection_key = %connection_key, "Encoder connected");
        let assembler = FrameAssembler::new(self.params.clone(), self.timing)
            .reinject_after(self.reinject_after);
        let mut demuxer = LiveDemuxer::new(
            BufReader::new(stream),
            assembler,
            Arc::clone(&self.mailbox),
        );
        let result = demuxer.run();

        *self.last_stats.lock() = Some(demuxer.stats());
        self.active.lock().take();

        if self.closed.load(Ordering::SeqCst) {
            debug!("Demux unwound after close");
            return Ok(());
        }
        result
    }
}
