//! The platform encoder as seen by the bridge.

use crate::config::Resolution;
use anyhow::Result;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Where the encoder writes its MP4 output.
#[derive(Debug)]
pub enum EncoderOutput {
    /// A regular file; the recording is finalized on stop.
    File(PathBuf),
    /// The client end of the local socket; never finalized.
    Socket(UnixStream),
}

/// Caps on a bounded recording; whichever is hit first ends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingLimits {
    pub max_duration: Duration,
    pub max_file_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSettings {
    pub resolution: Resolution,
    pub frame_rate: i32,
    pub limits: Option<RecordingLimits>,
}

/// Fired once when a [`RecordingLimits`] cap is reached.
pub type LimitNotifier = Sender<()>;

/// An H.264 hardware encoder writing MP4.
///
/// `stop` and `release` may be slow or hang; the bridge only ever calls
/// them from a worker thread it is prepared to abandon.
pub trait VideoEncoder: Send {
    fn configure(
        &mut self,
        settings: &EncoderSettings,
        output: EncoderOutput,
        on_limit: Option<LimitNotifier>,
    ) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn release(&mut self);
}

/// Creates one encoder per recording.
pub trait EncoderFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn VideoEncoder>>;
}

impl<F> EncoderFactory for F
where
    F: Fn() -> Result<Box<dyn VideoEncoder>> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn VideoEncoder>> {
        self()
    }
}

/// Stop and release `encoder` on a worker thread, polling it at most
/// `attempts` times `interval` apart.
///
/// Returns whether the worker finished in time. A worker that did not is
/// left running detached.
pub fn stop_encoder(encoder: Box<dyn VideoEncoder>, attempts: u32, interval: Duration) -> bool {
    match spawn_stop(encoder) {
        Some(handle) => wait_bounded(handle, attempts, interval),
        None => false,
    }
}

/// Start stopping `encoder` without waiting for it.
pub fn spawn_stop(mut encoder: Box<dyn VideoEncoder>) -> Option<JoinHandle<()>> {
    let worker = thread::Builder::new()
        .name("encoder-stop".to_string())
        .spawn(move || {
            if let Err(e) = encoder.stop() {
                warn!(error = %e, "Encoder stop failed");
            }
            encoder.release();
        });

    match worker {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Could not spawn encoder stop worker");
            None
        }
    }
}

/// Poll a stop worker; gives up after `attempts` polls.
pub fn wait_bounded(handle: JoinHandle<()>, attempts: u32, interval: Duration) -> bool {
    for attempt in 0..attempts {
        if handle.is_finished() {
            debug!(attempt, "Encoder stop worker finished");
            return handle.join().is_ok();
        }
        thread::sleep(interval);
    }

    if handle.is_finished() {
        return handle.join().is_ok();
    }

    warn!(
        waited_ms = (interval * attempts).as_millis() as u64,
        "Encoder did not stop in time, proceeding without it"
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    struct SlowEncoder {
        stop_delay: Duration,
        released: Arc<AtomicBool>,
    }

    impl VideoEncoder for SlowEncoder {
        fn configure(&mut self, _: &EncoderSettings, _: EncoderOutput, _: Option<LimitNotifier>) -> Result<()> {
            Ok(())
        }
        fn start(&mut self) -> Result<()> {
            Ok(())
        }
        fn stop(&mut self) -> Result<()> {
            thread::sleep(self.stop_delay);
            Ok(())
        }
        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_stop_in_time() {
        let released = Arc::new(AtomicBool::new(false));
        let encoder = Box::new(SlowEncoder {
            stop_delay: Duration::from_millis(5),
            released: Arc::clone(&released),
        });
        assert!(stop_encoder(encoder, 50, Duration::from_millis(10)));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_hung_stop_gives_up() {
        let released = Arc::new(AtomicBool::new(false));
        let encoder = Box::new(SlowEncoder {
            stop_delay: Duration::from_secs(5),
            released: Arc::clone(&released),
        });
        let started = Instant::now();
        assert!(!stop_encoder(encoder, 3, Duration::from_millis(10)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!released.load(Ordering::SeqCst));
    }
}
