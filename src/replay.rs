//! Encoder stand-in that replays pre-recorded output.
//!
//! A finished MP4 plays the part of the probe recording and a raw live
//! stream capture (ftyp, free, growing mdat) plays the part of the socket
//! output. Useful for exercising the bridge without capture hardware.

use crate::bridge::{
    EncoderFactory, EncoderOutput, EncoderSettings, LimitNotifier, VideoEncoder,
};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Builds a [`ReplayEncoder`] per recording.
#[derive(Debug, Clone)]
pub struct ReplayEncoderFactory {
    probe_source: PathBuf,
    stream_source: PathBuf,
    chunk_size: usize,
    pace: Duration,
}

impl ReplayEncoderFactory {
    pub fn new(probe_source: impl Into<PathBuf>, stream_source: impl Into<PathBuf>) -> Self {
        Self {
            probe_source: probe_source.into(),
            stream_source: stream_source.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            pace: Duration::ZERO,
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Delay between stream chunks.
    pub fn pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }
}

impl EncoderFactory for ReplayEncoderFactory {
    fn create(&self) -> Result<Box<dyn VideoEncoder>> {
        Ok(Box::new(ReplayEncoder {
            source: self.clone(),
            output: None,
            on_limit: None,
            writer: None,
        }))
    }
}

struct StreamWriter {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct ReplayEncoder {
    source: ReplayEncoderFactory,
    output: Option<EncoderOutput>,
    on_limit: Option<LimitNotifier>,
    writer: Option<StreamWriter>,
}

impl ReplayEncoder {
    fn record_file(&mut self, path: &Path) -> Result<()> {
        let copied = std::fs::copy(&self.source.probe_source, path).with_context(|| {
            format!(
                "Failed to copy {:?} to {:?}",
                self.source.probe_source, path
            )
        })?;
        debug!(bytes = copied, path = ?path, "Replayed probe recording");

        if let Some(on_limit) = self.on_limit.take() {
            // Nobody waiting is fine.
            let _ = on_limit.send(());
        }
        Ok(())
    }

    fn record_socket(&mut self, socket: UnixStream) -> Result<()> {
        let file = File::open(&self.source.stream_source).with_context(|| {
            format!(
                "Failed to open stream source {:?}",
                self.source.stream_source
            )
        })?;
        let (stop, stopped) = mpsc::channel();
        let chunk_size = self.source.chunk_size;
        let pace = self.source.pace;

        let handle = thread::Builder::new()
            .name("replay-writer".to_string())
            .spawn(move || match write_stream(file, socket, chunk_size, pace, stopped) {
                Ok(bytes) => debug!(bytes, "Replay writer finished"),
                Err(e) => debug!(error = %e, "Replay writer ended"),
            })
            .context("Failed to spawn replay writer")?;

        self.writer = Some(StreamWriter { stop, handle });
        Ok(())
    }
}

impl VideoEncoder for ReplayEncoder {
    fn configure(
        &mut self,
        settings: &EncoderSettings,
        output: EncoderOutput,
        on_limit: Option<LimitNotifier>,
    ) -> Result<()> {
        info!(
            resolution = %settings.resolution,
            frame_rate = settings.frame_rate,
            bounded = settings.limits.is_some(),
            "Configuring replay encoder"
        );
        self.output = Some(output);
        self.on_limit = on_limit;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        match self.output.take() {
            Some(EncoderOutput::File(path)) => self.record_file(&path),
            Some(EncoderOutput::Socket(socket)) => self.record_socket(socket),
            None => anyhow::bail!("Replay encoder started before configure"),
        }
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let _ = writer.stop.send(());
            if writer.handle.join().is_err() {
                warn!("Replay writer panicked");
            }
        }
        Ok(())
    }

    fn release(&mut self) {
        self.output = None;
        self.on_limit = None;
    }
}

/// Copy `file` to `socket` in chunks, then hold the connection open until
/// told to stop, the way a live encoder would.
fn write_stream(
    mut file: File,
    mut socket: UnixStream,
    chunk_size: usize,
    pace: Duration,
    stop: Receiver<()>,
) -> io::Result<u64> {
    let mut buf = vec![0u8; chunk_size];
    let mut written = 0u64;

    loop {
        match stop.try_recv() {
            Err(TryRecvError::Empty) => {}
            _ => return Ok(written),
        }
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        socket.write_all(&buf[..n])?;
        written += n as u64;
        if !pace.is_zero() {
            thread::sleep(pace);
        }
    }

    let _ = stop.recv();
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Resolution;

    fn settings() -> EncoderSettings {
        EncoderSettings {
            resolution: Resolution::new(640, 480),
            frame_rate: 15,
            limits: None,
        }
    }

    #[test]
    fn test_file_output_copies_and_signals() {
        let dir = tempfile::tempdir().unwrap();
        let probe = dir.path().join("probe.mp4");
        std::fs::write(&probe, b"recording").unwrap();
        let factory = ReplayEncoderFactory::new(&probe, dir.path().join("unused.bin"));

        let out = dir.path().join("out.mp4");
        let (tx, rx) = mpsc::channel();
        let mut encoder = factory.create().unwrap();
        encoder
            .configure(&settings(), EncoderOutput::File(out.clone()), Some(tx))
            .unwrap();
        encoder.start().unwrap();

        assert!(rx.try_recv().is_ok());
        assert_eq!(std::fs::read(&out).unwrap(), b"recording");
        encoder.stop().unwrap();
        encoder.release();
    }

    #[test]
    fn test_socket_output_streams_until_stop() {
        let dir = tempfile::tempdir().unwrap();
        let stream = dir.path().join("stream.bin");
        let payload: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        std::fs::write(&stream, &payload).unwrap();
        let factory = ReplayEncoderFactory::new(dir.path().join("unused.mp4"), &stream).chunk_size(333);

        let (client, mut server) = UnixStream::pair().unwrap();
        let mut encoder = factory.create().unwrap();
        encoder
            .configure(&settings(), EncoderOutput::Socket(client), None)
            .unwrap();
        encoder.start().unwrap();

        let mut received = vec![0u8; payload.len()];
        server.read_exact(&mut received).unwrap();
        assert_eq!(received, payload);

        encoder.stop().unwrap();
        encoder.release();
        let mut rest = Vec::new();
        server.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn test_start_without_configure() {
        let factory = ReplayEncoderFactory::new("a", "b");
        let mut encoder = factory.create().unwrap();
        assert!(encoder.start().is_err());
    }
}
