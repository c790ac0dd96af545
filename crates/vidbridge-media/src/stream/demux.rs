//! Demuxer for the live, never-finalized MP4 stream a recorder writes into
//! a socket.

use super::assembler::{Clock, FrameAssembler, NalSink, SystemClock};
use crate::h264::MAX_NAL_LENGTH;
use crate::mp4::box_reader::{discard, read_bytes, read_u32};
use crate::mp4::{read_box_header, skip_box, BoxHeader, FourCc};
use crate::{Error, Result};
use bytes::Bytes;
use std::io::Read;
use tracing::{debug, info, warn};

/// Size of the ftyp box a platform recorder writes: size, type, major brand,
/// minor version and two compatible brands.
pub const FTYP_SIZE: u64 = 4 + 4 + 4 + 4 + 4 + 4;

/// Length field value some encoders emit once in a while: ASCII "????".
pub const GLITCH_LENGTH: u32 = 0x3F3F_3F3F;

/// Counters kept while demuxing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub boxes_skipped: u64,
    pub bytes_skipped: u64,
    pub nal_units: u64,
    pub nal_bytes: u64,
    pub glitches_recovered: u64,
}

/// Pulls NAL units out of a growing container stream.
pub struct LiveDemuxer<R, S, C: Clock = SystemClock> {
    source: R,
    sink: S,
    assembler: FrameAssembler<C>,
    stats: DemuxStats,
    started: bool,
}

impl<R: Read, S: NalSink, C: Clock> LiveDemuxer<R, S, C> {
    pub fn new(source: R, assembler: FrameAssembler<C>, sink: S) -> Self {
        Self {
            source,
            sink,
            assembler,
            stats: DemuxStats::default(),
            started: false,
        }
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    pub fn assembler(&self) -> &FrameAssembler<C> {
        &self.assembler
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Give back the sink, e.g. to inspect collected units.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Demux until the source fails.
    ///
    /// The live mdat never ends, so this only returns on error: a closed
    /// socket shows up as [`Error::EndOfStream`] or [`Error::Io`].
    pub fn run(&mut self) -> Result<()> {
        let result = self.run_boxes();
        info!(
            nal_units = self.stats.nal_units,
            nal_bytes = self.stats.nal_bytes,
            boxes_skipped = self.stats.boxes_skipped,
            glitches = self.stats.glitches_recovered,
            injections = self.assembler.injections(),
            "Live demux ended"
        );
        result
    }

    fn run_boxes(&mut self) -> Result<()> {
        loop {
            let header = read_box_header(&mut self.source)?;
            debug!(box_type = %header.box_type, size = header.size, "Top-level box");

            match header.box_type {
                FourCc::FTYP => self.read_ftyp(&header)?,
                FourCc::MDAT => return self.read_mdat(),
                _ => {
                    let skipped = skip_box(&mut self.source, &header)?;
                    self.stats.boxes_skipped += 1;
                    self.stats.bytes_skipped += skipped;
                }
            }
        }
    }

    /// The recorder writes ftyp with a size it patches later, so the fixed
    /// layout decides how much to skip; the declared size is checked after.
    fn read_ftyp(&mut self, header: &BoxHeader) -> Result<()> {
        discard(&mut self.source, FTYP_SIZE - BoxHeader::LEN)?;
        if u64::from(header.size) != FTYP_SIZE {
            return Err(Error::unexpected(format!(
                "ftyp declares {} bytes, expected {}",
                header.size, FTYP_SIZE
            )));
        }
        Ok(())
    }

    fn read_mdat(&mut self) -> Result<()> {
        loop {
            let length = self.read_nal_length()?;

            if !self.started {
                self.started = true;
                self.assembler.inject_parameter_sets(&mut self.sink);
            }

            let payload = read_bytes(&mut self.source, length as usize)?;
            self.stats.nal_units += 1;
            self.stats.nal_bytes += u64::from(length);
            self.assembler.push(Bytes::from(payload), &mut self.sink);
        }
    }

    /// Read a NAL length prefix, tolerating one "????" glitch.
    fn read_nal_length(&mut self) -> Result<u32> {
        let mut length = read_u32(&mut self.source)?;

        if length == GLITCH_LENGTH {
            warn!("Encoder emitted ???? length, skipping 4 bytes");
            discard(&mut self.source, 4)?;
            length = read_u32(&mut self.source)?;
            if length == GLITCH_LENGTH {
                return Err(Error::unexpected("repeated ???? NAL length"));
            }
            self.stats.glitches_recovered += 1;
        }

        if length == 0 || length > MAX_NAL_LENGTH {
            return Err(Error::unexpected(format!("invalid NAL length {length}")));
        }
        Ok(length)
    }
}
