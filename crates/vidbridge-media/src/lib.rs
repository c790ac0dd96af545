//! vidbridge-media: MP4 box parsing and live H.264 NAL extraction
//!
//! A platform recorder can only write MP4 to a file descriptor. Pointing
//! that descriptor at a local socket yields a container that is never
//! finalized: the parameter sets that would land in `moov` never arrive,
//! and `mdat` just grows. This crate handles both halves:
//!
//! - `mp4` - box primitives and the avcC extractor for a short, finished
//!   sample recording
//! - `stream` - the live demuxer that walks ftyp/free/mdat and re-frames the
//!   length-prefixed NAL units, and the assembler that timestamps them
//! - `mailbox` - the single-slot handoff to the transport consumer
//! - `h264` - NAL unit types and the SPS/PPS pair

pub mod error;
pub mod h264;
pub mod mailbox;
pub mod mp4;
pub mod stream;

pub use error::{Error, Result};
pub use h264::{NalUnit, NalUnitType, ParameterSets, TransportBuffer};
pub use mailbox::NalMailbox;
pub use mp4::{extract_parameter_sets, extract_parameter_sets_from_path};
pub use stream::{FrameAssembler, FrameTiming, LiveDemuxer};
