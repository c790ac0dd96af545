//! Live stream demuxing and frame assembly.

mod assembler;
mod demux;

pub use assembler::{
    Clock, FrameAssembler, FrameTiming, NalSink, SystemClock, DEFAULT_FRAME_RATE,
    DEFAULT_REINJECT_AFTER, TICKS_PER_FRAME,
};
pub use demux::{DemuxStats, LiveDemuxer, FTYP_SIZE, GLITCH_LENGTH};
