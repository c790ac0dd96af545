//! NAL arrival: timestamps, marker flags and parameter-set reinjection.

use crate::h264::{NalUnit, NalUnitType, ParameterSets};
use crate::mailbox::NalMailbox;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Frame rate used when the configured one is not positive.
pub const DEFAULT_FRAME_RATE: i32 = 15;

/// Timestamp ticks per frame.
pub const TICKS_PER_FRAME: u64 = 2;

/// How long parameter sets stay fresh before the next key NAL gets them
/// re-sent in front of it.
pub const DEFAULT_REINJECT_AFTER: Duration = Duration::from_millis(750);

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Per-frame timestamp step derived from the configured frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    frame_rate: u32,
}

impl FrameTiming {
    /// Non-positive rates fall back to [`DEFAULT_FRAME_RATE`].
    pub fn new(frame_rate: i32) -> Self {
        let rate = if frame_rate <= 0 {
            DEFAULT_FRAME_RATE
        } else {
            frame_rate
        };
        Self {
            frame_rate: rate as u32,
        }
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Wall-clock length of one frame in nanoseconds.
    pub fn frame_period(&self) -> u64 {
        NANOS_PER_SECOND / u64::from(self.frame_rate)
    }

    /// Timestamp advance for one access unit: the frame period divided by
    /// [`TICKS_PER_FRAME`].
    pub fn frame_interval(&self) -> u64 {
        self.frame_period() / TICKS_PER_FRAME
    }
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_RATE)
    }
}

/// Time source for the reinjection threshold.
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Destination for assembled NAL units.
pub trait NalSink {
    fn publish(&mut self, unit: NalUnit);
}

impl NalSink for Arc<NalMailbox> {
    fn publish(&mut self, unit: NalUnit) {
        if let Some(dropped) = self.replace(unit) {
            trace!(nal_type = %dropped.nal_type, "Unconsumed NAL replaced");
        }
    }
}

impl NalSink for Vec<NalUnit> {
    fn publish(&mut self, unit: NalUnit) {
        self.push(unit);
    }
}

/// Turns raw NAL payloads into timestamped, marked units.
#[derive(Debug)]
pub struct FrameAssembler<C: Clock = SystemClock> {
    params: ParameterSets,
    timing: FrameTiming,
    reinject_after: Duration,
    timestamp: u64,
    prev_type: Option<NalUnitType>,
    last_parameter_write: Option<Instant>,
    injections: u64,
    clock: C,
}

impl FrameAssembler<SystemClock> {
    pub fn new(params: ParameterSets, timing: FrameTiming) -> Self {
        Self::with_clock(params, timing, SystemClock)
    }
}

impl<C: Clock> FrameAssembler<C> {
    pub fn with_clock(params: ParameterSets, timing: FrameTiming, clock: C) -> Self {
        Self {
            params,
            timing,
            reinject_after: DEFAULT_REINJECT_AFTER,
            timestamp: 0,
            prev_type: None,
            last_parameter_write: None,
            injections: 0,
            clock,
        }
    }

    /// Override the reinjection threshold.
    pub fn reinject_after(mut self, threshold: Duration) -> Self {
        self.reinject_after = threshold;
        self
    }

    /// Start the running timestamp somewhere other than zero.
    pub fn base_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Current running timestamp.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Number of times SPS+PPS were emitted.
    pub fn injections(&self) -> u64 {
        self.injections
    }

    pub fn parameter_sets(&self) -> &ParameterSets {
        &self.params
    }

    /// Emit the cached SPS then PPS as two pseudo-NALs.
    pub fn inject_parameter_sets<S: NalSink>(&mut self, sink: &mut S) {
        let sps = self.params.sps().clone();
        let pps = self.params.pps().clone();
        self.injections += 1;
        debug!(injections = self.injections, "Injecting parameter sets");
        self.arrive(sps, sink);
        self.arrive(pps, sink);
    }

    /// Handle one NAL from the encoder.
    ///
    /// A key-carrying NAL arriving after the parameter sets have gone stale
    /// is published behind a fresh SPS and PPS.
    pub fn push<S: NalSink>(&mut self, payload: Bytes, sink: &mut S) {
        let Some(&first) = payload.first() else {
            return;
        };
        let nal_type = NalUnitType::from_header_byte(first);
        if nal_type.is_key_carrying() && self.parameter_sets_stale() {
            self.inject_parameter_sets(sink);
        }
        self.arrive(payload, sink);
    }

    fn parameter_sets_stale(&self) -> bool {
        match self.last_parameter_write {
            Some(at) => self.clock.now().saturating_duration_since(at) > self.reinject_after,
            None => true,
        }
    }

    fn arrive<S: NalSink>(&mut self, payload: Bytes, sink: &mut S) {
        let nal_type = payload
            .first()
            .map(|&b| NalUnitType::from_header_byte(b))
            .unwrap_or(NalUnitType::Unspecified);

        // SEI/SPS/PPS/AUD open an access unit; whatever follows them shares
        // their timestamp.
        if let Some(prev) = self.prev_type {
            if !prev.is_access_unit_prefix() {
                self.timestamp += self.timing.frame_interval();
            }
        }

        if nal_type.is_parameter_set() {
            self.last_parameter_write = Some(self.clock.now());
        }
        let marker = !nal_type.is_access_unit_prefix();

        trace!(
            nal_type = %nal_type,
            len = payload.len(),
            timestamp = self.timestamp,
            marker,
            "NAL"
        );

        self.prev_type = Some(nal_type);
        sink.publish(NalUnit {
            payload,
            nal_type,
            timestamp: self.timestamp,
            marker,
        });
    }
}
