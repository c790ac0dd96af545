//! H.264 elementary stream types.

use bytes::Bytes;

/// Annex B start code placed before every NAL handed to the transport.
pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Zeroed bytes appended after the payload so decoders may over-read.
pub const TRAILING_PADDING: usize = 8;

/// Largest NAL unit the transport accepts.
pub const MAX_NAL_LENGTH: u32 = 65_535;

/// NAL unit type, the low five bits of the first payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NalUnitType {
    Unspecified,
    NonIdrSlice,
    IdrSlice,
    Sei,
    Sps,
    Pps,
    AccessUnitDelimiter,
    Other(u8),
}

impl NalUnitType {
    /// Decode from the first byte of a NAL payload.
    pub fn from_header_byte(byte: u8) -> Self {
        match byte & 0x1F {
            0 => Self::Unspecified,
            1 => Self::NonIdrSlice,
            5 => Self::IdrSlice,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::AccessUnitDelimiter,
            other => Self::Other(other),
        }
    }

    /// Numeric `nal_unit_type`.
    pub fn code(&self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::NonIdrSlice => 1,
            Self::IdrSlice => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::AccessUnitDelimiter => 9,
            Self::Other(code) => *code,
        }
    }

    /// SPS or PPS.
    pub fn is_parameter_set(&self) -> bool {
        matches!(self, Self::Sps | Self::Pps)
    }

    /// Units that lead into an access unit rather than close one.
    ///
    /// The running timestamp does not move after these, and they never
    /// carry the marker flag.
    pub fn is_access_unit_prefix(&self) -> bool {
        matches!(
            self,
            Self::Sei | Self::Sps | Self::Pps | Self::AccessUnitDelimiter
        )
    }

    /// IDR picture or SEI: a decoder may (re)join here, so fresh parameter
    /// sets must precede it.
    pub fn is_key_carrying(&self) -> bool {
        matches!(self, Self::IdrSlice | Self::Sei)
    }
}

impl std::fmt::Display for NalUnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unspecified => write!(f, "unspecified"),
            Self::NonIdrSlice => write!(f, "slice"),
            Self::IdrSlice => write!(f, "idr"),
            Self::Sei => write!(f, "sei"),
            Self::Sps => write!(f, "sps"),
            Self::Pps => write!(f, "pps"),
            Self::AccessUnitDelimiter => write!(f, "aud"),
            Self::Other(code) => write!(f, "type{code}"),
        }
    }
}

/// Sequence and picture parameter sets recovered from a sample recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSets {
    sps: Bytes,
    pps: Bytes,
}

impl ParameterSets {
    /// Pair up an SPS and a PPS. Returns `None` if either is empty.
    pub fn new(sps: impl Into<Bytes>, pps: impl Into<Bytes>) -> Option<Self> {
        let sps = sps.into();
        let pps = pps.into();
        if sps.is_empty() || pps.is_empty() {
            return None;
        }
        Some(Self { sps, pps })
    }

    pub fn sps(&self) -> &Bytes {
        &self.sps
    }

    pub fn pps(&self) -> &Bytes {
        &self.pps
    }
}

/// One NAL unit as published to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    pub payload: Bytes,
    pub nal_type: NalUnitType,
    /// Presentation timestamp in nanoseconds.
    pub timestamp: u64,
    /// Last NAL of its access unit.
    pub marker: bool,
}

impl NalUnit {
    /// Build the transport buffer: start code, payload, zero padding.
    pub fn to_transport(&self) -> TransportBuffer {
        let mut data = Vec::with_capacity(START_CODE.len() + self.payload.len() + TRAILING_PADDING);
        data.extend_from_slice(&START_CODE);
        data.extend_from_slice(&self.payload);
        let length = data.len();
        data.resize(length + TRAILING_PADDING, 0);
        TransportBuffer {
            data,
            length,
            timestamp: self.timestamp,
            marker: self.marker,
        }
    }
}

/// Buffer handed to the packetizer on each pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportBuffer {
    /// Start code + payload + padding.
    pub data: Vec<u8>,
    /// Valid length (start code + payload), padding excluded.
    pub length: usize,
    pub timestamp: u64,
    pub marker: bool,
}

impl TransportBuffer {
    /// The start-code prefixed NAL without padding.
    pub fn nal_bytes(&self) -> &[u8] {
        &self.data[..self.length]
    }
}
