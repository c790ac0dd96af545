//! ISO base media ("MP4") box handling.
//!
//! Only what the bridge needs lives here: header reads, the generic box
//! skip, the avcC parameter-set extractor and a small box writer used to
//! produce sample recordings.

mod avcc;
pub mod box_reader;
pub mod writer;

pub use avcc::{extract_parameter_sets, extract_parameter_sets_from_path, SAMPLE_DESCRIPTION_PATH};
pub use writer::BoxWriter;

use crate::{Error, Result};
use box_reader::{discard, read_u32, read_u64};
use std::io::Read;

/// Four-character box type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const FREE: Self = Self(*b"free");
    pub const MDAT: Self = Self(*b"mdat");
    pub const MOOV: Self = Self(*b"moov");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const VMHD: Self = Self(*b"vmhd");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const STTS: Self = Self(*b"stts");
    pub const AVC1: Self = Self(*b"avc1");
    pub const AVCC: Self = Self(*b"avcC");

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl From<[u8; 4]> for FourCc {
    fn from(code: [u8; 4]) -> Self {
        Self(code)
    }
}

impl From<&[u8; 4]> for FourCc {
    fn from(code: &[u8; 4]) -> Self {
        Self(*code)
    }
}

impl std::fmt::Display for FourCc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compact box header as it appears on the wire.
///
/// `size` is the raw 32-bit field; a value of 1 means a 64-bit size
/// follows and has not been read yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub size: u32,
    pub box_type: FourCc,
}

impl BoxHeader {
    /// Length of the compact header (size + type).
    pub const LEN: u64 = 8;

    /// Whether a 64-bit size field follows the compact header.
    pub fn has_extended_size(&self) -> bool {
        self.size == 1
    }
}

/// Read a 4-byte tag.
pub fn read_fourcc<R: Read + ?Sized>(source: &mut R) -> Result<FourCc> {
    let mut tag = [0u8; 4];
    source.read_exact(&mut tag)?;
    Ok(FourCc(tag))
}

/// Read a compact box header.
pub fn read_box_header<R: Read + ?Sized>(source: &mut R) -> Result<BoxHeader> {
    let size = read_u32(source)?;
    let box_type = read_fourcc(source)?;
    Ok(BoxHeader { size, box_type })
}

/// Skip the remainder of a box whose compact header was just read.
///
/// A size of 1 pulls in the 64-bit extended size. The extended value counts
/// the whole box, so once the extended field itself is consumed the payload
/// left is `extended - 16`. Returns the number of payload bytes discarded.
pub fn skip_box<R: Read + ?Sized>(source: &mut R, header: &BoxHeader) -> Result<u64> {
    let size = if header.has_extended_size() {
        // Fold the 8-byte extended field into the header that was consumed.
        read_u64(source)?.saturating_sub(8)
    } else {
        u64::from(header.size)
    };

    if size < BoxHeader::LEN {
        return Err(Error::UnsupportedBoxSize {
            tag: header.box_type.to_string(),
            size,
        });
    }

    let payload = size - BoxHeader::LEN;
    discard(source, payload)?;
    Ok(payload)
}
