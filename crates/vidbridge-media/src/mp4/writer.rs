//! Minimal box writer.
//!
//! Produces the two shapes of output a platform H.264 recorder emits: a
//! finished sample recording (ftyp/moov/mdat with an avcC record) and the
//! live, never-finalized stream (ftyp, free placeholder, open-ended mdat of
//! length-prefixed NAL units).

use super::FourCc;
use crate::h264::ParameterSets;
use bytes::{BufMut, BytesMut};

/// Box writer with nested size back-patching.
#[derive(Debug, Default)]
pub struct BoxWriter {
    buf: BytesMut,
    open: Vec<usize>,
}

impl BoxWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a box; its size is patched when [`BoxWriter::end`] is called.
    pub fn begin(&mut self, tag: impl Into<FourCc>) -> &mut Self {
        self.open.push(self.buf.len());
        self.buf.put_u32(0); // placeholder size
        self.buf.put_slice(&tag.into().0);
        self
    }

    /// Close the innermost open box.
    pub fn end(&mut self) -> &mut Self {
        if let Some(start) = self.open.pop() {
            let size = (self.buf.len() - start) as u32;
            self.buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
        }
        self
    }

    /// Write a complete leaf box.
    pub fn leaf(&mut self, tag: impl Into<FourCc>, payload: &[u8]) -> &mut Self {
        self.begin(tag);
        self.buf.put_slice(payload);
        self.end()
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.buf.put_u16(v);
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32(v);
        self
    }

    pub fn put_slice(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data);
        self
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish writing. Any boxes still open are closed first.
    pub fn finish(mut self) -> Vec<u8> {
        while !self.open.is_empty() {
            self.end();
        }
        self.buf.to_vec()
    }
}

/// Serialize an AVCDecoderConfigurationRecord with one SPS and one PPS.
pub fn avcc_record(params: &ParameterSets) -> Vec<u8> {
    let sps = params.sps();
    let pps = params.pps();
    let mut buf = BytesMut::with_capacity(11 + sps.len() + pps.len());
    buf.put_u8(1); // configurationVersion
    buf.put_u8(sps.get(1).copied().unwrap_or(0x42)); // AVCProfileIndication
    buf.put_u8(sps.get(2).copied().unwrap_or(0)); // profile_compatibility
    buf.put_u8(sps.get(3).copied().unwrap_or(0x1E)); // AVCLevelIndication
    buf.put_u8(0xFF); // reserved + lengthSizeMinusOne = 3
    buf.put_u8(0xE1); // reserved + numOfSequenceParameterSets = 1
    buf.put_u16(sps.len() as u16);
    buf.put_slice(sps);
    buf.put_u8(1); // numOfPictureParameterSets
    buf.put_u16(pps.len() as u16);
    buf.put_slice(pps);
    buf.to_vec()
}

/// Write the 24-byte ftyp box a platform recorder emits.
pub fn write_ftyp(w: &mut BoxWriter) {
    w.begin(FourCc::FTYP)
        .put_slice(b"3gp4") // major brand
        .put_u32(0) // minor version
        .put_slice(b"isom")
        .put_slice(b"3gp4")
        .end();
}

/// Build a finished sample recording holding a single H.264 track.
///
/// `samples` are raw NAL payloads written length-prefixed into mdat.
pub fn sample_recording(
    width: u16,
    height: u16,
    params: &ParameterSets,
    samples: &[&[u8]],
) -> Vec<u8> {
    let mut w = BoxWriter::new();
    write_ftyp(&mut w);

    w.begin(FourCc::MOOV);
    w.leaf(FourCc::MVHD, &[0u8; 100]);
    w.begin(FourCc::TRAK);
    w.leaf(FourCc::TKHD, &[0u8; 84]);
    w.begin(FourCc::MDIA);
    w.leaf(FourCc::MDHD, &[0u8; 24]);
    let mut hdlr = vec![0u8; 8];
    hdlr.extend_from_slice(b"vide");
    hdlr.extend_from_slice(&[0u8; 12]);
    hdlr.extend_from_slice(b"VideoHandle\0");
    w.leaf(FourCc::HDLR, &hdlr);
    w.begin(FourCc::MINF);
    w.leaf(FourCc::VMHD, &[0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]);
    w.begin(FourCc::STBL);

    w.begin(FourCc::STSD);
    w.put_u32(0).put_u32(1); // version/flags, entry count
    w.begin(FourCc::AVC1);
    w.put_slice(&[0u8; 6]).put_u16(1); // reserved, data_reference_index
    w.put_slice(&[0u8; 16]); // pre_defined / reserved
    w.put_u16(width).put_u16(height);
    w.put_u32(0x0048_0000).put_u32(0x0048_0000); // 72 dpi
    w.put_u32(0).put_u16(1); // reserved, frame_count
    w.put_slice(&[0u8; 32]); // compressorname
    w.put_u16(0x0018).put_u16(0xFFFF); // depth, pre_defined
    w.leaf(FourCc::AVCC, &avcc_record(params));
    w.end(); // avc1
    w.end(); // stsd

    w.leaf(FourCc::STTS, &[0u8; 8]);
    w.end(); // stbl
    w.end(); // minf
    w.end(); // mdia
    w.end(); // trak
    w.end(); // moov

    w.begin(FourCc::MDAT);
    for sample in samples {
        w.put_u32(sample.len() as u32).put_slice(sample);
    }
    w.end();

    w.finish()
}

/// Build the head of a live stream: ftyp, an empty free placeholder and an
/// mdat header whose size is still unknown.
pub fn live_stream_head() -> Vec<u8> {
    let mut w = BoxWriter::new();
    write_ftyp(&mut w);
    w.leaf(FourCc::FREE, &[]);
    let mut out = w.finish();
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&FourCc::MDAT.0);
    out
}

/// Append one length-prefixed NAL unit to a live stream buffer.
pub fn push_nal(out: &mut Vec<u8>, nal: &[u8]) {
    out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
    out.extend_from_slice(nal);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_sizes_are_patched() {
        let mut w = BoxWriter::new();
        w.begin(b"moov");
        w.leaf(b"mvhd", &[1, 2, 3, 4]);
        w.end();
        let out = w.finish();
        assert_eq!(&out[0..4], &20u32.to_be_bytes());
        assert_eq!(&out[8..12], &12u32.to_be_bytes());
    }

    #[test]
    fn test_ftyp_is_24_bytes() {
        let mut w = BoxWriter::new();
        write_ftyp(&mut w);
        let out = w.finish();
        assert_eq!(out.len(), 24);
        assert_eq!(&out[0..4], &24u32.to_be_bytes());
    }

    #[test]
    fn test_live_stream_head_layout() {
        let head = live_stream_head();
        assert_eq!(head.len(), 40);
        assert_eq!(&head[28..32], b"free");
        assert_eq!(&head[36..40], b"mdat");
    }
}
