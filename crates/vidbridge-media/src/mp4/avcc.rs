//! SPS/PPS extraction from a finished sample recording.

use super::box_reader::{discard, read_bytes, read_u16, read_u64, read_u8};
use super::{read_box_header, skip_box, BoxHeader, FourCc};
use crate::h264::ParameterSets;
use crate::{Error, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, trace};

/// Dotted path of the sample-description box holding the avcC record.
pub const SAMPLE_DESCRIPTION_PATH: &str = "moov.trak.mdia.minf.stbl.stsd";

/// Boxes descended into on the way to the sample description.
const CONTAINER_PATHS: [&str; 5] = [
    "moov",
    "moov.trak",
    "moov.trak.mdia",
    "moov.trak.mdia.minf",
    "moov.trak.mdia.minf.stbl",
];

/// Extract the parameter sets from a sample recording on disk.
pub fn extract_parameter_sets_from_path<P: AsRef<Path>>(path: P) -> Result<ParameterSets> {
    let file = File::open(path.as_ref())?;
    let mut reader = BufReader::new(file);
    extract_parameter_sets(&mut reader)
}

/// Walk the box tree down to `stsd` and decode its avcC record.
///
/// Boxes off the path are skipped; the first `trak` met is the one
/// descended into. Running out of input before the record is found is
/// [`Error::EndOfStream`].
pub fn extract_parameter_sets<R: Read + ?Sized>(source: &mut R) -> Result<ParameterSets> {
    let mut path = String::new();

    loop {
        let header = read_box_header(source)?;
        let candidate = if path.is_empty() {
            header.box_type.to_string()
        } else {
            format!("{}.{}", path, header.box_type)
        };

        if candidate == SAMPLE_DESCRIPTION_PATH {
            let payload = payload_len(source, &header)?;
            debug!(payload, "Scanning sample description for avcC");
            return scan_sample_description(source, payload);
        }

        if CONTAINER_PATHS.contains(&candidate.as_str()) {
            if header.has_extended_size() {
                read_u64(source)?;
            }
            trace!(path = %candidate, "Descending");
            path = candidate;
            continue;
        }

        let skipped = skip_box(source, &header)?;
        trace!(path = %path, box_type = %header.box_type, skipped, "Skipped box");
    }
}

/// Payload length of a box whose compact header was just read.
fn payload_len<R: Read + ?Sized>(source: &mut R, header: &BoxHeader) -> Result<u64> {
    let (size, header_len) = if header.has_extended_size() {
        (read_u64(source)?, BoxHeader::LEN + 8)
    } else {
        (u64::from(header.size), BoxHeader::LEN)
    };
    if size <= header_len {
        return Err(Error::UnsupportedBoxSize {
            tag: header.box_type.to_string(),
            size: size.saturating_sub(header_len),
        });
    }
    Ok(size - header_len)
}

/// Slide through the sample description until the `avcC` tag appears, then
/// decode the record that follows it.
fn scan_sample_description<R: Read + ?Sized>(source: &mut R, limit: u64) -> Result<ParameterSets> {
    let target = u32::from_be_bytes(FourCc::AVCC.0);
    let mut window = 0u32;
    let mut consumed = 0u64;

    while consumed < limit {
        window = (window << 8) | u32::from(read_u8(source)?);
        consumed += 1;
        if consumed >= 4 && window == target {
            debug!(offset = consumed - 4, "Found avcC");
            return read_decoder_configuration(source);
        }
    }

    Err(Error::unexpected("sample description carries no avcC record"))
}

/// Decode an AVCDecoderConfigurationRecord, keeping the first SPS and PPS.
fn read_decoder_configuration<R: Read + ?Sized>(source: &mut R) -> Result<ParameterSets> {
    // configurationVersion, profile, compatibility, level, lengthSizeMinusOne
    discard(source, 5)?;

    let sps_count = read_u8(source)? & 0x1F;
    let sps = read_first_entry(source, sps_count, "SPS")?;

    let pps_count = read_u8(source)?;
    let pps = read_first_entry(source, pps_count, "PPS")?;

    ParameterSets::new(sps, pps).ok_or_else(|| Error::unexpected("avcC holds an empty parameter set"))
}

fn read_first_entry<R: Read + ?Sized>(source: &mut R, count: u8, what: &str) -> Result<Vec<u8>> {
    if count == 0 {
        return Err(Error::unexpected(format!("avcC lists no {what}")));
    }

    let mut first = None;
    for _ in 0..count {
        let len = read_u16(source)? as usize;
        let entry = read_bytes(source, len)?;
        first.get_or_insert(entry);
    }
    if count > 1 {
        debug!(count, kind = what, "avcC lists several entries, using the first");
    }
    Ok(first.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::writer::{avcc_record, sample_recording, BoxWriter};
    use std::io::Cursor;

    fn params(sps_len: usize, pps_len: usize) -> ParameterSets {
        let mut sps: Vec<u8> = (0..sps_len).map(|i| (i * 7 + 3) as u8).collect();
        sps[0] = 0x67;
        let mut pps: Vec<u8> = (0..pps_len).map(|i| (i * 13 + 1) as u8).collect();
        pps[0] = 0x68;
        ParameterSets::new(sps, pps).unwrap()
    }

    #[test]
    fn test_extract_from_sample_recording() {
        let expected = params(23, 4);
        let file = sample_recording(640, 480, &expected, &[&[0x65, 1, 2, 3]]);

        let got = extract_parameter_sets(&mut Cursor::new(file)).unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_extract_various_lengths() {
        for (a, b) in [(1, 1), (4, 2), (64, 9), (255, 255), (300, 1), (1, 1000)] {
            let expected = params(a, b);
            let file = sample_recording(320, 240, &expected, &[]);
            let got = extract_parameter_sets(&mut Cursor::new(file)).unwrap();
            assert_eq!(got.sps().len(), a);
            assert_eq!(got, expected, "sps={a} pps={b}");
        }
    }

    #[test]
    fn test_extract_skips_extended_size_sibling() {
        let expected = params(10, 4);
        let tail = sample_recording(640, 480, &expected, &[]);

        let mut file = vec![0, 0, 0, 1];
        file.extend_from_slice(b"wide");
        file.extend_from_slice(&24u64.to_be_bytes());
        file.extend_from_slice(&[0xEE; 8]);
        file.extend_from_slice(&tail);

        let got = extract_parameter_sets(&mut Cursor::new(file)).unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_multiple_entries_keep_first() {
        let first = params(8, 4);
        let mut record = vec![1, 0x42, 0, 0x1E, 0xFF, 0xE2];
        for sps in [&first.sps()[..], &[0x67, 9, 9][..]] {
            record.extend_from_slice(&(sps.len() as u16).to_be_bytes());
            record.extend_from_slice(sps);
        }
        record.push(1);
        record.extend_from_slice(&(first.pps().len() as u16).to_be_bytes());
        record.extend_from_slice(first.pps());

        let mut w = BoxWriter::new();
        w.begin(b"moov").begin(b"trak").begin(b"mdia").begin(b"minf").begin(b"stbl");
        w.begin(b"stsd").put_u32(0).put_u32(1);
        w.leaf(b"avcC", &record);
        let file = w.finish();

        let got = extract_parameter_sets(&mut Cursor::new(file)).unwrap();
        assert_eq!(got, first);
    }

    #[test]
    fn test_missing_avcc_is_unexpected() {
        let mut w = BoxWriter::new();
        w.begin(b"moov").begin(b"trak").begin(b"mdia").begin(b"minf").begin(b"stbl");
        w.begin(b"stsd").put_u32(0).put_u32(1);
        w.leaf(b"mp4a", &[0u8; 28]);
        w.end();
        w.leaf(b"stts", &[0u8; 8]);
        let file = w.finish();

        assert!(matches!(
            extract_parameter_sets(&mut Cursor::new(file)),
            Err(Error::Unexpected(_))
        ));
    }

    #[test]
    fn test_no_moov_is_end_of_stream() {
        let mut w = BoxWriter::new();
        crate::mp4::writer::write_ftyp(&mut w);
        w.leaf(b"mdat", &[0u8; 32]);
        let file = w.finish();

        assert!(extract_parameter_sets(&mut Cursor::new(file))
            .unwrap_err()
            .is_end_of_stream());
    }

    #[test]
    fn test_truncated_record_is_end_of_stream() {
        let expected = params(30, 4);
        let mut file = sample_recording(640, 480, &expected, &[]);
        let avcc_at = file.windows(4).position(|w| w == b"avcC").unwrap();
        file.truncate(avcc_at + 4 + 10);

        assert!(extract_parameter_sets(&mut Cursor::new(file))
            .unwrap_err()
            .is_end_of_stream());
    }

    #[test]
    fn test_extract_from_path() {
        let expected = params(12, 4);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.mp4");
        std::fs::write(&path, sample_recording(1280, 720, &expected, &[])).unwrap();

        let got = extract_parameter_sets_from_path(&path).unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_record_matches_writer_layout() {
        let p = params(5, 3);
        let record = avcc_record(&p);
        assert_eq!(record[5] & 0x1F, 1);
        assert_eq!(u16::from_be_bytes([record[6], record[7]]), 5);
    }
}
