//! Synthetic recordings for trying the bridge without an encoder.

use crate::config::Resolution;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use vidbridge_media::mp4::writer::{live_stream_head, push_nal, sample_recording};
use vidbridge_media::ParameterSets;

/// Baseline profile SPS/PPS used by generated recordings.
pub fn parameter_sets() -> ParameterSets {
    ParameterSets::new(
        vec![0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x02, 0x80, 0xBF, 0xE5, 0x84],
        vec![0x68, 0xCE, 0x3C, 0x80],
    )
    .expect("fixture parameter sets are non-empty")
}

/// NAL payloads of `frames` frames: an SEI + IDR every `gop` frames, slices
/// in between.
pub fn frame_nals(frames: usize, gop: usize) -> Vec<Vec<u8>> {
    let gop = gop.max(1);
    let mut nals = Vec::with_capacity(frames + frames / gop);
    for i in 0..frames {
        let fill = (i % 251) as u8;
        if i % gop == 0 {
            nals.push(vec![0x06, 0x05, 0x01, fill, 0x80]);
            let mut idr = vec![0x65, 0x88, 0x84];
            idr.extend(std::iter::repeat(fill).take(96));
            nals.push(idr);
        } else {
            let mut slice = vec![0x41, 0x9A, 0x02];
            slice.extend(std::iter::repeat(fill).take(24));
            nals.push(slice);
        }
    }
    nals
}

/// A finished sample recording carrying [`parameter_sets`].
pub fn sample_mp4(resolution: Resolution) -> Vec<u8> {
    let nals = frame_nals(2, 30);
    let samples: Vec<&[u8]> = nals.iter().map(Vec::as_slice).collect();
    sample_recording(
        resolution.width.min(u32::from(u16::MAX)) as u16,
        resolution.height.min(u32::from(u16::MAX)) as u16,
        &parameter_sets(),
        &samples,
    )
}

/// What a recorder pointed at a socket writes: ftyp, free, an open mdat.
pub fn live_stream(frames: usize, gop: usize) -> Vec<u8> {
    let mut out = live_stream_head();
    for nal in frame_nals(frames, gop) {
        push_nal(&mut out, &nal);
    }
    out
}

/// Write `sample.mp4` and `stream.bin` into `dir`.
pub fn write_fixtures(
    dir: &Path,
    resolution: Resolution,
    frames: usize,
    gop: usize,
) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create fixture directory: {:?}", dir))?;

    let sample = dir.join("sample.mp4");
    std::fs::write(&sample, sample_mp4(resolution))
        .with_context(|| format!("Failed to write {:?}", sample))?;

    let stream = dir.join("stream.bin");
    std::fs::write(&stream, live_stream(frames, gop))
        .with_context(|| format!("Failed to write {:?}", stream))?;

    Ok((sample, stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidbridge_media::extract_parameter_sets_from_path;

    #[test]
    fn test_sample_yields_parameter_sets() {
        let dir = tempfile::tempdir().unwrap();
        let (sample, stream) = write_fixtures(dir.path(), Resolution::new(640, 480), 10, 5).unwrap();
        assert_eq!(extract_parameter_sets_from_path(&sample).unwrap(), parameter_sets());
        assert!(std::fs::metadata(&stream).unwrap().len() > 40);
    }

    #[test]
    fn test_frame_layout() {
        let nals = frame_nals(4, 2);
        let types: Vec<u8> = nals.iter().map(|n| n[0] & 0x1F).collect();
        assert_eq!(types, vec![6, 5, 1, 6, 5, 1]);
    }
}
