//! Finished-frame handling.
//!
//! Turns a downloaded [`FrameBlob`] into its transport representation (bit
//! depth, value histogram, base64 payload) and hands it off to disk. File
//! persistence mechanics stay deliberately minimal: raw little-endian pixels
//! next to a JSON metadata sidecar, with a numeric suffix appended when the
//! target name already exists.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;

use crate::backend::{ElementKind, FrameBlob, PixelData};
use crate::error::{GateError, GateResult};

pub const HISTOGRAM_BINS: usize = 256;

/// Effective bit depth of a frame.
///
/// Backends do not report depth directly; it is derived from the element
/// layout and the reported maximum ADU. 32-bit integer transports commonly
/// carry 16-bit sensor data.
pub fn bit_depth(frame: &FrameBlob) -> u8 {
    match frame.element {
        ElementKind::U16 => 16,
        ElementKind::I32 => {
            if frame.max_adu <= u64::from(u16::MAX) {
                16
            } else {
                32
            }
        }
        ElementKind::F64 => 64,
    }
}

/// Value histogram over [`HISTOGRAM_BINS`] equal-width bins of the ADU range.
pub fn histogram(frame: &FrameBlob) -> Vec<u32> {
    let mut bins = vec![0u32; HISTOGRAM_BINS];
    let max = frame.max_adu.max(1) as f64;
    let mut accumulate = |value: f64| {
        let normalized = (value / max).clamp(0.0, 1.0);
        let index = ((normalized * (HISTOGRAM_BINS - 1) as f64) as usize).min(HISTOGRAM_BINS - 1);
        bins[index] += 1;
    };
    match &frame.data {
        PixelData::U16(v) => v.iter().for_each(|p| accumulate(f64::from(*p))),
        PixelData::I32(v) => v.iter().for_each(|p| accumulate(f64::from(*p))),
        PixelData::F64(v) => v.iter().for_each(|p| accumulate(*p)),
    }
    bins
}

/// Base64 of the little-endian pixel payload, for the JSON reply.
pub fn encode_pixels(frame: &FrameBlob) -> String {
    BASE64.encode(frame.data.to_le_bytes())
}

/// Write the raw pixel payload and a `.json` metadata sidecar under `dir`.
///
/// The target name is `<stem>.raw`; when it already exists a numeric suffix
/// (`<stem>_1.raw`, `<stem>_2.raw`, …) keeps the write collision-free.
/// Returns the path actually written.
pub fn persist_frame(
    dir: &Path,
    stem: &str,
    frame: &FrameBlob,
    metadata: &Value,
) -> GateResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = available_path(dir, stem)?;
    std::fs::write(&path, frame.data.to_le_bytes())?;
    let sidecar = path.with_extension("json");
    std::fs::write(&sidecar, serde_json::to_vec_pretty(metadata)?)?;
    Ok(path)
}

fn available_path(dir: &Path, stem: &str) -> GateResult<PathBuf> {
    let first = dir.join(format!("{stem}.raw"));
    if !first.exists() {
        return Ok(first);
    }
    for n in 1..10_000u32 {
        let candidate = dir.join(format!("{stem}_{n}.raw"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(GateError::InvalidOperation(format!(
        "no free file name for {stem}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(element: ElementKind, max_adu: u64, data: PixelData) -> FrameBlob {
        FrameBlob {
            width: 2,
            height: 2,
            element,
            max_adu,
            data,
        }
    }

    #[test]
    fn depth_derivation() {
        let u16_frame = frame(ElementKind::U16, 65535, PixelData::U16(vec![0; 4]));
        assert_eq!(bit_depth(&u16_frame), 16);
        let narrow_i32 = frame(ElementKind::I32, 65535, PixelData::I32(vec![0; 4]));
        assert_eq!(bit_depth(&narrow_i32), 16);
        let wide_i32 = frame(ElementKind::I32, 4_294_967_295, PixelData::I32(vec![0; 4]));
        assert_eq!(bit_depth(&wide_i32), 32);
        let floats = frame(ElementKind::F64, 1, PixelData::F64(vec![0.0; 4]));
        assert_eq!(bit_depth(&floats), 64);
    }

    #[test]
    fn histogram_counts_every_pixel() {
        let f = frame(
            ElementKind::U16,
            65535,
            PixelData::U16(vec![0, 0, 32768, 65535]),
        );
        let bins = histogram(&f);
        assert_eq!(bins.iter().map(|b| u64::from(*b)).sum::<u64>(), 4);
        assert_eq!(bins[0], 2);
        assert_eq!(bins[HISTOGRAM_BINS - 1], 1);
    }

    #[test]
    fn persisted_names_avoid_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let f = frame(ElementKind::U16, 65535, PixelData::U16(vec![1, 2, 3, 4]));
        let meta = json!({"exposure": 1.5});
        let first = persist_frame(dir.path(), "light", &f, &meta).unwrap();
        let second = persist_frame(dir.path(), "light", &f, &meta).unwrap();
        assert_eq!(first.file_name().unwrap(), "light.raw");
        assert_eq!(second.file_name().unwrap(), "light_1.raw");
        assert!(first.with_extension("json").exists());
        assert_eq!(std::fs::read(&second).unwrap().len(), 8);
    }
}
