//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Per-direction raw frame stream: a small fixed-size header (width,
//! height, bit depth, frame count) followed by concatenated raw
//! little-endian luminance planes.
//!
//! Analogous to the teacher's `.ser` writer (`output/ser.rs`) in shape
//! — header-plus-frame-stream — but this crate's own (not
//! SER-compatible) format, since frame count is only known at
//! `finalize` time and is patched back into the header in place.
//!

use crate::frame::{Frame, PixelDepth};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

const MAGIC: &[u8; 4] = b"ISIF";
const HEADER_LEN: u64 = 4 + 4 + 4 + 1 + 4; // magic, width, height, depth, frame_count

pub struct FrameStreamWriter {
    file: File,
    width: u32,
    height: u32,
    depth: PixelDepth,
    frame_count: u32,
}

impl FrameStreamWriter {
    pub fn create(path: &Path, width: u32, height: u32, depth: PixelDepth) -> io::Result<Self> {
        let mut file = File::create(path)?;
        write_header(&mut file, width, height, depth, 0)?;
        Ok(FrameStreamWriter { file, width, height, depth, frame_count: 0 })
    }

    pub fn write(&mut self, frame: &Frame) -> io::Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "frame {}x{} does not match stream dimensions {}x{}",
                    frame.width(),
                    frame.height(),
                    self.width,
                    self.height
                ),
            ));
        }
        self.file.write_all(&frame.to_bytes())?;
        self.frame_count += 1;
        Ok(())
    }

    /// Patches the frame count into the header and flushes. Called
    /// exactly once; re-entrancy is not supported (mirrors
    /// `SessionRecorder`'s own finalize discipline).
    pub fn finalize(mut self) -> io::Result<u32> {
        self.file.seek(SeekFrom::Start(0))?;
        write_header(&mut self.file, self.width, self.height, self.depth, self.frame_count)?;
        self.file.flush()?;
        Ok(self.frame_count)
    }
}

fn write_header(
    writer: &mut impl Write,
    width: u32,
    height: u32,
    depth: PixelDepth,
    frame_count: u32,
) -> io::Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_all(&width.to_le_bytes())?;
    writer.write_all(&height.to_le_bytes())?;
    writer.write_all(&[depth.bytes_per_pixel() as u8])?;
    writer.write_all(&frame_count.to_le_bytes())
}

/// Reads back a frame stream written by `FrameStreamWriter`. The
/// counterpart `AnalysisPipeline` uses to load a finalized session's
/// per-direction frames (`spec.md` §4.7 input).
pub fn read_all(path: &Path) -> io::Result<Vec<Frame>> {
    let mut file = File::open(path)?;

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad frame stream magic"));
    }
    let mut buf4 = [0u8; 4];
    file.read_exact(&mut buf4)?;
    let width = u32::from_le_bytes(buf4);
    file.read_exact(&mut buf4)?;
    let height = u32::from_le_bytes(buf4);
    let mut depth_byte = [0u8; 1];
    file.read_exact(&mut depth_byte)?;
    let depth = match depth_byte[0] {
        1 => PixelDepth::Eight,
        2 => PixelDepth::Sixteen,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown pixel depth byte {other}"),
            ))
        }
    };
    file.read_exact(&mut buf4)?;
    let frame_count = u32::from_le_bytes(buf4);

    let pixel_count = (width as usize) * (height as usize);
    let mut frames = Vec::with_capacity(frame_count as usize);
    for _ in 0..frame_count {
        let mut samples = vec![0u16; pixel_count];
        match depth {
            PixelDepth::Eight => {
                let mut raw = vec![0u8; pixel_count];
                file.read_exact(&mut raw)?;
                for (dst, src) in samples.iter_mut().zip(raw.iter()) {
                    *dst = *src as u16;
                }
            }
            PixelDepth::Sixteen => {
                let mut raw = vec![0u8; pixel_count * 2];
                file.read_exact(&mut raw)?;
                for (dst, chunk) in samples.iter_mut().zip(raw.chunks_exact(2)) {
                    *dst = u16::from_le_bytes([chunk[0], chunk[1]]);
                }
            }
        }
        frames.push(Frame::from_samples(width, height, depth, samples));
    }

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_patches_frame_count_into_header() {
        let path = std::env::temp_dir()
            .join(format!("isi-core-framestream-test-{}.isif", std::process::id()));
        {
            let mut writer =
                FrameStreamWriter::create(&path, 2, 2, PixelDepth::Eight).unwrap();
            writer.write(&Frame::new(2, 2, PixelDepth::Eight)).unwrap();
            writer.write(&Frame::new(2, 2, PixelDepth::Eight)).unwrap();
            assert_eq!(writer.finalize().unwrap(), 2);
        }

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], MAGIC);
        let frame_count = u32::from_le_bytes(bytes[13..17].try_into().unwrap());
        assert_eq!(frame_count, 2);
        assert_eq!(bytes.len() as u64, HEADER_LEN + 2 * 2 * 2);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rejects_mismatched_frame_dimensions() {
        let path = std::env::temp_dir()
            .join(format!("isi-core-framestream-test-mismatch-{}.isif", std::process::id()));
        let mut writer = FrameStreamWriter::create(&path, 4, 4, PixelDepth::Eight).unwrap();
        let bad_frame = Frame::new(2, 2, PixelDepth::Eight);
        assert!(writer.write(&bad_frame).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn round_trip_write_then_read_is_bit_identical() {
        let path = std::env::temp_dir()
            .join(format!("isi-core-framestream-test-roundtrip-{}.isif", std::process::id()));
        let mut written = Vec::new();
        {
            let mut writer = FrameStreamWriter::create(&path, 3, 2, PixelDepth::Sixteen).unwrap();
            for v in [10u16, 4000, 65535] {
                let mut frame = Frame::new(3, 2, PixelDepth::Sixteen);
                frame.set(0, 0, v);
                writer.write(&frame).unwrap();
                written.push(frame);
            }
            writer.finalize().unwrap();
        }

        let read_back = read_all(&path).unwrap();
        assert_eq!(read_back, written);
        let _ = std::fs::remove_file(&path);
    }
}
