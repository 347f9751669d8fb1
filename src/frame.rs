//
// isi-core - acquisition and analysis core for retinotopic mapping
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Luminance frame buffers.
//!
//! Shaped after the teacher's own `ga_image::Image`/`ImageView` pair
//! (see `camera/mod.rs`, `output/file_seq.rs`): a plain row-major pixel
//! buffer plus a view that can address a sub-rectangle without copying.
//!

use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PixelDepth {
    Eight,
    Sixteen,
}

impl PixelDepth {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelDepth::Eight => 1,
            PixelDepth::Sixteen => 2,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn pos(&self) -> Point {
        Point { x: self.x, y: self.y }
    }
}

/// A row-major luminance buffer of 8- or 16-bit unsigned samples.
///
/// Samples are always stored as `u16` internally; 8-bit frames just
/// leave the high byte zero. This keeps `Frame` a single concrete type
/// (no generics threaded through every call site) while preserving the
/// original sample depth for serialization.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    depth: PixelDepth,
    data: Vec<u16>,
}

impl Frame {
    pub fn new(width: u32, height: u32, depth: PixelDepth) -> Frame {
        Frame {
            width,
            height,
            depth,
            data: vec![0u16; (width as usize) * (height as usize)],
        }
    }

    pub fn from_samples(width: u32, height: u32, depth: PixelDepth, data: Vec<u16>) -> Frame {
        assert_eq!(data.len(), (width as usize) * (height as usize));
        Frame { width, height, depth, data }
    }

    pub fn width(&self) -> u32 { self.width }
    pub fn height(&self) -> u32 { self.height }
    pub fn depth(&self) -> PixelDepth { self.depth }
    pub fn samples(&self) -> &[u16] { &self.data }
    pub fn samples_mut(&mut self) -> &mut [u16] { &mut self.data }

    pub fn img_rect(&self) -> Rect {
        Rect { x: 0, y: 0, width: self.width, height: self.height }
    }

    pub fn get(&self, x: u32, y: u32) -> u16 {
        self.data[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: u16) {
        self.data[(y * self.width + x) as usize] = value;
    }

    pub fn num_pixel_bytes(&self) -> usize {
        self.data.len() * self.depth.bytes_per_pixel()
    }

    /// Raw little-endian bytes at the frame's native depth, used by
    /// `SessionRecorder`'s frame stream writer.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self.depth {
            PixelDepth::Eight => self.data.iter().map(|&v| v as u8).collect(),
            PixelDepth::Sixteen => {
                let mut bytes = Vec::with_capacity(self.data.len() * 2);
                for &v in &self.data {
                    bytes.extend_from_slice(&v.to_le_bytes());
                }
                bytes
            }
        }
    }
}

/// A read-only view onto a (possibly cropped) fragment of a `Frame`,
/// shared cheaply across threads via `Arc`.
pub struct FrameView<'a> {
    frame: &'a Frame,
    fragment: Rect,
}

impl<'a> FrameView<'a> {
    pub fn new(frame: &'a Frame, fragment: Option<Rect>) -> FrameView<'a> {
        FrameView { frame, fragment: fragment.unwrap_or_else(|| frame.img_rect()) }
    }

    pub fn fragment(&self) -> Rect { self.fragment }

    pub fn width(&self) -> u32 { self.fragment.width }
    pub fn height(&self) -> u32 { self.fragment.height }

    pub fn get(&self, x: u32, y: u32) -> u16 {
        self.frame.get(self.fragment.x as u32 + x, self.fragment.y as u32 + y)
    }
}

/// Shared, immutable handle to a captured frame, as passed between the
/// capture-ingest thread and the session-writer thread.
pub type SharedFrame = Arc<Frame>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_samples() {
        let mut f = Frame::new(4, 2, PixelDepth::Sixteen);
        f.set(3, 1, 1234);
        assert_eq!(f.get(3, 1), 1234);
        assert_eq!(f.get(0, 0), 0);
        assert_eq!(f.num_pixel_bytes(), 4 * 2 * 2);
    }

    #[test]
    fn eight_bit_bytes_are_truncated_samples() {
        let mut f = Frame::new(2, 1, PixelDepth::Eight);
        f.set(0, 0, 200);
        f.set(1, 0, 300); // would truncate if ever written as u8 via a real camera
        assert_eq!(f.to_bytes(), vec![200u8, 300u16 as u8]);
    }

    #[test]
    fn view_indexes_relative_to_fragment() {
        let mut f = Frame::new(4, 4, PixelDepth::Eight);
        f.set(2, 2, 42);
        let view = FrameView::new(&f, Some(Rect { x: 2, y: 2, width: 2, height: 2 }));
        assert_eq!(view.get(0, 0), 42);
    }
}
