use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// Raw pixel layouts ffmpeg can write to or read from a pipe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Rgb24,
    Bgr24,
    Yuv420p,
    Yuvj420p,
    Nv12,
    Gray,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 6] = [
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
        PixelFormat::Yuv420p,
        PixelFormat::Yuvj420p,
        PixelFormat::Nv12,
        PixelFormat::Gray,
    ];

    /// Name used for `-pix_fmt`.
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Yuvj420p => "yuvj420p",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::Gray => "gray",
        }
    }

    /// 4:2:0 layouts with chroma subsampled in both directions.
    pub fn is_planar_420(&self) -> bool {
        matches!(
            self,
            PixelFormat::Yuv420p | PixelFormat::Yuvj420p | PixelFormat::Nv12
        )
    }

    /// Shape of one frame of `width`x`height` pixels in this layout.
    ///
    /// Packed RGB is `(height, width, 3)`, 4:2:0 is `(height * 1.5, width)` and
    /// gray is `(height, width, 1)`. 4:2:0 needs even dimensions.
    pub fn frame_shape(&self, width: u32, height: u32) -> Result<FrameShape, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyGeometry { width, height });
        }
        if self.is_planar_420() && (width % 2 != 0 || height % 2 != 0) {
            return Err(FrameError::OddGeometry {
                format: *self,
                width,
                height,
            });
        }

        let (w, h) = (width as usize, height as usize);
        let shape = match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => FrameShape::new(h, w, 3),
            PixelFormat::Yuv420p | PixelFormat::Yuvj420p | PixelFormat::Nv12 => {
                FrameShape::new(h * 3 / 2, w, 1)
            }
            PixelFormat::Gray => FrameShape::new(h, w, 1),
        };
        Ok(shape)
    }

    /// Byte length of one frame.
    pub fn frame_size(&self, width: u32, height: u32) -> Result<usize, FrameError> {
        self.frame_shape(width, height).map(|s| s.byte_len())
    }

    /// One black frame. 4:2:0 layouts get black luma (16, or 0 for the full
    /// range yuvj420p) and neutral chroma; the others are all zeros.
    pub fn black_frame(&self, width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
        let mut frame = vec![0u8; self.frame_size(width, height)?];
        if self.is_planar_420() {
            let (luma, chroma) = frame.split_at_mut(width as usize * height as usize);
            if *self != PixelFormat::Yuvj420p {
                luma.fill(16);
            }
            chroma.fill(128);
        }
        Ok(frame)
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelFormat {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PixelFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| FrameError::UnsupportedFormat(s.to_string()))
    }
}

/// Rows x columns x channels of a raw frame buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameShape {
    pub rows: usize,
    pub cols: usize,
    pub channels: usize,
}

impl FrameShape {
    pub fn new(rows: usize, cols: usize, channels: usize) -> Self {
        Self {
            rows,
            cols,
            channels,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.rows * self.cols * self.channels
    }
}

impl Display for FrameShape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.rows, self.cols, self.channels)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("unsupported pixel format: {0:?}")]
    UnsupportedFormat(String),
    #[error("frame geometry {width}x{height} is empty")]
    EmptyGeometry { width: u32, height: u32 },
    #[error("{format} needs even width and height, got {width}x{height}")]
    OddGeometry {
        format: PixelFormat,
        width: u32,
        height: u32,
    },
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod frame_test;
