// src/image.rs

use serde::{Deserialize, Serialize};

use crate::error::{CompressionError, Result};
use crate::matrix::MatrixBuffer;

/// Interleaved 8-bit pixel layouts accepted at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelLayout {
    Gray8,
    Rgb8,
    /// RGB plus straight alpha. Alpha is carried through untouched.
    Rgba8,
}

impl PixelLayout {
    /// Bytes per pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Gray8 => 1,
            PixelLayout::Rgb8 => 3,
            PixelLayout::Rgba8 => 4,
        }
    }

    /// Channels that go through compression.
    pub fn color_channels(self) -> usize {
        match self {
            PixelLayout::Gray8 => 1,
            PixelLayout::Rgb8 | PixelLayout::Rgba8 => 3,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, PixelLayout::Rgba8)
    }
}

/// An in-memory image: `height` rows of `width` interleaved pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: usize,
    height: usize,
    layout: PixelLayout,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wraps interleaved pixel bytes.
    ///
    /// # Errors
    /// `InvalidDimension` on a zero width or height, `DimensionMismatch` if
    /// `data` is not exactly `width * height * bytes_per_pixel` long.
    pub fn new(width: usize, height: usize, layout: PixelLayout, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(CompressionError::InvalidDimension(format!(
                "Image dimensions must be positive, got {}x{}",
                width, height
            )));
        }
        let expected = width * height * layout.bytes_per_pixel();
        if data.len() != expected {
            return Err(CompressionError::DimensionMismatch {
                left: (height, width * layout.bytes_per_pixel()),
                right: (data.len(), 1),
                context: "pixel data length must equal width * height * bytes per pixel",
            });
        }
        Ok(Self {
            width,
            height,
            layout,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Splits the colour channels into `height x width` planes with values
    /// in [0, 255].
    pub fn to_planes(&self) -> Vec<MatrixBuffer> {
        let bpp = self.layout.bytes_per_pixel();
        (0..self.layout.color_channels())
            .map(|channel| {
                let values: Vec<f32> = self
                    .data
                    .chunks_exact(bpp)
                    .map(|pixel| pixel[channel] as f32)
                    .collect();
                MatrixBuffer::from_array_unchecked(
                    ndarray::Array2::from_shape_vec((self.height, self.width), values)
                        .unwrap_or_else(|_| ndarray::Array2::zeros((self.height, self.width))),
                )
            })
            .collect()
    }

    /// Alpha bytes in pixel order, for layouts that carry alpha.
    pub fn alpha(&self) -> Option<Vec<u8>> {
        if !self.layout.has_alpha() {
            return None;
        }
        let bpp = self.layout.bytes_per_pixel();
        Some(self.data.chunks_exact(bpp).map(|pixel| pixel[bpp - 1]).collect())
    }

    /// Re-assembles planes into pixels, rounding and clamping every value
    /// into [0, 255]. Reconstruction overshoots, so clamping happens here
    /// rather than in the compression core.
    ///
    /// # Errors
    /// - `InvalidDimension` if the plane count does not match the layout.
    /// - `DimensionMismatch` if the planes differ in shape, or `alpha` has the
    ///   wrong length.
    pub fn from_planes(planes: &[MatrixBuffer], layout: PixelLayout, alpha: Option<&[u8]>) -> Result<Self> {
        if planes.len() != layout.color_channels() {
            return Err(CompressionError::InvalidDimension(format!(
                "{:?} needs {} planes, got {}",
                layout,
                layout.color_channels(),
                planes.len()
            )));
        }
        let (height, width) = planes[0].shape();
        for plane in &planes[1..] {
            if plane.shape() != (height, width) {
                return Err(CompressionError::DimensionMismatch {
                    left: (height, width),
                    right: plane.shape(),
                    context: "all planes must share one shape",
                });
            }
        }
        let pixel_count = width * height;
        if layout.has_alpha() {
            let alpha_len = alpha.map_or(0, |a| a.len());
            if alpha.is_some() && alpha_len != pixel_count {
                return Err(CompressionError::DimensionMismatch {
                    left: (height, width),
                    right: (alpha_len, 1),
                    context: "alpha must hold one byte per pixel",
                });
            }
        }

        let bpp = layout.bytes_per_pixel();
        let mut data = vec![0u8; pixel_count * bpp];
        for (channel, plane) in planes.iter().enumerate() {
            for (pixel, &value) in data.chunks_exact_mut(bpp).zip(plane.as_slice()) {
                pixel[channel] = to_byte(value);
            }
        }
        if layout.has_alpha() {
            for (idx, pixel) in data.chunks_exact_mut(bpp).enumerate() {
                pixel[bpp - 1] = alpha.map_or(u8::MAX, |a| a[idx]);
            }
        }
        Self::new(width, height, layout, data)
    }
}

fn to_byte(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}
