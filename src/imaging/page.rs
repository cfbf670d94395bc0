//! Page image data structures

use image::{DynamicImage, GrayImage, Luma};
use ndarray::{s, Array2, Array3, ArrayD, Axis, Ix2, Ix3};
use std::path::Path;

use crate::error::{DriftError, Result};

/// Pixels of a single document page
///
/// Stored as `(height, width, channels)` with either one (grayscale) or
/// three (RGB) channels. Values are `u8`, so they always fall in `0..=255`.
#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    pixels: Array3<u8>,
}

impl PageImage {
    /// Create a page from a grayscale `(height, width)` array
    pub fn from_gray(pixels: Array2<u8>) -> Result<Self> {
        Self::from_channels(pixels.insert_axis(Axis(2)))
    }

    /// Create a page from a `(height, width, channels)` array
    ///
    /// Accepts 1 or 3 channels; a fourth (alpha) channel is dropped.
    pub fn from_channels(pixels: Array3<u8>) -> Result<Self> {
        let (height, width, channels) = pixels.dim();
        if height == 0 || width == 0 {
            return Err(DriftError::InvalidImage(format!(
                "image has no pixels ({}x{})",
                width, height
            )));
        }

        match channels {
            1 | 3 => Ok(Self { pixels }),
            4 => Ok(Self {
                pixels: pixels.slice(s![.., .., 0..3]).to_owned(),
            }),
            other => Err(DriftError::InvalidImage(format!(
                "unsupported channel count {}",
                other
            ))),
        }
    }

    /// Create a page from an array of unknown rank
    ///
    /// Only 2-D (grayscale) and 3-D (channel-last) arrays are images.
    pub fn from_array(pixels: ArrayD<u8>) -> Result<Self> {
        match pixels.ndim() {
            2 => {
                let gray = pixels
                    .into_dimensionality::<Ix2>()
                    .map_err(|e| DriftError::InvalidImage(e.to_string()))?;
                Self::from_gray(gray)
            }
            3 => {
                let color = pixels
                    .into_dimensionality::<Ix3>()
                    .map_err(|e| DriftError::InvalidImage(e.to_string()))?;
                Self::from_channels(color)
            }
            n => Err(DriftError::InvalidImage(format!(
                "expected 2 or 3 dimensions, got {}",
                n
            ))),
        }
    }

    /// Convert a decoded image into a page
    pub fn from_dynamic(image: &DynamicImage) -> Result<Self> {
        let (pixels, channels) = match image.color().channel_count() {
            1 | 2 => (image.to_luma8().into_raw(), 1),
            _ => (image.to_rgb8().into_raw(), 3),
        };
        let (width, height) = (image.width() as usize, image.height() as usize);

        let array = Array3::from_shape_vec((height, width, channels), pixels)
            .map_err(|e| DriftError::InvalidImage(e.to_string()))?;
        Self::from_channels(array)
    }

    /// Load a page from an image file
    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path)?;
        Self::from_dynamic(&image)
    }

    /// Page width in pixels
    pub fn width(&self) -> u32 {
        self.pixels.dim().1 as u32
    }

    /// Page height in pixels
    pub fn height(&self) -> u32 {
        self.pixels.dim().0 as u32
    }

    /// Number of color channels (1 or 3)
    pub fn channels(&self) -> usize {
        self.pixels.dim().2
    }

    /// Raw pixel array
    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }

    /// Grayscale view of the page using standard luminance weights
    pub fn to_luma(&self) -> GrayImage {
        let channels = self.channels();
        GrayImage::from_fn(self.width(), self.height(), |x, y| {
            let (x, y) = (x as usize, y as usize);
            if channels == 1 {
                return Luma([self.pixels[[y, x, 0]]]);
            }
            let r = self.pixels[[y, x, 0]] as f32;
            let g = self.pixels[[y, x, 1]] as f32;
            let b = self.pixels[[y, x, 2]] as f32;
            let gray = (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0);
            Luma([gray as u8])
        })
    }
}

/// A page together with the document it came from
#[derive(Debug, Clone)]
pub struct PageRef {
    /// Source document path or key
    pub document: String,
    /// Zero-based page number within the document
    pub page_number: u32,
    /// Page pixels
    pub image: PageImage,
}
