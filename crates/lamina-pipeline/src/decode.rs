//! Image decoding into frames.
//!
//! Accepts encoded image bytes (PNG, JPEG, BMP, TIFF) or a file path and
//! produces a [`Frame`], either full color or converted to a single
//! luminance channel.

use std::path::Path;

use image::DynamicImage;

use crate::types::Frame;

/// Errors from decoding an image into a frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The input byte slice was empty.
    #[error("input image is empty")]
    EmptyInput,

    /// The image format is unrecognized or the data is corrupt.
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
}

/// Convert a decoded image to a frame.
///
/// Alpha is dropped. Gray conversion uses the standard luminance formula
/// `0.299*R + 0.587*G + 0.114*B`.
#[must_use]
pub fn to_frame(img: &DynamicImage, gray: bool) -> Frame {
    if gray {
        Frame::Gray(img.to_luma8())
    } else {
        Frame::Color(img.to_rgb8())
    }
}

/// Decode raw image bytes into a frame.
///
/// # Errors
///
/// Returns [`DecodeError::EmptyInput`] if `bytes` is empty and
/// [`DecodeError::Image`] if the format is unrecognized or the data is
/// corrupt.
pub fn decode_frame(bytes: &[u8], gray: bool) -> Result<Frame, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    Ok(to_frame(&img, gray))
}

/// Read and decode an image file into a frame.
///
/// # Errors
///
/// Returns [`DecodeError::Image`] if the file cannot be read or decoded.
pub fn open_frame(path: &Path, gray: bool) -> Result<Frame, DecodeError> {
    let img = image::open(path)?;
    Ok(to_frame(&img, gray))
}
