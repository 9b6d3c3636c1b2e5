//! Frame decoding for the presentation layer.
//!
//! The inference service ships frames as data-URI JPEG. Decoding happens
//! fully in memory and lands on a fixed-size RGB surface matching the UI's
//! canvas, so a frame of any source resolution draws the same way.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::imageops::FilterType;

/// Drawing surface dimensions, matching the UI canvas.
pub const SURFACE_WIDTH: u32 = 640;
pub const SURFACE_HEIGHT: u32 = 480;

/// Hard cap on an encoded frame. Anything larger is dropped, not decoded.
pub const MAX_FRAME_BYTES: usize = 5 * 1024 * 1024;

/// One frame decoded onto the drawing surface. Always RGB at
/// `SURFACE_WIDTH` x `SURFACE_HEIGHT`.
pub struct DecodedFrame {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl DecodedFrame {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major RGB bytes, 3 per pixel.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

/// Decode a `data:<mime>;base64,<payload>` frame and scale it onto the
/// drawing surface.
pub fn decode_data_uri(uri: &str) -> Result<DecodedFrame> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("frame is not a data URI"))?;
    let (_mime, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| anyhow!("frame data URI is not base64 encoded"))?;

    let bytes = BASE64.decode(payload).context("decode frame base64")?;
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(anyhow!(
            "encoded frame of {} bytes exceeds cap of {}",
            bytes.len(),
            MAX_FRAME_BYTES
        ));
    }

    let img = image::load_from_memory(&bytes).context("decode frame image")?;
    let scaled = img
        .resize_exact(SURFACE_WIDTH, SURFACE_HEIGHT, FilterType::Triangle)
        .to_rgb8();

    Ok(DecodedFrame {
        pixels: scaled.into_raw(),
        width: SURFACE_WIDTH,
        height: SURFACE_HEIGHT,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn jpeg_data_uri(width: u32, height: u32) -> String {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
            .expect("encode jpeg");
        format!("data:image/jpeg;base64,{}", BASE64.encode(&bytes))
    }

    #[test]
    fn decodes_onto_fixed_surface() {
        for (w, h) in [(16, 16), (640, 480), (320, 240)] {
            let frame = decode_data_uri(&jpeg_data_uri(w, h)).expect("decode frame");
            assert_eq!(frame.width(), SURFACE_WIDTH);
            assert_eq!(frame.height(), SURFACE_HEIGHT);
            assert_eq!(
                frame.byte_len(),
                (SURFACE_WIDTH * SURFACE_HEIGHT * 3) as usize
            );
        }
    }

    #[test]
    fn rejects_non_data_uri() {
        assert!(decode_data_uri("http://example.com/frame.jpg").is_err());
        assert!(decode_data_uri("data:image/jpeg,rawbytes").is_err());
    }

    #[test]
    fn rejects_bad_base64_and_bad_image() {
        assert!(decode_data_uri("data:image/jpeg;base64,!!!not-base64!!!").is_err());
        let not_an_image = format!("data:image/jpeg;base64,{}", BASE64.encode(b"hello"));
        assert!(decode_data_uri(&not_an_image).is_err());
    }
}
