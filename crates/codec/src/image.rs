//! Image handling at the platform boundary.
//!
//! Animated GIFs are reduced to their first frame and re-uploaded as PNG,
//! since vision models only accept still images.

use std::io::Cursor;

use async_trait::async_trait;
use base64::Engine;
use image::AnimationDecoder;

use crate::error::CodecError;

/// Where an image to upload comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(String),
    Bytes(Vec<u8>),
}

/// Platform image access used by [`crate::encode`].
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn fetch(&self, url: &str) -> kh_domain::Result<Vec<u8>>;

    /// Upload an image and return a URL the model can load.
    async fn upload(&self, source: ImageSource) -> kh_domain::Result<String>;
}

/// Store that can neither fetch nor upload; URLs pass through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughImageStore;

#[async_trait]
impl ImageStore for PassthroughImageStore {
    async fn fetch(&self, url: &str) -> kh_domain::Result<Vec<u8>> {
        Err(kh_domain::Error::Other(format!("no image store to fetch {url}")))
    }

    async fn upload(&self, source: ImageSource) -> kh_domain::Result<String> {
        match source {
            ImageSource::Url(url) => Ok(url),
            ImageSource::Bytes(bytes) => Ok(data_url("image/png", &bytes)),
        }
    }
}

pub fn is_gif(bytes: &[u8]) -> bool {
    bytes.starts_with(b"GIF8")
}

/// Decode the first frame of a GIF and re-encode it as PNG.
pub fn gif_first_frame_png(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let decoder = image::codecs::gif::GifDecoder::new(Cursor::new(bytes))
        .map_err(|e| CodecError::Image(format!("gif decode: {e}")))?;
    let frame = decoder
        .into_frames()
        .next()
        .ok_or_else(|| CodecError::Image("gif has no frames".into()))?
        .map_err(|e| CodecError::Image(format!("gif frame: {e}")))?;

    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(frame.into_buffer())
        .write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| CodecError::Image(format!("png encode: {e}")))?;
    Ok(out.into_inner())
}

/// `data:` URL for inline image parts.
pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Frame, Rgba, RgbaImage};

    fn tiny_gif() -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut encoder = image::codecs::gif::GifEncoder::new(&mut buf);
            let red = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255]));
            let blue = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 255, 255]));
            encoder.encode_frame(Frame::new(red)).unwrap();
            encoder.encode_frame(Frame::new(blue)).unwrap();
        }
        buf
    }

    #[test]
    fn first_frame_becomes_png() {
        let gif = tiny_gif();
        assert!(is_gif(&gif));
        let png = gif_first_frame_png(&gif).unwrap();
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));

        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        let px = decoded.get_pixel(0, 0);
        assert!(px[0] > 200 && px[2] < 50, "expected the red frame, got {px:?}");
    }

    #[test]
    fn garbage_is_an_image_error() {
        assert!(matches!(gif_first_frame_png(b"GIF89a nope"), Err(CodecError::Image(_))));
    }

    #[test]
    fn data_url_is_base64() {
        assert_eq!(data_url("image/png", b"hi"), "data:image/png;base64,aGk=");
    }
}
