//! Video frame extraction for upload-mode analysis
//! Encodes a captured RGBA frame as JPEG

use crate::document::{MediaElement, RawFrame};
use crate::error::{DetectError, DetectResult};
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;

/// Filename sent with the multipart `image` part
pub const FRAME_FILE_NAME: &str = "frame.jpg";

/// Capture the element's current frame and encode it for upload
pub fn extract_frame_jpeg(element: &dyn MediaElement, quality: u8) -> DetectResult<Vec<u8>> {
    let frame = element.capture_frame().ok_or_else(|| {
        DetectError::FrameEncode("no decoded frame available".to_string())
    })?;
    encode_jpeg(&frame, quality)
}

/// Encode an RGBA frame as JPEG. Alpha is discarded.
pub fn encode_jpeg(frame: &RawFrame, quality: u8) -> DetectResult<Vec<u8>> {
    let (width, height) = (frame.width, frame.height);
    if width == 0 || height == 0 {
        return Err(DetectError::FrameEncode(format!(
            "empty frame {}x{}",
            width, height
        )));
    }

    let expected = width as usize * height as usize * 4;
    if frame.rgba.len() != expected {
        return Err(DetectError::FrameEncode(format!(
            "frame buffer is {} bytes, expected {} for {}x{}",
            frame.rgba.len(),
            expected,
            width,
            height
        )));
    }

    let rgb: Vec<u8> = frame
        .rgba
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();

    let mut jpeg = Vec::with_capacity(expected / 8);
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100)).encode(
        &rgb,
        width,
        height,
        ColorType::Rgb8,
    )?;

    tracing::debug!("Encoded {}x{} frame to {} byte JPEG", width, height, jpeg.len());
    Ok(jpeg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32) -> RawFrame {
        RawFrame {
            width,
            height,
            rgba: vec![180; (width * height * 4) as usize],
        }
    }

    #[test]
    fn test_encode_produces_jpeg() {
        let jpeg = encode_jpeg(&solid_frame(16, 9), 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_rejects_malformed_frames() {
        assert!(matches!(
            encode_jpeg(&solid_frame(0, 10), 80),
            Err(DetectError::FrameEncode(_))
        ));

        let mut short = solid_frame(4, 4);
        short.rgba.truncate(10);
        assert!(matches!(
            encode_jpeg(&short, 80),
            Err(DetectError::FrameEncode(_))
        ));
    }
}
