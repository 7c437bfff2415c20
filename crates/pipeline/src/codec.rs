//! Binary wire format for raw frames on the stream WebSocket.
//!
//! ```text
//! offset  size  field
//!      0     4  width   (u32 LE)
//!      4     4  height  (u32 LE)
//!      8     8  pts     (i64 LE)
//!     16     4  tb_num  (u32 LE)
//!     20     4  tb_den  (u32 LE)
//!     24   w*h*3 RGB pixels, row-major
//! ```

use image::RgbImage;

use crate::error::TransformError;
use crate::frame::{Frame, TimeBase};

pub const HEADER_LEN: usize = 24;

/// Frames larger than 8K UHD are rejected before allocating.
pub const MAX_DIMENSION: u32 = 8192;

pub fn encode(frame: &Frame) -> Vec<u8> {
    let pixels = frame.image.as_raw();
    let mut out = Vec::with_capacity(HEADER_LEN + pixels.len());
    out.extend_from_slice(&frame.width().to_le_bytes());
    out.extend_from_slice(&frame.height().to_le_bytes());
    out.extend_from_slice(&frame.pts.to_le_bytes());
    out.extend_from_slice(&frame.time_base.num.to_le_bytes());
    out.extend_from_slice(&frame.time_base.den.to_le_bytes());
    out.extend_from_slice(pixels);
    out
}

pub fn decode(bytes: &[u8]) -> Result<Frame, TransformError> {
    if bytes.len() < HEADER_LEN {
        return Err(TransformError::Codec(format!(
            "message is {} bytes, header needs {HEADER_LEN}",
            bytes.len()
        )));
    }

    let width = read_u32(bytes, 0);
    let height = read_u32(bytes, 4);
    let pts = i64::from_le_bytes(field(bytes, 8));
    let time_base = TimeBase::new(read_u32(bytes, 16), read_u32(bytes, 20));

    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(TransformError::Codec(format!(
            "unsupported frame size {width}x{height}"
        )));
    }

    let expected = width as usize * height as usize * 3;
    let pixels = &bytes[HEADER_LEN..];
    if pixels.len() != expected {
        return Err(TransformError::Codec(format!(
            "{width}x{height} frame needs {expected} pixel bytes, got {}",
            pixels.len()
        )));
    }

    let image = RgbImage::from_raw(width, height, pixels.to_vec())
        .ok_or_else(|| TransformError::Codec("pixel buffer does not fit frame".into()))?;
    Ok(Frame::new(image, pts, time_base))
}

fn field<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(field(bytes, offset))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use image::Rgb;

    use super::*;

    #[test]
    fn header_layout_is_little_endian() {
        let frame = Frame::new(
            RgbImage::from_pixel(2, 1, Rgb([9, 8, 7])),
            -5,
            TimeBase::new(1, 1000),
        );
        let bytes = encode(&frame);

        assert_eq!(bytes.len(), HEADER_LEN + 6);
        assert_eq!(&bytes[0..4], &[2, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[1, 0, 0, 0]);
        assert_eq!(&bytes[8..16], &(-5i64).to_le_bytes());
        assert_eq!(&bytes[20..24], &1000u32.to_le_bytes());
        assert_eq!(&bytes[24..27], &[9, 8, 7]);

        assert_eq!(decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn short_header_is_rejected() {
        assert_matches!(decode(&[0; 10]), Err(TransformError::Codec(_)));
    }

    #[test]
    fn pixel_length_mismatch_is_rejected() {
        let mut bytes = encode(&Frame::new(RgbImage::new(4, 4), 0, TimeBase::default()));
        bytes.pop();
        assert_matches!(decode(&bytes), Err(TransformError::Codec(msg)) if msg.contains("48"));
    }

    #[test]
    fn zero_sized_frame_is_rejected() {
        let mut bytes = vec![0u8; HEADER_LEN];
        bytes[4] = 1;
        assert_matches!(decode(&bytes), Err(TransformError::Codec(_)));
    }
}
