//! Grayscale frames and raw-format conversion.

use thiserror::Error;

/// Share of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

/// A captured 8-bit grayscale frame.
#[derive(Clone)]
pub struct Frame {
    /// Row-major pixels, `width * height` bytes.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    /// Lens covered or room unlit; nothing worth running detection on.
    pub is_dark: bool,
}

impl Frame {
    /// Wrap grayscale pixels, flagging the frame if it is dark.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&data, DARK_FRAME_THRESHOLD);
        Self {
            data,
            width,
            height,
            sequence,
            is_dark,
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid {format} buffer length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
}

fn check_len(format: &'static str, buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Copy an 8-bit grayscale buffer, dropping any driver padding.
pub fn grey_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    check_len("GREY", buf, pixels)?;
    Ok(buf[..pixels].to_vec())
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    check_len("YUYV", yuyv, expected)?;
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Downscale 16-bit little-endian grayscale to 8 bits by keeping the high byte.
pub fn y16_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    check_len("Y16", buf, pixels * 2)?;
    Ok(buf[..pixels * 2]
        .chunks_exact(2)
        .map(|px| u16::from_le_bytes([px[0], px[1]]))
        .map(|value| (value >> 8) as u8)
        .collect())
}

/// True if more than `threshold_pct` of the pixels are near black (< 32).
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let yuyv = vec![100, 128, 200, 128];
        assert_eq!(yuyv_to_grayscale(&yuyv, 2, 1).unwrap(), vec![100, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_grayscale(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_grey_drops_padding() {
        let buf = vec![1, 2, 3, 4, 0, 0];
        assert_eq!(grey_to_grayscale(&buf, 2, 2).unwrap(), vec![1, 2, 3, 4]);
        assert!(grey_to_grayscale(&buf[..3], 2, 2).is_err());
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        // 0x1234 -> 0x12, 0xFF00 -> 0xFF
        let buf = vec![0x34, 0x12, 0x00, 0xFF];
        assert_eq!(y16_to_grayscale(&buf, 2, 1).unwrap(), vec![0x12, 0xFF]);
    }

    #[test]
    fn test_y16_invalid_length() {
        let err = y16_to_grayscale(&[0, 0, 0], 2, 1).unwrap_err();
        assert!(err.to_string().contains("Y16"));
    }

    #[test]
    fn test_dark_frame_detection() {
        assert!(is_dark_frame(&[], DARK_FRAME_THRESHOLD));
        assert!(is_dark_frame(&vec![0u8; 1000], DARK_FRAME_THRESHOLD));
        assert!(!is_dark_frame(&vec![128u8; 1000], DARK_FRAME_THRESHOLD));

        // 94% dark, 6% bright → not dark
        let mut gray = vec![10u8; 940];
        gray.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&gray, DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_frame_from_gray_flags_dark() {
        let frame = Frame::from_gray(vec![0u8; 16], 4, 4, 7);
        assert!(frame.is_dark);
        assert_eq!(frame.sequence, 7);

        let frame = Frame::from_gray(vec![200u8; 16], 4, 4, 8);
        assert!(!frame.is_dark);
        assert_eq!(frame.data.len(), 16);
    }
}
