/*!
    Pixel format types.
*/

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/**
    Video pixel formats.

    Native stream formats are reported as-is; only the packed formats can be
    used as a display target.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum PixelFormat {
    /// Planar YUV 4:2:0, 12bpp (most common video format)
    Yuv420p,
    /// Semi-planar YUV 4:2:0, 12bpp (common hardware decoder output)
    Nv12,
    /// Planar YUV 4:2:2, 16bpp
    Yuv422p,
    /// Planar YUV 4:4:4, 24bpp
    Yuv444p,
    /// Packed RGBA, 32bpp
    #[default]
    Rgba,
    /// Packed BGRA, 32bpp (common for display on macOS/Windows)
    Bgra,
    /// Packed RGB, 24bpp
    Rgb24,
    /// Packed BGR, 24bpp
    Bgr24,
}

impl PixelFormat {
    /**
        Returns the number of bits per pixel for this format.

        For planar formats, this is the average bits per pixel.
    */
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Yuv420p | Self::Nv12 => 12,
            Self::Yuv422p => 16,
            Self::Rgb24 | Self::Bgr24 | Self::Yuv444p => 24,
            Self::Bgra | Self::Rgba => 32,
        }
    }

    /**
        Bytes per pixel for packed formats, `None` for planar ones.
    */
    pub const fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            Self::Rgba | Self::Bgra => Some(4),
            Self::Rgb24 | Self::Bgr24 => Some(3),
            Self::Yuv420p | Self::Nv12 | Self::Yuv422p | Self::Yuv444p => None,
        }
    }

    /**
        Returns true if frames in this format can be handed to a display
        as a single interleaved buffer.
    */
    pub const fn is_packed(self) -> bool {
        self.bytes_per_pixel().is_some()
    }

    /**
        Byte offsets of the red, green, blue and (if present) alpha
        channels within one packed pixel.
    */
    pub const fn channel_offsets(self) -> Option<[Option<usize>; 4]> {
        match self {
            Self::Rgba => Some([Some(0), Some(1), Some(2), Some(3)]),
            Self::Bgra => Some([Some(2), Some(1), Some(0), Some(3)]),
            Self::Rgb24 => Some([Some(0), Some(1), Some(2), None]),
            Self::Bgr24 => Some([Some(2), Some(1), Some(0), None]),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Yuv420p => "yuv420p",
            Self::Nv12 => "nv12",
            Self::Yuv422p => "yuv422p",
            Self::Yuv444p => "yuv444p",
            Self::Rgba => "rgba",
            Self::Bgra => "bgra",
            Self::Rgb24 => "rgb24",
            Self::Bgr24 => "bgr24",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown pixel format name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown pixel format '{0}'")]
pub struct UnknownPixelFormat(pub String);

impl FromStr for PixelFormat {
    type Err = UnknownPixelFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yuv420p" => Ok(Self::Yuv420p),
            "nv12" => Ok(Self::Nv12),
            "yuv422p" => Ok(Self::Yuv422p),
            "yuv444p" => Ok(Self::Yuv444p),
            "rgba" => Ok(Self::Rgba),
            "bgra" => Ok(Self::Bgra),
            "rgb24" | "rgb" => Ok(Self::Rgb24),
            "bgr24" | "bgr" => Ok(Self::Bgr24),
            _ => Err(UnknownPixelFormat(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_format_bits_per_pixel() {
        assert_eq!(PixelFormat::Yuv420p.bits_per_pixel(), 12);
        assert_eq!(PixelFormat::Bgra.bits_per_pixel(), 32);
        assert_eq!(PixelFormat::Rgb24.bits_per_pixel(), 24);
    }

    #[test]
    fn only_packed_formats_have_bytes_per_pixel() {
        assert_eq!(PixelFormat::Rgba.bytes_per_pixel(), Some(4));
        assert_eq!(PixelFormat::Bgr24.bytes_per_pixel(), Some(3));
        assert_eq!(PixelFormat::Nv12.bytes_per_pixel(), None);
        assert!(!PixelFormat::Yuv420p.is_packed());
        assert!(PixelFormat::Bgra.is_packed());
    }

    #[test]
    fn channel_offsets_follow_byte_order() {
        let bgra = PixelFormat::Bgra.channel_offsets().unwrap();
        assert_eq!(bgra[0], Some(2));
        assert_eq!(bgra[2], Some(0));
        let rgb = PixelFormat::Rgb24.channel_offsets().unwrap();
        assert_eq!(rgb[3], None);
        assert!(PixelFormat::Yuv444p.channel_offsets().is_none());
    }

    #[test]
    fn parse_names() {
        assert_eq!("RGBA".parse::<PixelFormat>(), Ok(PixelFormat::Rgba));
        assert_eq!("bgr".parse::<PixelFormat>(), Ok(PixelFormat::Bgr24));
        assert!("argb".parse::<PixelFormat>().is_err());
        assert_eq!(PixelFormat::Yuv422p.to_string(), "yuv422p");
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&PixelFormat::Bgra).unwrap();
        assert_eq!(json, "\"bgra\"");
        let parsed: PixelFormat = serde_json::from_str("\"rgb24\"").unwrap();
        assert_eq!(parsed, PixelFormat::Rgb24);
    }
}
