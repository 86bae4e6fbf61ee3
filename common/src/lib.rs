//! Shared vocabulary types for Cadence.
//!
//! This crate defines the plain-data types exchanged between the
//! presentation core (`presenter`) and its collaborators: presentation
//! timestamps, rational frame rates, display geometry, and the negotiated
//! video format descriptor.
//!
//! # Time units
//!
//! All presentation timestamps use 100-nanosecond units ([`MediaTime`]),
//! the native resolution of most media pipelines. One second is
//! `MediaTime::PER_SECOND` (10,000,000) units.
//!
//! # Examples
//!
//! ```
//! use common::{MediaTime, Ratio, VideoFormat};
//!
//! // 25 fps has a frame interval of 40ms and a quarter-frame of 10ms.
//! let rate = Ratio::new(25, 1).unwrap();
//! let per_frame = rate.average_frame_duration();
//! assert_eq!(per_frame, MediaTime::from_millis(40));
//!
//! let format = VideoFormat::new(1920, 1080, rate);
//! assert!(format.is_progressive());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while constructing or validating vocabulary types.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatError {
    #[error("invalid frame rate: {0}")]
    InvalidRate(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
}

/// A presentation timestamp or duration in 100-nanosecond units.
///
/// Negative values are meaningful for durations (a frame scheduled in the
/// past has a negative delta to "now") which is why this is a signed type.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MediaTime(pub i64);

impl MediaTime {
    /// 100ns units per second.
    pub const PER_SECOND: i64 = 10_000_000;

    /// 100ns units per millisecond.
    pub const PER_MILLI: i64 = 10_000;

    /// 100ns units per microsecond.
    pub const PER_MICRO: i64 = 10;

    pub const ZERO: MediaTime = MediaTime(0);

    pub fn from_secs(secs: i64) -> Self {
        MediaTime(secs * Self::PER_SECOND)
    }

    pub fn from_millis(millis: i64) -> Self {
        MediaTime(millis * Self::PER_MILLI)
    }

    pub fn from_micros(micros: i64) -> Self {
        MediaTime(micros * Self::PER_MICRO)
    }

    /// Whole milliseconds, truncating toward zero.
    pub fn as_millis(self) -> i64 {
        self.0 / Self::PER_MILLI
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / Self::PER_SECOND as f64
    }

    /// Converts a non-negative time to a [`std::time::Duration`].
    ///
    /// Negative values clamp to zero; sleeping for a negative interval is
    /// never meaningful.
    pub fn to_duration(self) -> std::time::Duration {
        if self.0 <= 0 {
            std::time::Duration::ZERO
        } else {
            std::time::Duration::from_nanos(self.0 as u64 * 100)
        }
    }

    pub fn saturating_add(self, other: MediaTime) -> MediaTime {
        MediaTime(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: MediaTime) -> MediaTime {
        MediaTime(self.0.saturating_sub(other.0))
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl std::ops::Add for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: MediaTime) -> MediaTime {
        MediaTime(self.0 + rhs.0)
    }
}

impl std::ops::Sub for MediaTime {
    type Output = MediaTime;

    fn sub(self, rhs: MediaTime) -> MediaTime {
        MediaTime(self.0 - rhs.0)
    }
}

impl std::ops::Neg for MediaTime {
    type Output = MediaTime;

    fn neg(self) -> MediaTime {
        MediaTime(-self.0)
    }
}

impl std::fmt::Display for MediaTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

/// A rational frame rate (frames per second as `num / den`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ratio {
    pub num: u32,
    pub den: u32,
}

impl Ratio {
    /// Creates a frame rate; both terms must be nonzero.
    pub fn new(num: u32, den: u32) -> Result<Self, FormatError> {
        if num == 0 || den == 0 {
            return Err(FormatError::InvalidRate(format!("{num}/{den}")));
        }
        Ok(Ratio { num, den })
    }

    pub fn fps(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Average duration of one frame at this rate.
    ///
    /// 30000/1001 (NTSC 29.97) yields 333,667 units (~33.37ms).
    pub fn average_frame_duration(self) -> MediaTime {
        MediaTime(self.den as i64 * MediaTime::PER_SECOND / self.num as i64)
    }
}

impl std::fmt::Display for Ratio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Pixel dimensions of a surface or display.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Size { width, height }
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// An axis-aligned rectangle in pixel coordinates.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    /// A rectangle anchored at the origin.
    pub fn from_size(size: Size) -> Self {
        Rect::new(0, 0, size.width, size.height)
    }

    pub fn size(self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn bottom(self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// True if `other` lies entirely within this rectangle.
    pub fn contains(self, other: Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// Memory layout of an uncompressed frame.
///
/// Only uncompressed layouts exist here; compressed candidates are
/// rejected during negotiation before a `VideoFormat` is built for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelLayout {
    /// 8-bit BGRA, the native layout of most desktop scanout paths.
    Bgra8,
    /// 8-bit RGBA.
    Rgba8,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelLayout::Bgra8 | PixelLayout::Rgba8 => 4,
        }
    }
}

/// Scan mode of the source material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterlaceMode {
    Progressive,
    Interlaced,
}

/// CIE color primaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorPrimaries {
    Bt601,
    Bt709,
    Bt2020,
    Unknown,
}

/// Opto-electronic transfer function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferFunction {
    Bt709,
    Srgb,
    Pq,
    Unknown,
}

/// YUV-to-RGB conversion matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum YuvMatrix {
    Bt601,
    Bt709,
    Bt2020,
    Unknown,
}

/// Colorimetry metadata attached to a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorInfo {
    pub primaries: ColorPrimaries,
    pub transfer: TransferFunction,
    pub matrix: YuvMatrix,
}

impl ColorInfo {
    /// The canonical output colorimetry every negotiated type is forced to.
    pub const BT709: ColorInfo = ColorInfo {
        primaries: ColorPrimaries::Bt709,
        transfer: TransferFunction::Bt709,
        matrix: YuvMatrix::Bt709,
    };
}

impl Default for ColorInfo {
    fn default() -> Self {
        ColorInfo {
            primaries: ColorPrimaries::Unknown,
            transfer: TransferFunction::Unknown,
            matrix: YuvMatrix::Unknown,
        }
    }
}

/// A negotiated (or candidate) video output format.
///
/// The `aperture` is the sub-rectangle of the frame intended for display
/// (pan-and-scan / clean aperture); `None` means the full frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub pixel: PixelLayout,
    pub frame_rate: Ratio,
    pub interlace: InterlaceMode,
    pub aperture: Option<Rect>,
    pub color: ColorInfo,
}

impl VideoFormat {
    /// A progressive BGRA format with unknown colorimetry and full-frame
    /// aperture; the usual shape of a candidate before negotiation.
    pub fn new(width: u32, height: u32, frame_rate: Ratio) -> Self {
        VideoFormat {
            width,
            height,
            pixel: PixelLayout::Bgra8,
            frame_rate,
            interlace: InterlaceMode::Progressive,
            aperture: None,
            color: ColorInfo::default(),
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn frame_bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    pub fn is_progressive(&self) -> bool {
        self.interlace == InterlaceMode::Progressive
    }

    /// Byte size of one tightly-packed frame.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel.bytes_per_pixel() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_time_conversions() {
        assert_eq!(MediaTime::from_secs(1).0, 10_000_000);
        assert_eq!(MediaTime::from_millis(33).0, 330_000);
        assert_eq!(MediaTime::from_micros(8_333).0, 83_330);
        assert_eq!(MediaTime::from_millis(50).as_millis(), 50);
        assert_eq!(
            MediaTime::from_millis(25).to_duration(),
            std::time::Duration::from_millis(25)
        );
        // Negative intervals clamp rather than panic.
        assert_eq!(
            MediaTime::from_millis(-5).to_duration(),
            std::time::Duration::ZERO
        );
    }

    #[test]
    fn test_media_time_arithmetic() {
        let a = MediaTime::from_millis(100);
        let b = MediaTime::from_millis(40);
        assert_eq!(a - b, MediaTime::from_millis(60));
        assert_eq!(b - a, MediaTime::from_millis(-60));
        assert!((b - a).is_negative());
        assert_eq!(-(a - b), MediaTime::from_millis(-60));
    }

    #[test]
    fn test_ratio_validation() {
        assert!(Ratio::new(30, 1).is_ok());
        assert!(Ratio::new(30000, 1001).is_ok());
        assert!(Ratio::new(0, 1).is_err());
        assert!(Ratio::new(30, 0).is_err());
    }

    #[test]
    fn test_frame_duration() {
        // 30fps -> 333,333 units of 100ns (~33.3ms)
        let rate = Ratio::new(30, 1).unwrap();
        assert_eq!(rate.average_frame_duration().0, 333_333);

        // NTSC 29.97
        let ntsc = Ratio::new(30000, 1001).unwrap();
        assert_eq!(ntsc.average_frame_duration().0, 333_666);

        // 60fps
        let sixty = Ratio::new(60, 1).unwrap();
        assert_eq!(sixty.average_frame_duration().0, 166_666);
    }

    #[test]
    fn test_rect_contains() {
        let frame = Rect::new(0, 0, 1920, 1080);
        assert!(frame.contains(Rect::new(0, 0, 1920, 1080)));
        assert!(frame.contains(Rect::new(240, 0, 1440, 1080)));
        assert!(!frame.contains(Rect::new(-1, 0, 100, 100)));
        assert!(!frame.contains(Rect::new(1900, 0, 100, 100)));
        assert!(!frame.contains(Rect::new(0, 1000, 1920, 81)));
    }

    #[test]
    fn test_video_format_defaults() {
        let format = VideoFormat::new(1280, 720, Ratio::new(60, 1).unwrap());
        assert!(format.is_progressive());
        assert_eq!(format.pixel, PixelLayout::Bgra8);
        assert_eq!(format.aperture, None);
        assert_eq!(format.frame_bytes(), 1280 * 720 * 4);
        assert_eq!(format.frame_bounds(), Rect::new(0, 0, 1280, 720));
    }
}
