//! Output format validation and optimal-type synthesis.
//!
//! During renegotiation the controller walks the source's candidate
//! formats in preference order; each candidate is validated against what
//! the render path can actually present, then rewritten into the
//! "optimal" type: canonical Bt709 colorimetry, geometry taken from the
//! destination rectangle, full-frame aperture.

use crate::gpu::RenderBackend;
use common::{ColorInfo, Rect, VideoFormat};
use thiserror::Error;

/// Why a candidate format was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("empty frame geometry ({width}x{height})")]
    EmptyGeometry { width: u32, height: u32 },

    #[error("interlaced content is not presentable")]
    Interlaced,

    #[error("invalid frame rate {0}/{1}")]
    InvalidRate(u32, u32),

    #[error("aperture extends outside the frame")]
    ApertureOutOfBounds,

    #[error("pixel layout not supported by the render backend")]
    Unsupported,
}

/// Validates that `candidate` is something the presentation path can
/// actually display.
pub fn validate_candidate(
    backend: &dyn RenderBackend,
    candidate: &VideoFormat,
) -> Result<(), ValidationError> {
    if candidate.width == 0 || candidate.height == 0 {
        return Err(ValidationError::EmptyGeometry {
            width: candidate.width,
            height: candidate.height,
        });
    }

    if !candidate.is_progressive() {
        return Err(ValidationError::Interlaced);
    }

    // Ratio construction enforces this, but candidates can arrive
    // deserialized from elsewhere.
    if candidate.frame_rate.num == 0 || candidate.frame_rate.den == 0 {
        return Err(ValidationError::InvalidRate(
            candidate.frame_rate.num,
            candidate.frame_rate.den,
        ));
    }

    if let Some(aperture) = candidate.aperture {
        if !candidate.frame_bounds().contains(aperture) {
            return Err(ValidationError::ApertureOutOfBounds);
        }
    }

    if !backend.supports_format(candidate) {
        return Err(ValidationError::Unsupported);
    }

    Ok(())
}

/// Synthesizes the optimal output type from an accepted candidate.
///
/// Colorimetry is forced to the canonical standard, geometry follows the
/// destination rectangle when one is set, and the aperture becomes the
/// full frame (cropping already happened upstream once geometry matches
/// the display).
pub fn optimal_format(candidate: &VideoFormat, dest_rect: Rect) -> VideoFormat {
    let mut optimal = candidate.clone();

    optimal.color = ColorInfo::BT709;
    optimal.aperture = None;

    if !dest_rect.is_empty() {
        optimal.width = dest_rect.width;
        optimal.height = dest_rect.height;
    }

    log::debug!(
        "Synthesized optimal type {}x{} {:?} @ {} from candidate {}x{}",
        optimal.width,
        optimal.height,
        optimal.pixel,
        optimal.frame_rate,
        candidate.width,
        candidate.height
    );

    optimal
}
