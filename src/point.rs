use crate::error::{GroundingError, Result};
use crate::geometry::{BBox, Point};

/// Midpoint of the envelope of `boxes`, rounded to two decimals.
pub fn midpoint(boxes: &[BBox]) -> Result<Point> {
    let envelope =
        BBox::envelope(boxes).ok_or(GroundingError::EmptyInput("midpoint of zero boxes"))?;
    let center = envelope.center();
    Ok(Point::new(round2(center.x), round2(center.y)))
}

/// Point-level grounding derived from coarser matches.
///
/// With a single expected region the answer is pinned to one point: the
/// word matches' midpoint, else the line matches' midpoint. Otherwise every
/// matched block contributes its own midpoint.
pub fn derive_point_matches(
    single_region: bool,
    word_matches: &[BBox],
    line_matches: &[BBox],
    block_matches: &[BBox],
) -> Vec<Point> {
    if single_region {
        return midpoint(word_matches)
            .or_else(|_| midpoint(line_matches))
            .map(|point| vec![point])
            .unwrap_or_default();
    }

    block_matches
        .iter()
        .filter_map(|bbox| midpoint(std::slice::from_ref(bbox)).ok())
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}
