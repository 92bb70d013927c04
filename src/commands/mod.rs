pub mod evaluate;
pub mod evaluate_points;
pub mod filter;
pub mod ground;
pub mod points;
pub mod stats;


use grvqa::geometry::{BBox, Point};
use grvqa::model::{QaAnnotation, parse_boxes, parse_points};
use serde_json::Value;
use tracing::warn;

use crate::util::image_stem;

/// The annotation's `id`, or `<image stem>_<index>` for unfiltered input.
pub(crate) fn sample_key(image_name: &str, index: usize, qa: &QaAnnotation) -> String {
    qa.sample_id()
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| format!("{}_{index}", image_stem(image_name)))
}

/// Valid boxes stored under `field`; malformed entries are logged and skipped.
pub(crate) fn collect_boxes(value: Option<&Value>, sample_id: &str, field: &str) -> Vec<BBox> {
    let Some(value) = value else {
        return Vec::new();
    };
    parse_boxes(value)
        .into_iter()
        .filter_map(|parsed| match parsed {
            Ok(bbox) => Some(bbox),
            Err(err) => {
                warn!(sample_id, field, error = %err, "skipping box");
                None
            }
        })
        .collect()
}

pub(crate) fn collect_points(value: Option<&Value>, sample_id: &str, field: &str) -> Vec<Point> {
    let Some(value) = value else {
        return Vec::new();
    };
    parse_points(value)
        .into_iter()
        .filter_map(|parsed| match parsed {
            Ok(point) => Some(point),
            Err(err) => {
                warn!(sample_id, field, error = %err, "skipping point");
                None
            }
        })
        .collect()
}
