use rayon::prelude::*;
use serde::Serialize;

use crate::error::{GroundingError, Result};
use crate::eval::metrics::{Counts, Scores};
use crate::geometry::{ImageSize, Point};
use crate::model::SampleFailure;

pub const DEFAULT_DISTANCE_THRESHOLDS: [f64; 3] = [0.05, 0.07, 0.1];

#[derive(Debug, Clone, PartialEq)]
pub struct PointSample {
    pub id: String,
    pub predictions: Vec<Point>,
    pub ground_truths: Vec<Point>,
    pub image_size: ImageSize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplePointMetrics {
    pub id: String,
    #[serde(flatten)]
    pub scores: Scores,
    #[serde(flatten)]
    pub counts: Counts,
    pub image_size: ImageSize,
    pub absolute_threshold_px: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointThresholdReport {
    pub threshold: f64,
    #[serde(flatten)]
    pub scores: Scores,
    #[serde(flatten)]
    pub counts: Counts,
    pub per_sample: Vec<SamplePointMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointEvaluation {
    pub thresholds: Vec<PointThresholdReport>,
    pub failed_samples: Vec<SampleFailure>,
}

impl PointEvaluation {
    pub fn report_for(&self, threshold: f64) -> Option<&PointThresholdReport> {
        self.thresholds
            .iter()
            .find(|report| report.threshold == threshold)
    }
}

/// Scores predicted points against ground-truth points at each normalized
/// distance threshold (a fraction of the image diagonal).
///
/// Every threshold is matched from scratch. Samples whose image size has no
/// usable diagonal are reported in `failed_samples` and left out of the totals.
pub fn evaluate_points(samples: &[PointSample], thresholds: &[f64]) -> Result<PointEvaluation> {
    if let Some(bad) = thresholds
        .iter()
        .find(|threshold| !threshold.is_finite() || **threshold < 0.0)
    {
        return Err(GroundingError::invalid_config(format!(
            "distance threshold must be a non-negative number (got {bad})"
        )));
    }

    let mut failed_samples = Vec::new();
    let mut usable = Vec::with_capacity(samples.len());
    for sample in samples {
        let diagonal = sample.image_size.diagonal();
        if diagonal.is_finite() && diagonal > 0.0 {
            usable.push((sample, diagonal));
        } else {
            failed_samples.push(SampleFailure::new(
                &sample.id,
                format!(
                    "image size {}x{} has no usable diagonal",
                    sample.image_size.width, sample.image_size.height
                ),
            ));
        }
    }

    let reports = thresholds
        .iter()
        .map(|&threshold| {
            let per_sample = usable
                .par_iter()
                .map(|(sample, diagonal)| {
                    let counts = match_points(
                        &sample.predictions,
                        &sample.ground_truths,
                        *diagonal,
                        threshold,
                    );
                    SamplePointMetrics {
                        id: sample.id.clone(),
                        scores: counts.scores(),
                        counts,
                        image_size: sample.image_size,
                        absolute_threshold_px: threshold * diagonal,
                    }
                })
                .collect::<Vec<SamplePointMetrics>>();

            let counts = per_sample.iter().map(|sample| sample.counts).sum::<Counts>();
            PointThresholdReport {
                threshold,
                scores: counts.scores(),
                counts,
                per_sample,
            }
        })
        .collect();

    Ok(PointEvaluation {
        thresholds: reports,
        failed_samples,
    })
}

/// Greedy nearest-neighbour matching for one sample at one threshold.
pub fn match_points(
    predictions: &[Point],
    ground_truths: &[Point],
    diagonal: f64,
    threshold: f64,
) -> Counts {
    let mut matched = vec![false; ground_truths.len()];
    let mut true_positives = 0;

    for prediction in predictions {
        let mut nearest: Option<(usize, f64)> = None;
        for (index, truth) in ground_truths.iter().enumerate() {
            if matched[index] {
                continue;
            }
            let distance = prediction.distance(truth);
            if nearest.is_none_or(|(_, best)| distance < best) {
                nearest = Some((index, distance));
            }
        }

        if let Some((index, distance)) = nearest
            && distance / diagonal <= threshold
        {
            matched[index] = true;
            true_positives += 1;
        }
    }

    Counts::new(
        true_positives,
        predictions.len() - true_positives,
        ground_truths.len() - true_positives,
    )
}
