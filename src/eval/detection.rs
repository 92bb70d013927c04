use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::Serialize;

use crate::eval::metrics::{Counts, Scores};
use crate::geometry::BBox;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleDetection {
    pub sample_id: String,
    pub predictions: usize,
    pub ground_truths: usize,
    #[serde(flatten)]
    pub counts: Counts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionReport {
    pub iou_threshold: f64,
    #[serde(flatten)]
    pub scores: Scores,
    #[serde(flatten)]
    pub counts: Counts,
    pub per_sample: Vec<SampleDetection>,
}

/// Micro-averaged precision/recall/F1 of predicted boxes against ground truth.
///
/// Samples are keyed by ground truth; predictions for ids without ground
/// truth are not scored. Within a sample each prediction, in order, claims
/// the unmatched ground-truth box with the highest IoU and counts as a true
/// positive when that IoU reaches `iou_threshold`.
pub fn evaluate_detections(
    predictions: &BTreeMap<String, Vec<BBox>>,
    ground_truths: &BTreeMap<String, Vec<BBox>>,
    iou_threshold: f64,
) -> DetectionReport {
    let per_sample = ground_truths
        .par_iter()
        .map(|(sample_id, truth)| {
            let predicted = predictions.get(sample_id).map(Vec::as_slice).unwrap_or(&[]);
            SampleDetection {
                sample_id: sample_id.clone(),
                predictions: predicted.len(),
                ground_truths: truth.len(),
                counts: match_sample(predicted, truth, iou_threshold),
            }
        })
        .collect::<Vec<SampleDetection>>();

    let counts = per_sample.iter().map(|sample| sample.counts).sum::<Counts>();
    DetectionReport {
        iou_threshold,
        scores: counts.scores(),
        counts,
        per_sample,
    }
}

/// Greedy one-to-one matching for a single sample.
pub fn match_sample(predictions: &[BBox], ground_truths: &[BBox], iou_threshold: f64) -> Counts {
    let mut matched = vec![false; ground_truths.len()];
    let mut true_positives = 0;

    for prediction in predictions {
        let mut best: Option<(usize, f64)> = None;
        for (index, truth) in ground_truths.iter().enumerate() {
            if matched[index] {
                continue;
            }
            let iou = prediction.iou(truth);
            if iou > best.map_or(0.0, |(_, best_iou)| best_iou) {
                best = Some((index, iou));
            }
        }

        if let Some((index, iou)) = best
            && iou >= iou_threshold
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

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, Vec<BBox>)]) -> BTreeMap<String, Vec<BBox>> {
        entries
            .iter()
            .map(|(id, boxes)| (id.to_string(), boxes.clone()))
            .collect()
    }

    #[test]
    fn identical_predictions_score_perfectly() {
        let boxes = vec![
            BBox::new(0.0, 0.0, 10.0, 10.0),
            BBox::new(20.0, 20.0, 40.0, 30.0),
        ];
        let truth = map(&[("a_0", boxes.clone()), ("a_1", vec![BBox::new(5.0, 5.0, 6.0, 9.0)])]);

        for threshold in [0.0, 0.5, 1.0] {
            let report = evaluate_detections(&truth, &truth, threshold);
            assert_eq!(report.scores.precision, 1.0);
            assert_eq!(report.scores.recall, 1.0);
            assert_eq!(report.scores.f1, 1.0);
        }
    }

    #[test]
    fn missing_predictions_count_as_false_negatives() {
        let truth = map(&[("a_0", vec![BBox::new(0.0, 0.0, 10.0, 10.0)])]);
        let report = evaluate_detections(&BTreeMap::new(), &truth, 0.5);
        assert_eq!(report.counts, Counts::new(0, 0, 1));
        assert_eq!(report.scores, Scores::default());
    }

    #[test]
    fn ground_truth_is_consumed_once() {
        let truth = map(&[("a_0", vec![BBox::new(0.0, 0.0, 10.0, 10.0)])]);
        let predictions = map(&[(
            "a_0",
            vec![BBox::new(0.0, 0.0, 10.0, 10.0), BBox::new(0.0, 0.0, 10.0, 10.0)],
        )]);

        let report = evaluate_detections(&predictions, &truth, 0.5);
        assert_eq!(report.counts, Counts::new(1, 1, 0));
        assert_eq!(report.scores.precision, 0.5);
        assert_eq!(report.scores.recall, 1.0);
    }

    #[test]
    fn best_overlap_below_threshold_is_false_positive() {
        let truth = map(&[("a_0", vec![BBox::new(0.0, 0.0, 10.0, 10.0)])]);
        let predictions = map(&[("a_0", vec![BBox::new(5.0, 0.0, 15.0, 10.0)])]);

        let report = evaluate_detections(&predictions, &truth, 0.5);
        assert_eq!(report.counts, Counts::new(0, 1, 1));

        let lenient = evaluate_detections(&predictions, &truth, 0.3);
        assert_eq!(lenient.counts, Counts::new(1, 0, 0));
    }

    #[test]
    fn greedy_order_decides_contested_ground_truth() {
        let truth = map(&[(
            "a_0",
            vec![BBox::new(0.0, 0.0, 10.0, 10.0), BBox::new(8.0, 0.0, 18.0, 10.0)],
        )]);
        // The first prediction overlaps the second box best and takes it;
        // the second prediction then only has the first box left.
        let predictions = map(&[(
            "a_0",
            vec![BBox::new(7.0, 0.0, 17.0, 10.0), BBox::new(9.0, 0.0, 19.0, 10.0)],
        )]);

        let report = evaluate_detections(&predictions, &truth, 0.5);
        assert_eq!(report.counts, Counts::new(1, 1, 1));
    }

    #[test]
    fn predictions_without_ground_truth_are_ignored() {
        let truth = map(&[("a_0", vec![BBox::new(0.0, 0.0, 10.0, 10.0)])]);
        let predictions = map(&[
            ("a_0", vec![BBox::new(0.0, 0.0, 10.0, 10.0)]),
            ("orphan", vec![BBox::new(0.0, 0.0, 1.0, 1.0)]),
        ]);

        let report = evaluate_detections(&predictions, &truth, 0.5);
        assert_eq!(report.counts, Counts::new(1, 0, 0));
        assert_eq!(report.per_sample.len(), 1);
    }

    #[test]
    fn report_serializes_flat_metric_names() {
        let truth = map(&[("a_0", vec![BBox::new(0.0, 0.0, 10.0, 10.0)])]);
        let report = evaluate_detections(&truth, &truth, 0.5);
        let value = serde_json::to_value(&report).expect("report should serialize");
        for key in [
            "precision",
            "recall",
            "f1",
            "true_positives",
            "false_positives",
            "false_negatives",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }
}
