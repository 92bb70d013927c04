use std::collections::BTreeMap;

use grvqa::eval::{PointSample, evaluate_detections, evaluate_points};
use grvqa::geometry::{BBox, ImageSize, Point};
use proptest::prelude::*;

fn bbox_strategy() -> impl Strategy<Value = BBox> {
    (0_u32..500, 0_u32..500, 1_u32..200, 1_u32..200).prop_map(|(x, y, w, h)| {
        let (x, y) = (f64::from(x), f64::from(y));
        BBox::new(x, y, x + f64::from(w), y + f64::from(h))
    })
}

fn point_strategy() -> impl Strategy<Value = Point> {
    (0_u32..1000, 0_u32..1000).prop_map(|(x, y)| Point::new(f64::from(x), f64::from(y)))
}

fn keyed(samples: Vec<Vec<BBox>>) -> BTreeMap<String, Vec<BBox>> {
    samples
        .into_iter()
        .enumerate()
        .map(|(index, boxes)| (format!("sample_{index}"), boxes))
        .collect()
}

proptest! {
    #[test]
    fn predictions_equal_to_ground_truth_score_perfectly(
        samples in proptest::collection::vec(proptest::collection::vec(bbox_strategy(), 1..6), 1..6),
        iou_threshold in 0.05_f64..1.0,
    ) {
        let truth = keyed(samples);
        let report = evaluate_detections(&truth, &truth, iou_threshold);

        prop_assert_eq!(report.counts.false_positives, 0);
        prop_assert_eq!(report.counts.false_negatives, 0);
        prop_assert_eq!(report.scores.precision, 1.0);
        prop_assert_eq!(report.scores.recall, 1.0);
        prop_assert_eq!(report.scores.f1, 1.0);
    }

    #[test]
    fn detection_counts_account_for_every_box(
        predicted in proptest::collection::vec(proptest::collection::vec(bbox_strategy(), 0..6), 1..5),
        truth in proptest::collection::vec(proptest::collection::vec(bbox_strategy(), 0..6), 1..5),
        iou_threshold in 0.05_f64..1.0,
    ) {
        let predictions = keyed(predicted);
        let ground_truths = keyed(truth);
        let report = evaluate_detections(&predictions, &ground_truths, iou_threshold);

        for sample in &report.per_sample {
            prop_assert_eq!(sample.counts.true_positives + sample.counts.false_negatives, sample.ground_truths);
            prop_assert_eq!(sample.counts.true_positives + sample.counts.false_positives, sample.predictions);
        }
        prop_assert!((0.0..=1.0).contains(&report.scores.f1));
    }

    #[test]
    fn point_metrics_are_scale_invariant(
        predictions in proptest::collection::vec(point_strategy(), 0..6),
        ground_truths in proptest::collection::vec(point_strategy(), 0..6),
        width in 100_u32..2000,
        height in 100_u32..2000,
        scale_exponent in 1_i32..4,
    ) {
        let scale = 2_f64.powi(scale_exponent);
        let sample = PointSample {
            id: "doc_0".to_string(),
            predictions: predictions.clone(),
            ground_truths: ground_truths.clone(),
            image_size: ImageSize { width: f64::from(width), height: f64::from(height) },
        };
        let scaled = PointSample {
            id: "doc_0".to_string(),
            predictions: predictions.iter().map(|p| Point::new(p.x * scale, p.y * scale)).collect(),
            ground_truths: ground_truths.iter().map(|p| Point::new(p.x * scale, p.y * scale)).collect(),
            image_size: ImageSize { width: f64::from(width) * scale, height: f64::from(height) * scale },
        };

        let thresholds = [0.05, 0.07, 0.1];
        let unscaled = evaluate_points(&[sample], &thresholds).expect("valid thresholds");
        let rescaled = evaluate_points(&[scaled], &thresholds).expect("valid thresholds");

        for (left, right) in unscaled.thresholds.iter().zip(&rescaled.thresholds) {
            prop_assert_eq!(left.counts, right.counts);
            prop_assert_eq!(left.counts.true_positives + left.counts.false_negatives, ground_truths.len());
            prop_assert_eq!(left.counts.true_positives + left.counts.false_positives, predictions.len());
        }
    }
}
