use std::collections::BTreeMap;

use anyhow::{Result, bail};
use grvqa::eval::{DetectionReport, evaluate_detections};
use grvqa::geometry::BBox;
use grvqa::model::{AnnotationSet, GroundingLevel, QaAnnotation};
use grvqa::relevance::ParsedRelevance;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::{EvaluateArgs, PredictionSource};
use crate::commands::{collect_boxes, sample_key};
use crate::manifest::RunRecorder;
use crate::util::{read_json, write_json_pretty};

#[derive(Debug, Clone, Serialize)]
struct EvaluateConfig {
    level: &'static str,
    source: &'static str,
    iou_thresholds: Vec<f64>,
    relevance_threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
struct DetectionSummary<'a> {
    level: &'static str,
    source: &'static str,
    reports: &'a [DetectionReport],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DetectionInputCounts {
    pub samples: usize,
    pub ground_truth_boxes: usize,
    pub predicted_boxes: usize,
    pub rejected_ground_truth_boxes: usize,
    pub raw_text_predictions: usize,
}

/// Per-sample boxes pulled out of an annotation file, keyed by sample id.
#[derive(Debug, Default)]
pub struct DetectionInputs {
    pub predictions: BTreeMap<String, Vec<BBox>>,
    pub ground_truths: BTreeMap<String, Vec<BBox>>,
    pub counts: DetectionInputCounts,
}

pub fn run(args: EvaluateArgs) -> Result<()> {
    if args.iou_thresholds.is_empty() {
        bail!("at least one --iou-threshold is required");
    }
    if let Some(bad) = args
        .iou_thresholds
        .iter()
        .find(|threshold| !(0.0..=1.0).contains(*threshold))
    {
        bail!("IoU threshold must be within [0, 1] (got {bad})");
    }
    if !args.relevance_threshold.is_finite() {
        bail!("relevance threshold must be a finite number");
    }

    let level = GroundingLevel::from(args.level);
    let mut recorder = RunRecorder::start("evaluate");
    recorder.record_input(&args.input)?;

    let annotations: AnnotationSet = read_json(&args.input)?;
    let inputs =
        collect_detection_inputs(&annotations, level, args.source, args.relevance_threshold);
    info!(
        level = level.as_str(),
        source = args.source.as_str(),
        samples = inputs.counts.samples,
        ground_truth_boxes = inputs.counts.ground_truth_boxes,
        predicted_boxes = inputs.counts.predicted_boxes,
        "collected detection inputs"
    );

    let reports = args
        .iou_thresholds
        .iter()
        .map(|&threshold| {
            evaluate_detections(&inputs.predictions, &inputs.ground_truths, threshold)
        })
        .collect::<Vec<DetectionReport>>();

    for report in &reports {
        info!(
            iou_threshold = report.iou_threshold,
            precision = report.scores.precision,
            recall = report.scores.recall,
            f1 = report.scores.f1,
            true_positives = report.counts.true_positives,
            false_positives = report.counts.false_positives,
            false_negatives = report.counts.false_negatives,
            "detection metrics"
        );
    }

    if let Some(report_path) = &args.report_path {
        let summary = DetectionSummary {
            level: level.as_str(),
            source: args.source.as_str(),
            reports: &reports,
        };
        write_json_pretty(report_path, &summary)?;
        info!(path = %report_path.display(), "wrote detection report");
    }

    let anchor = args.report_path.as_deref().unwrap_or(args.input.as_path());
    let manifest_path = recorder.manifest_path(args.manifest_path, anchor);
    let config = EvaluateConfig {
        level: level.as_str(),
        source: args.source.as_str(),
        iou_thresholds: args.iou_thresholds,
        relevance_threshold: args.relevance_threshold,
    };
    recorder.finish(&manifest_path, config, inputs.counts, Vec::new())
}

/// Ground-truth and predicted boxes at `level` for every QA pair. Every QA
/// pair contributes a ground-truth entry, even an empty one, so its
/// predictions are still scored.
pub fn collect_detection_inputs(
    annotations: &AnnotationSet,
    level: GroundingLevel,
    source: PredictionSource,
    relevance_threshold: f64,
) -> DetectionInputs {
    let mut inputs = DetectionInputs::default();

    for (image_name, qas) in annotations.iter() {
        for (index, qa) in qas.iter().enumerate() {
            let sample_id = sample_key(image_name, index, qa);
            if inputs.ground_truths.contains_key(&sample_id) {
                warn!(sample_id = %sample_id, "duplicate sample id; later entry wins");
            }

            let ground_truths = ground_truth_boxes(qa, level, &sample_id, &mut inputs.counts);
            let predictions = match source {
                PredictionSource::Matches => {
                    collect_boxes(qa.level_matches(level), &sample_id, &level.matches_key())
                }
                PredictionSource::Relevance => {
                    relevance_boxes(qa, level, relevance_threshold, &mut inputs.counts)
                }
            };

            inputs.counts.ground_truth_boxes += ground_truths.len();
            inputs.counts.predicted_boxes += predictions.len();
            inputs.ground_truths.insert(sample_id.clone(), ground_truths);
            inputs.predictions.insert(sample_id, predictions);
        }
    }

    inputs.counts.samples = inputs.ground_truths.len();
    inputs
}

fn ground_truth_boxes(
    qa: &QaAnnotation,
    level: GroundingLevel,
    sample_id: &str,
    counts: &mut DetectionInputCounts,
) -> Vec<BBox> {
    qa.ground_truth_boxes(level)
        .iter()
        .filter_map(|gt| match gt.to_bbox() {
            Ok(bbox) => Some(bbox),
            Err(err) => {
                warn!(sample_id, error = %err, "skipping ground-truth box");
                counts.rejected_ground_truth_boxes += 1;
                None
            }
        })
        .collect()
}

fn relevance_boxes(
    qa: &QaAnnotation,
    level: GroundingLevel,
    threshold: f64,
    counts: &mut DetectionInputCounts,
) -> Vec<BBox> {
    let Some(value) = qa.extra.get(&level.predictions_key()) else {
        return Vec::new();
    };

    let parsed = ParsedRelevance::from_value(value, level);
    if matches!(parsed, ParsedRelevance::RawText(_)) {
        counts.raw_text_predictions += 1;
    }
    parsed.boxes_at_or_above(threshold)
}
