use anyhow::{Context, Result, bail};
use grvqa::eval::{PointSample, evaluate_points};
use grvqa::geometry::Point;
use grvqa::model::{AnnotationSet, ImageSizes, POINT_MATCHES_KEY, QaAnnotation, SampleFailure};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::EvaluatePointsArgs;
use crate::commands::{collect_points, sample_key};
use crate::manifest::RunRecorder;
use crate::util::{read_json, write_json_pretty};

#[derive(Debug, Clone, Serialize)]
struct EvaluatePointsConfig<'a> {
    thresholds: &'a [f64],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PointInputCounts {
    pub samples: usize,
    pub ground_truth_points: usize,
    pub predicted_points: usize,
    pub rejected_ground_truth_points: usize,
    pub failed: usize,
}

/// Point samples ready for scoring, plus what was left out of them.
#[derive(Debug, Default)]
pub struct PointInputs {
    pub samples: Vec<PointSample>,
    pub failures: Vec<SampleFailure>,
    pub rejected_ground_truth_points: usize,
}

pub fn run(args: EvaluatePointsArgs) -> Result<()> {
    if args.thresholds.is_empty() {
        bail!("at least one --threshold is required");
    }

    let mut recorder = RunRecorder::start("evaluate-points");
    recorder.record_input(&args.input)?;
    recorder.record_input(&args.image_sizes)?;

    let annotations: AnnotationSet = read_json(&args.input)?;
    let image_sizes: ImageSizes = read_json(&args.image_sizes)?;

    let PointInputs {
        samples,
        mut failures,
        rejected_ground_truth_points,
    } = collect_point_samples(&annotations, &image_sizes);
    let evaluation = evaluate_points(&samples, &args.thresholds)
        .context("failed to evaluate point predictions")?;
    for failure in &evaluation.failed_samples {
        warn!(sample_id = %failure.sample_id, reason = %failure.reason, "sample failed");
    }
    failures.extend(evaluation.failed_samples.iter().cloned());

    for report in &evaluation.thresholds {
        info!(
            threshold = report.threshold,
            precision = report.scores.precision,
            recall = report.scores.recall,
            f1 = report.scores.f1,
            true_positives = report.counts.true_positives,
            false_positives = report.counts.false_positives,
            false_negatives = report.counts.false_negatives,
            "point metrics"
        );
    }

    if let Some(report_path) = &args.report_path {
        write_json_pretty(report_path, &evaluation)?;
        info!(path = %report_path.display(), "wrote point report");
    }

    let counts = PointInputCounts {
        samples: samples.len(),
        ground_truth_points: samples.iter().map(|sample| sample.ground_truths.len()).sum(),
        predicted_points: samples.iter().map(|sample| sample.predictions.len()).sum(),
        rejected_ground_truth_points,
        failed: failures.len(),
    };
    let anchor = args.report_path.as_deref().unwrap_or(args.input.as_path());
    let manifest_path = recorder.manifest_path(args.manifest_path, anchor);
    let config = EvaluatePointsConfig {
        thresholds: &args.thresholds,
    };
    recorder.finish(&manifest_path, config, counts, failures)
}

/// Builds one [`PointSample`] per QA pair. QA pairs whose image has no
/// recorded size are returned as failures; zero-size images are left for
/// [`evaluate_points`] to reject.
pub fn collect_point_samples(
    annotations: &AnnotationSet,
    image_sizes: &ImageSizes,
) -> PointInputs {
    let mut inputs = PointInputs::default();

    for (image_name, qas) in annotations.iter() {
        let size = image_sizes.get(image_name);
        for (index, qa) in qas.iter().enumerate() {
            let sample_id = sample_key(image_name, index, qa);
            let Some(&image_size) = size else {
                warn!(sample_id = %sample_id, image = image_name, "no image size recorded");
                inputs.failures.push(SampleFailure::new(
                    sample_id,
                    format!("no image size recorded for {image_name}"),
                ));
                continue;
            };

            inputs.samples.push(PointSample {
                ground_truths: ground_truth_points(
                    qa,
                    &sample_id,
                    &mut inputs.rejected_ground_truth_points,
                ),
                predictions: collect_points(qa.point_matches(), &sample_id, POINT_MATCHES_KEY),
                id: sample_id,
                image_size,
            });
        }
    }

    inputs
}

fn ground_truth_points(qa: &QaAnnotation, sample_id: &str, rejected: &mut usize) -> Vec<Point> {
    qa.points
        .iter()
        .filter_map(|gt| match gt.to_point() {
            Ok(point) => Some(point),
            Err(err) => {
                warn!(sample_id, error = %err, "skipping ground-truth point");
                *rejected += 1;
                None
            }
        })
        .collect()
}

