use anyhow::Result;
use grvqa::geometry::{GroundTruthBox, GroundTruthEntry};
use grvqa::model::AnnotationSet;
use serde::Serialize;
use tracing::info;

use crate::cli::StatsArgs;
use crate::manifest::RunRecorder;
use crate::util::{read_json, write_json_pretty};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DatasetStats {
    pub images: usize,
    pub qa_pairs: usize,
    pub qa_without_boxes: usize,
    pub block_boxes: usize,
    pub line_boxes: usize,
    pub word_boxes: usize,
    pub points: usize,
    pub malformed_ground_truth: usize,
}

pub fn run(args: StatsArgs) -> Result<()> {
    let mut recorder = RunRecorder::start("stats");
    recorder.record_input(&args.input)?;

    let annotations: AnnotationSet = read_json(&args.input)?;
    let stats = dataset_stats(&annotations);
    info!(
        images = stats.images,
        qa_pairs = stats.qa_pairs,
        qa_without_boxes = stats.qa_without_boxes,
        block_boxes = stats.block_boxes,
        line_boxes = stats.line_boxes,
        word_boxes = stats.word_boxes,
        points = stats.points,
        malformed_ground_truth = stats.malformed_ground_truth,
        "dataset statistics"
    );

    let Some(report_path) = args.report_path else {
        return Ok(());
    };
    write_json_pretty(&report_path, &stats)?;
    info!(path = %report_path.display(), "wrote dataset statistics");

    let manifest_path = recorder.manifest_path(None, &report_path);
    recorder.finish(&manifest_path, (), stats, Vec::new())
}

pub fn dataset_stats(annotations: &AnnotationSet) -> DatasetStats {
    let mut stats = DatasetStats {
        images: annotations.len(),
        ..DatasetStats::default()
    };

    for qa in annotations.iter().flat_map(|(_, qas)| qas) {
        stats.qa_pairs += 1;
        if !qa.has_any_boxes() {
            stats.qa_without_boxes += 1;
        }
        for (boxes, total) in [
            (&qa.block_boxes, &mut stats.block_boxes),
            (&qa.line_boxes, &mut stats.line_boxes),
            (&qa.word_boxes, &mut stats.word_boxes),
        ] {
            let valid = valid_boxes(boxes);
            *total += valid;
            stats.malformed_ground_truth += boxes.len() - valid;
        }

        let valid_points = qa.points.iter().filter(|gt| gt.to_point().is_ok()).count();
        stats.points += valid_points;
        stats.malformed_ground_truth += qa.points.len() - valid_points;
    }

    stats
}

fn valid_boxes(boxes: &[GroundTruthEntry<GroundTruthBox>]) -> usize {
    boxes.iter().filter(|gt| gt.to_bbox().is_ok()).count()
}
