use anyhow::Result;
use grvqa::geometry::Point;
use grvqa::model::{AnnotationSet, GroundingLevel, QaAnnotation};
use grvqa::point::derive_point_matches;
use serde::Serialize;
use tracing::info;

use crate::cli::PointsArgs;
use crate::commands::{collect_boxes, sample_key};
use crate::manifest::RunRecorder;
use crate::util::{read_json, write_json_pretty};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PointCounts {
    pub qa_pairs: usize,
    pub with_points: usize,
    pub points: usize,
}

pub fn run(args: PointsArgs) -> Result<()> {
    let mut recorder = RunRecorder::start("points");
    recorder.record_input(&args.input)?;

    let mut annotations: AnnotationSet = read_json(&args.input)?;
    let counts = assign_points(&mut annotations);

    write_json_pretty(&args.output, &annotations)?;
    info!(
        path = %args.output.display(),
        qa_pairs = counts.qa_pairs,
        with_points = counts.with_points,
        points = counts.points,
        "wrote point-level matches"
    );

    let manifest_path = recorder.manifest_path(args.manifest_path, &args.output);
    recorder.finish(&manifest_path, (), counts, Vec::new())
}

/// Recomputes `point_level_matches` for every QA pair from its stored
/// block, line and word matches.
pub fn assign_points(annotations: &mut AnnotationSet) -> PointCounts {
    let mut counts = PointCounts::default();

    for (image_name, qas) in annotations.iter_mut() {
        for (index, qa) in qas.iter_mut().enumerate() {
            let sample_id = sample_key(image_name, index, qa);
            let points = point_matches_for(qa, &sample_id);

            counts.qa_pairs += 1;
            counts.points += points.len();
            if !points.is_empty() {
                counts.with_points += 1;
            }
            qa.set_point_matches(&points);
        }
    }

    counts
}

pub(crate) fn point_matches_for(qa: &QaAnnotation, sample_id: &str) -> Vec<Point> {
    let boxes_at = |level: GroundingLevel| {
        collect_boxes(qa.level_matches(level), sample_id, &level.matches_key())
    };

    derive_point_matches(
        qa.block_boxes.len() == 1,
        &boxes_at(GroundingLevel::Word),
        &boxes_at(GroundingLevel::Line),
        &boxes_at(GroundingLevel::Block),
    )
}
