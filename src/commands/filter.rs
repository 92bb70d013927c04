use anyhow::Result;
use grvqa::model::{AnnotationSet, QaAnnotation};
use serde::Serialize;
use tracing::info;

use crate::cli::FilterArgs;
use crate::manifest::RunRecorder;
use crate::util::{image_stem, read_json, write_json_pretty};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterCounts {
    pub images_in: usize,
    pub images_out: usize,
    pub qa_in: usize,
    pub qa_out: usize,
}

pub fn run(args: FilterArgs) -> Result<()> {
    let mut recorder = RunRecorder::start("filter");
    recorder.record_input(&args.input)?;

    let annotations: AnnotationSet = read_json(&args.input)?;
    let (filtered, counts) = filter_annotations(annotations);

    write_json_pretty(&args.output, &filtered)?;
    info!(
        path = %args.output.display(),
        images_in = counts.images_in,
        images_out = counts.images_out,
        qa_in = counts.qa_in,
        qa_out = counts.qa_out,
        "wrote filtered annotations"
    );

    let manifest_path = recorder.manifest_path(args.manifest_path, &args.output);
    recorder.finish(&manifest_path, (), counts, Vec::new())
}

/// Keeps QA pairs that carry at least one ground-truth box and assigns each
/// an id of the form `<image stem>_<index among kept>`. Images left without
/// QA pairs are dropped; image order is kept.
pub fn filter_annotations(annotations: AnnotationSet) -> (AnnotationSet, FilterCounts) {
    let mut counts = FilterCounts {
        images_in: annotations.len(),
        ..FilterCounts::default()
    };
    let mut filtered = AnnotationSet::new();

    for (image_name, qas) in annotations.into_entries() {
        counts.qa_in += qas.len();
        let stem = image_stem(&image_name).to_string();

        let kept = qas
            .into_iter()
            .filter(QaAnnotation::has_any_boxes)
            .enumerate()
            .map(|(index, mut qa)| {
                qa.id = Some(format!("{stem}_{index}"));
                qa
            })
            .collect::<Vec<QaAnnotation>>();

        if kept.is_empty() {
            continue;
        }
        counts.qa_out += kept.len();
        filtered.insert(image_name, kept);
    }

    counts.images_out = filtered.len();
    (filtered, counts)
}
