use std::ops::AddAssign;

use anyhow::{Context, Result};
use grvqa::model::{
    AnnotationSet, GroundingLevel, OcrStore, QaAnnotation, Query, Region, SampleFailure,
};
use grvqa::ranking::{CandidateRecord, RankingConfig, ScoreWeights, rank_regions};
use grvqa::span::word_level_matches;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cli::GroundArgs;
use crate::commands::points::point_matches_for;
use crate::commands::sample_key;
use crate::manifest::RunRecorder;
use crate::util::{read_json, write_json_pretty};

#[derive(Debug, Clone, Serialize)]
struct GroundConfig<'a> {
    level: &'static str,
    answer_field: &'a str,
    ranking: RankingConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroundCounts {
    pub images: usize,
    pub qa_pairs: usize,
    pub grounded: usize,
    pub without_matches: usize,
    pub exact_top_matches: usize,
    pub failed: usize,
}

impl AddAssign for GroundCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.images += rhs.images;
        self.qa_pairs += rhs.qa_pairs;
        self.grounded += rhs.grounded;
        self.without_matches += rhs.without_matches;
        self.exact_top_matches += rhs.exact_top_matches;
        self.failed += rhs.failed;
    }
}

#[derive(Debug)]
pub struct GroundOutcome {
    pub annotations: AnnotationSet,
    pub counts: GroundCounts,
    pub failures: Vec<SampleFailure>,
}

pub fn run(args: GroundArgs) -> Result<()> {
    let config = RankingConfig {
        cutoff: args.cutoff,
        weights: ScoreWeights::new(args.question_weight, args.answer_weight)
            .context("invalid score weights")?,
        max_matches: args.max_matches,
    };
    config.validate().context("invalid ranking configuration")?;
    let level = GroundingLevel::from(args.level);

    let mut recorder = RunRecorder::start("ground");
    recorder.record_input(&args.annotations)?;
    recorder.record_input(&args.ocr_store)?;

    let annotations: AnnotationSet = read_json(&args.annotations)?;
    let ocr: OcrStore = read_json(&args.ocr_store)?;
    info!(
        images = annotations.len(),
        ocr_images = ocr.len(),
        level = level.as_str(),
        cutoff = config.cutoff,
        max_matches = config.max_matches,
        "grounding annotations"
    );

    let outcome = ground_annotations(annotations, &ocr, level, &config, &args.answer_field);

    write_json_pretty(&args.output, &outcome.annotations)?;
    info!(
        path = %args.output.display(),
        qa_pairs = outcome.counts.qa_pairs,
        grounded = outcome.counts.grounded,
        without_matches = outcome.counts.without_matches,
        exact_top_matches = outcome.counts.exact_top_matches,
        failed = outcome.counts.failed,
        "wrote grounded annotations"
    );

    let manifest_path = recorder.manifest_path(args.manifest_path, &args.output);
    let run_config = GroundConfig {
        level: level.as_str(),
        answer_field: &args.answer_field,
        ranking: config,
    };
    recorder.finish(&manifest_path, run_config, outcome.counts, outcome.failures)
}

/// Ranks each image's OCR regions for every QA pair of that image and
/// writes the matches back onto the annotations. Images are processed in
/// parallel; output keeps the input order.
pub fn ground_annotations(
    annotations: AnnotationSet,
    ocr: &OcrStore,
    level: GroundingLevel,
    config: &RankingConfig,
    answer_field: &str,
) -> GroundOutcome {
    let grounded = annotations
        .into_entries()
        .into_par_iter()
        .map(|(image_name, mut qas)| {
            let regions = ocr.get(&image_name);
            let (counts, failures) =
                ground_image(&image_name, &mut qas, regions, level, config, answer_field);
            (image_name, qas, counts, failures)
        })
        .collect::<Vec<_>>();

    let mut outcome = GroundOutcome {
        annotations: AnnotationSet::new(),
        counts: GroundCounts::default(),
        failures: Vec::new(),
    };
    for (image_name, qas, counts, failures) in grounded {
        outcome.annotations.insert(image_name, qas);
        outcome.counts += counts;
        outcome.failures.extend(failures);
    }
    outcome
}

fn ground_image(
    image_name: &str,
    qas: &mut [QaAnnotation],
    regions: Option<&Vec<Region>>,
    level: GroundingLevel,
    config: &RankingConfig,
    answer_field: &str,
) -> (GroundCounts, Vec<SampleFailure>) {
    let mut counts = GroundCounts {
        images: 1,
        qa_pairs: qas.len(),
        ..GroundCounts::default()
    };
    let mut failures = Vec::new();

    let Some(regions) = regions else {
        warn!(image = image_name, qa_pairs = qas.len(), "no OCR regions for image");
        for (index, qa) in qas.iter().enumerate() {
            failures.push(SampleFailure::new(
                sample_key(image_name, index, qa),
                format!("no OCR regions for image {image_name}"),
            ));
        }
        counts.failed = qas.len();
        return (counts, failures);
    };

    for (index, qa) in qas.iter_mut().enumerate() {
        let sample_id = sample_key(image_name, index, qa);
        match ground_qa(qa, &sample_id, regions, level, config, answer_field) {
            Ok(GroundedQa { matches, exact_top }) => {
                debug!(sample_id = %sample_id, matches, "grounded");
                if matches == 0 {
                    counts.without_matches += 1;
                } else {
                    counts.grounded += 1;
                }
                if exact_top {
                    counts.exact_top_matches += 1;
                }
            }
            Err(reason) => {
                warn!(sample_id = %sample_id, reason = %reason, "sample failed");
                counts.failed += 1;
                failures.push(SampleFailure::new(sample_id, reason));
            }
        }
    }

    (counts, failures)
}

struct GroundedQa {
    matches: usize,
    exact_top: bool,
}

fn ground_qa(
    qa: &mut QaAnnotation,
    sample_id: &str,
    regions: &[Region],
    level: GroundingLevel,
    config: &RankingConfig,
    answer_field: &str,
) -> std::result::Result<GroundedQa, String> {
    let answer = qa
        .answer_from(answer_field)
        .ok_or_else(|| format!("annotation has no string field {answer_field:?}"))?
        .to_string();
    // An empty answer is contained in every region.
    if answer.trim().is_empty() {
        return Err(format!("annotation field {answer_field:?} is empty"));
    }
    let query = Query::new(qa.question.clone(), answer);

    let ranked = rank_regions(&query, regions, config);
    let boxes = ranked
        .iter()
        .map(|candidate| candidate.region.bbox)
        .collect::<Vec<_>>();
    let records = ranked
        .iter()
        .map(|candidate| candidate.to_record())
        .collect::<Vec<CandidateRecord>>();

    qa.set_level_matches(level, &boxes);
    qa.set_field(level.candidates_key(), &records);

    // Only line regions carry words; a block run keeps any earlier word matches.
    if level == GroundingLevel::Line {
        let words = word_level_matches(&query.answer, &ranked);
        qa.set_level_matches(GroundingLevel::Word, &words);
    } else if qa.level_matches(GroundingLevel::Word).is_none() {
        qa.set_level_matches(GroundingLevel::Word, &[]);
    }

    let points = point_matches_for(qa, sample_id);
    qa.set_point_matches(&points);

    Ok(GroundedQa {
        matches: ranked.len(),
        exact_top: ranked.first().is_some_and(|candidate| candidate.is_exact()),
    })
}
