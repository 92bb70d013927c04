use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use grvqa::GroundingLevel;
use grvqa::eval::points::DEFAULT_DISTANCE_THRESHOLDS;
use grvqa::ranking::{
    DEFAULT_ANSWER_WEIGHT, DEFAULT_CUTOFF, DEFAULT_MAX_MATCHES, DEFAULT_QUESTION_WEIGHT,
};
use grvqa::relevance::DEFAULT_RELEVANCE_THRESHOLD;

#[derive(Parser, Debug)]
#[command(
    name = "grvqa",
    version,
    about = "Ground document VQA answers onto OCR regions and score the groundings"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Filter(FilterArgs),
    Ground(GroundArgs),
    Points(PointsArgs),
    Evaluate(EvaluateArgs),
    EvaluatePoints(EvaluatePointsArgs),
    Stats(StatsArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum LevelArg {
    Block,
    Line,
    Word,
}

impl From<LevelArg> for GroundingLevel {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Block => Self::Block,
            LevelArg::Line => Self::Line,
            LevelArg::Word => Self::Word,
        }
    }
}

/// Granularity of the OCR regions being ranked.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RegionLevel {
    Block,
    Line,
}

impl From<RegionLevel> for GroundingLevel {
    fn from(level: RegionLevel) -> Self {
        match level {
            RegionLevel::Block => Self::Block,
            RegionLevel::Line => Self::Line,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum PredictionSource {
    /// `<level>_level_matches` written by `ground`.
    Matches,
    /// `<level>_level_predictions` emitted by a generative model.
    Relevance,
}

impl PredictionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Matches => "matches",
            Self::Relevance => "relevance",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub output: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct GroundArgs {
    #[arg(long)]
    pub annotations: PathBuf,

    #[arg(long)]
    pub ocr_store: PathBuf,

    #[arg(long)]
    pub output: PathBuf,

    #[arg(long, value_enum, default_value_t = RegionLevel::Line)]
    pub level: RegionLevel,

    #[arg(long, default_value_t = DEFAULT_CUTOFF)]
    pub cutoff: f64,

    #[arg(long, default_value_t = DEFAULT_QUESTION_WEIGHT)]
    pub question_weight: f64,

    #[arg(long, default_value_t = DEFAULT_ANSWER_WEIGHT)]
    pub answer_weight: f64,

    #[arg(long, default_value_t = DEFAULT_MAX_MATCHES)]
    pub max_matches: usize,

    /// Annotation field holding the answer to ground.
    #[arg(long, default_value = "answer")]
    pub answer_field: String,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct PointsArgs {
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub output: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long, value_enum, default_value_t = LevelArg::Line)]
    pub level: LevelArg,

    #[arg(long, value_enum, default_value_t = PredictionSource::Matches)]
    pub source: PredictionSource,

    #[arg(long = "iou-threshold", default_values_t = vec![0.5])]
    pub iou_thresholds: Vec<f64>,

    #[arg(long, default_value_t = DEFAULT_RELEVANCE_THRESHOLD)]
    pub relevance_threshold: f64,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct EvaluatePointsArgs {
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub image_sizes: PathBuf,

    #[arg(long = "threshold", default_values_t = DEFAULT_DISTANCE_THRESHOLDS.to_vec())]
    pub thresholds: Vec<f64>,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatsArgs {
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub report_path: Option<PathBuf>,
}
