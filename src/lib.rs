//! Fuzzy grounding of visual question answering onto OCR regions, and the
//! detection and point metrics used to score it.

pub mod error;
pub mod eval;
pub mod geometry;
pub mod model;
pub mod point;
pub mod ranking;
pub mod relevance;
pub mod similarity;
pub mod span;

pub use error::{GroundingError, Result};
pub use geometry::{BBox, Point};
pub use model::{GroundingLevel, Query, Region, Word};
pub use ranking::{MatchCandidate, RankingConfig, ScoreWeights, rank_regions};
