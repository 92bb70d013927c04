//! Relevance ranking of OCR regions against a question/answer pair.

use serde::{Deserialize, Serialize};

use crate::error::{GroundingError, Result};
use crate::model::{Query, Region};
use crate::similarity::{partial_similarity, token_set_similarity};

pub const DEFAULT_CUTOFF: f64 = 70.0;
pub const DEFAULT_QUESTION_WEIGHT: f64 = 0.2;
pub const DEFAULT_ANSWER_WEIGHT: f64 = 0.8;
pub const DEFAULT_MAX_MATCHES: usize = 10;

const QUESTION_STOPWORDS: &[&str] = &[
    "what", "is", "the", "this", "that", "these", "those", "which", "how", "why", "where", "when",
    "who", "will", "be", "and", "or", "in", "at", "to", "for", "of", "with", "by",
];

const LONG_TEXT_MIN_CHARS: usize = 10;
const SHORT_TEXT_MAX_CHARS: usize = 5;
const LENGTH_REFERENCE_CAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub question: f64,
    pub answer: f64,
}

impl ScoreWeights {
    pub fn new(question: f64, answer: f64) -> Result<Self> {
        let weights = Self { question, answer };
        weights.validate()?;
        Ok(weights)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.question.is_finite() && self.answer.is_finite()) {
            return Err(GroundingError::invalid_config("weights must be finite"));
        }
        if self.question < 0.0 || self.answer < 0.0 {
            return Err(GroundingError::invalid_config("weights must be non-negative"));
        }
        if ((self.question + self.answer) - 1.0).abs() > 1e-6 {
            return Err(GroundingError::invalid_config(format!(
                "question and answer weights must sum to 1 (got {} + {})",
                self.question, self.answer
            )));
        }
        Ok(())
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            question: DEFAULT_QUESTION_WEIGHT,
            answer: DEFAULT_ANSWER_WEIGHT,
        }
    }
}

/// Per-call tuning for [`rank_regions`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    pub cutoff: f64,
    pub weights: ScoreWeights,
    pub max_matches: usize,
}

impl RankingConfig {
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        if !(0.0..=100.0).contains(&self.cutoff) {
            return Err(GroundingError::invalid_config(format!(
                "cutoff must be within [0, 100] (got {})",
                self.cutoff
            )));
        }
        if self.max_matches == 0 {
            return Err(GroundingError::invalid_config("max_matches must be at least 1"));
        }
        Ok(())
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            cutoff: DEFAULT_CUTOFF,
            weights: ScoreWeights::default(),
            max_matches: DEFAULT_MAX_MATCHES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzyScore {
    pub answer_score: f64,
    pub question_score: f64,
    pub combined: f64,
}

/// Outcome of scoring one region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegionScore {
    ExactMatch,
    FuzzyScored(FuzzyScore),
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchKind {
    Exact,
    Fuzzy(FuzzyScore),
}

/// A region that cleared the cutoff.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate<'a> {
    pub region: &'a Region,
    pub score: f64,
    pub kind: MatchKind,
    pub weights: ScoreWeights,
}

impl MatchCandidate<'_> {
    pub fn is_exact(&self) -> bool {
        matches!(self.kind, MatchKind::Exact)
    }

    pub fn details(&self) -> MatchDetails {
        match self.kind {
            MatchKind::Exact => MatchDetails {
                exact_match: true,
                answer_score: 100.0,
                question_score: 100.0,
                answer_weight: None,
                question_weight: None,
            },
            MatchKind::Fuzzy(fuzzy) => MatchDetails {
                exact_match: false,
                answer_score: fuzzy.answer_score,
                question_score: fuzzy.question_score,
                answer_weight: Some(self.weights.answer),
                question_weight: Some(self.weights.question),
            },
        }
    }

    pub fn to_record(&self) -> CandidateRecord {
        CandidateRecord {
            bbox: self.region.bbox,
            text: self.region.text.clone(),
            score: self.score,
            details: self.details(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDetails {
    pub exact_match: bool,
    pub answer_score: f64,
    pub question_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_weight: Option<f64>,
}

/// Owned, serializable form of a [`MatchCandidate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub bbox: crate::geometry::BBox,
    pub text: String,
    pub score: f64,
    pub details: MatchDetails,
}

pub type GroundingResult<'a> = Vec<MatchCandidate<'a>>;

/// Ranks `regions` for `query`, keeping at most `config.max_matches`
/// candidates with a score of at least `config.cutoff`. Ties keep corpus order.
pub fn rank_regions<'a>(
    query: &Query,
    regions: &'a [Region],
    config: &RankingConfig,
) -> GroundingResult<'a> {
    let scorer = RegionScorer::new(query, config);

    let mut kept = regions
        .iter()
        .filter_map(|region| {
            let (score, kind) = match scorer.score(region) {
                RegionScore::ExactMatch => (100.0, MatchKind::Exact),
                RegionScore::FuzzyScored(fuzzy) => (fuzzy.combined, MatchKind::Fuzzy(fuzzy)),
                RegionScore::Rejected => return None,
            };
            Some(MatchCandidate {
                region,
                score,
                kind,
                weights: config.weights,
            })
        })
        .collect::<Vec<MatchCandidate<'a>>>();

    kept.sort_by(|left, right| right.score.total_cmp(&left.score));
    kept.truncate(config.max_matches);
    kept
}

/// Query-side state shared across every region of one ranking call.
pub struct RegionScorer<'q> {
    answer: String,
    answer_chars: usize,
    question_terms: Vec<String>,
    config: &'q RankingConfig,
}

impl<'q> RegionScorer<'q> {
    pub fn new(query: &Query, config: &'q RankingConfig) -> Self {
        Self {
            answer: query.answer.to_lowercase(),
            answer_chars: query.answer.chars().count(),
            question_terms: question_terms(&query.question),
            config,
        }
    }

    pub fn score(&self, region: &Region) -> RegionScore {
        let text = region.text.to_lowercase();
        if text.contains(&self.answer) {
            return RegionScore::ExactMatch;
        }

        let answer_score = self.answer_score(&text, region.text.chars().count());
        let question_score = self.question_score(&text);
        let combined = answer_score * self.config.weights.answer
            + question_score * self.config.weights.question;

        if combined < self.config.cutoff {
            return RegionScore::Rejected;
        }
        RegionScore::FuzzyScored(FuzzyScore {
            answer_score,
            question_score,
            combined,
        })
    }

    fn answer_score(&self, text: &str, text_chars: usize) -> f64 {
        let partial = f64::from(partial_similarity(&self.answer, text));
        let token_set = f64::from(token_set_similarity(&self.answer, text));

        // answer_chars > 0 here: an empty answer is a substring of every text.
        let reference_len = self.answer_chars.min(LENGTH_REFERENCE_CAP) as f64;
        let length_bonus = (text_chars as f64 / reference_len).min(1.0) * 100.0;

        let mut score = if text_chars > LONG_TEXT_MIN_CHARS {
            partial * 0.3 + token_set * 0.5 + length_bonus * 0.2
        } else {
            partial * 0.3 + token_set * 0.4 + length_bonus * 0.3
        };

        if text_chars < SHORT_TEXT_MAX_CHARS {
            score *= 0.5;
        }
        score
    }

    fn question_score(&self, text: &str) -> f64 {
        if self.question_terms.is_empty() {
            return 0.0;
        }

        let best_partial = self
            .question_terms
            .iter()
            .map(|term| partial_similarity(term, text))
            .max()
            .unwrap_or(0);
        let best_token_set = self
            .question_terms
            .iter()
            .map(|term| token_set_similarity(term, text))
            .max()
            .unwrap_or(0);

        f64::from(best_partial) * 0.4 + f64::from(best_token_set) * 0.6
    }
}

/// Lowercased question tokens with stop-words removed, in question order.
pub fn question_terms(question: &str) -> Vec<String> {
    question
        .split_whitespace()
        .map(str::to_lowercase)
        .filter(|term| QUESTION_STOPWORDS.iter().all(|stopword| stopword != term))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BBox;

    fn region(text: &str) -> Region {
        Region::new(BBox::new(0.0, 0.0, 100.0, 20.0), text)
    }

    #[test]
    fn exact_substring_scores_full_marks() {
        let regions = vec![region("total amount due 45 dollars")];
        let query = Query::new("what is the amount due", "45 dollars");
        let config = RankingConfig {
            max_matches: 1,
            ..RankingConfig::default()
        };

        let ranked = rank_regions(&query, &regions, &config);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].score, 100.0);
        assert!(ranked[0].is_exact());
        assert!(ranked[0].details().exact_match);
        assert_eq!(ranked[0].region.bbox, BBox::new(0.0, 0.0, 100.0, 20.0));
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let regions = vec![region("TOTAL DUE: 45 DOLLARS")];
        let query = Query::new("total due", "45 Dollars");
        let ranked = rank_regions(&query, &regions, &RankingConfig::default());
        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].is_exact());
    }

    #[test]
    fn question_terms_drop_stopwords() {
        assert_eq!(
            question_terms("What is the Invoice number of this bill"),
            vec!["invoice", "number", "bill"]
        );
        assert!(question_terms("what is the").is_empty());
    }

    #[test]
    fn fuzzy_score_blends_answer_and_question() {
        let query = Query::new("what is the due date", "march 5th 2021");
        let config = RankingConfig::default();
        let scorer = RegionScorer::new(&query, &config);

        let RegionScore::FuzzyScored(fuzzy) = scorer.score(&region("due date: march 5 2021")) else {
            panic!("near-identical region should clear the cutoff");
        };
        let expected = fuzzy.answer_score * 0.8 + fuzzy.question_score * 0.2;
        assert!((fuzzy.combined - expected).abs() < 1e-9);
        assert!(fuzzy.combined >= 70.0);
    }

    #[test]
    fn short_region_penalty_applies_once() {
        let query = Query::new("", "abcdef");
        let config = RankingConfig {
            cutoff: 0.0,
            ..RankingConfig::default()
        };
        let scorer = RegionScorer::new(&query, &config);

        // "abcx": partial 75, token-set 60, length bonus 4/6.
        let RegionScore::FuzzyScored(fuzzy) = scorer.score(&region("abcx")) else {
            panic!("zero cutoff keeps every region");
        };
        let unpenalized = 75.0 * 0.3 + 60.0 * 0.4 + (4.0 / 6.0) * 100.0 * 0.3;
        assert!((fuzzy.answer_score - unpenalized * 0.5).abs() < 1e-9);
        assert_eq!(fuzzy.question_score, 0.0);
    }

    #[test]
    fn long_region_answer_score_weights_token_set_highest() {
        let query = Query::new("", "45 dollars");
        let config = RankingConfig {
            cutoff: 0.0,
            ..RankingConfig::default()
        };
        let scorer = RegionScorer::new(&query, &config);

        // "total 45 dollar" (15 chars): partial 95, token-set 72, length bonus capped at 100.
        let RegionScore::FuzzyScored(fuzzy) = scorer.score(&region("Total 45 dollar")) else {
            panic!("zero cutoff keeps every region");
        };
        let expected = 95.0 * 0.3 + 72.0 * 0.5 + 100.0 * 0.2;
        assert!(
            (fuzzy.answer_score - expected).abs() < 1e-9,
            "unexpected answer score: {}",
            fuzzy.answer_score
        );
        assert_eq!(fuzzy.combined, fuzzy.answer_score * 0.8);
    }

    #[test]
    fn rejected_regions_fall_below_the_cutoff() {
        let query = Query::new("what is the total", "45 dollars");
        let config = RankingConfig::default();
        let scorer = RegionScorer::new(&query, &config);
        assert_eq!(
            scorer.score(&region("Thank you for your business")),
            RegionScore::Rejected
        );
    }

    #[test]
    fn ranking_sorts_descending_and_truncates_stably() {
        let regions = vec![
            region("unrelated header"),
            region("invoice 45 dollars"),
            region("45 dollars"),
            region("amount 45 dollars"),
        ];
        let query = Query::new("what is the amount", "45 dollars");
        let config = RankingConfig {
            max_matches: 2,
            ..RankingConfig::default()
        };

        let ranked = rank_regions(&query, &regions, &config);
        let texts = ranked
            .iter()
            .map(|candidate| candidate.region.text.as_str())
            .collect::<Vec<&str>>();
        assert_eq!(texts, vec!["invoice 45 dollars", "45 dollars"]);
    }

    #[test]
    fn nothing_clears_a_strict_cutoff() {
        let regions = vec![region("shipping address"), region("phone number")];
        let query = Query::new("what is the total", "45 dollars");
        let ranked = rank_regions(&query, &regions, &RankingConfig::default());
        assert!(ranked.is_empty());
    }

    #[test]
    fn weights_must_sum_to_one() {
        assert!(ScoreWeights::new(0.2, 0.8).is_ok());
        let error = ScoreWeights::new(0.5, 0.8).expect_err("weights above one are invalid");
        assert!(error.to_string().contains("sum to 1"));

        let config = RankingConfig {
            max_matches: 0,
            ..RankingConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
