//! Relevance-scored region lists emitted by generative models.
//!
//! Model output is loosely structured: sometimes a JSON array, more often an
//! array of objects buried in prose, occasionally cut off mid-array. The
//! parser pulls out the first array of objects it can recover and drops
//! entries that do not carry a usable box and relevance.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{GroundingError, Result};
use crate::geometry::BBox;
use crate::model::GroundingLevel;

pub const DEFAULT_RELEVANCE_THRESHOLD: f64 = 0.8;

static ARRAY_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\s*\{").expect("array-start pattern is valid")
});

static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-?\d+(?:\.\d+)?").expect("number pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelevanceRecord {
    pub bbox: BBox,
    pub relevance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRelevance {
    ParsedScoreSet(Vec<RelevanceRecord>),
    RawText(String),
}

impl ParsedRelevance {
    /// Interprets a prediction field that is either an array already or free text.
    pub fn from_value(value: &Value, level: GroundingLevel) -> Self {
        match value {
            Value::Array(entries) => Self::ParsedScoreSet(records_from_entries(entries, level)),
            Value::String(text) => Self::from_text(text, level),
            other => {
                let raw = other.to_string();
                warn!(raw = %raw, "relevance output is neither text nor an array");
                Self::RawText(raw)
            }
        }
    }

    pub fn from_text(text: &str, level: GroundingLevel) -> Self {
        match extract_record_array(text) {
            Ok(entries) => Self::ParsedScoreSet(records_from_entries(&entries, level)),
            Err(err) => {
                warn!(error = %err, raw = %text, "relevance output left as raw text");
                Self::RawText(text.to_string())
            }
        }
    }

    pub fn records(&self) -> &[RelevanceRecord] {
        match self {
            Self::ParsedScoreSet(records) => records,
            Self::RawText(_) => &[],
        }
    }

    /// Boxes whose relevance is at least `threshold`; raw text yields none.
    pub fn boxes_at_or_above(&self, threshold: f64) -> Vec<BBox> {
        self.records()
            .iter()
            .filter(|record| record.relevance >= threshold)
            .map(|record| record.bbox)
            .collect()
    }
}

/// First array of objects found in `text`. A truncated array yields the
/// objects that were closed before the cut.
pub fn extract_record_array(text: &str) -> Result<Vec<Value>> {
    for start in ARRAY_START.find_iter(text).map(|found| found.start()) {
        let scan = scan_array(&text[start..]);

        if let Some(end) = scan.closed_at
            && let Ok(Value::Array(entries)) = serde_json::from_str::<Value>(&text[start..start + end])
            && entries.iter().any(Value::is_object)
        {
            return Ok(entries);
        }

        let salvaged = scan
            .object_spans
            .iter()
            .filter_map(|&(from, to)| {
                serde_json::from_str::<Value>(&text[start + from..start + to]).ok()
            })
            .filter(Value::is_object)
            .collect::<Vec<Value>>();
        if !salvaged.is_empty() {
            debug!(objects = salvaged.len(), "salvaged objects from unterminated array");
            return Ok(salvaged);
        }
    }

    Err(GroundingError::MalformedScoreStructure {
        raw: text.to_string(),
    })
}

struct ArrayScan {
    closed_at: Option<usize>,
    object_spans: Vec<(usize, usize)>,
}

// `text` starts at '['. Tracks bracket depth outside string literals and
// records the byte spans of the array's direct object children.
fn scan_array(text: &str) -> ArrayScan {
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut object_start = None;
    let mut object_spans = Vec::new();

    for (offset, character) in text.char_indices() {
        if in_string {
            match character {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match character {
            '"' => in_string = true,
            '[' | '{' => {
                if character == '{' && depth == 1 {
                    object_start = Some(offset);
                }
                depth += 1;
            }
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                if character == '}'
                    && depth == 1
                    && let Some(from) = object_start.take()
                {
                    object_spans.push((from, offset + 1));
                }
                if depth == 0 {
                    return ArrayScan {
                        closed_at: Some(offset + 1),
                        object_spans,
                    };
                }
            }
            _ => {}
        }
    }

    ArrayScan {
        closed_at: None,
        object_spans,
    }
}

fn records_from_entries(entries: &[Value], level: GroundingLevel) -> Vec<RelevanceRecord> {
    let bbox_key = level.bbox_key();
    entries
        .iter()
        .filter_map(|entry| match parse_record(entry, &bbox_key) {
            Some(record) => Some(record),
            None => {
                debug!(entry = %entry, "skipping malformed relevance entry");
                None
            }
        })
        .collect()
}

fn parse_record(entry: &Value, bbox_key: &str) -> Option<RelevanceRecord> {
    let object = entry.as_object()?;
    let bbox = object
        .get(bbox_key)
        .or_else(|| object.get("bbox"))
        .and_then(parse_bbox)?;
    let relevance = match object.get("relevance")? {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !relevance.is_finite() {
        return None;
    }
    Some(RelevanceRecord { bbox, relevance })
}

fn parse_bbox(value: &Value) -> Option<BBox> {
    let coords = match value {
        Value::String(text) => NUMBER
            .find_iter(text)
            .map(|found| found.as_str().parse::<f64>().ok())
            .collect::<Option<Vec<f64>>>()?,
        Value::Array(items) => items.iter().map(Value::as_f64).collect::<Option<Vec<f64>>>()?,
        _ => return None,
    };

    match coords.as_slice() {
        [x1, y1, x2, y2] => BBox::checked(*x1, *y1, *x2, *y2).ok(),
        _ => None,
    }
}
