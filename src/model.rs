use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::{DeserializeOwned, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{GroundingError, Result};
use crate::geometry::{
    BBox, GroundTruthBox, GroundTruthEntry, GroundTruthPoint, ImageSize, Point,
};

/// OCR-detected text area (block, line or word).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub bbox: BBox,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<Word>>,
}

impl Region {
    pub fn new(bbox: BBox, text: impl Into<String>) -> Self {
        Self {
            bbox,
            text: text.into(),
            words: None,
        }
    }

    pub fn with_words(mut self, words: Vec<Word>) -> Self {
        self.words = Some(words);
        self
    }

    pub fn words(&self) -> &[Word] {
        self.words.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub bbox: BBox,
    pub text: String,
}

impl Word {
    pub fn new(bbox: BBox, text: impl Into<String>) -> Self {
        Self {
            bbox,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub question: String,
    pub answer: String,
}

impl Query {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Granularity of a grounding: which ground-truth list and prediction fields apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroundingLevel {
    Block,
    Line,
    Word,
}

impl GroundingLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Line => "line",
            Self::Word => "word",
        }
    }

    pub fn matches_key(self) -> String {
        format!("{}_level_matches", self.as_str())
    }

    pub fn candidates_key(self) -> String {
        format!("{}_level_candidates", self.as_str())
    }

    pub fn predictions_key(self) -> String {
        format!("{}_level_predictions", self.as_str())
    }

    pub fn bbox_key(self) -> String {
        format!("{}_bbox", self.as_str())
    }
}

pub const POINT_MATCHES_KEY: &str = "point_level_matches";

/// One annotated question/answer pair. Pipeline outputs (`*_level_matches`,
/// generated answers, model relevance text) live in `extra` and are parsed
/// on demand, since producers do not agree on their shape. Ground-truth
/// lists are read entry by entry; see [`GroundTruthEntry`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QaAnnotation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(rename = "blockBoxes", default, deserialize_with = "lenient_entries")]
    pub block_boxes: Vec<GroundTruthEntry<GroundTruthBox>>,
    #[serde(rename = "lineBoxes", default, deserialize_with = "lenient_entries")]
    pub line_boxes: Vec<GroundTruthEntry<GroundTruthBox>>,
    #[serde(rename = "wordBoxes", default, deserialize_with = "lenient_entries")]
    pub word_boxes: Vec<GroundTruthEntry<GroundTruthBox>>,
    #[serde(default, deserialize_with = "lenient_entries")]
    pub points: Vec<GroundTruthEntry<GroundTruthPoint>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QaAnnotation {
    pub fn has_any_boxes(&self) -> bool {
        !(self.block_boxes.is_empty() && self.line_boxes.is_empty() && self.word_boxes.is_empty())
    }

    pub fn ground_truth_boxes(
        &self,
        level: GroundingLevel,
    ) -> &[GroundTruthEntry<GroundTruthBox>] {
        match level {
            GroundingLevel::Block => &self.block_boxes,
            GroundingLevel::Line => &self.line_boxes,
            GroundingLevel::Word => &self.word_boxes,
        }
    }

    pub fn level_matches(&self, level: GroundingLevel) -> Option<&Value> {
        self.extra.get(&level.matches_key())
    }

    pub fn set_level_matches(&mut self, level: GroundingLevel, boxes: &[BBox]) {
        self.set_field(level.matches_key(), boxes);
    }

    pub fn point_matches(&self) -> Option<&Value> {
        self.extra.get(POINT_MATCHES_KEY)
    }

    pub fn set_point_matches(&mut self, points: &[Point]) {
        self.set_field(POINT_MATCHES_KEY.to_string(), points);
    }

    pub fn set_field<T: Serialize + ?Sized>(&mut self, key: String, value: &T) {
        // Boxes, points and candidate records always serialize.
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.extra.insert(key, value);
    }

    /// Answer text stored under `field`; `answer` maps to the typed field.
    pub fn answer_from(&self, field: &str) -> Option<&str> {
        if field == "answer" {
            return self.answer.as_deref();
        }
        self.extra.get(field).and_then(Value::as_str)
    }

    pub fn sample_id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

fn lenient_entries<'de, D, T>(
    deserializer: D,
) -> std::result::Result<Vec<GroundTruthEntry<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(entries) => entries.into_iter().map(GroundTruthEntry::from_value).collect(),
        Value::Null => Vec::new(),
        other => vec![GroundTruthEntry::Malformed(other)],
    })
}

/// Parses a JSON array of `[x1, y1, x2, y2]` boxes one entry at a time so a
/// bad box does not take the rest of the list with it.
pub fn parse_boxes(value: &Value) -> Vec<Result<BBox>> {
    parse_entries(value, |entry| {
        serde_json::from_value::<BBox>(entry.clone())
            .map_err(|err| GroundingError::invalid_geometry(format!("malformed box {entry}: {err}")))
            .and_then(BBox::validate)
    })
}

/// Parses a JSON array of `[x, y]` points one entry at a time.
pub fn parse_points(value: &Value) -> Vec<Result<Point>> {
    parse_entries(value, |entry| {
        serde_json::from_value::<Point>(entry.clone())
            .map_err(|err| GroundingError::invalid_geometry(format!("malformed point {entry}: {err}")))
            .and_then(Point::validate)
    })
}

fn parse_entries<T>(value: &Value, parse: impl Fn(&Value) -> Result<T>) -> Vec<Result<T>> {
    match value {
        Value::Array(entries) => entries.iter().map(parse).collect(),
        Value::Null => Vec::new(),
        other => vec![Err(GroundingError::invalid_geometry(format!(
            "expected an array, found {other}"
        )))],
    }
}

/// A sample that could not be processed; the batch carries on without it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFailure {
    pub sample_id: String,
    pub reason: String,
}

impl SampleFailure {
    pub fn new(sample_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            sample_id: sample_id.into(),
            reason: reason.into(),
        }
    }
}

/// String-keyed map that keeps the key order of the source document.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<T> {
    entries: Vec<(String, T)>,
    index: HashMap<String, usize>,
}

impl<T> Default for OrderedMap<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> OrderedMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the value of an existing key in place, keeping its position.
    pub fn insert(&mut self, key: impl Into<String>, value: T) {
        let key = key.into();
        match self.index.get(&key) {
            Some(&position) => self.entries[position].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.index.get(key).map(|&position| &self.entries[position].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut T)> {
        self.entries
            .iter_mut()
            .map(|(key, value)| (key.as_str(), value))
    }

    pub fn into_entries(self) -> Vec<(String, T)> {
        self.entries
    }
}

impl<T> FromIterator<(String, T)> for OrderedMap<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl<T: Serialize> Serialize for OrderedMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct OrderedMapVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<T> {
            type Value = OrderedMap<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map keyed by image name")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut map = OrderedMap::new();
                while let Some((key, value)) = access.next_entry::<String, T>()? {
                    map.insert(key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

/// `image_name -> [QaAnnotation]`
pub type AnnotationSet = OrderedMap<Vec<QaAnnotation>>;

/// `image_name -> [Region]`
pub type OcrStore = OrderedMap<Vec<Region>>;

/// `image_name -> {width, height}`
pub type ImageSizes = OrderedMap<ImageSize>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotation_set_preserves_image_order_and_unknown_fields() {
        let raw = r#"
        {
          "zeta.png": [
            {
              "question": "what is the total",
              "answer": "45 dollars",
              "blockBoxes": [{"x": 1, "y": 2, "width": 3, "height": 4}],
              "lineBoxes": [],
              "wordBoxes": [],
              "points": [{"x": 5, "y": 6}],
              "reviewer": "annotator-7"
            }
          ],
          "alpha.png": []
        }
        "#;

        let set: AnnotationSet = serde_json::from_str(raw).expect("annotation set should parse");
        let names = set.iter().map(|(name, _)| name).collect::<Vec<&str>>();
        assert_eq!(names, vec!["zeta.png", "alpha.png"]);

        let qa = &set.get("zeta.png").expect("zeta entry")[0];
        assert_eq!(qa.block_boxes.len(), 1);
        assert_eq!(
            qa.extra.get("reviewer").and_then(Value::as_str),
            Some("annotator-7")
        );

        let written = serde_json::to_value(&set).expect("annotation set should serialize");
        assert_eq!(written["zeta.png"][0]["reviewer"], "annotator-7");
        assert!(written["zeta.png"][0].get("line_level_matches").is_none());
    }

    #[test]
    fn answer_from_reads_generated_answer_fields() {
        let mut qa = QaAnnotation {
            answer: Some("gold".to_string()),
            ..QaAnnotation::default()
        };
        qa.extra.insert(
            "predicted_answer".to_string(),
            Value::String("generated".to_string()),
        );

        assert_eq!(qa.answer_from("answer"), Some("gold"));
        assert_eq!(qa.answer_from("predicted_answer"), Some("generated"));
        assert_eq!(qa.answer_from("missing"), None);
    }

    #[test]
    fn absent_answer_is_not_an_empty_answer() {
        let qa: QaAnnotation = serde_json::from_str(r#"{"question": "what is the total"}"#)
            .expect("annotation without an answer should parse");
        assert_eq!(qa.answer, None);
        assert_eq!(qa.answer_from("answer"), None);

        let written = serde_json::to_value(&qa).expect("annotation should serialize");
        assert!(written.get("answer").is_none());
    }

    #[test]
    fn malformed_ground_truth_does_not_sink_the_file() {
        let raw = r#"
        {
          "a.png": [{"question": "q", "answer": "a",
                     "blockBoxes": [{"x": 0, "y": 0, "width": 10, "height": 10}]}],
          "b.png": [{"question": "q", "answer": "a",
                     "blockBoxes": [{"x": 0, "y": 0, "width": null, "height": 10},
                                    {"x": 5, "y": 5, "width": 1, "height": 1}],
                     "points": "somewhere"}]
        }
        "#;

        let set: AnnotationSet = serde_json::from_str(raw).expect("set should parse");
        assert_eq!(set.len(), 2);

        let qa = &set.get("b.png").expect("b entry")[0];
        assert_eq!(qa.block_boxes.len(), 2);
        assert!(qa.block_boxes[0].to_bbox().is_err());
        assert_eq!(
            qa.block_boxes[1].to_bbox().expect("second box is valid"),
            BBox::new(5.0, 5.0, 6.0, 6.0)
        );
        assert_eq!(qa.points.len(), 1);
        assert!(qa.points[0].to_point().is_err());

        let written = serde_json::to_value(&set).expect("set should serialize");
        assert!(written["b.png"][0]["blockBoxes"][0]["width"].is_null());
    }

    #[test]
    fn ordered_map_insert_replaces_in_place() {
        let mut map = OrderedMap::new();
        map.insert("b", 1);
        map.insert("a", 2);
        map.insert("b", 3);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("b"), Some(&3));
        let keys = map.iter().map(|(key, _)| key).collect::<Vec<&str>>();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn bad_boxes_are_rejected_individually() {
        let mut qa = QaAnnotation::default();
        qa.set_level_matches(GroundingLevel::Line, &[BBox::new(0.0, 0.0, 5.0, 5.0)]);
        qa.extra
            .get_mut("line_level_matches")
            .and_then(Value::as_array_mut)
            .expect("matches were written as an array")
            .push(serde_json::json!([1, 2, 3]));

        let parsed = parse_boxes(qa.level_matches(GroundingLevel::Line).expect("matches present"));
        assert_eq!(parsed.len(), 2);
        assert_eq!(
            *parsed[0].as_ref().expect("first box is valid"),
            BBox::new(0.0, 0.0, 5.0, 5.0)
        );
        assert!(matches!(
            parsed[1],
            Err(GroundingError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn free_text_matches_are_not_an_array() {
        let parsed = parse_boxes(&Value::String("the total line".to_string()));
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].is_err());
        assert!(parse_points(&Value::Null).is_empty());
    }

    #[test]
    fn line_region_words_deserialize() {
        let raw = r#"{"bbox": [0, 0, 100, 20], "text": "total due",
            "words": [{"bbox": [0, 0, 40, 20], "text": "total"}, {"bbox": [45, 0, 100, 20], "text": "due"}]}"#;
        let region: Region = serde_json::from_str(raw).expect("region should parse");
        assert_eq!(region.words().len(), 2);
        assert_eq!(region.words()[1].text, "due");
    }
}
