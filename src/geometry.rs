use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GroundingError, Result};

/// Axis-aligned box in pixel coordinates, serialized as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Builds a box and rejects non-finite coordinates.
    pub fn checked(x1: f64, y1: f64, x2: f64, y2: f64) -> Result<Self> {
        Self::new(x1, y1, x2, y2).validate()
    }

    pub fn validate(self) -> Result<Self> {
        let coords = [self.x1, self.y1, self.x2, self.y2];
        if coords.iter().all(|value| value.is_finite()) {
            Ok(self)
        } else {
            Err(GroundingError::invalid_geometry(format!(
                "non-finite box coordinates {coords:?}"
            )))
        }
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Intersection over union; 0 for disjoint boxes and for a zero union.
    pub fn iou(&self, other: &BBox) -> f64 {
        let x_left = self.x1.max(other.x1);
        let y_top = self.y1.max(other.y1);
        let x_right = self.x2.min(other.x2);
        let y_bottom = self.y2.min(other.y2);

        if x_right < x_left || y_bottom < y_top {
            return 0.0;
        }

        let intersection = (x_right - x_left) * (y_bottom - y_top);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Smallest box enclosing every input box.
    pub fn envelope<'a>(boxes: impl IntoIterator<Item = &'a BBox>) -> Option<BBox> {
        boxes.into_iter().fold(None, |acc, bbox| {
            Some(match acc {
                None => *bbox,
                Some(current) => BBox::new(
                    current.x1.min(bbox.x1),
                    current.y1.min(bbox.y1),
                    current.x2.max(bbox.x2),
                    current.y2.max(bbox.y2),
                ),
            })
        })
    }

    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

impl From<[f64; 4]> for BBox {
    fn from(value: [f64; 4]) -> Self {
        Self::new(value[0], value[1], value[2], value[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(value: BBox) -> Self {
        [value.x1, value.y1, value.x2, value.y2]
    }
}

/// Point in pixel coordinates, serialized as `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn validate(self) -> Result<Self> {
        if self.x.is_finite() && self.y.is_finite() {
            Ok(self)
        } else {
            Err(GroundingError::invalid_geometry(format!(
                "non-finite point ({}, {})",
                self.x, self.y
            )))
        }
    }
}

impl From<[f64; 2]> for Point {
    fn from(value: [f64; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

impl From<Point> for [f64; 2] {
    fn from(value: Point) -> Self {
        [value.x, value.y]
    }
}

/// Annotation-tool box convention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl GroundTruthBox {
    pub fn to_bbox(&self) -> Result<BBox> {
        BBox::checked(self.x, self.y, self.x + self.width, self.y + self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthPoint {
    pub x: f64,
    pub y: f64,
}

impl GroundTruthPoint {
    pub fn to_point(&self) -> Result<Point> {
        Point::new(self.x, self.y).validate()
    }
}

/// One entry of a ground-truth list. Entries that do not parse are kept
/// verbatim so a rewrite of the file does not lose them, and are rejected
/// only when converted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GroundTruthEntry<T> {
    Parsed(T),
    Malformed(Value),
}

impl<T: DeserializeOwned> GroundTruthEntry<T> {
    pub fn from_value(value: Value) -> Self {
        match T::deserialize(&value) {
            Ok(parsed) => Self::Parsed(parsed),
            Err(_) => Self::Malformed(value),
        }
    }
}

impl<T> From<T> for GroundTruthEntry<T> {
    fn from(parsed: T) -> Self {
        Self::Parsed(parsed)
    }
}

impl GroundTruthEntry<GroundTruthBox> {
    pub fn to_bbox(&self) -> Result<BBox> {
        match self {
            Self::Parsed(gt) => gt.to_bbox(),
            Self::Malformed(raw) => Err(GroundingError::invalid_geometry(format!(
                "malformed ground-truth box {raw}"
            ))),
        }
    }
}

impl GroundTruthEntry<GroundTruthPoint> {
    pub fn to_point(&self) -> Result<Point> {
        match self {
            Self::Parsed(gt) => gt.to_point(),
            Self::Malformed(raw) => Err(GroundingError::invalid_geometry(format!(
                "malformed ground-truth point {raw}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: f64,
    pub height: f64,
}

impl ImageSize {
    pub fn diagonal(&self) -> f64 {
        self.width.hypot(self.height)
    }
}
