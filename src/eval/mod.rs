//! Scoring of grounding output against annotated ground truth.

pub mod detection;
pub mod metrics;
pub mod points;

pub use detection::{DetectionReport, SampleDetection, evaluate_detections};
pub use metrics::{Counts, Scores};
pub use points::{
    PointEvaluation, PointSample, PointThresholdReport, SamplePointMetrics, evaluate_points,
};
