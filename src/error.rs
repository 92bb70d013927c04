use thiserror::Error;

pub type Result<T> = std::result::Result<T, GroundingError>;

#[derive(Debug, Error)]
pub enum GroundingError {
    #[error("aggregation requested over zero elements: {0}")]
    EmptyInput(&'static str),

    #[error("relevance output does not contain an array of records")]
    MalformedScoreStructure { raw: String },

    #[error("invalid geometry: {reason}")]
    InvalidGeometry { reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GroundingError {
    pub fn invalid_geometry(reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            reason: reason.into(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }
}
