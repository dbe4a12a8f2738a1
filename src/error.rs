use std::path::PathBuf;

// Errors raised while loading, training or scoring.
#[derive(thiserror::Error, Debug)]
pub enum DetectorError {
    #[error("data source not found: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to write image: {0}")]
    Image(#[from] image::ImageError),

    #[error("failed to write array file: {0}")]
    Npy(#[from] ndarray_npy::WriteNpyError),

    #[error("failed to write report: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Linfa(#[from] linfa::error::Error),

    #[error("column '{column}' holds non-numeric value '{value}'")]
    NonNumericColumn { column: String, value: String },

    #[error("dataset is empty: {0}")]
    EmptyDataset(String),

    #[error("expected {expected} feature columns, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, DetectorError>;
