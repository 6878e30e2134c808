use std::path::PathBuf;

use thiserror::Error;

use crate::dataset::Segment;

/// Errors raised while configuring, training or serving a TCTS model.
#[derive(Error, Debug)]
pub enum TctsError {
    #[error("unsupported configuration: {0}")]
    UnsupportedConfig(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("model is not fitted yet")]
    NotFitted,

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("segment {segment} has {rows} rows, fewer than batch size {batch_size}")]
    InsufficientData {
        segment: Segment,
        rows: usize,
        batch_size: usize,
    },

    #[error("checkpoint {}: {source}", path.display())]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: tch::TchError,
    },

    #[error("torch error: {0}")]
    Torch(#[from] tch::TchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TctsError>;
