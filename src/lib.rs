// Library exports for tcts_forecast

pub mod batcher;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod model_torch;
pub mod online;
pub mod training_torch;

pub use config::TctsConfig;
pub use dataset::{CsvDataset, DatasetH, MemoryDataset, Segment, SegmentData, SyntheticDataset};
pub use error::{Result, TctsError};
pub use training_torch::{FitReport, Predictions, Tcts};
