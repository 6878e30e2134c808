use std::fmt;
use std::path::{Path, PathBuf};

use tch::{Device, Kind, Tensor};

use crate::error::{Result, TctsError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    Train,
    Valid,
    Test,
}

impl Segment {
    pub fn name(&self) -> &'static str {
        match self {
            Segment::Train => "train",
            Segment::Valid => "valid",
            Segment::Test => "test",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One split of a windowed dataset, row-major.
///
/// `features` holds `index.len() * feature_dim` values, `labels` holds
/// `index.len() * label_dim` values. A feature-only split has `label_dim == 0`.
#[derive(Debug, Clone, Default)]
pub struct SegmentData {
    pub index: Vec<String>,
    pub features: Vec<f32>,
    pub feature_dim: usize,
    pub labels: Vec<f32>,
    pub label_dim: usize,
}

impl SegmentData {
    pub fn new(
        index: Vec<String>,
        features: Vec<f32>,
        feature_dim: usize,
        labels: Vec<f32>,
        label_dim: usize,
    ) -> Result<Self> {
        let rows = index.len();
        if features.len() != rows * feature_dim {
            return Err(TctsError::Dataset(format!(
                "{} feature values for {} rows of width {}",
                features.len(),
                rows,
                feature_dim
            )));
        }
        if labels.len() != rows * label_dim {
            return Err(TctsError::Dataset(format!(
                "{} label values for {} rows of width {}",
                labels.len(),
                rows,
                label_dim
            )));
        }
        Ok(Self {
            index,
            features,
            feature_dim,
            labels,
            label_dim,
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Features as a CPU tensor `[rows, feature_dim]`.
    pub fn feature_tensor(&self) -> Tensor {
        Tensor::from_slice(&self.features).reshape(&[self.len() as i64, self.feature_dim as i64])
    }

    /// Labels as a CPU tensor `[rows, label_dim]`.
    pub fn label_tensor(&self) -> Result<Tensor> {
        if self.label_dim == 0 {
            return Err(TctsError::Dataset("segment has no label columns".to_string()));
        }
        Ok(Tensor::from_slice(&self.labels).reshape(&[self.len() as i64, self.label_dim as i64]))
    }
}

/// Features and labels of a whole split kept as tensors, sliced per batch.
pub struct SegmentTensors {
    pub features: Tensor,
    pub labels: Tensor,
}

impl SegmentTensors {
    pub fn from_segment(data: &SegmentData) -> Result<Self> {
        Ok(Self {
            features: data.feature_tensor(),
            labels: data.label_tensor()?,
        })
    }

    pub fn rows(&self) -> usize {
        self.features.size()[0] as usize
    }

    /// Gather `rows` and move them to `device` as float tensors.
    pub fn batch(&self, rows: &[i64], device: Device) -> (Tensor, Tensor) {
        let idx = Tensor::from_slice(rows);
        let feature = self
            .features
            .index_select(0, &idx)
            .to_kind(Kind::Float)
            .to_device(device);
        let label = self
            .labels
            .index_select(0, &idx)
            .to_kind(Kind::Float)
            .to_device(device);
        (feature, label)
    }
}

/// Source of train/valid/test splits.
pub trait DatasetH {
    fn prepare(&self, segment: Segment) -> Result<SegmentData>;
}

/// Splits held in memory.
#[derive(Debug, Clone)]
pub struct MemoryDataset {
    pub train: SegmentData,
    pub valid: SegmentData,
    pub test: SegmentData,
}

impl DatasetH for MemoryDataset {
    fn prepare(&self, segment: Segment) -> Result<SegmentData> {
        Ok(match segment {
            Segment::Train => self.train.clone(),
            Segment::Valid => self.valid.clone(),
            Segment::Test => self.test.clone(),
        })
    }
}

/// Splits stored as `<dir>/train.csv`, `<dir>/valid.csv`, `<dir>/test.csv`.
///
/// The first column is the row key. Columns whose header starts with
/// `label` are labels, every other column is a feature.
#[derive(Debug, Clone)]
pub struct CsvDataset {
    dir: PathBuf,
}

impl CsvDataset {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn segment_path(&self, segment: Segment) -> PathBuf {
        self.dir.join(format!("{}.csv", segment.name()))
    }

    pub fn read_segment(path: &Path) -> Result<SegmentData> {
        let mut rdr = csv::Reader::from_path(path)?;
        let headers = rdr.headers()?.clone();
        if headers.is_empty() {
            return Err(TctsError::Dataset(format!("{} has no header", path.display())));
        }

        let is_label: Vec<bool> = headers
            .iter()
            .skip(1)
            .map(|h| h.trim().to_lowercase().starts_with("label"))
            .collect();
        let label_dim = is_label.iter().filter(|l| **l).count();
        let feature_dim = is_label.len() - label_dim;

        let mut index = Vec::new();
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            let mut fields = record.iter();
            let key = fields.next().unwrap_or_default().to_string();
            for (col, (value, label)) in fields.zip(&is_label).enumerate() {
                let v = parse_value(value).ok_or_else(|| {
                    TctsError::Dataset(format!(
                        "{}: row {} column {}: cannot parse {:?}",
                        path.display(),
                        line + 1,
                        col + 1,
                        value
                    ))
                })?;
                if *label {
                    labels.push(v);
                } else {
                    features.push(v);
                }
            }
            index.push(key);
        }

        SegmentData::new(index, features, feature_dim, labels, label_dim)
    }
}

fn parse_value(raw: &str) -> Option<f32> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Some(f32::NAN);
    }
    raw.parse::<f32>().ok()
}

impl DatasetH for CsvDataset {
    fn prepare(&self, segment: Segment) -> Result<SegmentData> {
        Self::read_segment(&self.segment_path(segment))
    }
}

/// Deterministic sine-wave windows for smoke runs.
///
/// Each row holds `d_feat` phase-shifted waves over `step_len` steps and the
/// first wave's next `output_dim` values as labels.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    pub d_feat: usize,
    pub step_len: usize,
    pub output_dim: usize,
    pub train_rows: usize,
    pub valid_rows: usize,
    pub test_rows: usize,
}

impl SyntheticDataset {
    pub fn new(d_feat: usize, step_len: usize, output_dim: usize) -> Self {
        Self {
            d_feat,
            step_len,
            output_dim,
            train_rows: 64,
            valid_rows: 32,
            test_rows: 32,
        }
    }

    pub fn with_rows(mut self, train: usize, valid: usize, test: usize) -> Self {
        self.train_rows = train;
        self.valid_rows = valid;
        self.test_rows = test;
        self
    }

    fn wave(feature: usize, t: f32) -> f32 {
        let phase = feature as f32 * 0.7;
        (t * 0.1 + phase).sin() + (t * 0.013 + phase).cos() * 0.5
    }

    fn generate(&self, offset: usize, rows: usize, segment: Segment) -> SegmentData {
        let mut index = Vec::with_capacity(rows);
        let mut features = Vec::with_capacity(rows * self.d_feat * self.step_len);
        let mut labels = Vec::with_capacity(rows * self.output_dim);
        for row in 0..rows {
            let start = (offset + row) as f32;
            // Feature-major: all steps of feature 0, then feature 1, ...
            for f in 0..self.d_feat {
                for step in 0..self.step_len {
                    features.push(Self::wave(f, start + step as f32));
                }
            }
            for h in 0..self.output_dim {
                labels.push(Self::wave(0, start + (self.step_len + h) as f32));
            }
            index.push(format!("{}-{:06}", segment.name(), offset + row));
        }
        SegmentData {
            index,
            features,
            feature_dim: self.d_feat * self.step_len,
            labels,
            label_dim: self.output_dim,
        }
    }
}

impl DatasetH for SyntheticDataset {
    fn prepare(&self, segment: Segment) -> Result<SegmentData> {
        Ok(match segment {
            Segment::Train => self.generate(0, self.train_rows, segment),
            Segment::Valid => self.generate(self.train_rows, self.valid_rows, segment),
            Segment::Test => self.generate(self.train_rows + self.valid_rows, self.test_rows, segment),
        })
    }
}
