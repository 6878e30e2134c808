use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tch::Device;

use crate::error::{Result, TctsError};

/// Elementwise bound applied to every gradient component before a step.
pub const GRAD_CLIP_VALUE: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    Adam,
    /// Plain stochastic gradient descent.
    Gd,
}

impl FromStr for OptimizerKind {
    type Err = TctsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "adam" => Ok(OptimizerKind::Adam),
            "gd" => Ok(OptimizerKind::Gd),
            other => Err(TctsError::UnsupportedConfig(format!(
                "optimizer {} is not supported",
                other
            ))),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerKind::Adam => write!(f, "adam"),
            OptimizerKind::Gd => write!(f, "gd"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    Mse,
}

impl FromStr for LossKind {
    type Err = TctsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mse" => Ok(LossKind::Mse),
            other => Err(TctsError::UnsupportedConfig(format!(
                "loss {} is not supported",
                other
            ))),
        }
    }
}

/// Hyper-parameters of the forecaster / weighting pair.
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TctsConfig {
    /// Input dimension of each time step.
    pub d_feat: i64,
    /// Number of time steps in one flattened feature row.
    pub step_len: i64,
    pub hidden_size: i64,
    pub num_layers: i64,
    pub dropout: f64,
    pub n_epochs: usize,
    pub batch_size: usize,
    /// Epochs without validation improvement before training stops.
    pub early_stop: usize,
    pub loss: String,
    pub fore_optimizer: String,
    pub weight_optimizer: String,
    /// Number of candidate horizons (label columns).
    pub output_dim: i64,
    pub fore_lr: f64,
    pub weight_lr: f64,
    /// Passes over the training split per forecast phase.
    pub steps: usize,
    /// CUDA ordinal; `None` pins the run to the CPU.
    pub gpu: Option<usize>,
    pub seed: Option<u64>,
    /// Label column used for validation/test MSE (absolute value is taken).
    pub target_label: i64,
}

impl Default for TctsConfig {
    fn default() -> Self {
        Self {
            d_feat: 6,
            step_len: 60,
            hidden_size: 64,
            num_layers: 2,
            dropout: 0.0,
            n_epochs: 200,
            batch_size: 2000,
            early_stop: 20,
            loss: "mse".to_string(),
            fore_optimizer: "adam".to_string(),
            weight_optimizer: "adam".to_string(),
            output_dim: 5,
            fore_lr: 5e-7,
            weight_lr: 5e-7,
            steps: 3,
            gpu: Some(0),
            seed: None,
            target_label: 0,
        }
    }
}

/// Config after string options are parsed and ranges checked.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedOptions {
    pub fore_optimizer: OptimizerKind,
    pub weight_optimizer: OptimizerKind,
    pub loss: LossKind,
}

impl TctsConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Width of a flattened feature row.
    pub fn feature_width(&self) -> i64 {
        self.d_feat * self.step_len
    }

    /// Width of the weighting network input: features, residuals, labels and the reference prediction.
    pub fn weight_input_width(&self) -> i64 {
        self.feature_width() + 2 * self.output_dim + 1
    }

    /// Label column compared against in evaluation.
    pub fn eval_label(&self) -> i64 {
        self.target_label.abs()
    }

    pub fn validate(&self) -> Result<ResolvedOptions> {
        let fore_optimizer = self.fore_optimizer.parse()?;
        let weight_optimizer = self.weight_optimizer.parse()?;
        let loss = self.loss.parse()?;

        if self.d_feat <= 0 || self.step_len <= 0 || self.hidden_size <= 0 || self.num_layers <= 0 {
            return Err(TctsError::InvalidConfig(format!(
                "d_feat, step_len, hidden_size and num_layers must be positive (got {}, {}, {}, {})",
                self.d_feat, self.step_len, self.hidden_size, self.num_layers
            )));
        }
        if self.output_dim <= 0 {
            return Err(TctsError::InvalidConfig(format!(
                "output_dim must be positive, got {}",
                self.output_dim
            )));
        }
        if self.eval_label() >= self.output_dim {
            return Err(TctsError::InvalidConfig(format!(
                "target_label {} out of range for output_dim {}",
                self.target_label, self.output_dim
            )));
        }
        if self.batch_size == 0 {
            return Err(TctsError::InvalidConfig("batch_size must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(TctsError::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }

        Ok(ResolvedOptions {
            fore_optimizer,
            weight_optimizer,
            loss,
        })
    }

    /// Accelerator if one was requested and is present, CPU otherwise.
    pub fn device(&self) -> Device {
        match self.gpu {
            Some(ordinal) if tch::Cuda::is_available() => Device::Cuda(ordinal),
            _ => Device::Cpu,
        }
    }
}
