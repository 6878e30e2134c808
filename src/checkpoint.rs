use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::Result;

/// Base path for checkpoints: the given one (parent directory created) or a fresh temp name.
pub fn create_save_path(save_path: Option<&Path>) -> Result<PathBuf> {
    match save_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            Ok(path.to_path_buf())
        }
        None => Ok(std::env::temp_dir().join(format!("tcts_{}", Uuid::new_v4().simple()))),
    }
}

/// The two artifacts written for one base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    pub fore_model: PathBuf,
    pub weight_model: PathBuf,
}

impl CheckpointPaths {
    pub fn new(base: &Path) -> Self {
        Self {
            fore_model: with_suffix(base, "_fore_model.bin"),
            weight_model: with_suffix(base, "_weight_model.bin"),
        }
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut raw = base.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}
