use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FinetuneError, Result};
use crate::scheduler::SchedulerInterval;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FinetuneConfig {
    /// Launch-strategy tag; selects the optimizer variant. Unrecognized
    /// tags fall back to AdamW.
    pub strategy: String,
    pub lr: f64,
    pub weight_decay: f64,
    /// Fraction of total steps spent in linear warmup.
    pub warmup_ratio: f64,
    /// Learning-rate floor as a fraction of `lr`.
    pub eta_min_ratio: f64,
    /// When the schedule advances: per optimizer step or per epoch.
    pub interval: SchedulerInterval,
    pub batch_size: usize,
    pub epochs: usize,
    pub grad_clip: Option<f64>,
    pub log_every: usize,
    pub save_every: usize,
    pub checkpoint_dir: String,
    pub tokenizer_path: String,
    pub train_path: String,
    pub val_path: Option<String>,
    pub test_path: Option<String>,
    pub max_source_len: usize,
    pub max_target_len: usize,
}

impl Default for FinetuneConfig {
    fn default() -> Self {
        Self {
            strategy: "ddp".to_string(),
            lr: 5e-5,
            weight_decay: 0.01,
            warmup_ratio: 0.1,
            eta_min_ratio: 0.01,
            interval: SchedulerInterval::Step,
            batch_size: 4,
            epochs: 1,
            grad_clip: Some(1.0),
            log_every: 10,
            save_every: 1,
            checkpoint_dir: "./checkpoints".to_string(),
            tokenizer_path: "data/tokenizer.json".to_string(),
            train_path: "data/train.jsonl".to_string(),
            val_path: None,
            test_path: None,
            max_source_len: 512,
            max_target_len: 128,
        }
    }
}

impl FinetuneConfig {
    /// Reads the YAML at `path` when it exists, otherwise the defaults
    /// (so a fresh checkout runs without any config file).
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let content = fs::read_to_string(path)?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.lr <= 0.0 {
            return Err(FinetuneError::Configuration(format!(
                "lr must be > 0, got {}",
                self.lr
            )));
        }
        if !(0.0..=1.0).contains(&self.warmup_ratio) {
            return Err(FinetuneError::Configuration(format!(
                "warmup_ratio must be in [0, 1], got {}",
                self.warmup_ratio
            )));
        }
        if !(0.0..=1.0).contains(&self.eta_min_ratio) {
            return Err(FinetuneError::Configuration(format!(
                "eta_min_ratio must be in [0, 1], got {}",
                self.eta_min_ratio
            )));
        }
        if self.batch_size == 0 {
            return Err(FinetuneError::Configuration(
                "batch_size must be >= 1".to_string(),
            ));
        }
        if self.epochs == 0 {
            return Err(FinetuneError::Configuration(
                "epochs must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}
