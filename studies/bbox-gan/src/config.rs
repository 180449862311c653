use std::fs;
use std::path::{ Path, PathBuf };

use anyhow::{ Context, Result };
use serde::{ Deserialize, Serialize };
use thiserror::Error;

use crate::utils::l1loss::BlendedLoss;

/// Hand-picked samples rendered by the evaluation harness.
pub const DEFAULT_EVAL_INDICES: [usize; 8] = [0, 1234, 2345, 3456, 10000, 15000, 19999, 20000];

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    #[error("{name} must be finite and non-negative, got {value}")]
    InvalidNumber {
        name: &'static str,
        value: f64,
    },
    #[error("{name} must be in (0, 1], got {value}")]
    OutOfUnitRange {
        name: &'static str,
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub model_name: String,
    /// Receives `losses.txt`, `history.json` and `weights/`.
    pub output_dir: PathBuf,
    /// Steps already done by the checkpoints being resumed.
    pub starting_step: usize,
    pub nb_steps: usize,
    pub batch_size: usize,
    /// Discriminator updates per step.
    pub k_d: usize,
    /// Composite (generator) updates per step.
    pub k_g: usize,
    pub log_interval: usize,
    pub lr_discriminator: f64,
    pub lr_generator: f64,
    /// Decay both rates every this many log intervals.
    pub lr_decay_every: Option<usize>,
    pub lr_decay_factor: f64,
    /// Weight of the "fool the discriminator" term of the composite loss.
    pub adversarial_weight: f32,
    /// Weight of the smooth L1 box term of the composite loss.
    pub regression_weight: f32,
    pub probe_batch_size: usize,
    pub base_n_count: usize,
    pub seed: u64,
    pub generator_checkpoint: Option<PathBuf>,
    pub discriminator_checkpoint: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            model_name: "bbox_gan".to_string(),
            output_dir: PathBuf::from("runs/bbox_gan"),
            starting_step: 0,
            nb_steps: 7200,
            batch_size: 32,
            k_d: 1,
            k_g: 1,
            log_interval: 100,
            lr_discriminator: 5e-4,
            lr_generator: 5e-4,
            lr_decay_every: None,
            lr_decay_factor: 0.5,
            adversarial_weight: 0.5,
            regression_weight: 0.5,
            probe_batch_size: 590,
            base_n_count: 128,
            seed: 0,
            generator_checkpoint: None,
            discriminator_checkpoint: None,
        }
    }
}

impl TrainConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("batch_size", self.batch_size),
            ("k_d", self.k_d),
            ("k_g", self.k_g),
            ("log_interval", self.log_interval),
            ("probe_batch_size", self.probe_batch_size),
            ("base_n_count", self.base_n_count),
        ];
        if let Some((name, _)) = counts.into_iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(name));
        }

        let numbers = [
            ("lr_discriminator", self.lr_discriminator),
            ("lr_generator", self.lr_generator),
            ("lr_decay_factor", self.lr_decay_factor),
            ("adversarial_weight", self.adversarial_weight as f64),
            ("regression_weight", self.regression_weight as f64),
        ];
        for (name, value) in numbers {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidNumber { name, value });
            }
        }

        if !(self.lr_decay_factor > 0.0 && self.lr_decay_factor <= 1.0) {
            return Err(ConfigError::OutOfUnitRange { name: "lr_decay_factor", value: self.lr_decay_factor });
        }
        Ok(())
    }

    pub fn loss(&self) -> BlendedLoss {
        BlendedLoss::new(self.adversarial_weight, self.regression_weight)
    }

    pub fn total_steps(&self) -> usize {
        self.starting_step + self.nb_steps
    }

    pub fn weights_dir(&self) -> PathBuf {
        self.output_dir.join("weights")
    }

    pub fn log_path(&self) -> PathBuf {
        self.output_dir.join("losses.txt")
    }

    pub fn history_path(&self) -> PathBuf {
        self.output_dir.join("history.json")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Rendered frames land in `<output_dir>/bounding_box_images`.
    pub output_dir: PathBuf,
    pub sample_indices: Vec<usize>,
    pub probe_batch_size: usize,
    pub base_n_count: usize,
    pub seed: u64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("runs/bbox_gan"),
            sample_indices: DEFAULT_EVAL_INDICES.to_vec(),
            probe_batch_size: 590,
            base_n_count: 128,
            seed: 0,
        }
    }
}

impl EvalConfig {
    pub fn images_dir(&self) -> PathBuf {
        self.output_dir.join("bounding_box_images")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(TrainConfig::default().validate(), Ok(()));
        assert_eq!(TrainConfig::default().loss(), BlendedLoss::new(0.5, 0.5));
    }

    #[test]
    fn zero_counts_are_rejected() {
        let config = TrainConfig { k_g: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::Zero("k_g")));
        let config = TrainConfig { log_interval: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::Zero("log_interval")));
    }

    #[test]
    fn negative_learning_rate_is_rejected() {
        let config = TrainConfig { lr_generator: -1e-3, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidNumber { name: "lr_generator", .. })));
    }

    #[test]
    fn decay_factor_outside_unit_interval_is_rejected() {
        for factor in [0.0, 2.0, f64::NAN] {
            let config = TrainConfig { lr_decay_every: Some(2), lr_decay_factor: factor, ..Default::default() };
            assert!(config.validate().is_err(), "factor {factor} accepted");
        }
        let config = TrainConfig { lr_decay_factor: 1.5, ..Default::default() };
        assert_eq!(
            config.validate(),
            Err(ConfigError::OutOfUnitRange { name: "lr_decay_factor", value: 1.5 })
        );
        let config = TrainConfig { lr_decay_factor: 1.0, ..Default::default() };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, r#"{ "nb_steps": 10, "batch_size": 4, "lr_decay_every": 5 }"#).unwrap();
        let config = TrainConfig::load(&path).unwrap();
        assert_eq!(config.nb_steps, 10);
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.lr_decay_every, Some(5));
        assert_eq!(config.k_d, 1);
        assert_eq!(config.probe_batch_size, 590);
        assert_eq!(config.weights_dir(), PathBuf::from("runs/bbox_gan/weights"));
    }
}
