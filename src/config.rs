//! Configuration surfaces for fitting and prediction.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{RieszError, RieszResult};

/// Which saved model(s) a prediction is reconstructed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSelection {
    /// Average the evaluations of every checkpoint past the burn-in.
    Average,
    /// Evaluate only the last completed epoch's checkpoint.
    Final,
    /// Evaluate the early-stop checkpoint (requires a validation set at fit time).
    EarlyStop,
    /// Evaluate the checkpoint saved at this exact epoch index.
    Epoch(usize),
}

/// Configuration for one `fit` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    /// Epochs to wait for a validation improvement before stopping
    pub earlystop_rounds: usize,
    /// L2 coefficient applied to the decay parameter group
    pub learner_l2: f64,
    /// Learning rate for the optimizer
    pub learner_lr: f64,
    /// Maximum number of passes over the data
    pub n_epochs: usize,
    /// Mini-batch size
    pub batch_size: usize,
    /// Keep the learner's current weights instead of resetting them
    pub warm_start: bool,
    /// Base directory under which the unique run directory is created
    pub model_dir: PathBuf,
    /// Progress-printing level (0 = quiet)
    pub verbose: u8,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            earlystop_rounds: 20,
            learner_l2: 1e-3,
            learner_lr: 1e-3,
            n_epochs: 100,
            batch_size: 100,
            warm_start: false,
            model_dir: PathBuf::from("."),
            verbose: 0,
        }
    }
}

impl FitConfig {
    /// Builder: Set the early-stopping patience in epochs.
    #[must_use]
    pub fn with_earlystop_rounds(mut self, rounds: usize) -> Self {
        self.earlystop_rounds = rounds;
        self
    }

    /// Builder: Set the L2 coefficient for the decay group.
    #[must_use]
    pub fn with_learner_l2(mut self, l2: f64) -> Self {
        self.learner_l2 = l2;
        self
    }

    /// Builder: Set the learning rate.
    #[must_use]
    pub fn with_learner_lr(mut self, lr: f64) -> Self {
        self.learner_lr = lr;
        self
    }

    /// Builder: Set the maximum epoch count.
    #[must_use]
    pub fn with_n_epochs(mut self, n: usize) -> Self {
        self.n_epochs = n;
        self
    }

    /// Builder: Set the mini-batch size.
    #[must_use]
    pub fn with_batch_size(mut self, bs: usize) -> Self {
        self.batch_size = bs;
        self
    }

    /// Builder: Keep or reset the learner's weights at fit start.
    #[must_use]
    pub fn with_warm_start(mut self, warm: bool) -> Self {
        self.warm_start = warm;
        self
    }

    /// Builder: Set the base checkpoint directory.
    #[must_use]
    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = dir.into();
        self
    }

    /// Builder: Set the progress-printing level.
    #[must_use]
    pub fn with_verbose(mut self, verbose: u8) -> Self {
        self.verbose = verbose;
        self
    }

    /// Reject configurations the training loop cannot run.
    pub fn validate(&self) -> RieszResult<()> {
        if self.n_epochs == 0 {
            return Err(RieszError::invalid_config("n_epochs must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(RieszError::invalid_config("batch_size must be at least 1"));
        }
        Ok(())
    }
}

/// Configuration for one `predict` call.
///
/// With `alpha` set, the percentile bands treat the whole kept per-epoch
/// ensemble as the uncertainty sample, so pre-convergence optimization noise
/// is folded into the interval. Inherited behavior; raise `burn_in` to
/// discard early epochs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictConfig {
    /// Which checkpoint(s) to evaluate
    pub model: ModelSelection,
    /// Earliest epochs discarded when averaging
    pub burn_in: usize,
    /// Two-sided tail probability for percentile bands (Average only)
    pub alpha: Option<f64>,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            model: ModelSelection::Average,
            burn_in: 0,
            alpha: None,
        }
    }
}

impl PredictConfig {
    /// Builder: Set the model selection policy.
    #[must_use]
    pub fn with_model(mut self, model: ModelSelection) -> Self {
        self.model = model;
        self
    }

    /// Builder: Set the burn-in epoch count.
    #[must_use]
    pub fn with_burn_in(mut self, burn_in: usize) -> Self {
        self.burn_in = burn_in;
        self
    }

    /// Builder: Request percentile bands at this tail probability.
    #[must_use]
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = Some(alpha);
        self
    }

    /// Reject settings that cannot produce a prediction from `n_epochs_run`
    /// saved epochs.
    pub fn validate(&self, n_epochs_run: usize) -> RieszResult<()> {
        if let Some(alpha) = self.alpha {
            if !(0.0 < alpha && alpha < 1.0) {
                return Err(RieszError::invalid_config(format!(
                    "alpha must lie in (0, 1), got {alpha}"
                )));
            }
        }
        if self.model == ModelSelection::Average && self.burn_in >= n_epochs_run {
            return Err(RieszError::invalid_config(format!(
                "burn_in {} leaves no epochs out of {} to average",
                self.burn_in, n_epochs_run
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_defaults() {
        let config = FitConfig::default();
        assert_eq!(config.earlystop_rounds, 20);
        assert_eq!(config.learner_l2, 1e-3);
        assert_eq!(config.learner_lr, 1e-3);
        assert_eq!(config.n_epochs, 100);
        assert_eq!(config.batch_size, 100);
        assert!(!config.warm_start);
        assert_eq!(config.model_dir, PathBuf::from("."));
        assert_eq!(config.verbose, 0);
    }

    #[test]
    fn test_fit_validate() {
        assert!(FitConfig::default().validate().is_ok());
        assert!(FitConfig::default().with_n_epochs(0).validate().is_err());
        assert!(FitConfig::default().with_batch_size(0).validate().is_err());
    }

    #[test]
    fn test_predict_defaults() {
        let config = PredictConfig::default();
        assert_eq!(config.model, ModelSelection::Average);
        assert_eq!(config.burn_in, 0);
        assert!(config.alpha.is_none());
    }

    #[test]
    fn test_predict_validate() {
        assert!(PredictConfig::default().validate(5).is_ok());
        assert!(PredictConfig::default().with_burn_in(5).validate(5).is_err());
        assert!(PredictConfig::default().with_alpha(0.0).validate(5).is_err());
        assert!(PredictConfig::default().with_alpha(1.0).validate(5).is_err());
        assert!(PredictConfig::default().with_alpha(0.1).validate(5).is_ok());

        // Burn-in only constrains averaging.
        let config = PredictConfig::default()
            .with_model(ModelSelection::Final)
            .with_burn_in(10);
        assert!(config.validate(5).is_ok());
    }

    #[test]
    fn test_model_selection_serde() {
        let json = serde_json::to_string(&ModelSelection::Epoch(3)).unwrap();
        let back: ModelSelection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ModelSelection::Epoch(3));
    }
}
