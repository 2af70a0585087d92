//! The adversarial training loop and the trajectory-based prediction
//! aggregator.
//!
//! `fit` minimizes the empirical adversarial loss
//! `mean(-2 * moment_fn(x, a) + a(x)^2)` over the learner with mini-batch
//! gradient steps, persisting a full parameter snapshot after every epoch and
//! early-stopping on a validation set when one is supplied. `predict`
//! reconstructs point estimates from the saved trajectory under an explicit
//! selection policy, optionally with percentile bands across the snapshot
//! ensemble.

use std::path::Path;

use candle_core::{DType, ModuleT, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::checkpoint::{restore_vars, snapshot_vars, CheckpointKey, CheckpointStore, RunMeta};
use crate::config::{FitConfig, ModelSelection, PredictConfig};
use crate::decay::{partition_weight_decay, WeightDecayGroups};
use crate::error::{RieszError, RieszResult};
use crate::learner::{Learner, MomentFn};
use crate::metrics::MetricSink;

/// Per-epoch summary handed to the observer callback.
#[derive(Debug, Clone, Copy)]
pub struct EpochContext {
    /// Index of the epoch that just completed
    pub epoch: usize,
    /// Mean adversarial loss over the epoch's mini-batches
    pub train_loss: Option<f64>,
    /// Full-validation-set adversarial loss, when a validation set was supplied
    pub val_loss: Option<f64>,
}

/// Side-effecting hook invoked once per completed epoch.
pub type ObserverFn<L> = Box<dyn FnMut(&EpochContext, &L, &mut MetricSink) -> RieszResult<()>>;

/// Summary of one completed `fit` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    /// Epochs actually executed (early-stop epoch + 1 on early exit)
    pub n_epochs_run: usize,
    /// Whether the patience threshold ended the run
    pub early_stopped: bool,
    /// Epoch holding the best validation loss
    pub best_epoch: Option<usize>,
    /// The best validation loss observed
    pub best_val_loss: Option<f64>,
    /// Mean training loss of the last executed epoch
    pub final_train_loss: Option<f64>,
}

/// Approximate interval from the percentiles of the snapshot ensemble.
#[derive(Debug, Clone)]
pub struct Band {
    /// Per-sample `alpha/2` percentile
    pub lower: Vec<f32>,
    /// Per-sample `1 - alpha/2` percentile
    pub upper: Vec<f32>,
}

/// Point estimate (and optional band) for each input row.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Per-row point estimate, length = number of input rows
    pub point: Vec<f32>,
    /// Percentile bands, present for `Average` with `alpha`
    pub band: Option<Band>,
}

/// Adversarial estimator of a Riesz representer.
///
/// Owns the learner for the lifetime of the estimator; the adversary/test
/// function is closed over by the moment functional and never owned here.
/// One fit call owns one unique run directory; predict swaps checkpointed
/// weights through the learner's own variables, so `&mut self` serializes
/// fit and predict on a single estimator.
pub struct RieszEstimator<L: Learner> {
    learner: L,
    moment_fn: MomentFn<L>,
    observer: Option<ObserverFn<L>>,
    store: Option<CheckpointStore>,
    report: Option<FitReport>,
}

impl<L: Learner> RieszEstimator<L> {
    /// Create an estimator from a learner network and a moment functional.
    pub fn new(learner: L, moment_fn: MomentFn<L>) -> Self {
        Self {
            learner,
            moment_fn,
            observer: None,
            store: None,
            report: None,
        }
    }

    /// Builder: Register an observer invoked after each completed epoch.
    #[must_use]
    pub fn with_observer(mut self, observer: ObserverFn<L>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The learner in its current parameter state.
    pub fn learner(&self) -> &L {
        &self.learner
    }

    /// Report of the most recent fit, if any.
    pub fn report(&self) -> Option<&FitReport> {
        self.report.as_ref()
    }

    /// Run directory of the most recent fit, if any. Removed when the
    /// estimator is dropped or fit again.
    pub fn run_dir(&self) -> Option<&Path> {
        self.store.as_ref().map(|s| s.run_dir())
    }

    /// The adversarial objective: `mean(-2 * moment_fn(x, a) + a(x)^2)`.
    fn adversarial_loss(&self, x: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let moment = (self.moment_fn)(x, &self.learner, train)?.flatten_all()?;
        let output = self.learner.forward_t(x, train)?.flatten_all()?;
        ((moment * -2.0)? + output.sqr()?)?.mean_all()
    }

    /// Train the learner on `x`, checkpointing after every epoch.
    ///
    /// Supplying `xval` enables early stopping: the full validation set is
    /// scored after each epoch, and the run ends once `earlystop_rounds`
    /// epochs pass without strict improvement. At finalization the learner is
    /// restored to the best validation state and one more checkpoint is
    /// written under the early-stop tag.
    ///
    /// Errors are fatal to the run and propagate immediately; checkpoints
    /// already written remain on disk in the run directory, which lives until
    /// the next fit or the estimator is dropped.
    pub fn fit(
        &mut self,
        x: &Tensor,
        xval: Option<&Tensor>,
        config: &FitConfig,
    ) -> RieszResult<FitReport> {
        config.validate()?;

        let device = self.learner.device().clone();
        let x = x.to_device(&device)?.to_dtype(DType::F32)?;
        let xval = match xval {
            Some(v) => Some(v.to_device(&device)?.to_dtype(DType::F32)?),
            None => None,
        };

        // The estimator owns the store before the first epoch runs, so
        // checkpoints already written survive a failed fit. Clearing the
        // stale report keeps predict gated until this fit completes;
        // assigning the store drops the previous run's directory.
        self.report = None;
        self.store = Some(CheckpointStore::create(&config.model_dir)?);

        if !config.warm_start {
            self.learner.reset_parameters()?;
        }

        let groups = partition_weight_decay(self.learner.var_map(), config.learner_l2, &[]);
        let mut optimizers = build_optimizers(&groups, config.learner_lr)?;

        let mut sink = match self.observer {
            Some(_) => Some(MetricSink::create(self.store()?.run_dir())?),
            None => None,
        };

        let n_rows = x.dim(0)?;
        let mut rng = rand::thread_rng();

        let mut best_val = f64::INFINITY;
        let mut best_epoch = None;
        let mut since_improvement = 0usize;
        // The pre-training state backs the early-stop checkpoint if the
        // validation loss never improves (e.g. goes non-finite immediately).
        let mut best_state = match xval {
            Some(_) => Some(snapshot_vars(self.learner.var_map())?),
            None => None,
        };

        let mut n_epochs_run = 0;
        let mut early_stopped = false;
        let mut last_train_loss = None;

        for epoch in 0..config.n_epochs {
            if config.verbose > 0 {
                tracing::info!(epoch, "epoch");
            }

            // Fresh shuffle every epoch; batch composition is deliberately
            // not reproducible across epochs.
            let mut indices: Vec<u32> = (0..n_rows as u32).collect();
            indices.shuffle(&mut rng);

            let mut loss_sum = 0f64;
            let mut n_batches = 0usize;
            for chunk in indices.chunks(config.batch_size) {
                let ids = Tensor::from_slice(chunk, chunk.len(), &device)?;
                let xb = x.index_select(&ids, 0)?;
                let loss = self.adversarial_loss(&xb, true)?;
                let grads = loss.backward()?;
                for optimizer in optimizers.iter_mut() {
                    optimizer.step(&grads)?;
                }
                loss_sum += loss.to_scalar::<f32>()? as f64;
                n_batches += 1;
            }
            let train_loss = (n_batches > 0).then(|| loss_sum / n_batches as f64);
            last_train_loss = train_loss;

            self.store()?
                .save(CheckpointKey::Epoch(epoch), self.learner.var_map())?;
            n_epochs_run = epoch + 1;

            let mut val_loss = None;
            if let Some(xval) = &xval {
                let loss = self.adversarial_loss(xval, false)?.to_scalar::<f32>()? as f64;
                val_loss = Some(loss);
                if config.verbose > 0 {
                    tracing::info!(epoch, val_loss = loss, "validation loss");
                }
                if loss < best_val {
                    best_val = loss;
                    best_epoch = Some(epoch);
                    since_improvement = 0;
                    best_state = Some(snapshot_vars(self.learner.var_map())?);
                } else {
                    since_improvement += 1;
                    if since_improvement > config.earlystop_rounds {
                        early_stopped = true;
                        // The terminating epoch's checkpoint is already
                        // written; its observer call is skipped.
                        break;
                    }
                }
            }

            tracing::debug!(epoch, ?train_loss, ?val_loss, "epoch complete");

            let ctx = EpochContext {
                epoch,
                train_loss,
                val_loss,
            };
            if let (Some(observer), Some(sink)) = (self.observer.as_mut(), sink.as_mut()) {
                observer(&ctx, &self.learner, sink)?;
            }
        }

        let best_val_loss = best_epoch.map(|_| best_val);
        if xval.is_some() {
            if let Some(state) = &best_state {
                restore_vars(self.learner.var_map(), state)?;
            }
            self.store()?
                .save(CheckpointKey::EarlyStop, self.learner.var_map())?;
        }

        self.store()?.write_meta(&RunMeta {
            n_epochs: n_epochs_run,
            early_stopped,
            best_epoch,
            best_val_loss,
        })?;
        if let Some(sink) = sink.as_mut() {
            sink.flush()?;
        }

        tracing::debug!(n_epochs_run, early_stopped, "fit complete");

        let report = FitReport {
            n_epochs_run,
            early_stopped,
            best_epoch,
            best_val_loss,
            final_train_loss: last_train_loss,
        };
        self.report = Some(report.clone());
        Ok(report)
    }

    fn store(&self) -> RieszResult<&CheckpointStore> {
        self.store.as_ref().ok_or(RieszError::NotFitted)
    }

    /// Evaluate the saved trajectory on new feature rows `t`.
    ///
    /// Checkpoints are loaded by swapping parameter state through the
    /// learner's own variables; a restore guard puts the pre-call state back
    /// on every exit path, so no caller-observable mutation survives.
    pub fn predict(&mut self, t: &Tensor, config: &PredictConfig) -> RieszResult<Prediction> {
        let n_epochs_run = self
            .report
            .as_ref()
            .ok_or(RieszError::NotFitted)?
            .n_epochs_run;
        config.validate(n_epochs_run)?;

        let t = t
            .to_device(self.learner.device())?
            .to_dtype(DType::F32)?;

        let guard = snapshot_vars(self.learner.var_map())?;
        let result = self.predict_selected(&t, config, n_epochs_run);
        if let Err(e) = restore_vars(self.learner.var_map(), &guard) {
            tracing::warn!(error = %e, "failed to restore learner state after predict");
            if result.is_ok() {
                return Err(e.into());
            }
        }
        result
    }

    fn predict_selected(
        &self,
        t: &Tensor,
        config: &PredictConfig,
        n_epochs_run: usize,
    ) -> RieszResult<Prediction> {
        let store = self.store()?;
        let point_only = |point| Prediction { point, band: None };
        match config.model {
            ModelSelection::Average => {
                let mut ensemble = Vec::with_capacity(n_epochs_run - config.burn_in);
                for epoch in config.burn_in..n_epochs_run {
                    ensemble.push(self.eval_checkpoint(store, CheckpointKey::Epoch(epoch), t)?);
                }
                Ok(aggregate_ensemble(&ensemble, config.alpha))
            }
            ModelSelection::Final => Ok(point_only(self.eval_checkpoint(
                store,
                CheckpointKey::Epoch(n_epochs_run - 1),
                t,
            )?)),
            ModelSelection::EarlyStop => {
                Ok(point_only(self.eval_checkpoint(store, CheckpointKey::EarlyStop, t)?))
            }
            ModelSelection::Epoch(epoch) => {
                Ok(point_only(self.eval_checkpoint(store, CheckpointKey::Epoch(epoch), t)?))
            }
        }
    }

    fn eval_checkpoint(
        &self,
        store: &CheckpointStore,
        key: CheckpointKey,
        t: &Tensor,
    ) -> RieszResult<Vec<f32>> {
        store.load(key, self.learner.var_map(), self.learner.device())?;
        let out = self.learner.forward_t(t, false)?.flatten_all()?;
        Ok(out.to_vec1::<f32>()?)
    }
}

fn build_optimizers(groups: &WeightDecayGroups, lr: f64) -> candle_core::Result<Vec<AdamW>> {
    let mut optimizers = Vec::new();
    for group in [&groups.no_decay, &groups.decay] {
        if group.vars.is_empty() {
            continue;
        }
        optimizers.push(AdamW::new(
            group.vars.clone(),
            ParamsAdamW {
                lr,
                weight_decay: group.weight_decay,
                ..Default::default()
            },
        )?);
    }
    Ok(optimizers)
}

/// Per-sample mean over the ensemble rows, plus percentile bands when
/// `alpha` is given. Ensemble must be non-empty and rectangular.
fn aggregate_ensemble(ensemble: &[Vec<f32>], alpha: Option<f64>) -> Prediction {
    let k = ensemble.len();
    let n = ensemble[0].len();

    let mut point = vec![0f32; n];
    for row in ensemble {
        for (acc, v) in point.iter_mut().zip(row) {
            *acc += v;
        }
    }
    for acc in point.iter_mut() {
        *acc /= k as f32;
    }

    let band = alpha.map(|alpha| {
        let mut lower = Vec::with_capacity(n);
        let mut upper = Vec::with_capacity(n);
        let mut column = vec![0f32; k];
        for j in 0..n {
            for (c, row) in column.iter_mut().zip(ensemble) {
                *c = row[j];
            }
            column.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            lower.push(percentile(&column, alpha / 2.0));
            upper.push(percentile(&column, 1.0 - alpha / 2.0));
        }
        Band { lower, upper }
    });

    Prediction { point, band }
}

/// Percentile of a sorted sample with linear interpolation between ranks.
fn percentile(sorted: &[f32], q: f64) -> f32 {
    let rank = q * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = (rank - lo as f64) as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
