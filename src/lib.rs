//! Adversarial estimation of Riesz representers with epoch-trajectory
//! checkpointing.
//!
//! This crate trains a learner network a(x) to minimize the empirical
//! adversarial loss `mean(-2 * moment_fn(x, a) + a(x)^2)`, where the moment
//! functional closes over an externally supplied test function. It provides:
//! - The training-and-checkpointing control loop with validation-based early
//!   stopping
//! - A directory-backed store holding one full parameter snapshot per epoch
//! - A multi-policy prediction aggregator over the saved trajectory (average,
//!   final, early-stop, specific epoch), with optional percentile bands
//! - Weight-decay partitioning of the learner's parameters into decay and
//!   no-decay optimizer groups
//!
//! Network architectures, the optimizer update rule, and concrete moment
//! functionals stay outside: the learner is any [`Learner`] implementation
//! and the objective is a caller-supplied [`MomentFn`].
//!
//! # Example
//!
//! ```no_run
//! use adv_riesz_rs::{FitConfig, ModelSelection, PredictConfig, RieszEstimator};
//! # use adv_riesz_rs::{Learner, RieszResult};
//! # use candle_core::{Device, ModuleT, Tensor};
//! # use candle_nn::VarMap;
//! # struct Net { var_map: VarMap, device: Device }
//! # impl ModuleT for Net {
//! #     fn forward_t(&self, xs: &Tensor, _train: bool) -> candle_core::Result<Tensor> {
//! #         Ok(xs.clone())
//! #     }
//! # }
//! # impl Learner for Net {
//! #     fn var_map(&self) -> &VarMap { &self.var_map }
//! #     fn device(&self) -> &Device { &self.device }
//! # }
//! # fn main() -> RieszResult<()> {
//! # let net = Net { var_map: VarMap::new(), device: Device::Cpu };
//! # let x = Tensor::zeros((20, 3), candle_core::DType::F32, &Device::Cpu).unwrap();
//! let moment_fn = Box::new(|x: &Tensor, net: &Net, train: bool| {
//!     net.forward_t(x, train)? * 2.0
//! });
//! let mut estimator = RieszEstimator::new(net, moment_fn);
//!
//! estimator.fit(&x, None, &FitConfig::default().with_n_epochs(10))?;
//! let pred = estimator.predict(
//!     &x,
//!     &PredictConfig::default()
//!         .with_model(ModelSelection::Average)
//!         .with_burn_in(2),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
pub mod decay;
pub mod error;
pub mod estimator;
pub mod learner;
pub mod metrics;

pub use checkpoint::{CheckpointKey, CheckpointStore, RunMeta};
pub use config::{FitConfig, ModelSelection, PredictConfig};
pub use decay::{partition_weight_decay, ParamGroup, WeightDecayGroups};
pub use error::{RieszError, RieszResult};
pub use estimator::{Band, EpochContext, FitReport, ObserverFn, Prediction, RieszEstimator};
pub use learner::{Learner, MomentFn};
pub use metrics::MetricSink;
