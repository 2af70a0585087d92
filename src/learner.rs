//! Traits and function types at the seam between the estimator and the
//! caller's models.

use candle_core::{Device, ModuleT, Tensor};
use candle_nn::VarMap;

use crate::error::RieszResult;

/// A differentiable candidate Riesz representer.
///
/// The estimator treats the network as opaque: it only needs a forward
/// evaluation with an explicit train/eval flag (`ModuleT`), the named
/// trainable parameters backing that evaluation, and the device the
/// parameters live on. Parameter storage in candle is device-bound at
/// construction, so the estimator moves data to the learner rather than
/// the other way around.
pub trait Learner: ModuleT {
    /// Named trainable parameters. Frozen weights are plain tensors outside
    /// the map and never reach the optimizer or the checkpoints.
    fn var_map(&self) -> &VarMap;

    /// Device the parameters live on; input data is coerced onto it.
    fn device(&self) -> &Device;

    /// Re-initialize the parameters, called at fit start unless warm-starting.
    /// The default keeps the current weights.
    fn reset_parameters(&mut self) -> RieszResult<()> {
        Ok(())
    }
}

/// The moment functional defining the adversarial objective.
///
/// Maps (batch, learner, train-mode) to a per-row score. The test function
/// (adversary) is closed over by the caller; any learner evaluation inside
/// must forward the mode flag and stay differentiable with respect to the
/// learner's parameters.
pub type MomentFn<L> = Box<dyn Fn(&Tensor, &L, bool) -> candle_core::Result<Tensor>>;
