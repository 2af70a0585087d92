//! Shared fixtures: a minimal linear learner and simple moment functionals.

#![allow(dead_code)]

use adv_riesz_rs::{Learner, MomentFn, RieszResult};
use candle_core::{DType, Device, Module, ModuleT, Tensor};
use candle_nn::{Linear, VarBuilder, VarMap};

/// One linear layer `a(x) = x w + b`, the smallest learner with both a decay
/// (weight) and a no-decay (bias) parameter.
pub struct LinearLearner {
    linear: Linear,
    var_map: VarMap,
    device: Device,
}

impl LinearLearner {
    pub fn new(in_dim: usize) -> Self {
        let device = Device::Cpu;
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &device);
        let linear = candle_nn::linear(in_dim, 1, vb.pp("linear")).unwrap();
        Self {
            linear,
            var_map,
            device,
        }
    }
}

impl ModuleT for LinearLearner {
    fn forward_t(&self, xs: &Tensor, _train: bool) -> candle_core::Result<Tensor> {
        self.linear.forward(xs)
    }
}

impl Learner for LinearLearner {
    fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn reset_parameters(&mut self) -> RieszResult<()> {
        let data = self.var_map.data().lock().unwrap();
        for (_, var) in data.iter() {
            let fresh = Tensor::randn(0f32, 0.5, var.dims(), &self.device)?;
            var.set(&fresh)?;
        }
        Ok(())
    }
}

/// Moment functional `m(x; a) = scale * a(x)`. The adversarial loss becomes
/// `E[a(x)^2 - 2 * scale * a(x)]`, minimized by the constant representer
/// `a(x) = scale`.
pub fn scaled_output_moment(scale: f64) -> MomentFn<LinearLearner> {
    Box::new(move |x, learner, train| learner.forward_t(x, train)? * scale)
}

/// Moment functional `m(x; a) = a(x + 1)`, a shift functional giving the
/// loss nonconstant dynamics across epochs.
pub fn shift_moment() -> MomentFn<LinearLearner> {
    Box::new(|x, learner, train| {
        let shifted = (x + 1.0)?;
        learner.forward_t(&shifted, train)
    })
}

/// Standard-normal feature rows on the CPU.
pub fn features(n: usize, p: usize) -> Tensor {
    Tensor::randn(0f32, 1.0, (n, p), &Device::Cpu).unwrap()
}

/// Flattened parameter state in name-sorted order, for exact comparisons.
pub fn flat_params(learner: &LinearLearner) -> Vec<f32> {
    let data = learner.var_map().data().lock().unwrap();
    let mut named: Vec<_> = data.iter().collect();
    named.sort_by(|a, b| a.0.cmp(b.0));
    named
        .iter()
        .flat_map(|(_, v)| v.flatten_all().unwrap().to_vec1::<f32>().unwrap())
        .collect()
}
