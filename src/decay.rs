//! Weight-decay partitioning of the learner's trainable parameters.

use std::collections::HashSet;

use candle_core::Var;
use candle_nn::VarMap;

/// One optimizer parameter group tagged with its L2 coefficient.
#[derive(Debug, Clone)]
pub struct ParamGroup {
    /// Trainable variables in this group, in name-sorted order
    pub vars: Vec<Var>,
    /// L2 coefficient applied to the group
    pub weight_decay: f64,
}

/// The two groups produced by [`partition_weight_decay`].
#[derive(Debug, Clone)]
pub struct WeightDecayGroups {
    /// Rank-1 tensors, `.bias`-suffixed names, and skipped names; L2 = 0
    pub no_decay: ParamGroup,
    /// Everything else; L2 = the supplied coefficient
    pub decay: ParamGroup,
}

/// Split a model's named trainable parameters into decay and no-decay groups.
///
/// A parameter lands in the no-decay group when it is rank-1 (bias and
/// normalization vectors), its name ends in `.bias`, or its name is in the
/// skip list. Frozen parameters never appear: a `VarMap` only enumerates
/// trainable `Var`s. Pure function of the map; iteration order is made
/// deterministic by sorting names.
pub fn partition_weight_decay(var_map: &VarMap, l2: f64, skip: &[&str]) -> WeightDecayGroups {
    let skip: HashSet<&str> = skip.iter().copied().collect();

    let data = var_map.data().lock().unwrap();
    let mut named: Vec<(&String, &Var)> = data.iter().collect();
    named.sort_by(|a, b| a.0.cmp(b.0));

    let mut no_decay = Vec::new();
    let mut decay = Vec::new();
    for (name, var) in named {
        if var.dims().len() == 1 || name.ends_with(".bias") || skip.contains(name.as_str()) {
            no_decay.push(var.clone());
        } else {
            decay.push(var.clone());
        }
    }

    WeightDecayGroups {
        no_decay: ParamGroup {
            vars: no_decay,
            weight_decay: 0.0,
        },
        decay: ParamGroup {
            vars: decay,
            weight_decay: l2,
        },
    }
}
