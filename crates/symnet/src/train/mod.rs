//! Optimizers mutating parameter tensors in place from their gradients.

mod adam;
mod sgd;

use std::collections::BTreeMap;

use anyhow::Result;

use crate::engine::Engine;
use crate::tensor::TensorArray;

pub use adam::Adam;
pub use sgd::Sgd;

/// Optimizer configuration, instantiated once per epoch.
pub trait OptimizerConf<E: Engine> {
    fn init(&self, epoch: usize) -> Box<dyn Optimizer<E>>;
}

/// A live optimizer instance. Auxiliary state (momentum, mean, variance) is
/// keyed by parameter tensor identity and created lazily on the first update
/// of each parameter. No other component may mutate a parameter concurrently
/// with an in-flight update.
pub trait Optimizer<E: Engine> {
    fn update(&mut self, param: &TensorArray<E>, grad: &TensorArray<E>) -> Result<()>;

    /// Frees every auxiliary tensor held. Dropping the optimizer does the
    /// same.
    fn release(&mut self);
}

/// Resolves the learning rate for `epoch` from a per-epoch schedule: the
/// entry with the greatest starting epoch not exceeding `epoch` wins, the
/// default applies when nothing matches.
pub(crate) fn locate_lr(epoch: usize, lr_map: &BTreeMap<usize, f32>, default: f32) -> f32 {
    lr_map
        .range(..=epoch)
        .next_back()
        .map(|(_, &lr)| lr)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lr_schedule_picks_greatest_threshold_not_above_epoch() {
        let mut map = BTreeMap::new();
        map.insert(0, 0.1);
        map.insert(10, 0.01);
        assert_eq!(locate_lr(5, &map, 1.0), 0.1);
        assert_eq!(locate_lr(10, &map, 1.0), 0.01);
        assert_eq!(locate_lr(15, &map, 1.0), 0.01);
        assert_eq!(locate_lr(3, &BTreeMap::new(), 0.01), 0.01);
    }
}
