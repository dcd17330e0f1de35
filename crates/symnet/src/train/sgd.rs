//! Stochastic gradient descent with optional momentum.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;

use crate::engine::Engine;
use crate::tensor::{ArrayId, TensorArray};
use crate::train::{locate_lr, Optimizer, OptimizerConf};

/// SGD configuration. A zero learning rate defers to the epoch schedule,
/// falling back to 0.01.
#[derive(Debug, Clone, Default)]
pub struct Sgd {
    pub lr: f32,
    pub momentum: f32,
    pub decay: f32,
    pub lr_map: BTreeMap<usize, f32>,
}

impl<E: Engine> OptimizerConf<E> for Sgd {
    fn init(&self, epoch: usize) -> Box<dyn Optimizer<E>> {
        let lr = if self.lr == 0.0 {
            locate_lr(epoch, &self.lr_map, 0.01)
        } else {
            self.lr
        };
        Box::new(SgdOptimizer {
            conf: self.clone(),
            lr,
            states: HashMap::new(),
        })
    }
}

struct SgdOptimizer<E: Engine> {
    conf: Sgd,
    lr: f32,
    /// Momentum tensor per parameter identity, lazily allocated.
    states: HashMap<ArrayId, TensorArray<E>>,
}

impl<E: Engine> Optimizer<E> for SgdOptimizer<E> {
    fn update(&mut self, param: &TensorArray<E>, grad: &TensorArray<E>) -> Result<()> {
        if self.conf.momentum != 0.0 {
            if !self.states.contains_key(&param.id()) {
                let state = param.new_like()?;
                state.zeros()?;
                self.states.insert(param.id(), state);
            }
            let state = &self.states[&param.id()];
            param.engine().sgd_mom_update(
                param.handle(),
                grad.handle(),
                state.handle(),
                self.lr,
                self.conf.momentum,
                0.0,
            )?;
        }
        param
            .engine()
            .sgd_update(param.handle(), grad.handle(), self.lr, self.conf.decay)?;
        Ok(())
    }

    fn release(&mut self) {
        for (_, mut state) in self.states.drain() {
            state.release();
        }
    }
}

impl<E: Engine> Drop for SgdOptimizer<E> {
    fn drop(&mut self) {
        self.release();
    }
}
