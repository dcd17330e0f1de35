//! Adam optimizer delegating to the engine's fused update primitive.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;

use crate::engine::Engine;
use crate::tensor::{ArrayId, TensorArray};
use crate::train::{locate_lr, Optimizer, OptimizerConf};

/// Adam configuration. Zero fields take their documented defaults on `init`:
/// lr 0.001 (or the epoch schedule), beta1 0.9, beta2 0.999, epsilon 1e-8.
#[derive(Debug, Clone, Default)]
pub struct Adam {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    pub decay: f32,
    pub lr_map: BTreeMap<usize, f32>,
}

struct AdamState<E: Engine> {
    mean: TensorArray<E>,
    var: TensorArray<E>,
}

impl<E: Engine> OptimizerConf<E> for Adam {
    fn init(&self, epoch: usize) -> Box<dyn Optimizer<E>> {
        let lr = if self.lr == 0.0 {
            locate_lr(epoch, &self.lr_map, 0.001)
        } else {
            self.lr
        };
        let beta1 = if self.beta1 == 0.0 { 0.9 } else { self.beta1 };
        let beta2 = if self.beta2 == 0.0 { 0.999 } else { self.beta2 };
        let epsilon = if self.epsilon == 0.0 { 1e-8 } else { self.epsilon };
        Box::new(AdamOptimizer {
            lr,
            beta1,
            beta2,
            epsilon,
            decay: self.decay,
            states: HashMap::new(),
        })
    }
}

struct AdamOptimizer<E: Engine> {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    decay: f32,
    /// Mean and variance tensors per parameter identity, lazily allocated.
    states: HashMap<ArrayId, AdamState<E>>,
}

impl<E: Engine> Optimizer<E> for AdamOptimizer<E> {
    fn update(&mut self, param: &TensorArray<E>, grad: &TensorArray<E>) -> Result<()> {
        if !self.states.contains_key(&param.id()) {
            let mean = param.new_like()?;
            mean.zeros()?;
            let var = param.new_like()?;
            var.zeros()?;
            self.states.insert(param.id(), AdamState { mean, var });
        }
        let state = &self.states[&param.id()];
        param.engine().adam_update(
            param.handle(),
            grad.handle(),
            state.mean.handle(),
            state.var.handle(),
            self.lr,
            self.beta1,
            self.beta2,
            self.epsilon,
            self.decay,
        )?;
        Ok(())
    }

    fn release(&mut self) {
        for (_, mut state) in self.states.drain() {
            state.mean.release();
            state.var.release();
        }
    }
}

impl<E: Engine> Drop for AdamOptimizer<E> {
    fn drop(&mut self) {
        self.release();
    }
}
