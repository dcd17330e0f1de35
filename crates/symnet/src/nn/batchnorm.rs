//! Batch normalization block.

use std::sync::Arc;

use crate::nn::{next_symbol_id, Block, Const};
use crate::symbol::{ops, var, Symbol};

/// Batch normalization with trainable scale/shift and non-trainable running
/// statistics (`<name>_rmean`, `<name>_rvar`) bound as auxiliary state.
#[derive(Default)]
pub struct BatchNorm {
    pub name: Option<String>,
    pub momentum: f32,
    pub epsilon: f32,
    pub use_global_stats: bool,
}

impl Block for BatchNorm {
    fn combine(&self, input: Symbol) -> Symbol {
        let ns = match &self.name {
            Some(name) => format!("{name}$BN"),
            None => format!("BatchNorm{:02}", next_symbol_id()),
        };
        let gamma = var(format!("{ns}_gamma")).with_init(Arc::new(Const { value: 1.0 }));
        let beta = var(format!("{ns}_beta")).with_init(Arc::new(Const { value: 0.0 }));
        let running_mean = var(format!("{ns}_rmean"))
            .no_grad()
            .with_init(Arc::new(Const { value: 0.0 }));
        let running_var = var(format!("{ns}_rvar"))
            .no_grad()
            .with_init(Arc::new(Const { value: 1.0 }));
        ops::batch_norm(
            &input,
            &gamma,
            &beta,
            &running_mean,
            &running_var,
            self.momentum,
            self.epsilon,
            self.use_global_stats,
            None,
        )
        .with_name(ns)
    }
}
