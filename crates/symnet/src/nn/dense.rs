//! Fully connected layer and flattening.

use std::sync::Arc;

use crate::nn::{next_symbol_id, BatchNorm, Block, Const};
use crate::symbol::{ops, var, Symbol};
use crate::tensor::Initializer;

/// Flattens everything past the batch axis.
pub struct Flatten;

impl Block for Flatten {
    fn combine(&self, input: Symbol) -> Symbol {
        ops::flatten(&input)
    }
}

/// Fully connected layer with optional activation, batch normalization and
/// dropout. Parameters are named `<name>_weight` and `<name>_bias`.
#[derive(Default)]
pub struct FullyConnected {
    pub size: usize,
    pub activation: Option<fn(Symbol) -> Symbol>,
    pub weight_init: Option<Arc<dyn Initializer>>,
    /// Bias initializer; zero-fill when unset.
    pub bias_init: Option<Arc<dyn Initializer>>,
    pub no_bias: bool,
    pub no_flatten: bool,
    pub batch_norm: bool,
    pub name: Option<String>,
    pub output: bool,
    pub dropout: f32,
}

impl Block for FullyConnected {
    fn combine(&self, input: Symbol) -> Symbol {
        let ns = self
            .name
            .clone()
            .unwrap_or_else(|| format!("FullyConnected{:02}", next_symbol_id()));
        let weight = var(format!("{ns}_weight")).maybe_init(self.weight_init.clone());
        let bias = if self.no_bias {
            None
        } else {
            let init = self
                .bias_init
                .clone()
                .unwrap_or_else(|| Arc::new(Const { value: 0.0 }));
            Some(var(format!("{ns}_bias")).with_init(init))
        };

        let mut out = ops::fully_connected(
            &input,
            &weight,
            bias.as_ref(),
            self.size,
            !self.no_flatten,
        )
        .with_name(&ns);
        if self.batch_norm {
            out = BatchNorm {
                name: Some(ns.clone()),
                ..Default::default()
            }
            .combine(out);
        }
        if let Some(activation) = self.activation {
            out = activation(out).with_name(format!("{ns}$A"));
        }
        if self.dropout > 0.01 {
            out = ops::dropout(&out, self.dropout).with_name(format!("{ns}$D"));
        }
        out.with_output(self.output)
    }
}
