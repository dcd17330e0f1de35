//! Loss functions expressed over the network's primary output.
//!
//! Label-consuming losses declare the internal `_label` variable with a
//! batch-placeholder dimension; the compiler resolves it against the input
//! dimension and the bound graph exposes the label tensor for the caller to
//! fill each step.

use crate::graph::Loss;
use crate::symbol::{ops, var, Symbol};
use crate::tensor::dim;

fn label(width: usize) -> Symbol {
    let n = if width == 0 { 1 } else { width };
    var("_label").with_dim(dim([0, n as i32]))
}

/// Uses the network output itself as the loss expression.
pub struct L0Loss;

impl Loss for L0Loss {
    fn loss(&self, out: &Symbol) -> Symbol {
        out.clone()
    }
}

/// Mean absolute error against the label.
#[derive(Default)]
pub struct L1Loss {
    pub num: usize,
}

impl Loss for L1Loss {
    fn loss(&self, out: &Symbol) -> Symbol {
        let label = label(self.num);
        ops::mean(&ops::abs(&ops::sub(out, &label)), &[])
    }
}

/// Squared error against the label.
#[derive(Default)]
pub struct L2Loss {
    pub num: usize,
}

impl Loss for L2Loss {
    fn loss(&self, out: &Symbol) -> Symbol {
        let label = label(self.num);
        ops::square(&ops::sub(out, &label))
    }
}

/// Fused softmax + cross-entropy against a single class-index label.
pub struct SoftmaxCrossEntropyLoss;

impl Loss for SoftmaxCrossEntropyLoss {
    fn loss(&self, out: &Symbol) -> Symbol {
        let label = var("_label").with_dim(dim([0, 1]));
        ops::softmax_cross_entropy(out, &label, None)
    }
}

/// Cross-entropy over already-normalized outputs, picking the label class.
#[derive(Default)]
pub struct CrossEntropyLoss {
    pub num: usize,
}

impl Loss for CrossEntropyLoss {
    fn loss(&self, out: &Symbol) -> Symbol {
        let label = label(self.num);
        let picked = ops::log(&ops::add(ops::pick(out, &label), 1e-12f32));
        ops::sum(&ops::mul(picked, -1.0f32), &[-1])
    }
}

/// Log-cosh error against the label.
#[derive(Default)]
pub struct LcosLoss {
    pub num: usize,
}

impl Loss for LcosLoss {
    fn loss(&self, out: &Symbol) -> Symbol {
        let label = label(self.num);
        ops::log_cosh(&ops::sub(out, &label))
    }
}

/// Adapts a plain function as a loss.
pub struct LossFn(pub fn(&Symbol) -> Symbol);

impl Loss for LossFn {
    fn loss(&self, out: &Symbol) -> Symbol {
        (self.0)(out)
    }
}
