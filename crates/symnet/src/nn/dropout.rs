//! Dropout block.

use crate::nn::Block;
use crate::symbol::{ops, Symbol};

/// Dropout applied during training forwards; rates at or below 1% pass the
/// input through unchanged.
#[derive(Default)]
pub struct Dropout {
    pub rate: f32,
}

impl Block for Dropout {
    fn combine(&self, input: Symbol) -> Symbol {
        if self.rate > 0.01 {
            ops::dropout(&input, self.rate)
        } else {
            input
        }
    }
}
