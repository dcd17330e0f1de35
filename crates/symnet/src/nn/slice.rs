//! Axis-slicing block.

use crate::nn::{next_symbol_id, Block};
use crate::symbol::{ops, Symbol};

/// Slices `[begin, end)` along one axis.
#[derive(Default)]
pub struct Slice {
    pub axis: usize,
    pub begin: i32,
    pub end: i32,
    pub name: Option<String>,
    pub output: bool,
    pub turn_off: bool,
}

impl Block for Slice {
    fn combine(&self, input: Symbol) -> Symbol {
        if self.turn_off {
            return input;
        }
        let ns = self
            .name
            .clone()
            .unwrap_or_else(|| format!("Slice{:02}", next_symbol_id()));
        ops::slice(&input, self.axis, self.begin, self.end)
            .with_name(ns)
            .with_output(self.output)
    }
}
