//! Tensor value types: dimensions, element types and the native array wrapper.

mod array;
mod dim;
mod dtype;
mod fill;

pub use array::{ArrayId, Element, TensorArray};
pub use dim::{dim, Dimension, DIM_COLUMN, DIM_DEPTH, DIM_DEPTH3, DIM_ROW, MAX_DIMENSION_COUNT};
pub use dtype::Dtype;
pub use fill::{ArraySink, Initializer, ValueInit, XavierFactor};
