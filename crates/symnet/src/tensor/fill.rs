//! Imperative fills and the initializer interface.

use anyhow::Result;

use crate::engine::Engine;
use crate::tensor::{Dimension, TensorArray};

/// Which fan count scales a Xavier fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XavierFactor {
    In,
    Out,
    #[default]
    Avg,
}

impl<E: Engine> TensorArray<E> {
    pub fn zeros(&self) -> Result<()> {
        self.engine().fill_zeros(self.handle())?;
        Ok(())
    }

    pub fn ones(&self) -> Result<()> {
        self.fill(1.0)
    }

    /// Fills every element with `value`.
    pub fn fill(&self, value: f32) -> Result<()> {
        self.engine().fill_zeros(self.handle())?;
        self.engine().fill_add_scalar(self.handle(), value)?;
        Ok(())
    }

    /// Uniform fill on `[low, high)` from the device random stream.
    pub fn uniform(&self, low: f32, high: f32) -> Result<()> {
        self.engine().fill_uniform(self.handle(), low, high)?;
        Ok(())
    }

    /// Normal fill with mean `loc` and standard deviation `scale`.
    pub fn normal(&self, loc: f32, scale: f32) -> Result<()> {
        self.engine().fill_normal(self.handle(), loc, scale)?;
        Ok(())
    }

    /// Xavier fill: the magnitude is scaled by the chosen fan count, with the
    /// receptive field folded in for rank > 2.
    pub fn xavier(&self, gaussian: bool, factor: XavierFactor, magnitude: f32) -> Result<()> {
        let d = self.dim();
        let hws: f64 = d.slice().iter().skip(2).map(|&v| v as f64).product();
        let fan_in = d.at(1).max(1) as f64 * hws;
        let fan_out = d.at(0).max(1) as f64 * hws;
        let scale = if d.rank() < 2 {
            fan_out
        } else {
            match factor {
                XavierFactor::In => fan_in,
                XavierFactor::Out => fan_out,
                XavierFactor::Avg => (fan_in + fan_out) / 2.0,
            }
        };
        let scale = (magnitude as f64 / scale).sqrt() as f32;
        if gaussian {
            self.normal(0.0, scale)
        } else {
            self.uniform(-scale, scale)
        }
    }
}

/// Object-safe view of a mutable tensor handed to initializers, so that an
/// initializer attached to a `Symbol` stays independent of the engine type.
pub trait ArraySink {
    fn dim(&self) -> Dimension;
    fn zeros(&self) -> Result<()>;
    fn fill(&self, value: f32) -> Result<()>;
    fn uniform(&self, low: f32, high: f32) -> Result<()>;
    fn normal(&self, loc: f32, scale: f32) -> Result<()>;
    fn xavier(&self, gaussian: bool, factor: XavierFactor, magnitude: f32) -> Result<()>;
    fn set_f32(&self, values: &[f32]) -> Result<()>;
}

impl<E: Engine> ArraySink for TensorArray<E> {
    fn dim(&self) -> Dimension {
        TensorArray::dim(self)
    }

    fn zeros(&self) -> Result<()> {
        TensorArray::zeros(self)
    }

    fn fill(&self, value: f32) -> Result<()> {
        TensorArray::fill(self, value)
    }

    fn uniform(&self, low: f32, high: f32) -> Result<()> {
        TensorArray::uniform(self, low, high)
    }

    fn normal(&self, loc: f32, scale: f32) -> Result<()> {
        TensorArray::normal(self, loc, scale)
    }

    fn xavier(&self, gaussian: bool, factor: XavierFactor, magnitude: f32) -> Result<()> {
        TensorArray::xavier(self, gaussian, factor, magnitude)
    }

    fn set_f32(&self, values: &[f32]) -> Result<()> {
        self.set_values(values)
    }
}

/// Fills one parameter tensor during graph initialization. Attached to
/// trainable variables at tree-construction time; invoked only once the graph
/// is bound.
pub trait Initializer: Send + Sync {
    fn initialize(&self, array: &dyn ArraySink) -> Result<()>;
}

/// Initializer capturing explicit values, used by value-carrying variables.
pub struct ValueInit {
    pub values: Vec<f32>,
}

impl Initializer for ValueInit {
    fn initialize(&self, array: &dyn ArraySink) -> Result<()> {
        array.set_f32(&self.values)
    }
}
