//! Parameter initializers attachable to trainable variables.

use anyhow::Result;

use crate::tensor::{ArraySink, Initializer, XavierFactor};

/// Fills with one constant value.
pub struct Const {
    pub value: f32,
}

impl Initializer for Const {
    fn initialize(&self, array: &dyn ArraySink) -> Result<()> {
        if self.value == 0.0 {
            return array.zeros();
        }
        array.fill(self.value)
    }
}

/// Xavier fill; zero magnitude defaults to 3.
pub struct Xavier {
    pub gaussian: bool,
    pub magnitude: f32,
    pub factor: XavierFactor,
}

impl Default for Xavier {
    fn default() -> Self {
        Xavier {
            gaussian: false,
            magnitude: 3.0,
            factor: XavierFactor::Avg,
        }
    }
}

impl Initializer for Xavier {
    fn initialize(&self, array: &dyn ArraySink) -> Result<()> {
        let magnitude = if self.magnitude > 0.0 {
            self.magnitude
        } else {
            3.0
        };
        array.xavier(self.gaussian, self.factor, magnitude)
    }
}

/// Uniform fill on `[0, magnitude)`; zero magnitude defaults to 1.
pub struct Uniform {
    pub magnitude: f32,
}

impl Initializer for Uniform {
    fn initialize(&self, array: &dyn ArraySink) -> Result<()> {
        let magnitude = if self.magnitude > 0.0 {
            self.magnitude
        } else {
            1.0
        };
        array.uniform(0.0, magnitude)
    }
}
