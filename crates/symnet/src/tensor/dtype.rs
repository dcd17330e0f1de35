//! Scalar element types shared between tensor arrays and engine handles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical element type of a tensor array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dtype {
    Float32,
    Float64,
    Float16,
    Uint8,
    Int32,
    Int8,
    Int64,
}

impl Dtype {
    /// Bytes per scalar element.
    pub fn size(self) -> usize {
        match self {
            Dtype::Float32 => 4,
            Dtype::Float64 => 8,
            Dtype::Float16 => 2,
            Dtype::Uint8 => 1,
            Dtype::Int32 => 4,
            Dtype::Int8 => 1,
            Dtype::Int64 => 8,
        }
    }

    /// Stable numeric tag used when crossing the engine boundary.
    pub fn tag(self) -> u32 {
        match self {
            Dtype::Float32 => 0,
            Dtype::Float64 => 1,
            Dtype::Float16 => 2,
            Dtype::Uint8 => 3,
            Dtype::Int32 => 4,
            Dtype::Int8 => 5,
            Dtype::Int64 => 6,
        }
    }

    /// Reconstructs a dtype from its stable tag.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Dtype::Float32),
            1 => Some(Dtype::Float64),
            2 => Some(Dtype::Float16),
            3 => Some(Dtype::Uint8),
            4 => Some(Dtype::Int32),
            5 => Some(Dtype::Int8),
            6 => Some(Dtype::Int64),
            _ => None,
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dtype::Float32 => "Float32",
            Dtype::Float64 => "Float64",
            Dtype::Float16 => "Float16",
            Dtype::Uint8 => "Uint8",
            Dtype::Int32 => "Int32",
            Dtype::Int8 => "Int8",
            Dtype::Int64 => "Int64",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for dt in [
            Dtype::Float32,
            Dtype::Float64,
            Dtype::Float16,
            Dtype::Uint8,
            Dtype::Int32,
            Dtype::Int8,
            Dtype::Int64,
        ] {
            assert_eq!(Dtype::from_tag(dt.tag()), Some(dt));
        }
        assert_eq!(Dtype::from_tag(7), None);
    }
}
