//! Typed attribute keys for operator construction.
//!
//! Builders carry attributes under these keys and the marshalling layer turns
//! them into the engine's string-keyed form only at the call boundary.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Attribute key accepted by engine operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttrKey {
    Scalar,
    Low,
    High,
    Loc,
    Scale,
    Axis,
    Axes,
    Begin,
    End,
    Mode,
    Keepdims,
    Exclude,
    NoBias,
    NumGroup,
    NumFilter,
    Kernel,
    Stride,
    Pad,
    ActType,
    PoolType,
    PoolConvention,
    Flatten,
    NumHidden,
    MultiOutput,
    NumArgs,
    Layout,
    Shape,
    GlobalStats,
    Momentum,
    Eps,
    P,
    Dim1,
    Dim2,
}

impl AttrKey {
    /// The engine-side key string.
    pub fn as_str(self) -> &'static str {
        match self {
            AttrKey::Scalar => "scalar",
            AttrKey::Low => "low",
            AttrKey::High => "high",
            AttrKey::Loc => "loc",
            AttrKey::Scale => "scale",
            AttrKey::Axis => "axis",
            AttrKey::Axes => "axes",
            AttrKey::Begin => "begin",
            AttrKey::End => "end",
            AttrKey::Mode => "mode",
            AttrKey::Keepdims => "keepdims",
            AttrKey::Exclude => "exclude",
            AttrKey::NoBias => "no_bias",
            AttrKey::NumGroup => "num_group",
            AttrKey::NumFilter => "num_filter",
            AttrKey::Kernel => "kernel",
            AttrKey::Stride => "stride",
            AttrKey::Pad => "pad",
            AttrKey::ActType => "act_type",
            AttrKey::PoolType => "pool_type",
            AttrKey::PoolConvention => "pooling_convention",
            AttrKey::Flatten => "flatten",
            AttrKey::NumHidden => "num_hidden",
            AttrKey::MultiOutput => "multi_output",
            AttrKey::NumArgs => "num_args",
            AttrKey::Layout => "layout",
            AttrKey::Shape => "shape",
            AttrKey::GlobalStats => "use_global_stats",
            AttrKey::Momentum => "momentum",
            AttrKey::Eps => "eps",
            AttrKey::P => "p",
            AttrKey::Dim1 => "dim1",
            AttrKey::Dim2 => "dim2",
        }
    }

    /// Inverse of [`AttrKey::as_str`].
    pub fn from_str(key: &str) -> Option<AttrKey> {
        ALL_KEYS.iter().copied().find(|k| k.as_str() == key)
    }
}

const ALL_KEYS: [AttrKey; 33] = [
    AttrKey::Scalar,
    AttrKey::Low,
    AttrKey::High,
    AttrKey::Loc,
    AttrKey::Scale,
    AttrKey::Axis,
    AttrKey::Axes,
    AttrKey::Begin,
    AttrKey::End,
    AttrKey::Mode,
    AttrKey::Keepdims,
    AttrKey::Exclude,
    AttrKey::NoBias,
    AttrKey::NumGroup,
    AttrKey::NumFilter,
    AttrKey::Kernel,
    AttrKey::Stride,
    AttrKey::Pad,
    AttrKey::ActType,
    AttrKey::PoolType,
    AttrKey::PoolConvention,
    AttrKey::Flatten,
    AttrKey::NumHidden,
    AttrKey::MultiOutput,
    AttrKey::NumArgs,
    AttrKey::Layout,
    AttrKey::Shape,
    AttrKey::GlobalStats,
    AttrKey::Momentum,
    AttrKey::Eps,
    AttrKey::P,
    AttrKey::Dim1,
    AttrKey::Dim2,
];

impl Serialize for AttrKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AttrKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        AttrKey::from_str(&key)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown attribute key '{key}'")))
    }
}
