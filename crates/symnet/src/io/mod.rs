//! Persisted artifacts: the parameter binary stream.

mod params;

pub use params::ParamsReader;
