//! Parameter initialization.
//!
//! Initialization touches the engine's shared random-number stream, so the
//! whole pass runs under a process-wide lock and visits parameters in sorted
//! name order; with a fixed seed two structurally identical graphs receive
//! identical values.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::engine::Engine;
use crate::graph::Graph;
use crate::tensor::{ArraySink, Initializer, XavierFactor};

static INIT_LOCK: Lazy<Mutex<()>> = Lazy::new(Mutex::default);

/// Custom per-parameter initializer callback, receiving the tensor and its
/// name.
pub type CustomInit<'a> = &'a dyn Fn(&dyn ArraySink, &str) -> Result<()>;

impl<E: Engine> Graph<E> {
    /// Seeds the device random generator, then initializes every parameter
    /// in deterministic sorted-by-name order: the custom callback when one
    /// is given, otherwise the registered initializer or the default policy.
    /// The graph is unusable for forward/backward until this (or a parameter
    /// load) has run.
    pub fn initialize(&mut self, seed: u64, custom: Option<CustomInit<'_>>) -> Result<()> {
        let _guard = INIT_LOCK.lock().expect("initialization lock poisoned");
        self.engine.random_seed(self.ctx, seed)?;
        for (name, param) in &self.params {
            match custom {
                Some(init) => init(param, name)?,
                None => init_param(&self.initializers, name, param)?,
            }
        }
        self.initialized = true;
        debug!(seed, params = self.params.len(), "initialized parameters");
        Ok(())
    }
}

/// Default policy: a registered initializer wins; otherwise internal names
/// (leading `_`) and bias names (trailing `_bias`) are zero-filled and
/// everything else gets a uniform Xavier fill with averaging factor and
/// magnitude 3.
fn init_param(
    initializers: &BTreeMap<String, Arc<dyn Initializer>>,
    name: &str,
    param: &dyn ArraySink,
) -> Result<()> {
    if let Some(init) = initializers.get(name) {
        return init.initialize(param);
    }
    if name.starts_with('_') || name.ends_with("_bias") {
        param.zeros()
    } else {
        param.xavier(false, XavierFactor::Avg, 3.0)
    }
}
