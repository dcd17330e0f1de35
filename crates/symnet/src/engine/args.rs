//! Bounded cache for marshalled operator arguments.
//!
//! Every operator/attribute call hands the engine its arguments as native
//! strings. Allocating and freeing those per call is wasteful and error-prone
//! across the foreign boundary, so formatted values are interned here. The
//! cache holds a fixed number of entries; a miss evicts the single
//! least-recently-used entry found by linear scan, which is acceptable at
//! this capacity.

use std::collections::{BTreeMap, HashMap};
use std::ffi::CString;
use std::fmt;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use super::attr::AttrKey;

/// Fixed capacity of the process-wide marshalling cache.
pub const ARG_CACHE_CAPACITY: usize = 256;

/// An interned engine-side string. The cache keeps one reference; in-flight
/// calls keep their own, so eviction can never free a string still in use.
pub type NativeStr = Arc<CString>;

struct Slot {
    key: String,
    native: Option<NativeStr>,
    last_use: u64,
}

/// LRU-by-linear-scan string intern table.
pub struct ArgCache {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
    tick: u64,
}

impl ArgCache {
    fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot {
                key: String::new(),
                native: None,
                last_use: 0,
            });
        }
        ArgCache {
            slots,
            index: HashMap::with_capacity(capacity),
            tick: 1,
        }
    }

    /// Returns the native string for the printed form of `value`, interning it
    /// on a miss and refreshing its recency on a hit.
    pub fn intern(&mut self, value: &dyn fmt::Display) -> NativeStr {
        let key = value.to_string();
        if let Some(&i) = self.index.get(&key) {
            self.slots[i].last_use = self.tick;
            self.tick += 1;
            return self.slots[i]
                .native
                .clone()
                .expect("indexed cache slot is empty");
        }

        // Miss: evict the slot with the smallest last-use tick.
        let mut victim = 0;
        let mut oldest = self.tick;
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.last_use < oldest {
                oldest = slot.last_use;
                victim = i;
            }
        }
        if self.slots[victim].native.take().is_some() {
            self.index.remove(&self.slots[victim].key);
        }

        let native = Arc::new(CString::new(key.clone()).expect("attribute value contains NUL"));
        self.slots[victim] = Slot {
            key: key.clone(),
            native: Some(Arc::clone(&native)),
            last_use: self.tick,
        };
        self.index.insert(key, victim);
        self.tick += 1;
        native
    }

    #[cfg(test)]
    fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.native.is_some()).count()
    }
}

static ARG_CACHE: Lazy<Mutex<ArgCache>> =
    Lazy::new(|| Mutex::new(ArgCache::new(ARG_CACHE_CAPACITY)));

/// Interns one value through the process-wide cache.
pub fn native_str(value: &dyn fmt::Display) -> NativeStr {
    ARG_CACHE
        .lock()
        .expect("argument cache poisoned")
        .intern(value)
}

/// Attributes marshalled into the engine's string-keyed form.
#[derive(Clone, Debug, Default)]
pub struct AttrPack {
    pairs: Vec<(&'static str, NativeStr)>,
}

impl AttrPack {
    pub fn pairs(&self) -> &[(&'static str, NativeStr)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Converts a typed attribute map into the engine's native form, interning
/// every value through the process-wide cache.
pub fn marshal(attrs: &BTreeMap<AttrKey, String>) -> AttrPack {
    let mut cache = ARG_CACHE.lock().expect("argument cache poisoned");
    let pairs = attrs
        .iter()
        .map(|(key, value)| (key.as_str(), cache.intern(value)))
        .collect();
    AttrPack { pairs }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_returns_same_allocation() {
        let mut cache = ArgCache::new(4);
        let a = cache.intern(&"relu");
        let b = cache.intern(&"relu");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.occupied(), 1);
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let mut cache = ArgCache::new(4);
        for i in 0..100 {
            cache.intern(&i);
        }
        assert_eq!(cache.occupied(), 4);
        assert_eq!(cache.index.len(), 4);
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let mut cache = ArgCache::new(3);
        cache.intern(&"a");
        cache.intern(&"b");
        cache.intern(&"c");
        // Refresh "a" so "b" becomes the oldest.
        cache.intern(&"a");
        cache.intern(&"d");
        assert!(cache.index.contains_key("a"));
        assert!(!cache.index.contains_key("b"));
        assert!(cache.index.contains_key("c"));
        assert!(cache.index.contains_key("d"));
    }

    #[test]
    fn evicted_value_survives_while_referenced() {
        let mut cache = ArgCache::new(1);
        let a = cache.intern(&"keep");
        cache.intern(&"evict");
        assert_eq!(a.as_ref().to_str().unwrap(), "keep");
    }

    #[test]
    fn marshal_formats_typed_keys() {
        let mut attrs = BTreeMap::new();
        attrs.insert(AttrKey::NumHidden, "10".to_string());
        attrs.insert(AttrKey::Flatten, "1".to_string());
        let pack = marshal(&attrs);
        let keys: Vec<&str> = pack.pairs().iter().map(|(k, _)| *k).collect();
        assert!(keys.contains(&"num_hidden"));
        assert!(keys.contains(&"flatten"));
    }
}
