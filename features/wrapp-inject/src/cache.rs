//! Process wide memoization and singleton caches.
//!
//! Entries are keyed by [ProviderId], not by binding, so the same provider shared between
//! independently bound collections observes the same cached results. Nothing is ever evicted.

use std::{
    any::Any,
    hash::{Hash, Hasher},
    sync::{Arc, LazyLock, OnceLock},
};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{
    provider::{FuncImpl, ProviderId},
    types::{downcast_value, DynError, Injectable, SharedError, Value},
};

/// Extracts one key part from an input value
pub type KeyFn = fn(&Value) -> KeyPart;

/// Hashable, comparable copy of one memoization input
pub struct KeyPart(Box<dyn DynKey>);

trait DynKey: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn DynKey) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
}

impl<T: Hash + Eq + Send + Sync + 'static> DynKey for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn DynKey) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        self.hash(&mut state);
    }
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_ref().dyn_eq(other.0.as_ref())
    }
}
impl Eq for KeyPart {}
impl Hash for KeyPart {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.as_ref().dyn_hash(state);
    }
}

pub(crate) fn key_part<T: Injectable + Hash + Eq>(value: &Value) -> KeyPart {
    KeyPart(Box::new(downcast_value::<T>(value)))
}

/// Key of one memoized call; small arities are stored inline
type MemoKey = SmallVec<[KeyPart; 4]>;

type CachedResult = Result<Vec<Value>, SharedError>;

#[derive(Default)]
struct MemoCache {
    entries: Mutex<FxHashMap<MemoKey, Arc<OnceLock<CachedResult>>>>,
}

/// All caches of the process
#[derive(Default)]
pub(crate) struct CacheRegistry {
    memoized: Mutex<FxHashMap<ProviderId, Arc<MemoCache>>>,
    singletons: Mutex<FxHashMap<ProviderId, Arc<OnceLock<CachedResult>>>>,
}

static CACHES: LazyLock<CacheRegistry> = LazyLock::new(CacheRegistry::default);

impl CacheRegistry {
    pub(crate) fn global() -> &'static CacheRegistry {
        &CACHES
    }

    /// Only the lookup holds the registry lock, each provider's cache has its own
    fn memo_cache(&self, id: ProviderId) -> Arc<MemoCache> {
        self.memoized.lock().entry(id).or_default().clone()
    }

    fn singleton_cell(&self, id: ProviderId) -> Arc<OnceLock<CachedResult>> {
        self.singletons.lock().entry(id).or_default().clone()
    }

    /// Number of distinct keys cached for a provider
    #[cfg(test)]
    pub(crate) fn memoized_entries(&self, id: ProviderId) -> usize {
        self.memoized
            .lock()
            .get(&id)
            .map_or(0, |cache| cache.entries.lock().len())
    }
}

/// Wraps `call` so that it runs at most once per distinct input key
pub(crate) fn memoize(id: ProviderId, call: FuncImpl, keys: Arc<[KeyFn]>) -> FuncImpl {
    Arc::new(move |args: &[Value]| {
        let key: MemoKey = args
            .iter()
            .zip(keys.iter())
            .map(|(value, key)| key(value))
            .collect();

        let cache = CacheRegistry::global().memo_cache(id);
        let cell = cache.entries.lock().entry(key).or_default().clone();

        // Concurrent callers with the same key wait for the first result
        let mut computed = false;
        let result = cell.get_or_init(|| {
            computed = true;
            call(args).map_err(SharedError::from)
        });
        if !computed {
            tracing::trace!("Memoized result reused for provider {id}");
        }
        replay(result)
    })
}

/// Wraps `call` so that it runs once for the whole process, whatever its inputs
pub(crate) fn singleton(id: ProviderId, call: FuncImpl) -> FuncImpl {
    Arc::new(move |args: &[Value]| {
        let cell = CacheRegistry::global().singleton_cell(id);
        let result = cell.get_or_init(|| {
            tracing::trace!("Running singleton provider {id}");
            call(args).map_err(SharedError::from)
        });
        replay(result)
    })
}

fn replay(result: &CachedResult) -> Result<Vec<Value>, DynError> {
    match result {
        Ok(values) => Ok(values.clone()),
        Err(error) => Err(Box::new(error.clone())),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::types::erase;

    fn counting(counter: Arc<AtomicUsize>) -> FuncImpl {
        Arc::new(move |args: &[Value]| {
            counter.fetch_add(1, Ordering::SeqCst);
            let input = downcast_value::<u32>(&args[0]);
            Ok(vec![erase(input * 2)])
        })
    }

    #[test]
    fn key_parts_compare_by_value_and_type() {
        let a = key_part::<u32>(&erase(4_u32));
        let b = key_part::<u32>(&erase(4_u32));
        let c = key_part::<u64>(&erase(4_u64));
        assert!(a == b);
        assert!(a != c);
    }

    #[test]
    fn memoize_runs_once_per_key() {
        let counter = Arc::new(AtomicUsize::new(0));
        let id = ProviderId::next();
        let memoized = memoize(id, counting(counter.clone()), Arc::from(vec![key_part::<u32> as KeyFn]));

        for _ in 0..3 {
            let out = memoized(&[erase(21_u32)]).unwrap();
            assert_eq!(downcast_value::<u32>(&out[0]), 42);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        memoized(&[erase(1_u32)]).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(CacheRegistry::global().memoized_entries(id), 2);
    }

    #[test]
    fn memoized_failures_are_replayed() {
        let counter = Arc::new(AtomicUsize::new(0));
        let inner_counter = counter.clone();
        let failing: FuncImpl = Arc::new(move |_: &[Value]| {
            inner_counter.fetch_add(1, Ordering::SeqCst);
            Err("no".into())
        });
        let memoized = memoize(ProviderId::next(), failing, Arc::from(vec![key_part::<u32> as KeyFn]));

        assert_eq!(memoized(&[erase(1_u32)]).unwrap_err().to_string(), "no");
        assert_eq!(memoized(&[erase(1_u32)]).unwrap_err().to_string(), "no");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn memoized_providers_can_reenter_with_other_keys() {
        let counter = Arc::new(AtomicUsize::new(0));
        let id = ProviderId::next();
        let keys: Arc<[KeyFn]> = Arc::from(vec![key_part::<u32> as KeyFn]);
        let doubled = memoize(id, counting(counter.clone()), keys.clone());

        let nested = doubled.clone();
        let outer: FuncImpl = Arc::new(move |args: &[Value]| {
            let input = downcast_value::<u32>(&args[0]);
            let inner = nested(&[erase(input + 1)])?;
            Ok(vec![erase(downcast_value::<u32>(&inner[0]) + 1)])
        });
        let memoized = memoize(id, outer, keys);

        let out = memoized(&[erase(3_u32)]).unwrap();
        assert_eq!(downcast_value::<u32>(&out[0]), 9);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(CacheRegistry::global().memoized_entries(id), 2);
    }

    #[test]
    fn singleton_ignores_inputs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let single = singleton(ProviderId::next(), counting(counter.clone()));

        let first = single(&[erase(1_u32)]).unwrap();
        let second = single(&[erase(5_u32)]).unwrap();
        assert_eq!(downcast_value::<u32>(&first[0]), 2);
        assert_eq!(downcast_value::<u32>(&second[0]), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
