//! Name-keyed registry of caches, plus the event-name -> reference-cache alias map.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::cache::cached_data::CachedData;
use crate::error::CacheError;
use crate::frame::Frame;
use crate::operator::OperatorInfo;

/// Per-cache monotonic counters, read for diagnostics only.
#[derive(Debug, Default)]
pub struct SharedDataStatus {
    pub counter_add: AtomicU64,
    pub counter_remove: AtomicU64,
    pub counter_get: AtomicU64,
}

impl SharedDataStatus {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.counter_add.load(Ordering::Relaxed),
            self.counter_remove.load(Ordering::Relaxed),
            self.counter_get.load(Ordering::Relaxed),
        )
    }
}

/// Capability every registered cache exposes to the manager, independent of its
/// element type. `SharedDataManager` only ever talks to caches through this trait;
/// `FrameCachedData` is the one concrete implementor this runtime needs.
pub trait SharedData: Send + Sync {
    fn name(&self) -> &str;
    fn size(&self) -> usize;
    fn stat(&self) -> &SharedDataStatus;
    /// Clear all memory used. Called by the manager on `reset`.
    fn reset(&self);
    fn remove_stale_data(&self, stale_time: u64);
}

/// A [`CachedData<Frame>`] wrapped to satisfy [`SharedData`]. This is the only concrete
/// cache type the runtime registers; the reference's `FrameCachedData`/`ApplicationCachedData`
/// hierarchy collapses into one generic wrapper since Rust generics make the "what does
/// this cache hold" distinction a type parameter rather than a subclass.
pub struct FrameCachedData {
    inner: CachedData<Frame>,
    stat: SharedDataStatus,
}

impl FrameCachedData {
    pub fn new(name: impl Into<String>, hz: i64) -> Self {
        Self {
            inner: CachedData::new(name, hz),
            stat: SharedDataStatus::default(),
        }
    }

    pub fn put(&self, key: u64, data: Arc<Frame>) -> bool {
        let ok = self.inner.put(key, data);
        if ok {
            self.stat.counter_add.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    pub fn get(&self, key: u64, tolerate: i64) -> Option<Arc<Frame>> {
        self.stat.counter_get.fetch_add(1, Ordering::Relaxed);
        self.inner.get(key, tolerate)
    }

    pub fn get_newest(&self) -> Option<Arc<Frame>> {
        self.stat.counter_get.fetch_add(1, Ordering::Relaxed);
        self.inner.get_newest()
    }

    pub fn get_range(&self, from: u64, to: u64) -> Option<Vec<(u64, Arc<Frame>)>> {
        self.inner.get_range(from, to)
    }

    pub fn hz(&self) -> u32 {
        self.inner.hz()
    }

    pub fn uperiod(&self) -> u64 {
        self.inner.uperiod()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl SharedData for FrameCachedData {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn size(&self) -> usize {
        self.inner.len()
    }

    fn stat(&self) -> &SharedDataStatus {
        &self.stat
    }

    fn reset(&self) {
        self.inner.remove_stale(u64::MAX);
    }

    fn remove_stale_data(&self, stale_time: u64) {
        let before = self.inner.len();
        self.inner.remove_stale(stale_time);
        let removed = before.saturating_sub(self.inner.len());
        if removed > 0 {
            self.stat.counter_remove.fetch_add(removed as u64, Ordering::Relaxed);
        }
    }
}

/// String tag -> constructor, the Rust stand-in for the reference's `SharedDataFactory::get`.
/// Every resolved data type collapses to `FrameCachedData` (Rust generics already erase the
/// "what payload does this cache hold" distinction the reference's `CachedData<T>` subclass
/// hierarchy exists for), except `"Application"`/`"ApplicationCachedData"`, which matches the
/// reference's one concrete non-default type (`ApplicationCachedData : FrameCachedData(10)`)
/// and keeps its fixed hz for config parity. An empty type name is the one case this factory
/// cannot dispatch on, so it is the only one that fails with `CacheError::UnknownType`.
fn known_type(name: &str, type_name: &str) -> Option<FrameCachedData> {
    match type_name {
        "" => None,
        "Application" | "ApplicationCachedData" => Some(FrameCachedData::new(name, 10)),
        _ => Some(FrameCachedData::new(name, -1)),
    }
}

/// Name-keyed registry of caches plus an event-name -> cache alias map used for
/// *reference* cache lookup (`"<event>_RO"` caches that other operators read as
/// `input`/`latest`).
pub struct SharedDataManager {
    caches: DashMap<String, Arc<FrameCachedData>>,
    /// Per-operator `OperatorInfo` running-state caches, keyed by operator name. Kept
    /// separate from `caches` rather than behind a `dyn SharedData` + downcast, since
    /// the only two cache payload types this runtime ever needs are known up front.
    info_caches: DashMap<String, Arc<CachedData<OperatorInfo>>>,
}

impl SharedDataManager {
    pub fn new() -> Self {
        Self {
            caches: DashMap::new(),
            info_caches: DashMap::new(),
        }
    }

    /// Register the self-named running-info cache an `Operator` publishes its
    /// `OperatorInfo` transitions into. hz is always dynamic (0 entries/sec declared).
    pub fn register_operator_info(&self, name: &str) -> Result<(), CacheError> {
        if self.info_caches.contains_key(name) {
            return Err(CacheError::AlreadyRegistered(name.to_string()));
        }
        self.info_caches
            .insert(name.to_string(), Arc::new(CachedData::new(name, 0)));
        Ok(())
    }

    pub fn get_operator_info(&self, name: &str) -> Result<Arc<CachedData<OperatorInfo>>, CacheError> {
        self.info_caches
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CacheError::NotRegistered(name.to_string()))
    }

    /// Register a frame cache directly, as source operators do for their own output.
    pub fn register_frame_cached_data(&self, name: &str, hz: i64) -> Result<(), CacheError> {
        if self.caches.contains_key(name) {
            return Err(CacheError::AlreadyRegistered(name.to_string()));
        }
        self.caches
            .insert(name.to_string(), Arc::new(FrameCachedData::new(name, hz)));
        Ok(())
    }

    /// Register a cache by type name rather than by explicit hz, the path used for
    /// "typed-cached" data (no positive hz declared). Mirrors the reference's
    /// type-registry-based `register_cached_data(name, type)` overload, which dispatches
    /// through `SharedDataFactory::get(type)` instead of constructing the cache directly.
    /// Every type name this runtime recognizes collapses to `FrameCachedData`, since Rust
    /// generics already erase the "what payload does this cache hold" distinction that
    /// motivated the reference's `CachedData<T>` subclass hierarchy.
    pub fn register_cached_data(&self, name: &str, type_name: &str) -> Result<(), CacheError> {
        if self.caches.contains_key(name) {
            return Err(CacheError::AlreadyRegistered(name.to_string()));
        }
        let cache = known_type(name, type_name).ok_or_else(|| CacheError::UnknownType(type_name.to_string()))?;
        self.caches.insert(name.to_string(), Arc::new(cache));
        Ok(())
    }

    pub fn get_shared_data(&self, name: &str) -> Result<Arc<FrameCachedData>, CacheError> {
        self.caches
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CacheError::NotRegistered(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    pub fn reset(&self) {
        for entry in self.caches.iter() {
            entry.value().reset();
        }
        for entry in self.info_caches.iter() {
            entry.value().remove_stale(u64::MAX);
        }
        log::info!("reset all SharedData. nums: {}", self.caches.len());
    }

    pub fn remove_stale_data(&self, stale_time: u64) {
        for entry in self.caches.iter() {
            entry.value().remove_stale_data(stale_time);
        }
        for entry in self.info_caches.iter() {
            entry.value().remove_stale(stale_time);
        }
        log::debug!("removed stale SharedData. nums: {}", self.caches.len());
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

impl Default for SharedDataManager {
    fn default() -> Self {
        Self::new()
    }
}
