//! Time-indexed bounded store, keyed by microsecond timestamps.
//!
//! Internally two-level: an outer map from one-second slot index to an inner map from
//! exact timestamp to payload. The two-level split is what makes `remove_stale` and the
//! ascending range scan in `get(from, to, ..)` cheap — both only ever touch whole slots.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Width of one outer slot, in microseconds. Matches the reference's `slot_size_`.
const SLOT_SIZE: u64 = 1_000_000;

/// Declared rate behavior of a [`CachedData`] instance.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Rate {
    /// Fixed period, `1e6 / hz` microseconds, used as the tolerance base unit.
    Static { hz: u32 },
    /// hz inferred from the number of entries in the slot of `last`; base unit 1 ms.
    Dynamic,
}

struct Inner<T> {
    data: BTreeMap<u64, BTreeMap<u64, Arc<T>>>,
    last: u64,
    latest: u64,
}

impl<T> Inner<T> {
    fn new() -> Self {
        Self {
            data: BTreeMap::new(),
            last: 0,
            latest: 0,
        }
    }
}

/// A time-indexed store for one logical data stream.
///
/// Construct with `hz > 0` for a fixed-rate ("static") stream, or `hz <= 0` for a
/// variable-rate ("dynamic") one — this mirrors the reference's single `CachedData<T>`
/// constructor dispatching on the sign of `hz` rather than two distinct Rust types,
/// since both variants share every operation here and only differ in tolerance-base-unit
/// and `hz()` computation.
pub struct CachedData<T> {
    rate: Rate,
    inner: Mutex<Inner<T>>,
    name: String,
}

impl<T> CachedData<T> {
    pub fn new(name: impl Into<String>, hz: i64) -> Self {
        let rate = if hz > 0 {
            Rate::Static { hz: hz as u32 }
        } else {
            Rate::Dynamic
        };
        Self {
            rate,
            inner: Mutex::new(Inner::new()),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn slot_of(key: u64) -> u64 {
        key / SLOT_SIZE
    }

    /// Declared or inferred rate, matching `hz()` in the reference.
    pub fn hz(&self) -> u32 {
        match self.rate {
            Rate::Static { hz } => hz,
            Rate::Dynamic => {
                let inner = self.inner.lock();
                let slot = Self::slot_of(inner.last);
                inner.data.get(&slot).map(|m| m.len() as u32).unwrap_or(0)
            }
        }
    }

    /// `1_000_000 / hz()`, or 0 if `hz() == 0`.
    pub fn uperiod(&self) -> u64 {
        let hz = self.hz();
        if hz == 0 {
            0
        } else {
            1_000_000 / hz as u64
        }
    }

    /// Tolerance base unit: `1e6/hz` for static streams, `1000` μs for dynamic ones.
    fn base_unit(&self) -> u64 {
        match self.rate {
            Rate::Static { hz } if hz > 0 => 1_000_000 / hz as u64,
            _ => 1_000,
        }
    }

    /// Insert `data` at `key`. Fails (returns `false`) if `key` is already present;
    /// never overwrites. On success, `last <- latest; latest <- key`.
    pub fn put(&self, key: u64, data: Arc<T>) -> bool {
        let mut inner = self.inner.lock();
        let slot = Self::slot_of(key);
        let slot_map = inner.data.entry(slot).or_default();
        if slot_map.contains_key(&key) {
            log::warn!("CachedData[{}]: duplicate put at key {}", self.name, key);
            return false;
        }
        slot_map.insert(key, data);
        inner.last = inner.latest;
        inner.latest = inner.latest.max(key);
        true
    }

    /// Exact lookup, falling back to a tolerance-bounded nearest-neighbor scan over
    /// slots `{s-1, s, s+1}` when `tolerate > 0`. Ties keep the first-scanned candidate
    /// (scan order: ascending slot, then ascending key) since the comparison against the
    /// running best uses strict `<`.
    pub fn get(&self, key: u64, tolerate: i64) -> Option<Arc<T>> {
        let inner = self.inner.lock();
        let slot = Self::slot_of(key);
        if let Some(v) = inner.data.get(&slot).and_then(|m| m.get(&key)) {
            return Some(v.clone());
        }
        if tolerate <= 0 {
            return None;
        }
        let tolerate_diff = tolerate as u64 * self.base_unit();
        let mut best: Option<(u64, Arc<T>)> = None;
        let mut best_diff = u64::MAX;
        let candidates = [slot.checked_sub(1), Some(slot), slot.checked_add(1)];
        for s in candidates.into_iter().flatten() {
            let Some(slot_map) = inner.data.get(&s) else {
                continue;
            };
            for (&k, v) in slot_map.iter() {
                let diff = k.abs_diff(key);
                if diff < best_diff && diff < tolerate_diff {
                    best_diff = diff;
                    best = Some((k, v.clone()));
                }
            }
        }
        best.map(|(_, v)| v)
    }

    /// Returns the entry at `latest`, or `None` if empty (or the slot was aged out).
    pub fn get_newest(&self) -> Option<Arc<T>> {
        let inner = self.inner.lock();
        if inner.data.is_empty() {
            return None;
        }
        let slot = Self::slot_of(inner.latest);
        inner.data.get(&slot).and_then(|m| m.get(&inner.latest)).cloned()
    }

    /// Every entry with `from < ts <= to`, ascending. Empty store returns `None`.
    ///
    /// Stops scanning (the whole call returns, not just the current slot) the instant a
    /// key `> to` is found — correct only because outer-slot order and inner-key order
    /// are both ascending, so slot index really is the timestamp's high-order bits.
    pub fn get_range(&self, from: u64, to: u64) -> Option<Vec<(u64, Arc<T>)>> {
        let inner = self.inner.lock();
        if inner.data.is_empty() {
            log::warn!("CachedData[{}]: get_range on empty store", self.name);
            return None;
        }
        let mut out = Vec::new();
        for slot_map in inner.data.values() {
            for (&k, v) in slot_map.iter() {
                if k > to {
                    return Some(out);
                }
                if k > from {
                    out.push((k, v.clone()));
                }
            }
        }
        Some(out)
    }

    /// Drop every whole slot older than `(latest - stale_time) / SLOT_SIZE`.
    /// No-op if `latest < stale_time`.
    pub fn remove_stale(&self, stale_time: u64) {
        let mut inner = self.inner.lock();
        if inner.latest < stale_time {
            return;
        }
        let boundary = (inner.latest - stale_time) / SLOT_SIZE;
        inner.data.retain(|&slot, _| slot >= boundary);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().data.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn latest(&self) -> u64 {
        self.inner.lock().latest
    }
}
