//! The opaque time-stamped payload that flows through the pipeline.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use serde_json::Value;

/// A time-stamped payload, shared (reference-counted) across every consumer that reads
/// it out of a [`crate::cache::cached_data::CachedData`].
///
/// The footprint set records every output-event name this frame has been published
/// under, for loop diagnostics. It is guarded by its own mutex rather than folded into
/// the rest of `Frame`'s fields so a non-blocking footprint probe never contends with a
/// field the processing chain actually needs.
#[derive(Debug)]
pub struct Frame {
    /// Producer timestamp, microseconds. This is the key frames are cached under.
    pub utime: u64,
    /// Wall-clock microseconds when this frame was received by the runtime.
    pub recv_utime: u64,
    pub sender: String,
    /// Opaque payload; concrete operators interpret this, the runtime never does.
    pub payload: Value,
    pub supplement: HashMap<String, String>,
    footprint: Mutex<HashSet<String>>,
}

impl Frame {
    pub fn new(utime: u64, sender: impl Into<String>, payload: Value) -> Self {
        Self {
            utime,
            recv_utime: 0,
            sender: sender.into(),
            payload,
            supplement: HashMap::new(),
            footprint: Mutex::new(HashSet::new()),
        }
    }

    /// Deep-copy this frame, as `Port::publish` does before handing a copy downstream.
    ///
    /// The footprint set is copied too (the reference implementation copies the whole
    /// `Frame` struct, footprint included, via its copy constructor before mutating it).
    pub fn deep_copy(&self) -> Self {
        Self {
            utime: self.utime,
            recv_utime: self.recv_utime,
            sender: self.sender.clone(),
            payload: self.payload.clone(),
            supplement: self.supplement.clone(),
            footprint: Mutex::new(self.footprint.lock().clone()),
        }
    }

    /// Record that this frame has passed through `event_name`. Always blocks briefly to
    /// acquire the lock — a successful add is guaranteed visible to subsequent reads.
    pub fn add_footprint(&self, event_name: impl Into<String>) {
        self.footprint.lock().insert(event_name.into());
    }

    /// Non-blocking probe: `false` may mean either "not present" or "lock contended".
    pub fn has_footprint(&self, event_name: &str) -> bool {
        match self.footprint.try_lock() {
            Some(set) => set.contains(event_name),
            None => false,
        }
    }

    /// Blocking read of the full footprint set, for tests and diagnostics.
    pub fn footprint_snapshot(&self) -> HashSet<String> {
        self.footprint.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footprint_add_is_visible_to_blocking_read() {
        let f = Frame::new(1, "src", Value::Null);
        f.add_footprint("topic_a");
        assert!(f.has_footprint("topic_a"));
        assert!(f.footprint_snapshot().contains("topic_a"));
    }

    #[test]
    fn deep_copy_preserves_footprint_and_payload() {
        let f = Frame::new(5, "src", serde_json::json!({"x": 1}));
        f.add_footprint("topic_a");
        let copy = f.deep_copy();
        assert_eq!(copy.utime, 5);
        assert!(copy.has_footprint("topic_a"));
        assert_eq!(copy.payload, serde_json::json!({"x": 1}));
    }
}
