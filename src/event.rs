//! Discrete events and their static metadata.
//!
//! An [`Event`] carries only a timestamp and bookkeeping; the payload it announces lives
//! in a [`crate::cache::cached_data::CachedData`] keyed by that same timestamp.

use serde::{Deserialize, Serialize};

/// Dense identifier for one event (one DAG edge), assigned by [`crate::streaming`].
pub type EventId = i32;

/// Identifier for one operator, equal to its topological rank after resolution.
pub type OperatorId = i32;

/// Number of bits reserved for the trigger index inside a [`WorkerId`].
const TRIGGER_INDEX_BITS: u32 = 15;

/// Composite identifier for one worker thread: `(operator_id << 15) | trigger_index`.
///
/// `trigger_index` must be `< 2^15`; this is enforced in [`worker_id`].
pub type WorkerId = i64;

/// Encode an operator id and trigger index into a [`WorkerId`].
///
/// # Panics
/// Panics if `trigger_index >= 2^15` — this is a config-authoring bug caught well before
/// any thread starts, not a runtime condition worth a `Result`.
pub fn worker_id(operator_id: OperatorId, trigger_index: usize) -> WorkerId {
    assert!(
        trigger_index < (1 << TRIGGER_INDEX_BITS),
        "trigger_index {trigger_index} exceeds 2^{TRIGGER_INDEX_BITS}"
    );
    ((operator_id as i64) << TRIGGER_INDEX_BITS) | (trigger_index as i64)
}

/// One message flowing through an event queue.
///
/// `timestamp == 0` is the shutdown sentinel: a worker blocked in a subscribe must treat
/// it as "stop now", never as a real producer timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    pub event_id: EventId,
    pub timestamp: u64,
    /// Wall-clock microseconds at publish time, used only for latency diagnostics.
    pub local_timestamp: u64,
    pub reserve: String,
}

impl Event {
    pub fn new(event_id: EventId, timestamp: u64) -> Self {
        Self {
            event_id,
            timestamp,
            local_timestamp: 0,
            reserve: String::new(),
        }
    }

    /// The sentinel published by `Operator::stop` to wake blocked subscribers.
    pub fn sentinel(event_id: EventId) -> Self {
        Self::new(event_id, 0)
    }

    pub fn is_sentinel(&self) -> bool {
        self.timestamp == 0
    }
}

/// Static description of one DAG edge, built during graph linking and immutable after.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventMeta {
    pub event_id: EventId,
    pub from_node: WorkerId,
    pub to_node: WorkerId,
    pub name: String,
}

impl EventMeta {
    pub fn new(event_id: EventId, from_node: WorkerId, to_node: WorkerId, name: impl Into<String>) -> Self {
        Self {
            event_id,
            from_node,
            to_node,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for EventMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "event_id: {} name: '{}' from_node: {} to_node: {}",
            self.event_id, self.name, self.from_node, self.to_node
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_packs_operator_and_trigger() {
        assert_eq!(worker_id(3, 2), (3 << 15) | 2);
    }

    #[test]
    #[should_panic]
    fn worker_id_rejects_oversized_trigger_index() {
        worker_id(0, 1 << 15);
    }

    #[test]
    fn sentinel_event_has_zero_timestamp() {
        let e = Event::sentinel(7);
        assert!(e.is_sentinel());
        assert_eq!(e.event_id, 7);
    }
}
