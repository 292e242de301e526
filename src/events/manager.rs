//! Bounded publish/subscribe queues keyed by event id.

use std::collections::{HashMap, VecDeque};

use parking_lot::{Condvar, Mutex};

use crate::error::EventError;
use crate::event::{Event, EventId, EventMeta};

struct BoundedQueue {
    capacity: usize,
    items: Mutex<VecDeque<Event>>,
    not_empty: Condvar,
}

impl BoundedQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Push, clearing the whole queue and retrying once if it was at capacity. This is
    /// always non-blocking and always succeeds: `EventManager::publish` never fails.
    fn push_with_overflow_policy(&self, event: Event, event_name: &str) {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            log::error!(
                "EventQueue is FULL. id: {}, name: {}, size: {}",
                event.event_id,
                event_name,
                items.len()
            );
            items.clear();
        }
        items.push_back(event);
        self.not_empty.notify_one();
    }

    fn try_pop(&self) -> Option<Event> {
        self.items.lock().pop_front()
    }

    fn pop_blocking(&self) -> Event {
        let mut items = self.items.lock();
        loop {
            if let Some(e) = items.pop_front() {
                return e;
            }
            self.not_empty.wait(&mut items);
        }
    }

    fn clear(&self) {
        self.items.lock().clear();
    }
}

/// Owns one bounded FIFO queue per event id, plus diagnostic pipeline discovery.
///
/// `publish` never blocks the producer: on overflow it logs an error, clears the whole
/// queue, and pushes the new event, matching the reference's "clear then push" policy.
pub struct EventManager {
    queues: HashMap<EventId, BoundedQueue>,
    metas: HashMap<EventId, EventMeta>,
    pipelines: Vec<Vec<EventId>>,
}

impl EventManager {
    /// Build the manager from the full event-meta list produced by graph resolution.
    /// `queue_capacity` is the `max_event_queue_size` knob.
    pub fn init(events: &[EventMeta], queue_capacity: usize) -> Result<Self, EventError> {
        let mut queues = HashMap::with_capacity(events.len());
        let mut metas = HashMap::with_capacity(events.len());
        for meta in events {
            if metas.contains_key(&meta.event_id) {
                return Err(EventError::DuplicateEvent(meta.event_id));
            }
            queues.insert(meta.event_id, BoundedQueue::new(queue_capacity));
            metas.insert(meta.event_id, meta.clone());
            log::info!("Load EventMeta: {meta}");
        }
        log::info!("Load {} events in DAGStreaming.", queues.len());

        let pipelines = discover_pipelines(events);
        log::info!("Event Pipelines: {}", pipelines.len());
        for (i, pipeline) in pipelines.iter().enumerate() {
            let names: Vec<_> = pipeline
                .iter()
                .filter_map(|id| metas.get(id).map(|m| m.name.as_str()))
                .collect();
            log::info!("Event Pipeline #{i}: {}", names.join(" -> "));
        }

        Ok(Self {
            queues,
            metas,
            pipelines,
        })
    }

    fn queue(&self, event_id: EventId) -> Result<&BoundedQueue, EventError> {
        self.queues.get(&event_id).ok_or(EventError::UnknownEvent(event_id))
    }

    pub fn publish(&self, event: Event) -> Result<(), EventError> {
        let queue = self.queue(event.event_id)?;
        let name = self
            .metas
            .get(&event.event_id)
            .map(|m| m.name.as_str())
            .unwrap_or("<unknown>");
        queue.push_with_overflow_policy(event, name);
        Ok(())
    }

    pub fn subscribe(&self, event_id: EventId, nonblocking: bool) -> Result<Option<Event>, EventError> {
        let queue = self.queue(event_id)?;
        if nonblocking {
            Ok(queue.try_pop())
        } else {
            Ok(Some(queue.pop_blocking()))
        }
    }

    pub fn get_event_meta(&self, event_id: EventId) -> Option<&EventMeta> {
        self.metas.get(&event_id)
    }

    pub fn num_events(&self) -> usize {
        self.queues.len()
    }

    pub fn avg_len_of_event_queues(&self) -> usize {
        if self.queues.is_empty() {
            return 0;
        }
        let total: usize = self.queues.values().map(|q| q.len()).sum();
        total / self.queues.len()
    }

    pub fn max_len_of_event_queues(&self) -> usize {
        self.queues.values().map(|q| q.len()).max().unwrap_or(0)
    }

    pub fn pipelines(&self) -> &[Vec<EventId>] {
        &self.pipelines
    }

    pub fn reset(&self) {
        for q in self.queues.values() {
            q.clear();
        }
    }
}

/// Enumerate head-to-tail event chains by DFS over `e1.to_node == e2.from_node`, rooted
/// at every event whose `from_node` is not some other event's `to_node`.
fn discover_pipelines(events: &[EventMeta]) -> Vec<Vec<EventId>> {
    let n = events.len();
    let mut adj = vec![vec![false; n]; n];
    for (i, e1) in events.iter().enumerate() {
        for (j, e2) in events.iter().enumerate() {
            if i != j && e1.to_node == e2.from_node {
                adj[i][j] = true;
            }
        }
    }
    let heads: Vec<usize> = (0..n).filter(|&i| !(0..n).any(|j| adj[j][i])).collect();

    fn traverse(idx: usize, adj: &[Vec<bool>]) -> Vec<Vec<usize>> {
        let successors: Vec<usize> = (0..adj.len()).filter(|&i| adj[idx][i]).collect();
        if successors.is_empty() {
            return vec![vec![idx]];
        }
        let mut out = Vec::new();
        for s in successors {
            for mut path in traverse(s, adj) {
                path.push(idx);
                out.push(path);
            }
        }
        out
    }

    let mut pipelines = Vec::new();
    for h in heads {
        for path in traverse(h, &adj) {
            pipelines.push(path.into_iter().rev().map(|i| events[i].event_id).collect());
        }
    }
    pipelines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: EventId, from: i64, to: i64, name: &str) -> EventMeta {
        EventMeta::new(id, from, to, name)
    }

    #[test]
    fn publish_then_subscribe_roundtrips() {
        let metas = vec![meta(1, 0, 1, "a_to_b")];
        let mgr = EventManager::init(&metas, 4).unwrap();
        mgr.publish(Event::new(1, 42)).unwrap();
        let got = mgr.subscribe(1, true).unwrap().unwrap();
        assert_eq!(got.event_id, 1);
        assert_eq!(got.timestamp, 42);
    }

    #[test]
    fn overflow_clears_then_pushes_newest() {
        let metas = vec![meta(1, 0, 1, "a_to_b")];
        let mgr = EventManager::init(&metas, 1).unwrap();
        mgr.publish(Event::new(1, 1)).unwrap();
        mgr.publish(Event::new(1, 2)).unwrap();
        // queue capacity 1: overflow clears then the new event lands alone.
        let got = mgr.subscribe(1, true).unwrap().unwrap();
        assert_eq!(got.timestamp, 2);
        assert!(mgr.subscribe(1, true).unwrap().is_none());
    }

    #[test]
    fn nonblocking_subscribe_on_empty_returns_none() {
        let metas = vec![meta(1, 0, 1, "a")];
        let mgr = EventManager::init(&metas, 1).unwrap();
        assert!(mgr.subscribe(1, true).unwrap().is_none());
    }

    #[test]
    fn unknown_event_errors() {
        let mgr = EventManager::init(&[], 1).unwrap();
        assert!(matches!(mgr.publish(Event::new(99, 1)), Err(EventError::UnknownEvent(99))));
    }

    #[test]
    fn duplicate_event_id_rejected_at_init() {
        let metas = vec![meta(1, 0, 1, "a"), meta(1, 1, 2, "b")];
        assert!(matches!(EventManager::init(&metas, 1), Err(EventError::DuplicateEvent(1))));
    }

    #[test]
    fn pipeline_discovery_finds_linear_chain() {
        // worker 0 -> event1 -> worker 1 -> event2 -> worker 2
        let metas = vec![meta(1, 0, 1, "a_to_b"), meta(2, 1, 2, "b_to_c")];
        let mgr = EventManager::init(&metas, 1).unwrap();
        assert_eq!(mgr.pipelines(), &[vec![1, 2]]);
    }
}
