//! The data-plane half of an operator: one `Port` per `(operator, trigger)` pairs a
//! blocking trigger subscription with bundled-input lookups and gated downstream publish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::FrameCachedData;
use crate::event::{Event, EventId};
use crate::events::EventManager;
use crate::frame::Frame;

/// One fetch of a bundled `input[i]`: which cache, at what offset from the trigger
/// timestamp, with what tolerance and retry budget.
pub struct InputSpec {
    pub cache: Arc<FrameCachedData>,
    /// Microseconds, signed: `trigger_ts + offset` is the lookup key.
    pub offset_us: i64,
    pub window: i64,
    /// Retry budget in microseconds; `<= 0` means "do not retry on miss".
    pub wait_us: i64,
}

pub struct LatestSpec {
    pub cache: Arc<FrameCachedData>,
    /// `<= 0` means always accept the newest entry regardless of age.
    pub tolerate_offset_us: i64,
}

/// One downstream edge fed by this port's publish. `is_primary` marks the edge
/// responsible for the physical cache write (the first, canonically-named consumer);
/// every other edge sharing the identical cache Arc just rides the same write and emits
/// its own event, matching the reference's "no-copy downstream: cache already populated".
pub struct OutputTarget {
    pub event_id: EventId,
    pub cache: Arc<FrameCachedData>,
    pub is_primary: bool,
    pub period_us: u64,
    last_ts: AtomicU64,
}

impl OutputTarget {
    pub fn new(event_id: EventId, cache: Arc<FrameCachedData>, is_primary: bool, period_us: u64) -> Self {
        Self {
            event_id,
            cache,
            is_primary,
            period_us,
            last_ts: AtomicU64::new(0),
        }
    }
}

const INPUT_RETRY_INTERVAL: Duration = Duration::from_micros(2_000);

/// Per-`(operator, trigger)` data-plane handle.
pub struct Port {
    trigger_event: EventId,
    trigger_cache: Arc<FrameCachedData>,
    inputs: Vec<InputSpec>,
    latests: Vec<LatestSpec>,
    own_event_name: String,
    reference_cache: Option<Arc<FrameCachedData>>,
    outputs: Vec<OutputTarget>,
    events: Arc<EventManager>,
    expire_time_us: u64,
}

impl Port {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trigger_event: EventId,
        trigger_cache: Arc<FrameCachedData>,
        inputs: Vec<InputSpec>,
        latests: Vec<LatestSpec>,
        own_event_name: impl Into<String>,
        reference_cache: Option<Arc<FrameCachedData>>,
        outputs: Vec<OutputTarget>,
        events: Arc<EventManager>,
        expire_time_us: u64,
    ) -> Self {
        Self {
            trigger_event,
            trigger_cache,
            inputs,
            latests,
            own_event_name: own_event_name.into(),
            reference_cache,
            outputs,
            events,
            expire_time_us,
        }
    }

    /// The event id this port blocks on in [`Self::get_trigger_data`], so the stop
    /// protocol can wake the right queue instead of a guessed one.
    pub fn trigger_event(&self) -> EventId {
        self.trigger_event
    }

    /// Block on the trigger queue; `None` on shutdown sentinel or a cache miss, never
    /// an error — a miss here means the publishing side raced the cache write, which
    /// this port treats as "try again next trigger", not a fatal condition.
    pub fn get_trigger_data(&self) -> Option<(u64, Arc<Frame>)> {
        let event = self.events.subscribe(self.trigger_event, false).ok().flatten()?;
        if event.is_sentinel() {
            return None;
        }
        let frame = self.trigger_cache.get(event.timestamp, 0)?;
        if frame.utime != event.timestamp {
            log::warn!(
                "trigger cache utime mismatch: event ts {} vs frame utime {}",
                event.timestamp,
                frame.utime
            );
            return None;
        }
        Some((event.timestamp, frame))
    }

    /// Bundle every declared `input[i]`, retrying within each input's own wait budget.
    pub fn get_input_data(&self, trigger_ts: u64) -> Vec<Option<Arc<Frame>>> {
        self.inputs
            .iter()
            .map(|spec| self.fetch_one_input(trigger_ts, spec))
            .collect()
    }

    fn fetch_one_input(&self, trigger_ts: u64, spec: &InputSpec) -> Option<Arc<Frame>> {
        let key = (trigger_ts as i64 + spec.offset_us) as u64;
        if let Some(frame) = spec.cache.get(key, spec.window) {
            return Some(frame);
        }
        if spec.wait_us <= 0 {
            return None;
        }
        let trials = (spec.wait_us / 2_000) + 1;
        for _ in 0..trials {
            if let Some(newest) = spec.cache.get_newest() {
                if newest.utime + self.expire_time_us < trigger_ts {
                    return None;
                }
            }
            std::thread::sleep(INPUT_RETRY_INTERVAL);
            if let Some(frame) = spec.cache.get(key, spec.window) {
                return Some(frame);
            }
        }
        None
    }

    pub fn get_latest_data(&self, trigger_ts: u64) -> Vec<Option<Arc<Frame>>> {
        self.latests
            .iter()
            .map(|spec| {
                let frame = spec.cache.get_newest()?;
                if spec.tolerate_offset_us > 0 {
                    let diff = (trigger_ts as i64 - frame.utime as i64).unsigned_abs();
                    if diff as i64 > spec.tolerate_offset_us {
                        return None;
                    }
                }
                Some(frame)
            })
            .collect()
    }

    /// Publish a produced frame: footprint, optional reference copy, then fan out to
    /// every downstream edge under its own rate-limit gate.
    pub fn publish(&self, ts: u64, mut frame: Frame) {
        frame.add_footprint(self.own_event_name.clone());
        let frame = Arc::new(frame);

        if let Some(ref_cache) = &self.reference_cache {
            if !ref_cache.put(ts, Arc::new(frame.deep_copy())) {
                log::debug!("reference cache put skipped (duplicate key) for ts {ts}");
            }
        }

        for target in &self.outputs {
            let last = target.last_ts.load(Ordering::Relaxed);
            if ts > last && (ts - last) < target.period_us {
                continue;
            }
            if target.is_primary {
                let ok = target.cache.put(ts, Arc::new(frame.deep_copy()));
                if ok {
                    let _ = self.events.publish(Event::new(target.event_id, ts));
                }
            } else {
                let _ = self.events.publish(Event::new(target.event_id, ts));
            }
            target.last_ts.store(ts, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventMeta;

    fn manager(ids: &[(EventId, &str)]) -> Arc<EventManager> {
        let metas: Vec<_> = ids.iter().map(|&(id, name)| EventMeta::new(id, 0, 1, name)).collect();
        Arc::new(EventManager::init(&metas, 4).unwrap())
    }

    #[test]
    fn trigger_fetch_rejects_sentinel_and_utime_mismatch() {
        let events = manager(&[(1, "trigger")]);
        let cache = Arc::new(FrameCachedData::new("trigger_data", 10));
        cache.put(100, Arc::new(Frame::new(100, "src", serde_json::Value::Null)));
        let port = Port::new(1, cache, vec![], vec![], "trigger", None, vec![], events.clone(), 60_000_000);

        events.publish(Event::sentinel(1)).unwrap();
        assert!(port.get_trigger_data().is_none());

        events.publish(Event::new(1, 100)).unwrap();
        let (ts, frame) = port.get_trigger_data().unwrap();
        assert_eq!(ts, 100);
        assert_eq!(frame.utime, 100);
    }

    #[test]
    fn input_bundling_applies_signed_offset_and_tolerance() {
        let events = manager(&[(1, "trigger")]);
        let trigger_cache = Arc::new(FrameCachedData::new("trigger_data", 10));
        let input_cache = Arc::new(FrameCachedData::new("input_data", 10));
        input_cache.put(95, Arc::new(Frame::new(95, "s", serde_json::Value::Null)));
        let input = InputSpec {
            cache: input_cache,
            offset_us: -5,
            window: 2,
            wait_us: -1,
        };
        let port = Port::new(1, trigger_cache, vec![input], vec![], "trigger", None, vec![], events, 60_000_000);
        let bundled = port.get_input_data(100);
        assert!(bundled[0].is_some());
        assert_eq!(bundled[0].as_ref().unwrap().utime, 95);
    }

    #[test]
    fn publish_gates_on_output_period_but_not_on_first_write() {
        let events = manager(&[(1, "trigger"), (2, "downstream")]);
        let trigger_cache = Arc::new(FrameCachedData::new("trigger_data", 10));
        let out_cache = Arc::new(FrameCachedData::new("out_data", -1));
        let target = OutputTarget::new(2, out_cache.clone(), true, 1_000);
        let port = Port::new(1, trigger_cache, vec![], vec![], "trigger", None, vec![target], events.clone(), 60_000_000);

        // `output_last` starts at 0, and real timestamps are large epoch values, so the
        // first publish is never caught by the `ts > output_last` rate-limit gate.
        port.publish(1_000_000, Frame::new(1_000_000, "op", serde_json::Value::Null));
        assert!(events.subscribe(2, true).unwrap().is_some());
        assert!(out_cache.get(1_000_000, 0).is_some());

        // second publish within the rate-limit window is skipped entirely.
        port.publish(1_000_500, Frame::new(1_000_500, "op", serde_json::Value::Null));
        assert!(events.subscribe(2, true).unwrap().is_none());
        assert!(out_cache.get(1_000_500, 0).is_none());
    }

    #[test]
    fn no_copy_target_emits_event_without_duplicate_cache_write() {
        let events = manager(&[(1, "trigger"), (2, "primary_edge"), (3, "alias_edge")]);
        let trigger_cache = Arc::new(FrameCachedData::new("trigger_data", 10));
        let shared_cache = Arc::new(FrameCachedData::new("out_data", -1));
        let primary = OutputTarget::new(2, shared_cache.clone(), true, 0);
        let alias = OutputTarget::new(3, shared_cache.clone(), false, 0);
        let port = Port::new(
            1,
            trigger_cache,
            vec![],
            vec![],
            "trigger",
            None,
            vec![primary, alias],
            events.clone(),
            60_000_000,
        );
        port.publish(100, Frame::new(100, "op", serde_json::Value::Null));
        assert!(events.subscribe(2, true).unwrap().is_some());
        assert!(events.subscribe(3, true).unwrap().is_some());
        assert_eq!(shared_cache.len(), 1);
    }
}
