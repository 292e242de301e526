//! Owns one worker thread per trigger: dependency gating, the process/publish cycle,
//! and the stop protocol.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cache::CachedData;
use crate::config::DependencyPolicy;
use crate::port::Port;
use crate::processor::{SeqProcessor, Status};

fn now_us() -> u64 {
    Utc::now().timestamp_micros().max(0) as u64
}

/// Running-state snapshot an `Operator` publishes into its own self-named cache, read
/// by every other operator that declares a dependency on it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperatorInfo {
    pub is_running: bool,
    pub start_running_time: u64,
}

/// A dependency target resolved to its concrete info cache, with `wait_time` already
/// converted to microseconds.
pub struct ResolvedDependency {
    pub name: String,
    pub policy: DependencyPolicy,
    pub wait_time_us: u64,
    pub info_cache: Arc<CachedData<OperatorInfo>>,
}

fn wait_sleep(start_running_time: u64, wait_time_us: u64, now: u64) -> Duration {
    let target = start_running_time.saturating_add(wait_time_us);
    Duration::from_micros(target.saturating_sub(now).max(1_000))
}

fn block_sleep(wait_time_us: u64) -> Duration {
    Duration::from_micros(wait_time_us.max(5_000))
}

fn bundle_sleep(wait_time_us: u64, trigger_ts: u64, now: u64) -> Option<Duration> {
    let diff = (now as i64 - trigger_ts as i64).unsigned_abs();
    if diff < wait_time_us {
        Some(Duration::from_micros((wait_time_us - diff).max(1_000)))
    } else {
        None
    }
}

const BLOCK_RETRY_BUDGET: Duration = Duration::from_micros(100_000);
const STOP_JOIN_GRACE: Duration = Duration::from_millis(500);

/// One per-trigger worker. `is_source` picks AUTO's effective mode: source operators
/// (no upstream trigger) never take a `peek`-vs-`process` distinction since there is no
/// "first trigger" special case without an upstream event history; non-source triggers
/// run `peek` once then `process` thereafter, per the reference's EVENT-mode semantics.
/// Both modes share the same blocking `Port` subscribe as their wakeup source — the
/// reference's separate CV primitive for source operators is not reproduced here since
/// nothing in this crate drives a condition variable independently of an event queue.
pub struct Operator {
    name: String,
    bypass: bool,
    ports: Vec<Arc<Port>>,
    is_source: Vec<bool>,
    processor: Arc<Mutex<SeqProcessor>>,
    dependencies: Vec<ResolvedDependency>,
    info_cache: Arc<CachedData<OperatorInfo>>,
    active: Mutex<HashMap<usize, u64>>,
    stop: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Operator {
    pub fn new(
        name: impl Into<String>,
        bypass: bool,
        ports: Vec<Arc<Port>>,
        is_source: Vec<bool>,
        processor: Arc<Mutex<SeqProcessor>>,
        dependencies: Vec<ResolvedDependency>,
        info_cache: Arc<CachedData<OperatorInfo>>,
    ) -> Self {
        assert_eq!(ports.len(), is_source.len());
        Self {
            name: name.into(),
            bypass,
            ports,
            is_source,
            processor,
            dependencies,
            info_cache,
            active: Mutex::new(HashMap::new()),
            stop: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The event id port `idx` blocks on, so the stop protocol can wake the exact
    /// queue that port's worker is parked in.
    pub fn trigger_event(&self, idx: usize) -> crate::event::EventId {
        self.ports[idx].trigger_event()
    }

    fn gate_dependencies(&self, trigger_ts: u64) {
        for dep in &self.dependencies {
            let deadline = Instant::now() + BLOCK_RETRY_BUDGET;
            let mut tries = 0;
            loop {
                let Some(info) = dep.info_cache.get_newest() else {
                    break;
                };
                if !info.is_running {
                    break;
                }
                let now = now_us();
                let slept = match dep.policy {
                    DependencyPolicy::Wait => {
                        std::thread::sleep(wait_sleep(info.start_running_time, dep.wait_time_us, now));
                        true
                    }
                    DependencyPolicy::Block => {
                        std::thread::sleep(block_sleep(dep.wait_time_us));
                        true
                    }
                    DependencyPolicy::Bundle => match bundle_sleep(dep.wait_time_us, trigger_ts, now) {
                        Some(d) => {
                            std::thread::sleep(d);
                            true
                        }
                        None => false,
                    },
                };
                tries += 1;
                if dep.policy == DependencyPolicy::Block {
                    if Instant::now() >= deadline {
                        break;
                    }
                } else if !slept || tries >= 1 {
                    break;
                }
            }
        }
    }

    fn update_info_running(&self, idx: usize) {
        let mut active = self.active.lock();
        active.insert(idx, now_us());
        let start = *active.values().min().unwrap();
        self.info_cache.put(
            now_us(),
            Arc::new(OperatorInfo {
                is_running: true,
                start_running_time: start,
            }),
        );
    }

    fn update_info_idle(&self, idx: usize) {
        let mut active = self.active.lock();
        active.remove(&idx);
        let (is_running, start) = match active.values().min() {
            Some(&s) => (true, s),
            None => (false, 0),
        };
        self.info_cache.put(
            now_us(),
            Arc::new(OperatorInfo {
                is_running,
                start_running_time: start,
            }),
        );
    }

    /// Returns `false` when the processor chain reported `Status::Fatal`, telling
    /// `worker_loop` to exit instead of waiting on the next trigger.
    fn process_and_publish(&self, idx: usize, ts: u64, frame: Arc<crate::frame::Frame>, is_peek: bool) -> bool {
        let port = &self.ports[idx];
        if self.bypass {
            port.publish(ts, frame.deep_copy());
            return true;
        }
        self.gate_dependencies(ts);
        self.update_info_running(idx);

        let inputs = port.get_input_data(ts);
        let latests = port.get_latest_data(ts);

        let mut frames = Vec::with_capacity(1 + inputs.len());
        frames.push(Some(frame));
        frames.extend(inputs);

        let mut out = None;
        let status = {
            let mut processor = self.processor.lock();
            if is_peek {
                processor.peek(&frames, &mut out)
            } else {
                processor.process(&frames, &latests, &mut out)
            }
        };

        self.update_info_idle(idx);

        if status.is_success() {
            if let Some(frame) = out {
                port.publish(ts, frame);
            }
        }

        status != Status::Fatal
    }

    /// Spawn one worker thread per trigger. Workers run until `stop()` is called.
    pub fn run(self: &Arc<Self>) {
        for idx in 0..self.ports.len() {
            let this = Arc::clone(self);
            let is_source = self.is_source[idx];
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", this.name, idx))
                .spawn(move || this.worker_loop(idx, is_source))
                .expect("failed to spawn operator worker thread");
            self.handles.lock().push(handle);
        }
    }

    fn worker_loop(&self, idx: usize, is_source: bool) {
        let mut first = true;
        loop {
            if self.stop.load(Ordering::Acquire) {
                return;
            }
            let Some((ts, frame)) = self.ports[idx].get_trigger_data() else {
                if self.stop.load(Ordering::Acquire) {
                    return;
                }
                continue;
            };
            let ok = if is_source {
                self.process_and_publish(idx, ts, frame, false)
            } else {
                let ok = self.process_and_publish(idx, ts, frame, first);
                first = false;
                ok
            };
            if !ok {
                log::error!("operator `{}`[{idx}] worker exiting: processor reported Status::Fatal", self.name);
                return;
            }
        }
    }

    /// Set the stop flag, wake every blocked worker with a sentinel, then join with a
    /// bounded grace period. A worker that outlives the grace period is abandoned —
    /// Rust has no safe equivalent of `pthread_cancel`.
    pub fn stop(&self, publish_sentinel: impl Fn(usize)) {
        self.stop.store(true, Ordering::Release);
        for idx in 0..self.ports.len() {
            publish_sentinel(idx);
        }
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let deadline = Instant::now() + STOP_JOIN_GRACE;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                log::error!("operator `{}` worker did not stop within grace period; abandoning", self.name);
            }
        }
    }
}
