//! Top-level orchestrator: resolves a config, wires caches/events/ports, and runs the
//! worker pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::cache::{CachedData, SharedDataManager};
use crate::config::{Body, DagConfig, OperatorConfigRaw, RuntimeKnobs};
use crate::dag;
use crate::error::{ResolveError, RuntimeError};
use crate::event::{worker_id, Event, EventId, EventMeta};
use crate::events::EventManager;
use crate::operator::{Operator, OperatorInfo, ResolvedDependency};
use crate::port::{InputSpec, LatestSpec, OutputTarget, Port};
use crate::processor::{Op, SeqProcessor};

const STALE_SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Resolves `algorithm` names to concrete [`Op`] instances, mirroring the reference's
/// `REGISTER_OP` macro registry with an explicit map a caller builds ahead of time.
pub trait OpFactory: Send + Sync {
    fn create(&self, algorithm: &str) -> Option<Box<dyn Op>>;
}

/// Fresh event id per `(producer op index, producer output index, consumer trigger id)`;
/// `trigger_id == NO_DOWNSTREAM` marks an output's sentinel self-edge.
const NO_DOWNSTREAM: usize = usize::MAX;

pub struct DagStreaming {
    shared: Arc<SharedDataManager>,
    events: Arc<EventManager>,
    operators: Vec<Arc<Operator>>,
    knobs: RuntimeKnobs,
    stop_sweep: Arc<AtomicBool>,
    sweep_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl std::fmt::Debug for DagStreaming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DagStreaming")
            .field("operator_count", &self.operators.len())
            .field("knobs", &self.knobs)
            .finish_non_exhaustive()
    }
}

impl DagStreaming {
    pub fn build(config: &DagConfig, knobs: RuntimeKnobs, factory: &dyn OpFactory) -> Result<Self, RuntimeError> {
        let resolved = dag::resolve(config)?;

        let shared = Arc::new(SharedDataManager::new());
        Self::register_caches(&resolved, &shared)?;
        for op in &resolved {
            shared.register_operator_info(&op.name).map_err(RuntimeError::Cache)?;
        }

        let (event_metas, edge_ids, trigger_event_ids, source_triggers) = Self::assign_events(&resolved);
        let events = Arc::new(EventManager::init(&event_metas, knobs.max_event_queue_size)?);

        let operators = Self::build_operators(
            &resolved,
            &shared,
            &events,
            &knobs,
            factory,
            &edge_ids,
            &trigger_event_ids,
            &source_triggers,
        )?;

        Ok(Self {
            shared,
            events,
            operators,
            knobs,
            stop_sweep: Arc::new(AtomicBool::new(false)),
            sweep_handle: Mutex::new(None),
        })
    }

    fn register_caches(resolved: &[OperatorConfigRaw], shared: &SharedDataManager) -> Result<(), RuntimeError> {
        let mut names: HashMap<String, (i64, String)> = HashMap::new();
        for op in resolved {
            for out in &op.output {
                let primary = out.data.clone().unwrap_or_else(|| out.event.clone());
                let type_name = out.r#type.clone().unwrap_or_else(|| "Frame".to_string());
                names.entry(primary).or_insert_with(|| (out.hz.unwrap_or(-1), type_name));
                for ds in &out.downstream {
                    names
                        .entry(ds.data.clone())
                        .or_insert_with(|| (ds.hz.unwrap_or(-1), ds.r#type.clone()));
                }
                if out.has_reference {
                    names
                        .entry(format!("{}_RO", out.event))
                        .or_insert_with(|| (-1, "Frame".to_string()));
                }
            }
            for idx in 0..op.trigger.len().max(1) {
                let has_data = op.trigger_data.get(idx).is_some_and(|s| !s.is_empty());
                if has_data {
                    continue;
                }
                names
                    .entry(format!("{}__trigger_{idx}", op.name))
                    .or_insert_with(|| (-1, "Frame".to_string()));
            }
        }
        // frame-cached if hz > 0, typed-cached (dispatched by type name) otherwise.
        for (name, (hz, type_name)) in &names {
            if *hz > 0 {
                shared.register_frame_cached_data(name, *hz).map_err(RuntimeError::Cache)?;
            } else {
                shared.register_cached_data(name, type_name).map_err(RuntimeError::Cache)?;
            }
        }
        Ok(())
    }

    /// Assign a dense event id to every producer-output-edge, plus a fallback id for
    /// any trigger slot no producer inside this DAG feeds (an externally-driven source).
    /// A trigger slot is a "source" iff no internal producer ever fills it here — the
    /// fallback-fill pass below is precisely the set of such slots.
    #[allow(clippy::type_complexity)]
    fn assign_events(
        resolved: &[OperatorConfigRaw],
    ) -> (
        Vec<EventMeta>,
        HashMap<(usize, usize, usize), EventId>,
        Vec<Vec<EventId>>,
        Vec<Vec<bool>>,
    ) {
        let mut next_id: EventId = 0;
        let mut metas = Vec::new();
        let mut edge_ids: HashMap<(usize, usize, usize), EventId> = HashMap::new();
        let mut trigger_ids: Vec<Vec<Option<EventId>>> =
            resolved.iter().map(|op| vec![None; op.trigger.len().max(1)]).collect();

        for (i, op) in resolved.iter().enumerate() {
            for (m, out) in op.output.iter().enumerate() {
                if out.downstream.is_empty() {
                    let id = next_id;
                    next_id += 1;
                    metas.push(EventMeta::new(
                        id,
                        worker_id(i as i32, 0),
                        worker_id(i as i32, 0),
                        format!("{}::{}::sentinel", op.name, out.event),
                    ));
                    edge_ids.insert((i, m, NO_DOWNSTREAM), id);
                    continue;
                }
                for ds in &out.downstream {
                    let id = next_id;
                    next_id += 1;
                    metas.push(EventMeta::new(
                        id,
                        worker_id(i as i32, 0),
                        worker_id(ds.op_id as i32, ds.trigger_id),
                        ds.event.clone(),
                    ));
                    edge_ids.insert((i, m, ds.trigger_id), id);
                    if let Some(slot) = trigger_ids[ds.op_id].get_mut(ds.trigger_id) {
                        *slot = Some(id);
                    }
                }
            }
        }

        let mut is_source: Vec<Vec<bool>> = trigger_ids.iter().map(|v| vec![false; v.len()]).collect();
        for (i, slots) in trigger_ids.iter_mut().enumerate() {
            for (idx, slot) in slots.iter_mut().enumerate() {
                if slot.is_none() {
                    let id = next_id;
                    next_id += 1;
                    metas.push(EventMeta::new(
                        id,
                        worker_id(i as i32, 0),
                        worker_id(i as i32, 0),
                        format!("{}::external_trigger", resolved[i].name),
                    ));
                    *slot = Some(id);
                    is_source[i][idx] = true;
                }
            }
        }

        let trigger_ids = trigger_ids
            .into_iter()
            .map(|v| v.into_iter().map(|o| o.unwrap()).collect())
            .collect();
        (metas, edge_ids, trigger_ids, is_source)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_operators(
        resolved: &[OperatorConfigRaw],
        shared: &Arc<SharedDataManager>,
        events: &Arc<EventManager>,
        knobs: &RuntimeKnobs,
        factory: &dyn OpFactory,
        edge_ids: &HashMap<(usize, usize, usize), EventId>,
        trigger_event_ids: &[Vec<EventId>],
        source_triggers: &[Vec<bool>],
    ) -> Result<Vec<Arc<Operator>>, RuntimeError> {
        let mut operators = Vec::with_capacity(resolved.len());

        for (i, op_cfg) in resolved.iter().enumerate() {
            let (mut ops, mut bypassed, ignore_fail, configs) = Self::instantiate_ops(op_cfg, factory)?;
            let mut processor = SeqProcessor::new(std::mem::take(&mut ops), std::mem::take(&mut bypassed), ignore_fail);
            if !processor.init(op_cfg.input.len(), op_cfg.output.len(), &configs) {
                return Err(RuntimeError::InvalidConfig(format!(
                    "operator `{}` failed processor init",
                    op_cfg.name
                )));
            }

            let num_triggers = op_cfg.trigger.len().max(1);
            let mut ports = Vec::with_capacity(num_triggers);
            let mut is_source = Vec::with_capacity(num_triggers);

            for idx in 0..num_triggers {
                let trigger_event = trigger_event_ids[i][idx];
                let trigger_data_name = op_cfg
                    .trigger_data
                    .get(idx)
                    .filter(|s| !s.is_empty())
                    .cloned()
                    .unwrap_or_else(|| format!("{}__trigger_{idx}", op_cfg.name));
                let trigger_cache = shared.get_shared_data(&trigger_data_name).map_err(RuntimeError::Cache)?;

                let inputs = Self::build_inputs(op_cfg, shared, knobs)?;
                let latests = Self::build_latests(op_cfg, shared)?;
                let outputs = Self::build_outputs(i, op_cfg, shared, edge_ids)?;
                let reference_cache = op_cfg
                    .output
                    .iter()
                    .find(|o| o.has_reference)
                    .map(|o| shared.get_shared_data(&format!("{}_RO", o.event)))
                    .transpose()
                    .map_err(RuntimeError::Cache)?;
                let own_event_name = op_cfg.trigger.get(idx).cloned().unwrap_or_else(|| op_cfg.name.clone());

                ports.push(Arc::new(Port::new(
                    trigger_event,
                    trigger_cache,
                    inputs,
                    latests,
                    own_event_name,
                    reference_cache,
                    outputs,
                    events.clone(),
                    knobs.cached_data_expire_time * 1_000_000,
                )));
                is_source.push(source_triggers[i][idx]);
            }

            let dependencies = Self::build_dependencies(op_cfg, shared)?;
            let info_cache = shared.get_operator_info(&op_cfg.name).map_err(RuntimeError::Cache)?;

            operators.push(Arc::new(Operator::new(
                op_cfg.name.clone(),
                op_cfg.bypass.unwrap_or(false),
                ports,
                is_source,
                Arc::new(Mutex::new(processor)),
                dependencies,
                info_cache,
            )));
        }
        Ok(operators)
    }

    #[allow(clippy::type_complexity)]
    fn instantiate_ops(
        op_cfg: &OperatorConfigRaw,
        factory: &dyn OpFactory,
    ) -> Result<(Vec<Box<dyn Op>>, Vec<bool>, bool, Vec<Option<String>>), RuntimeError> {
        let algorithms: Vec<(String, bool, Option<String>)> = match &op_cfg.body {
            Body::Algorithm(name) => vec![(name.clone(), false, None)],
            Body::Group(group) => {
                if group.op.is_empty() {
                    return Err(RuntimeError::Resolve(ResolveError::EmptyGroup(op_cfg.name.clone())));
                }
                group.op.iter().map(|o| (o.algorithm.clone(), o.bypass, o.config.clone())).collect()
            }
        };
        let ignore_fail = match &op_cfg.body {
            Body::Group(g) => g.seq_config.ignore_fail,
            Body::Algorithm(_) => false,
        };

        let mut ops = Vec::with_capacity(algorithms.len());
        let mut bypassed = Vec::with_capacity(algorithms.len());
        let mut configs = Vec::with_capacity(algorithms.len());
        for (alg, bypass, cfg) in algorithms {
            let op_impl = factory
                .create(&alg)
                .ok_or_else(|| RuntimeError::Resolve(ResolveError::UnknownAlgorithm(alg)))?;
            ops.push(op_impl);
            bypassed.push(bypass);
            configs.push(cfg);
        }
        Ok((ops, bypassed, ignore_fail, configs))
    }

    fn build_inputs(
        op_cfg: &OperatorConfigRaw,
        shared: &SharedDataManager,
        knobs: &RuntimeKnobs,
    ) -> Result<Vec<InputSpec>, RuntimeError> {
        op_cfg
            .input
            .iter()
            .enumerate()
            .map(|(k, name)| {
                Ok(InputSpec {
                    cache: shared.get_shared_data(name).map_err(RuntimeError::Cache)?,
                    offset_us: (op_cfg.input_offset.get(k).copied().unwrap_or(0.0) * 1_000_000.0) as i64,
                    window: op_cfg.input_window.get(k).copied().unwrap_or(knobs.cached_data_tolerate_offset),
                    wait_us: (op_cfg.input_wait.get(k).copied().unwrap_or(-1.0) * 1_000_000.0) as i64,
                })
            })
            .collect()
    }

    fn build_latests(op_cfg: &OperatorConfigRaw, shared: &SharedDataManager) -> Result<Vec<LatestSpec>, RuntimeError> {
        op_cfg
            .latest
            .iter()
            .enumerate()
            .map(|(k, name)| {
                Ok(LatestSpec {
                    cache: shared.get_shared_data(name).map_err(RuntimeError::Cache)?,
                    tolerate_offset_us: (op_cfg.latest_tolerate_offset.get(k).copied().unwrap_or(-1.0) * 1_000_000.0)
                        as i64,
                })
            })
            .collect()
    }

    fn build_outputs(
        i: usize,
        op_cfg: &OperatorConfigRaw,
        shared: &SharedDataManager,
        edge_ids: &HashMap<(usize, usize, usize), EventId>,
    ) -> Result<Vec<OutputTarget>, RuntimeError> {
        let mut outputs = Vec::new();
        for (m, out) in op_cfg.output.iter().enumerate() {
            if out.downstream.is_empty() {
                let primary_name = out.data.clone().unwrap_or_else(|| out.event.clone());
                let cache = shared.get_shared_data(&primary_name).map_err(RuntimeError::Cache)?;
                let id = edge_ids[&(i, m, NO_DOWNSTREAM)];
                outputs.push(OutputTarget::new(id, cache, true, 0));
                continue;
            }

            let mut primary_written: HashMap<String, bool> = HashMap::new();
            for ds in &out.downstream {
                let cache = shared.get_shared_data(&ds.data).map_err(RuntimeError::Cache)?;
                let is_primary = !primary_written.contains_key(&ds.data);
                primary_written.insert(ds.data.clone(), true);
                let period_us = match (out.hz, ds.hz) {
                    (Some(up_hz), Some(down_hz)) if up_hz > 0 && (down_hz as u32) < up_hz as u32 => {
                        1_000_000 / down_hz as u64 - 1_000_000 / (2 * up_hz as u64)
                    }
                    _ => 0,
                };
                let id = edge_ids[&(i, m, ds.trigger_id)];
                outputs.push(OutputTarget::new(id, cache, is_primary, period_us));
            }
        }
        Ok(outputs)
    }

    fn build_dependencies(
        op_cfg: &OperatorConfigRaw,
        shared: &SharedDataManager,
    ) -> Result<Vec<ResolvedDependency>, RuntimeError> {
        op_cfg
            .dependency
            .iter()
            .map(|dep| {
                let policy = dep.policy.ok_or_else(|| {
                    RuntimeError::Resolve(ResolveError::MissingDependencyPolicy {
                        op: op_cfg.name.clone(),
                        target: dep.name.clone(),
                    })
                })?;
                Ok(ResolvedDependency {
                    name: dep.name.clone(),
                    policy,
                    wait_time_us: dep.wait_time * 1_000,
                    info_cache: shared.get_operator_info(&dep.name).map_err(RuntimeError::Cache)?,
                })
            })
            .collect()
    }

    /// Run every operator's workers (reverse topological order, sinks first) and start
    /// the stale-sweep thread if enabled.
    pub fn schedule(&self) {
        for op in self.operators.iter().rev() {
            op.run();
        }
        if self.knobs.enable_timing_remove_stale_data {
            let shared = self.shared.clone();
            let stop = self.stop_sweep.clone();
            let stale_time = self.knobs.shared_data_stale_time * 1_000_000;
            let handle = std::thread::Builder::new()
                .name("stale-sweep".to_string())
                .spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        std::thread::sleep(STALE_SWEEP_INTERVAL);
                        shared.remove_stale_data(stale_time);
                    }
                })
                .expect("failed to spawn stale-sweep thread");
            *self.sweep_handle.lock() = Some(handle);
        }
    }

    /// Stop the stale sweep, then every operator's workers in forward topological order.
    pub fn shutdown(&self) {
        self.stop_sweep.store(true, Ordering::Release);
        if let Some(handle) = self.sweep_handle.lock().take() {
            let _ = handle.join();
        }
        for op in &self.operators {
            let events = &self.events;
            op.stop(|idx| {
                let _ = events.publish(Event::sentinel(op.trigger_event(idx)));
            });
        }
    }

    pub fn shared_data(&self) -> &Arc<SharedDataManager> {
        &self.shared
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub fn operator_info_cache(&self, name: &str) -> Result<Arc<CachedData<OperatorInfo>>, RuntimeError> {
        self.shared.get_operator_info(name).map_err(RuntimeError::Cache)
    }
}
