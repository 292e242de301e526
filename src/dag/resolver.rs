//! Four-phase resolution: filter, topological sort, link, reference marking.
//!
//! Pure transformation, no I/O beyond reading the env vars `enable_if`/`disable_if`/
//! `bypass_if` name. The output is immutable input to every other component.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::config::{DagConfig, DownstreamRef, OperatorConfigRaw, OutputSpec};
use crate::error::ResolveError;

pub fn resolve(dag: &DagConfig) -> Result<Vec<OperatorConfigRaw>, ResolveError> {
    let filtered = phase1_filter(dag)?;
    let mut sorted = phase2_sort(filtered)?;
    link_operator(&mut sorted)?;
    set_reference(&mut sorted);
    Ok(sorted)
}

fn phase1_filter(dag: &DagConfig) -> Result<Vec<OperatorConfigRaw>, ResolveError> {
    let mut ops = Vec::new();
    for raw in &dag.op {
        if raw.enable_if.is_some() && raw.disable_if.is_some() {
            return Err(ResolveError::ConflictingFilters(raw.name.clone()));
        }
        let mut op = raw.clone();
        if op.bypass.is_none() {
            op.bypass = Some(false);
            if let Some(var) = &op.bypass_if {
                if std::env::var(var).is_ok() {
                    op.bypass = Some(true);
                    log::info!("{} bypassed by env: ${{{var}}}", op.name);
                }
            }
        }
        if let Some(var) = &op.enable_if {
            if std::env::var(var).is_ok() {
                ops.push(op);
            } else {
                log::info!("{} disabled", op.name);
            }
        } else if let Some(var) = &op.disable_if {
            if std::env::var(var).is_ok() {
                log::info!("{} disabled", op.name);
            } else {
                ops.push(op);
            }
        } else {
            ops.push(op);
        }
    }
    Ok(ops)
}

fn sort_and_check_has_loop(links: &[Vec<usize>]) -> Option<Vec<usize>> {
    let n = links.len();
    let mut indegree = vec![0usize; n];
    for l in links {
        for &t in l {
            indegree[t] += 1;
        }
    }
    let mut queue: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut sorted = Vec::with_capacity(n);
    while let Some(v) = queue.pop_front() {
        sorted.push(v);
        for &t in &links[v] {
            indegree[t] -= 1;
            if indegree[t] == 0 {
                queue.push_back(t);
            }
        }
    }
    if sorted.len() == n {
        Some(sorted)
    } else {
        None
    }
}

fn phase2_sort(ops: Vec<OperatorConfigRaw>) -> Result<Vec<OperatorConfigRaw>, ResolveError> {
    let n = ops.len();
    let mut trigger_op_map: HashMap<String, BTreeSet<usize>> = HashMap::new();
    let mut input_op_map: HashMap<String, BTreeSet<usize>> = HashMap::new();
    for (i, op) in ops.iter().enumerate() {
        for t in &op.trigger {
            trigger_op_map.entry(t.clone()).or_default().insert(i);
        }
        for inp in &op.input {
            input_op_map.entry(inp.clone()).or_default().insert(i);
        }
    }

    let mut op_links: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    for (i, op) in ops.iter().enumerate() {
        for out in &op.output {
            if let Some(idxs) = trigger_op_map.get(&out.event) {
                op_links[i].extend(idxs.iter().copied());
            }
            if let Some(idxs) = input_op_map.get(&out.event) {
                op_links[i].extend(idxs.iter().copied());
            }
        }
    }

    let mut op_adj: Vec<Vec<usize>> = Vec::with_capacity(n);
    for i in 0..n {
        op_links[i].remove(&i);
        let adj: Vec<usize> = op_links[i].iter().copied().collect();
        log::info!("DAG: {} Downstreams:", ops[i].name);
        for &d in &adj {
            log::info!("  * {}", ops[d].name);
        }
        op_adj.push(adj);
    }

    let order = sort_and_check_has_loop(&op_adj).ok_or(ResolveError::CycleDetected)?;
    let mut reordered = Vec::with_capacity(n);
    for (new_id, &old_idx) in order.iter().enumerate() {
        let mut op = ops[old_idx].clone();
        op.id = new_id;
        log::info!("Operator[{new_id}]: {}", op.name);
        reordered.push(op);
    }
    Ok(reordered)
}

/// Resolve `data_name`/`type_name` for one linked edge. `uo`/`do` are the upstream
/// output and downstream output specs; `down_name`/`down_trigger_name` are only used
/// for error messages and the `_CACHED_DATA_@hz` synthesized name.
fn get_data_and_type_name(
    uo: &OutputSpec,
    down: &OutputSpec,
    down_name: &str,
    down_trigger_name: &str,
) -> Result<(String, String), ResolveError> {
    if down.r#type.is_some() && down.hz.is_some() {
        return Err(ResolveError::ConflictingOutputSpec {
            op: down_name.to_string(),
            event: down.event.clone(),
        });
    }

    let mut data_name = uo.data.clone().unwrap_or_else(|| uo.event.clone());
    if let Some(hz) = down.hz {
        if down.data.is_none() {
            data_name = format!("{down_trigger_name}_CACHED_DATA_@{hz}");
        }
    }

    let type_name = if down.r#type.is_none() {
        match &uo.r#type {
            Some(t) if !t.is_empty() => t.clone(),
            _ => {
                return Err(ResolveError::CannotInferType {
                    op: down_name.to_string(),
                    event: down.event.clone(),
                })
            }
        }
    } else {
        if data_name.is_empty() {
            data_name = format!("{}_DATA", down.r#type.as_ref().unwrap());
        }
        down.r#type.clone().unwrap()
    };

    if data_name.is_empty() {
        match &uo.data {
            Some(d) if !d.is_empty() => data_name = d.clone(),
            _ => {
                return Err(ResolveError::CannotInferData {
                    op: down_name.to_string(),
                    event: down.event.clone(),
                })
            }
        }
    }

    Ok((data_name, type_name))
}

fn link_operator(ops: &mut [OperatorConfigRaw]) -> Result<(), ResolveError> {
    for op in ops.iter_mut() {
        for out in op.output.iter_mut() {
            out.downstream.clear();
        }
        if op.trigger_data.len() < op.trigger.len() {
            op.trigger_data.resize(op.trigger.len(), String::new());
        }
    }

    let n = ops.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let (left, right) = ops.split_at_mut(j);
            let up = &mut left[i];
            let down = &mut right[0];
            for n_idx in 0..down.trigger.len() {
                for m in 0..up.output.len() {
                    if up.output[m].event != down.trigger[n_idx] {
                        continue;
                    }
                    down.upstream.push(i);
                }
            }
        }
    }

    for i in 0..n {
        for j in (i + 1)..n {
            let (left, right) = ops.split_at_mut(j);
            let up = &mut left[i];
            let down = &mut right[0];
            let up_name = up.name.clone();

            for m in 0..up.output.len() {
                let output_event = up.output[m].event.clone();
                for n_idx in 0..down.trigger.len() {
                    if down.trigger[n_idx] != output_event {
                        continue;
                    }

                    // No explicit `data` name defaults to the event name itself — the
                    // same convention the cache-registration pass in streaming.rs uses,
                    // so a producer's own write target and a consumer's trigger lookup
                    // always agree even when the consumer declares no output slot.
                    let up_data = up.output[m].data.clone().unwrap_or_else(|| output_event.clone());
                    let up_type = up.output[m].r#type.clone().unwrap_or_default();
                    up.output[m].downstream.push(DownstreamRef {
                        op_id: j,
                        trigger_id: n_idx,
                        event: down.trigger[n_idx].clone(),
                        data: up_data.clone(),
                        r#type: up_type,
                        hz: None,
                    });
                    let fan_out = up.output[m].downstream.len();

                    if n_idx >= down.output.len() {
                        let mut data_name = up_data;
                        if fan_out > 1 {
                            data_name = format!("{data_name}_{}_{up_name}_END_COPY", fan_out - 1);
                        }
                        down.trigger_data[n_idx] = data_name.clone();
                        let ds = up.output[m].downstream.last_mut().unwrap();
                        ds.data = data_name;
                        continue;
                    }

                    let down_output = down.output[n_idx].clone();
                    let (mut data_name, type_name) =
                        get_data_and_type_name(&up.output[m], &down_output, &down.name, &down.trigger[n_idx])?;

                    if down_output.data.is_none() && fan_out > 1 {
                        data_name = format!("{data_name}_{}_{up_name}_COPY", fan_out - 1);
                    }

                    down.output[n_idx].data = Some(down_output.data.clone().unwrap_or_else(|| data_name.clone()));
                    down.output[n_idx].r#type = Some(type_name.clone());
                    down.trigger_data[n_idx] = data_name.clone();

                    let ds = up.output[m].downstream.last_mut().unwrap();
                    ds.data = data_name;
                    ds.r#type = type_name;
                    if let Some(hz) = down_output.hz {
                        ds.hz = Some(hz);
                    }
                }
            }
        }
    }

    Ok(())
}

/// An output has `has_reference = true` iff some *other* operator's `input[]` or
/// `latest[]` names its event.
fn set_reference(ops: &mut [OperatorConfigRaw]) {
    let mut referenced_by: HashMap<String, HashSet<usize>> = HashMap::new();
    for (k, op) in ops.iter().enumerate() {
        for ev in op.input.iter().chain(op.latest.iter()) {
            referenced_by.entry(ev.clone()).or_default().insert(k);
        }
    }
    for (i, op) in ops.iter_mut().enumerate() {
        for out in op.output.iter_mut() {
            out.has_reference = referenced_by
                .get(&out.event)
                .is_some_and(|set| set.iter().any(|&k| k != i));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(name: &str, trigger: &[&str], output_events: &[&str]) -> OperatorConfigRaw {
        OperatorConfigRaw {
            name: name.to_string(),
            op_type: "Operator".to_string(),
            body: crate::config::Body::Algorithm("noop".to_string()),
            trigger: trigger.iter().map(|s| s.to_string()).collect(),
            trigger_data: Vec::new(),
            input: Vec::new(),
            latest: Vec::new(),
            output: output_events
                .iter()
                .map(|e| OutputSpec {
                    event: e.to_string(),
                    ..Default::default()
                })
                .collect(),
            input_offset: Vec::new(),
            input_window: Vec::new(),
            input_wait: Vec::new(),
            latest_tolerate_offset: Vec::new(),
            enable_if: None,
            disable_if: None,
            bypass: None,
            bypass_if: None,
            priority: None,
            dependency: Vec::new(),
            param: Vec::new(),
            id: 0,
            upstream: Vec::new(),
        }
    }

    #[test]
    fn conflicting_filters_rejected() {
        let mut a = op("a", &[], &["e1"]);
        a.enable_if = Some("X".into());
        a.disable_if = Some("Y".into());
        let dag = DagConfig { op: vec![a] };
        assert!(matches!(resolve(&dag), Err(ResolveError::ConflictingFilters(_))));
    }

    #[test]
    fn linear_chain_sorts_and_links() {
        let a = op("producer", &[], &["frame"]);
        let b = op("consumer", &["frame"], &["result"]);
        let dag = DagConfig { op: vec![b, a] };
        let resolved = resolve(&dag).unwrap();
        assert_eq!(resolved[0].name, "producer");
        assert_eq!(resolved[1].name, "consumer");
        assert_eq!(resolved[0].output[0].downstream.len(), 1);
        assert_eq!(resolved[0].output[0].downstream[0].op_id, 1);
    }

    #[test]
    fn cycle_is_rejected() {
        let a = op("a", &["b_out"], &["a_out"]);
        let b = op("b", &["a_out"], &["b_out"]);
        let dag = DagConfig { op: vec![a, b] };
        assert!(matches!(resolve(&dag), Err(ResolveError::CycleDetected)));
    }

    #[test]
    fn fan_out_gets_disambiguating_copy_suffix() {
        let mut producer = op("producer", &[], &["frame"]);
        producer.output[0].data = Some("FRAME_DATA".to_string());
        producer.output[0].r#type = Some("FrameType".to_string());
        let mut c1 = op("c1", &["frame"], &[]);
        c1.output.push(OutputSpec {
            event: "frame".to_string(),
            ..Default::default()
        });
        let c2 = op("c2", &["frame"], &[]);
        let dag = DagConfig {
            op: vec![producer, c1, c2],
        };
        let resolved = resolve(&dag).unwrap();
        let downstreams = &resolved[0].output[0].downstream;
        assert_eq!(downstreams.len(), 2);
        assert!(downstreams[1].data.ends_with("_1_producer_END_COPY") || downstreams[1].data.ends_with("_1_producer_COPY"));
    }

    #[test]
    fn reference_marking_flags_events_read_as_input_or_latest() {
        let mut producer = op("producer", &[], &["frame"]);
        let mut consumer = op("consumer", &[], &[]);
        consumer.input.push("frame".to_string());
        let dag = DagConfig {
            op: vec![producer.clone(), consumer.clone()],
        };
        // no trigger relation so they won't be topologically linked, but set_reference
        // only depends on input/latest name matches.
        producer.trigger = vec![];
        let resolved = resolve(&dag).unwrap();
        let idx = resolved.iter().position(|o| o.name == "producer").unwrap();
        assert!(resolved[idx].output[0].has_reference);
    }

    #[test]
    fn missing_type_and_data_inference_fails() {
        let producer = op("producer", &[], &["frame"]);
        // consumer has an output slot at trigger index 0, so linking must infer a
        // type/data name rather than taking the no-output-slot passthrough branch.
        let consumer = op("consumer", &["frame"], &["result"]);
        let dag = DagConfig {
            op: vec![producer, consumer],
        };
        assert!(matches!(resolve(&dag), Err(ResolveError::CannotInferType { .. })));
    }
}
