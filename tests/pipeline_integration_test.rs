//! End-to-end tests driving [`dagrt::streaming::DagStreaming`] through its public API:
//! build a small pipeline, feed it an external trigger, and observe the produced frame
//! land in the downstream cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dagrt::config::{Body, DagConfig, OperatorConfigRaw, OutputSpec, RuntimeKnobs};
use dagrt::frame::Frame;
use dagrt::processor::{Op, Status};
use dagrt::streaming::{DagStreaming, OpFactory};

struct Doubler;
impl Op for Doubler {
    fn init(&mut self, _config: Option<&str>) -> bool {
        true
    }
    fn process(&mut self, frames: &[Option<Arc<Frame>>], _latests: &[Option<Arc<Frame>>], out: &mut Option<Frame>) -> Status {
        let Some(Some(f)) = frames.first() else {
            return Status::Ignore;
        };
        let doubled = f.payload.as_i64().map(|v| v * 2).unwrap_or(0);
        *out = Some(Frame::new(f.utime, "doubler", serde_json::json!(doubled)));
        Status::Succ
    }
    fn name(&self) -> &str {
        "doubler"
    }
}

struct Registry;
impl OpFactory for Registry {
    fn create(&self, algorithm: &str) -> Option<Box<dyn Op>> {
        match algorithm {
            "doubler" => Some(Box::new(Doubler)),
            _ => None,
        }
    }
}

fn bare_op(name: &str, op_type: &str, trigger: &[&str], output: Vec<OutputSpec>) -> OperatorConfigRaw {
    OperatorConfigRaw {
        name: name.to_string(),
        op_type: op_type.to_string(),
        body: Body::Algorithm("doubler".to_string()),
        trigger: trigger.iter().map(|s| s.to_string()).collect(),
        trigger_data: Vec::new(),
        input: Vec::new(),
        latest: Vec::new(),
        output,
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

fn find_external_trigger_event_id(streaming: &DagStreaming, producer_name: &str) -> dagrt::EventId {
    let wanted = format!("{producer_name}::external_trigger");
    (0..streaming.events().num_events() as dagrt::EventId)
        .find(|&id| streaming.events().get_event_meta(id).is_some_and(|m| m.name == wanted))
        .unwrap_or_else(|| panic!("no external trigger event found for {producer_name}"))
}

#[test]
fn frame_fed_into_a_source_trigger_flows_through_to_the_sink_cache() {
    let producer = bare_op(
        "producer",
        "Operator",
        &[],
        vec![OutputSpec {
            event: "raw".to_string(),
            data: Some("RAW_DATA".to_string()),
            r#type: Some("Frame".to_string()),
            ..Default::default()
        }],
    );
    let consumer = bare_op("consumer", "Operator", &["raw"], vec![]);
    let dag = DagConfig {
        op: vec![producer, consumer],
    };

    let streaming = DagStreaming::build(&dag, RuntimeKnobs::default(), &Registry).unwrap();
    streaming.schedule();

    let trigger_event = find_external_trigger_event_id(&streaming, "producer");
    let trigger_cache = streaming.shared_data().get_shared_data("producer__trigger_0").unwrap();
    trigger_cache.put(1_000_000, Arc::new(Frame::new(1_000_000, "test", serde_json::json!(21))));
    streaming.events().publish(dagrt::Event::new(trigger_event, 1_000_000)).unwrap();

    let raw_cache = streaming.shared_data().get_shared_data("RAW_DATA").unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    let produced = loop {
        if let Some(f) = raw_cache.get(1_000_000, 0) {
            break f;
        }
        assert!(Instant::now() < deadline, "producer never published to RAW_DATA");
        std::thread::sleep(Duration::from_millis(10));
    };
    assert_eq!(produced.payload, serde_json::json!(42));

    streaming.shutdown();
}

#[test]
fn disabled_operator_is_dropped_before_caches_are_registered() {
    let mut gated = bare_op(
        "gated",
        "Operator",
        &[],
        vec![OutputSpec {
            event: "gated_out".to_string(),
            ..Default::default()
        }],
    );
    gated.enable_if = Some("DAGRT_TEST_NEVER_SET_3f9a".to_string());
    let dag = DagConfig { op: vec![gated] };

    let streaming = DagStreaming::build(&dag, RuntimeKnobs::default(), &Registry).unwrap();
    assert!(!streaming.shared_data().contains("gated_out"));
    assert!(streaming.operator_info_cache("gated").is_err());
}

#[test]
fn cycle_among_three_operators_is_rejected_at_build_time() {
    let x = bare_op(
        "x",
        "Operator",
        &["c"],
        vec![OutputSpec {
            event: "a".to_string(),
            ..Default::default()
        }],
    );
    let y = bare_op(
        "y",
        "Operator",
        &["a"],
        vec![OutputSpec {
            event: "b".to_string(),
            ..Default::default()
        }],
    );
    let z = bare_op(
        "z",
        "Operator",
        &["b"],
        vec![OutputSpec {
            event: "c".to_string(),
            ..Default::default()
        }],
    );
    let dag = DagConfig { op: vec![x, y, z] };

    let err = DagStreaming::build(&dag, RuntimeKnobs::default(), &Registry).unwrap_err();
    assert!(matches!(
        err,
        dagrt::RuntimeError::Resolve(dagrt::error::ResolveError::CycleDetected)
    ));
}

#[test]
fn shutdown_returns_within_the_join_grace_period() {
    let producer = bare_op(
        "producer",
        "Operator",
        &[],
        vec![OutputSpec {
            event: "raw".to_string(),
            ..Default::default()
        }],
    );
    let consumer = bare_op("consumer", "Operator", &["raw"], vec![]);
    let dag = DagConfig {
        op: vec![producer, consumer],
    };

    let streaming = DagStreaming::build(&dag, RuntimeKnobs::default(), &Registry).unwrap();
    streaming.schedule();

    let start = Instant::now();
    streaming.shutdown();
    // Two operators, each worker joins (or is abandoned) within its own 500ms grace
    // window; shutdown runs them sequentially so the bound is additive, not shared.
    assert!(start.elapsed() < Duration::from_millis(1_500), "shutdown took {:?}", start.elapsed());
}

#[test]
fn unresolvable_dependency_policy_is_rejected_at_build_time() {
    let mut op = bare_op("lonely", "Operator", &[], vec![]);
    op.dependency.push(dagrt::config::DependencySpec {
        name: "locator".to_string(),
        policy: None,
        wait_time: 10,
    });
    let dag = DagConfig { op: vec![op] };

    let err = DagStreaming::build(&dag, RuntimeKnobs::default(), &Registry).unwrap_err();
    assert!(matches!(
        err,
        dagrt::RuntimeError::Resolve(dagrt::error::ResolveError::MissingDependencyPolicy { .. })
    ));
}
