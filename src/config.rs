//! Declarative pipeline schema: the shape operators are authored in before the
//! [`crate::dag::resolver`] turns them into an executable plan.

use serde::{Deserialize, Serialize};

/// Top-level declarative pipeline: an unordered bag of operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagConfig {
    pub op: Vec<OperatorConfigRaw>,
}

/// `param[]` entries are a closed set of scalar kinds, matching the reference's
/// `oneof` rather than a free-form JSON value so operator code gets typed access.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    I(i64),
    B(bool),
    F(f64),
    S(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Param {
    pub name: String,
    pub value: ParamValue,
}

/// One declared output of an operator, before [`crate::dag::resolver`] fills in
/// `data`/`type`/`has_reference`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OutputSpec {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hz: Option<i64>,
    #[serde(default)]
    pub has_reference: bool,
    #[serde(default)]
    pub downstream: Vec<DownstreamRef>,
}

/// A forward edge recorded by the linker: which `(op, trigger)` consumes this output.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DownstreamRef {
    pub op_id: usize,
    pub trigger_id: usize,
    pub event: String,
    pub data: String,
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hz: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DependencyPolicy {
    Wait,
    Block,
    Bundle,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DependencySpec {
    pub name: String,
    /// No default: absence is a config error at resolve time, see `ResolveError::MissingDependencyPolicy`.
    pub policy: Option<DependencyPolicy>,
    pub wait_time: u64,
}

/// One op entry inside a `group`. Mutually exclusive with the enclosing operator
/// declaring `algorithm` directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupOpSpec {
    pub algorithm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    #[serde(default)]
    pub bypass: bool,
    #[serde(default)]
    pub param: Vec<Param>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SeqConfig {
    #[serde(default)]
    pub ignore_fail: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupSpec {
    pub op: Vec<GroupOpSpec>,
    #[serde(default)]
    pub seq_config: SeqConfig,
}

/// An operator runs either a single named algorithm or a sequential group of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Body {
    Algorithm(String),
    Group(GroupSpec),
}

/// Raw, pre-resolution operator declaration as authored by a pipeline config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperatorConfigRaw {
    pub name: String,
    /// Operator class; `op_type` rather than `type` since the latter is a Rust keyword.
    #[serde(default = "default_op_type")]
    pub op_type: String,
    pub body: Body,
    #[serde(default)]
    pub trigger: Vec<String>,
    #[serde(default)]
    pub trigger_data: Vec<String>,
    #[serde(default)]
    pub input: Vec<String>,
    #[serde(default)]
    pub latest: Vec<String>,
    #[serde(default)]
    pub output: Vec<OutputSpec>,
    #[serde(default)]
    pub input_offset: Vec<f64>,
    #[serde(default)]
    pub input_window: Vec<i64>,
    #[serde(default)]
    pub input_wait: Vec<f64>,
    #[serde(default)]
    pub latest_tolerate_offset: Vec<f64>,
    #[serde(default)]
    pub enable_if: Option<String>,
    #[serde(default)]
    pub disable_if: Option<String>,
    #[serde(default)]
    pub bypass: Option<bool>,
    #[serde(default)]
    pub bypass_if: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub dependency: Vec<DependencySpec>,
    #[serde(default)]
    pub param: Vec<Param>,
    /// Assigned by resolver phase 2; meaningless before resolution.
    #[serde(default)]
    pub id: usize,
    #[serde(default)]
    pub upstream: Vec<usize>,
}

fn default_op_type() -> String {
    "Operator".to_string()
}

/// Flag-style tuning knobs, replacing the reference's `gflags` globals with a plain
/// struct a caller constructs and passes in explicitly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RuntimeKnobs {
    pub cached_data_stale_time: u64,
    pub cached_data_tolerate_offset: i64,
    pub cached_data_expire_time: u64,
    pub shared_data_stale_time: u64,
    pub max_allowed_congestion_value: usize,
    pub enable_timing_remove_stale_data: bool,
    pub max_event_queue_size: usize,
}

impl Default for RuntimeKnobs {
    fn default() -> Self {
        Self {
            cached_data_stale_time: 2,
            cached_data_tolerate_offset: 5,
            cached_data_expire_time: 60,
            shared_data_stale_time: 2,
            max_allowed_congestion_value: 0,
            enable_timing_remove_stale_data: true,
            max_event_queue_size: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_policy_round_trips_through_json() {
        let dep = DependencySpec {
            name: "locator".into(),
            policy: Some(DependencyPolicy::Block),
            wait_time: 50,
        };
        let json = serde_json::to_string(&dep).unwrap();
        let back: DependencySpec = serde_json::from_str(&json).unwrap();
        assert_eq!(dep, back);
    }

    #[test]
    fn missing_policy_deserializes_to_none() {
        let json = r#"{"name":"locator","policy":null,"wait_time":50}"#;
        let dep: DependencySpec = serde_json::from_str(json).unwrap();
        assert!(dep.policy.is_none());
    }

    #[test]
    fn runtime_knobs_default_matches_documented_table() {
        let knobs = RuntimeKnobs::default();
        assert_eq!(knobs.cached_data_stale_time, 2);
        assert_eq!(knobs.max_event_queue_size, 1);
        assert!(knobs.enable_timing_remove_stale_data);
    }
}
