//! Error types for the dataflow runtime, one enum per subsystem.
//!
//! Transient conditions (a cache miss, a tolerance failure, a queue overflow) are not
//! modeled as errors anywhere in this crate: they are returned as `bool`/`Option` and
//! logged, since a caller has no recovery action beyond "try again later" and forcing
//! one through `Result` would just push a `.ok()` onto every call site. Only conditions
//! that should abort pipeline construction or that indicate an internal bug surface as
//! `Result<_, E>`.

use thiserror::Error;

use crate::event::EventId;

/// Errors produced while resolving a declarative operator graph into an executable plan.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("operator `{0}` specifies both enable_if and disable_if")]
    ConflictingFilters(String),

    #[error("DAG resolver detected a cycle: not every operator could be topologically ordered")]
    CycleDetected,

    #[error("operator `{op}` output `{event}` declares both type and hz")]
    ConflictingOutputSpec { op: String, event: String },

    #[error("cannot infer data name for operator `{op}` event `{event}`")]
    CannotInferData { op: String, event: String },

    #[error("cannot infer type name for operator `{op}` event `{event}`")]
    CannotInferType { op: String, event: String },

    #[error("operator `{op}` trigger[{idx}] has no trigger_data and no matching output")]
    CannotInferTriggerData { op: String, idx: usize },

    #[error("operator `{op}` dependency on `{target}` has no policy; policy is required")]
    MissingDependencyPolicy { op: String, target: String },

    #[error("operator `{0}` config must specify exactly one of `algorithm` or `group`")]
    MissingAlgorithmOrGroup(String),

    #[error("operator `{0}` group has no op entries")]
    EmptyGroup(String),

    #[error("unknown op algorithm `{0}`")]
    UnknownAlgorithm(String),
}

/// Errors raised by [`crate::cache::manager::SharedDataManager`] at registration time.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cached data `{0}` already registered")]
    AlreadyRegistered(String),

    #[error("no constructor registered for cached data type `{0}`")]
    UnknownType(String),

    #[error("shared data `{0}` not registered")]
    NotRegistered(String),
}

/// Errors raised by [`crate::events::manager::EventManager`].
///
/// Queue overflow is deliberately absent here: it is handled by clear-and-retry inside
/// `publish`, logged at `error!`, and never surfaced as a `Result`.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event id {0} was never registered with EventManager::init")]
    UnknownEvent(EventId),

    #[error("duplicate event id {0} in EventManager::init")]
    DuplicateEvent(EventId),
}

/// Top-level error wrapping failures from any subsystem during `DAGStreaming` init.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
