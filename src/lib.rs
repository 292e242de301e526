//! # dagrt
//!
//! A dataflow runtime for sensor-fusion/perception pipelines: operators declared as a
//! graph, wired by name matching, and run as one worker thread per trigger.
//!
//! ## Architecture
//!
//! - [`frame`]: the payload type flowing along every edge, plus its footprint trail
//! - [`event`]: discrete wakeups (`Event`, `EventMeta`, `WorkerId`) distinct from the data they announce
//! - [`config`]: the declarative, pre-resolution pipeline schema
//! - [`dag`]: filter / topological sort / link / reference-mark resolution
//! - [`cache`]: time-indexed payload storage (`CachedData`) and its name-keyed registry
//! - [`events`]: bounded per-event publish/subscribe queues
//! - [`port`]: the per-`(operator, trigger)` data-plane handle (trigger fetch, input bundling, publish)
//! - [`processor`]: the `Op` trait and the sequential-chain runner
//! - [`operator`]: worker threads, dependency gating, the stop protocol
//! - [`streaming`]: top-level orchestration tying every module together
//! - [`error`]: one error enum per subsystem

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod dag;
pub mod error;
pub mod event;
pub mod events;
pub mod frame;
pub mod operator;
pub mod port;
pub mod processor;
pub mod streaming;

pub use config::{Body, DagConfig, DependencyPolicy, DependencySpec, OperatorConfigRaw, OutputSpec, RuntimeKnobs};
pub use error::{CacheError, EventError, ResolveError, RuntimeError};
pub use event::{Event, EventId, EventMeta, OperatorId, WorkerId};
pub use frame::Frame;
pub use operator::{Operator, OperatorInfo};
pub use port::Port;
pub use processor::{Op, SeqProcessor, Status};
pub use streaming::{DagStreaming, OpFactory};

/// Crate version, read from `Cargo.toml` at build time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, read from `Cargo.toml` at build time.
pub const NAME: &str = env!("CARGO_PKG_NAME");
