//! Turns a declarative [`crate::config::DagConfig`] into an ordered, linked,
//! reference-annotated operator list.

pub mod resolver;

pub use resolver::resolve;
