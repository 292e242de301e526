//! Time-indexed cache storage: the per-stream [`cached_data::CachedData`] store and the
//! name-keyed [`manager::SharedDataManager`] registry built on top of it.

pub mod cached_data;
pub mod manager;

pub use cached_data::CachedData;
pub use manager::{FrameCachedData, SharedData, SharedDataManager, SharedDataStatus};
