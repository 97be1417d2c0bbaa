//! Stats pipeline for lobbyscope
//!
//! This crate provides the stats cache, the concurrent resolver that fills
//! it, manual nick mappings, and the ranking that turns a roster into rows.

mod cache;
mod nicks;
mod ranking;
mod resolver;

pub use cache::{StatsCache, TtlPolicy};
pub use nicks::NickDatabase;
pub use ranking::{RankingConfig, RankingEngine};
pub use resolver::{ResolverConfig, StatsResolver};

// Re-export types used in our public API
pub use lobbyscope_types::{CacheEntry, CacheState, StatsRecord, ViewModel, ViewRow};
