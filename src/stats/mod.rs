//! Client statistics

pub mod metrics;

pub use metrics::ClientStats;
pub(crate) use metrics::StatsCounters;
