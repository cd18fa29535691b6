//! Bounded in-memory metric history
//!
//! - [`buffer::TimeSeriesBuffer`]: ring buffer for a single (client, metric) series
//! - [`memory::TimeSeriesStore`]: all series of all clients, with per-series locking
//!
//! Only the most recent samples of each series are kept.

pub mod buffer;
pub mod memory;

pub use buffer::TimeSeriesBuffer;
pub use memory::{SeriesKey, StoreStats, TimeSeriesStore};
