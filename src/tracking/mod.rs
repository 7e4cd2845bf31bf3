//! Time accounting core.
//!
//! [session::TimeAccumulator] follows the focused tab and hands finished durations to
//! [aggregator::Aggregator], which merges them into per-day and per-hour tables.
//! [pruner::Pruner] keeps those tables bounded, [query] derives the reports and [blocking] owns
//! the block list together with the redirect rules generated from it.

pub mod aggregator;
pub mod blocking;
pub mod config;
pub mod hours;
pub mod pruner;
pub mod query;
pub mod session;
