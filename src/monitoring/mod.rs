/*!
 * Monitoring
 * Tracing setup and statistics snapshots
 */

mod stats;
mod tracer;

pub use stats::{GroupStats, PoolStats};
pub(crate) use stats::GroupCounters;
pub use tracer::init_tracing;
