/*!
 * Limits and Constants
 *
 * Centralized location for tunables used by pools, backends and the dispatcher.
 */

use std::time::Duration;

// =============================================================================
// WORKER POOLS
// =============================================================================

/// Idle time after which a cached pool retires a thread
pub const CACHED_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Prefix for worker thread names
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "aio-worker";

/// Initial size hint meaning "use the number of CPUs"
pub const CPU_COUNT_HINT: isize = -1;

// =============================================================================
// DISPATCHER
// =============================================================================

/// Readiness events fetched per backend wait
/// [PERF] Matches the epoll buffer size used by most reactors
pub const EVENT_BATCH_CAPACITY: usize = 64;

/// Dispatcher loops run for a group bound to a cached pool
/// Completions are handed back to the pool, so one loop suffices
pub const CACHED_DISPATCH_LOOPS: usize = 1;

/// Pause after a backend wait error before retrying
pub const BACKEND_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Longest a dispatcher loop blocks when no deadline is pending
pub const IDLE_WAIT_CAP: Duration = Duration::from_secs(1);

// =============================================================================
// CHANNELS
// =============================================================================

/// Listen backlog used when `bind` is given zero
pub const DEFAULT_BACKLOG: i32 = 128;

/// Most buffers handed to one readv/writev call (IOV_MAX on Linux)
pub const MAX_IOV: usize = 1024;
