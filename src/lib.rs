/*!
 * Asynchronous I/O Channel Groups
 *
 * Callback-based socket channels whose completions run on worker pools.
 * A provider opens groups; a group binds one pool to a set of channels and
 * dispatches readiness events, deadlines and cancellation for them.
 */

pub mod channel;
pub mod core;
pub mod group;
pub mod monitoring;
pub mod pool;
pub mod provider;

pub(crate) mod dispatch;

// Re-exports
pub use crate::channel::{AsyncDatagramChannel, AsyncServerSocketChannel, AsyncSocketChannel};
pub use crate::core::{
    CompletionError, GroupError, GroupResult, HandlerResult, OpKind, ProtocolFamily, SocketOption,
    SocketOptionName, TimeUnit, Timeout, Transfer,
};
pub use crate::group::{ChannelGroup, GroupState};
pub use crate::monitoring::{init_tracing, GroupStats, PoolStats};
pub use crate::pool::{current_pool, PoolConfig, PoolKind, WorkerPool};
pub use crate::provider::{
    AllowAll, BackendKind, GateDecision, GateRequest, PermissionGate, Provider, ProviderBuilder,
    ProviderConfig,
};
