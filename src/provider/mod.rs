/*!
 * Provider
 *
 * Factory for channel groups and channels. The backend is resolved once per
 * provider; groups remember which provider minted them and channels can only
 * join groups of their own provider.
 */

mod config;
mod gate;

pub use config::{
    BackendKind, ProviderConfig, ENV_BACKEND, ENV_CACHED_KEEP_ALIVE_MS,
    ENV_DEFAULT_POOL_INITIAL_SIZE, ENV_THREAD_NAME_PREFIX,
};
pub use gate::{AllowAll, GateDecision, GateRequest, PermissionGate};

use crate::channel::{AsyncDatagramChannel, AsyncServerSocketChannel, AsyncSocketChannel};
use crate::core::types::{ProtocolFamily, ProviderId};
use crate::core::{GroupError, GroupResult};
use crate::group::{ChannelGroup, GroupInner};
use crate::pool::{PoolConfig, PoolKind, WorkerPool};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};

static GLOBAL: OnceLock<Provider> = OnceLock::new();

struct ProviderInner {
    id: ProviderId,
    config: ProviderConfig,
    gate: Arc<dyn PermissionGate>,
    default_group: OnceLock<ChannelGroup>,
    default_init: Mutex<()>,
}

/// Handle to a provider
///
/// Cloning is cheap; every clone refers to the same provider.
#[derive(Clone)]
pub struct Provider {
    inner: Arc<ProviderInner>,
}

impl Provider {
    /// Process-wide provider configured from `AIO_*` variables
    ///
    /// A malformed environment is logged and the defaults are used.
    pub fn global() -> &'static Provider {
        GLOBAL.get_or_init(|| {
            let config = ProviderConfig::from_env().unwrap_or_else(|e| {
                error!(error = %e, "Invalid provider environment, using defaults");
                ProviderConfig::default()
            });
            let provider = Provider::from_parts(config, Arc::new(AllowAll));
            info!(
                provider = %provider.id(),
                backend = %provider.inner.config.backend,
                "Global provider initialized"
            );
            provider
        })
    }

    pub fn builder() -> ProviderBuilder {
        ProviderBuilder::default()
    }

    /// Provider with default configuration and no permission checks
    pub fn new() -> GroupResult<Self> {
        Self::builder().build()
    }

    fn from_parts(config: ProviderConfig, gate: Arc<dyn PermissionGate>) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                id: ProviderId::next(),
                config,
                gate,
                default_group: OnceLock::new(),
                default_init: Mutex::new(()),
            }),
        }
    }

    pub fn id(&self) -> ProviderId {
        self.inner.id
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.inner.config
    }

    pub fn backend(&self) -> BackendKind {
        self.inner.config.backend
    }

    fn check(&self, request: GateRequest) -> GroupResult<()> {
        check_gate(self.inner.gate.as_ref(), &request)
    }

    fn pool_config(&self, kind: PoolKind, size: isize) -> PoolConfig {
        let config = match kind {
            PoolKind::Fixed => PoolConfig::fixed(size),
            PoolKind::Cached => PoolConfig::cached(size),
        };
        config
            .with_thread_name_prefix(self.inner.config.thread_name_prefix.clone())
            .with_keep_alive(self.inner.config.cached_keep_alive)
    }

    /// Open a group on a new pool owned by the group
    ///
    /// FIXED needs `size > 0`; for CACHED a negative size means the CPU count.
    /// The pool is shut down when the group terminates.
    pub fn open_channel_group(&self, kind: PoolKind, size: isize) -> GroupResult<ChannelGroup> {
        self.check(GateRequest::OpenGroup { kind, size })?;
        let pool = WorkerPool::new(self.pool_config(kind, size))?;
        let inner = GroupInner::open(self.inner.id, pool, true, self.inner.config.backend)?;
        Ok(ChannelGroup::from_inner(inner))
    }

    /// Open a group on a caller-supplied pool
    ///
    /// The pool outlives the group and must be shut down by the caller. A
    /// cached pool may serve several groups; a fixed pool serves one.
    pub fn open_channel_group_with_pool(&self, pool: &WorkerPool) -> GroupResult<ChannelGroup> {
        self.check(GateRequest::OpenGroup {
            kind: pool.kind(),
            size: isize::try_from(pool.size()).unwrap_or(isize::MAX),
        })?;
        if pool.is_shutdown() {
            return Err(GroupError::InvalidConfiguration(format!(
                "{} is shut down",
                pool.id()
            )));
        }
        let inner = GroupInner::open(self.inner.id, pool.clone(), false, self.inner.config.backend)
            .map_err(|e| match e {
                GroupError::PoolShutdown => {
                    GroupError::InvalidConfiguration(format!("{} is shut down", pool.id()))
                }
                other => other,
            })?;
        Ok(ChannelGroup::from_inner(inner))
    }

    /// The default group, created on first use
    ///
    /// Backed by a cached pool sized by the configuration. Concurrent first
    /// callers all observe the same group.
    pub fn default_group(&self) -> GroupResult<ChannelGroup> {
        if let Some(group) = self.inner.default_group.get() {
            return Ok(group.clone());
        }

        let _init = self.inner.default_init.lock();
        if let Some(group) = self.inner.default_group.get() {
            return Ok(group.clone());
        }

        let group = self.open_channel_group(
            PoolKind::Cached,
            self.inner.config.default_pool_initial_size,
        )?;
        debug!(provider = %self.inner.id, group = %group.id(), "Default group created");
        Ok(self.inner.default_group.get_or_init(|| group).clone())
    }

    fn resolve(&self, group: Option<&ChannelGroup>) -> GroupResult<Arc<GroupInner>> {
        let group = match group {
            Some(group) => group.clone(),
            None => self.default_group()?,
        };
        if group.provider_id() != self.inner.id {
            warn!(
                provider = %self.inner.id,
                group = %group.id(),
                owner = %group.provider_id(),
                "Rejected group from another provider"
            );
            return Err(GroupError::IllegalGroup);
        }
        Ok(group.inner)
    }

    /// Open an unconnected TCP channel; `None` uses the default group
    pub fn open_socket_channel(&self, group: Option<&ChannelGroup>) -> GroupResult<AsyncSocketChannel> {
        AsyncSocketChannel::open(&self.resolve(group)?)
    }

    /// Open an unbound TCP listener channel; `None` uses the default group
    pub fn open_server_channel(
        &self,
        group: Option<&ChannelGroup>,
    ) -> GroupResult<AsyncServerSocketChannel> {
        AsyncServerSocketChannel::open(&self.resolve(group)?)
    }

    /// Open a UDP channel; `None` uses the default group
    pub fn open_datagram_channel(
        &self,
        family: ProtocolFamily,
        group: Option<&ChannelGroup>,
    ) -> GroupResult<AsyncDatagramChannel> {
        AsyncDatagramChannel::open(&self.resolve(group)?, family)
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.inner.id)
            .field("backend", &self.inner.config.backend)
            .field("gate", &self.inner.gate.name())
            .field("default_group", &self.inner.default_group.get().map(ChannelGroup::id))
            .finish()
    }
}

fn check_gate(gate: &dyn PermissionGate, request: &GateRequest) -> GroupResult<()> {
    match gate.check(request) {
        GateDecision::Allow => Ok(()),
        GateDecision::Deny(reason) => {
            warn!(gate = gate.name(), request = ?request, reason = %reason, "Permission denied");
            Err(GroupError::PermissionDenied(reason))
        }
    }
}

/// Builder for independent providers
pub struct ProviderBuilder {
    config: ProviderConfig,
    gate: Arc<dyn PermissionGate>,
}

impl Default for ProviderBuilder {
    fn default() -> Self {
        Self {
            config: ProviderConfig::default(),
            gate: Arc::new(AllowAll),
        }
    }
}

impl ProviderBuilder {
    pub fn with_config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn with_permission_gate<G>(mut self, gate: G) -> Self
    where
        G: PermissionGate + 'static,
    {
        self.gate = Arc::new(gate);
        self
    }

    pub fn build(self) -> GroupResult<Provider> {
        self.config.validate()?;
        check_gate(self.gate.as_ref(), &GateRequest::CreateProvider)?;
        let provider = Provider::from_parts(self.config, self.gate);
        info!(
            provider = %provider.id(),
            backend = %provider.inner.config.backend,
            gate = provider.inner.gate.name(),
            "Provider created"
        );
        Ok(provider)
    }
}
