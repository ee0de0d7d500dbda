/*!
 * Provider Configuration
 *
 * Backend selection and default group sizing, resolved once per provider
 * from the environment or supplied directly.
 */

use crate::core::limits::{CACHED_KEEP_ALIVE, CPU_COUNT_HINT, DEFAULT_THREAD_NAME_PREFIX};
use crate::core::{GroupError, GroupResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable naming the backend (`epoll` or `poll`)
pub const ENV_BACKEND: &str = "AIO_BACKEND";
/// Environment variable with the default group's initial pool size
pub const ENV_DEFAULT_POOL_INITIAL_SIZE: &str = "AIO_DEFAULT_POOL_INITIAL_SIZE";
/// Environment variable with the worker thread name prefix
pub const ENV_THREAD_NAME_PREFIX: &str = "AIO_THREAD_NAME_PREFIX";
/// Environment variable with the cached pool keep-alive in milliseconds
pub const ENV_CACHED_KEEP_ALIVE_MS: &str = "AIO_CACHED_KEEP_ALIVE_MS";

/// Readiness backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// epoll(7), Linux only
    Epoll,
    /// poll(2), every Unix
    Poll,
}

impl BackendKind {
    /// Prefer epoll on Linux, poll elsewhere
    pub const fn platform_default() -> Self {
        #[cfg(target_os = "linux")]
        {
            BackendKind::Epoll
        }
        #[cfg(not(target_os = "linux"))]
        {
            BackendKind::Poll
        }
    }

    pub const fn is_supported(self) -> bool {
        match self {
            BackendKind::Epoll => cfg!(target_os = "linux"),
            BackendKind::Poll => true,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Epoll => f.write_str("epoll"),
            BackendKind::Poll => f.write_str("poll"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = GroupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "epoll" => Ok(BackendKind::Epoll),
            "poll" => Ok(BackendKind::Poll),
            other => Err(GroupError::InvalidConfiguration(format!(
                "unknown backend '{}', expected 'epoll' or 'poll'",
                other
            ))),
        }
    }
}

/// Provider settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub backend: BackendKind,
    /// Initial size of the default group's cached pool (negative: CPU count)
    pub default_pool_initial_size: isize,
    pub thread_name_prefix: String,
    pub cached_keep_alive: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::platform_default(),
            default_pool_initial_size: CPU_COUNT_HINT,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            cached_keep_alive: CACHED_KEEP_ALIVE,
        }
    }
}

impl ProviderConfig {
    /// Read `AIO_*` variables from the process environment
    pub fn from_env() -> GroupResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> GroupResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup(ENV_BACKEND) {
            config.backend = v.parse()?;
        }
        if let Some(v) = lookup(ENV_DEFAULT_POOL_INITIAL_SIZE) {
            config.default_pool_initial_size = v.trim().parse().map_err(|_| {
                GroupError::InvalidConfiguration(format!(
                    "{} must be an integer, got '{}'",
                    ENV_DEFAULT_POOL_INITIAL_SIZE, v
                ))
            })?;
        }
        if let Some(v) = lookup(ENV_THREAD_NAME_PREFIX) {
            if v.trim().is_empty() {
                return Err(GroupError::InvalidConfiguration(format!(
                    "{} must not be empty",
                    ENV_THREAD_NAME_PREFIX
                )));
            }
            config.thread_name_prefix = v;
        }
        if let Some(v) = lookup(ENV_CACHED_KEEP_ALIVE_MS) {
            let ms: u64 = v.trim().parse().map_err(|_| {
                GroupError::InvalidConfiguration(format!(
                    "{} must be a non-negative integer, got '{}'",
                    ENV_CACHED_KEEP_ALIVE_MS, v
                ))
            })?;
            config.cached_keep_alive = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_default_pool_initial_size(mut self, size: isize) -> Self {
        self.default_pool_initial_size = size;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_cached_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.cached_keep_alive = keep_alive;
        self
    }

    pub fn validate(&self) -> GroupResult<()> {
        if !self.backend.is_supported() {
            return Err(GroupError::InvalidConfiguration(format!(
                "{} backend is not available on this platform",
                self.backend
            )));
        }
        Ok(())
    }
}
