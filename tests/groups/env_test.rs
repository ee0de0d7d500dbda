/*!
 * Environment Configuration Tests
 * Serialized: they mutate process-wide variables
 */

use crate::support::{connected_pair, terminate, WAIT};
use aio_groups::provider::{
    ENV_BACKEND, ENV_CACHED_KEEP_ALIVE_MS, ENV_DEFAULT_POOL_INITIAL_SIZE, ENV_THREAD_NAME_PREFIX,
};
use aio_groups::{BackendKind, GroupError, PoolKind, Provider, ProviderConfig, Timeout, Transfer};
use bytes::BytesMut;
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::env;
use std::io::Write;
use std::sync::mpsc;
use std::time::Duration;

fn clear_env() {
    for key in [
        ENV_BACKEND,
        ENV_DEFAULT_POOL_INITIAL_SIZE,
        ENV_THREAD_NAME_PREFIX,
        ENV_CACHED_KEEP_ALIVE_MS,
    ] {
        env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_from_env_reads_overrides() {
    clear_env();
    env::set_var(ENV_BACKEND, "poll");
    env::set_var(ENV_DEFAULT_POOL_INITIAL_SIZE, "2");
    env::set_var(ENV_THREAD_NAME_PREFIX, "edge-io");
    env::set_var(ENV_CACHED_KEEP_ALIVE_MS, "1500");

    let config = ProviderConfig::from_env().unwrap();
    clear_env();

    assert_eq!(config.backend, BackendKind::Poll);
    assert_eq!(config.default_pool_initial_size, 2);
    assert_eq!(config.thread_name_prefix, "edge-io");
    assert_eq!(config.cached_keep_alive, Duration::from_millis(1500));
}

#[test]
#[serial]
fn test_from_env_rejects_unknown_backend() {
    clear_env();
    env::set_var(ENV_BACKEND, "iocp");
    let result = ProviderConfig::from_env();
    clear_env();

    assert!(matches!(result, Err(GroupError::InvalidConfiguration(_))));
    assert_eq!(ProviderConfig::from_env().unwrap(), ProviderConfig::default());
}

#[test]
#[serial]
fn test_poll_backend_end_to_end() {
    clear_env();
    env::set_var(ENV_BACKEND, "poll");
    env::set_var(ENV_THREAD_NAME_PREFIX, "poll-io");
    let config = ProviderConfig::from_env().unwrap();
    clear_env();

    let provider = Provider::builder().with_config(config).build().unwrap();
    assert_eq!(provider.backend(), BackendKind::Poll);

    let group = provider.open_channel_group(PoolKind::Fixed, 1).unwrap();
    let (channel, mut peer) = connected_pair(&provider, &group);

    let (tx, rx) = mpsc::channel();
    channel
        .read(BytesMut::with_capacity(16), Timeout::secs(5), move |result, buf| {
            let name = std::thread::current().name().map(str::to_owned);
            tx.send((result, buf, name)).ok();
            Ok(())
        })
        .unwrap();
    peer.write_all(b"polled").unwrap();

    let (result, buf, name) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(result, Ok(Transfer::Bytes(6)));
    assert_eq!(&buf[..], b"polled");
    assert!(name.unwrap_or_default().starts_with("poll-io-"));

    terminate(&group);
}
