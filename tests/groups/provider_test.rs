/*!
 * Provider Tests
 * Group construction, pool sharing, default group and permission gate
 */

use crate::support::{connected_pair, provider, terminate, WAIT};
use aio_groups::{
    GateDecision, GateRequest, GroupError, PoolKind, Provider, Timeout, Transfer, WorkerPool,
};
use bytes::BytesMut;
use pretty_assertions::assert_eq;
use std::io::Write;
use std::sync::{mpsc, Arc, Barrier};
use std::thread;

#[test]
fn test_invalid_fixed_sizes_are_rejected() {
    let provider = provider();
    for size in [0, -1, -8] {
        assert!(
            matches!(
                provider.open_channel_group(PoolKind::Fixed, size),
                Err(GroupError::InvalidConfiguration(_))
            ),
            "size {} should be rejected",
            size
        );
    }

    // Negative cached size means "number of CPUs"
    let group = provider.open_channel_group(PoolKind::Cached, -1).unwrap();
    assert!(group.pool().size() >= 1);
    terminate(&group);
}

#[test]
fn test_denying_gate_blocks_group_creation() {
    let provider = Provider::builder()
        .with_permission_gate(|request: &GateRequest| match request {
            GateRequest::OpenGroup {
                kind: PoolKind::Fixed,
                ..
            } => GateDecision::deny("fixed pools are reserved"),
            _ => GateDecision::Allow,
        })
        .build()
        .unwrap();

    assert_eq!(
        provider.open_channel_group(PoolKind::Fixed, 2).err(),
        Some(GroupError::PermissionDenied("fixed pools are reserved".into()))
    );

    let group = provider.open_channel_group(PoolKind::Cached, 0).unwrap();
    terminate(&group);
}

#[test]
fn test_default_group_created_once_under_contention() {
    let provider = provider();
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let provider = provider.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                provider.default_group().unwrap().id()
            })
        })
        .collect();

    let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]));

    let group = provider.default_group().unwrap();
    assert_eq!(group.id(), ids[0]);
    assert_eq!(group.pool().kind(), PoolKind::Cached);

    // Channels opened without a group land in the default one
    let channel = provider.open_socket_channel(None).unwrap();
    assert_eq!(channel.group(), group);
    terminate(&group);
}

#[test]
fn test_group_from_another_provider_is_illegal() {
    let owner = provider();
    let other = provider();
    let group = owner.open_channel_group(PoolKind::Fixed, 1).unwrap();

    assert_eq!(
        other.open_server_channel(Some(&group)).err(),
        Some(GroupError::IllegalGroup)
    );
    assert_eq!(
        other
            .open_datagram_channel(aio_groups::ProtocolFamily::Inet, Some(&group))
            .err(),
        Some(GroupError::IllegalGroup)
    );
    terminate(&group);
}

#[test]
fn test_cached_pool_serves_two_groups() {
    let provider = provider();
    let pool = WorkerPool::cached(0).unwrap();
    let first = provider.open_channel_group_with_pool(&pool).unwrap();
    let second = provider.open_channel_group_with_pool(&pool).unwrap();
    assert_eq!(pool.attached_groups(), 2);

    for group in [&first, &second] {
        let (channel, mut peer) = connected_pair(&provider, group);
        let (tx, rx) = mpsc::channel();
        channel
            .read(BytesMut::with_capacity(8), Timeout::secs(5), move |result, _| {
                tx.send(result).ok();
                Ok(())
            })
            .unwrap();
        peer.write_all(b"hi").unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ok(Transfer::Bytes(2)));
    }

    // Park a read on the second group, then tear the first one down
    let (channel, mut peer) = connected_pair(&provider, &second);
    let (tx, rx) = mpsc::channel();
    channel
        .read(BytesMut::with_capacity(8), Timeout::NONE, move |result, _| {
            tx.send(result).ok();
            Ok(())
        })
        .unwrap();

    // A shared pool outlives its groups
    terminate(&first);
    assert!(!pool.is_shutdown());
    assert_eq!(pool.attached_groups(), 1);

    // The surviving group still dispatches on the shared pool
    peer.write_all(b"still").unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ok(Transfer::Bytes(5)));
    assert!(provider.open_socket_channel(Some(&second)).is_ok());

    terminate(&second);
    assert_eq!(pool.attached_groups(), 0);
    assert!(!pool.is_shutdown());
    pool.shutdown();
}

#[test]
fn test_fixed_pool_binds_one_group() {
    let provider = provider();
    let pool = WorkerPool::fixed(2).unwrap();
    let group = provider.open_channel_group_with_pool(&pool).unwrap();

    assert!(matches!(
        provider.open_channel_group_with_pool(&pool),
        Err(GroupError::InvalidConfiguration(_))
    ));

    terminate(&group);
    pool.shutdown();
    assert!(matches!(
        provider.open_channel_group_with_pool(&pool),
        Err(GroupError::InvalidConfiguration(_))
    ));
}
