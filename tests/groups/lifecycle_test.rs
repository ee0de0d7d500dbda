/*!
 * Group Lifecycle Tests
 * OPEN -> SHUTTING_DOWN -> TERMINATED, orderly and immediate
 */

use crate::support::{connected_pair, fixed_group, provider, terminate, WAIT};
use aio_groups::{CompletionError, GroupError, GroupState, PoolKind, Timeout, Transfer};
use bytes::BytesMut;
use pretty_assertions::assert_eq;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

#[test]
fn test_empty_group_terminates_on_shutdown() {
    let provider = provider();
    let group = fixed_group(&provider, 2);
    assert_eq!(group.state(), GroupState::Open);

    group.shutdown();
    assert!(group.is_shutdown());
    assert!(group.await_termination(WAIT));
    assert_eq!(group.state(), GroupState::Terminated);

    // Exclusive pool goes down with the group
    assert!(group.pool().is_shutdown());

    // Idempotent
    group.shutdown();
    group.shutdown_now();
    assert_eq!(group.state(), GroupState::Terminated);
}

#[test]
fn test_shutdown_lets_pending_operations_finish() {
    let provider = provider();
    let group = fixed_group(&provider, 1);
    let (channel, mut peer) = connected_pair(&provider, &group);

    let (tx, rx) = mpsc::channel();
    channel
        .read(BytesMut::with_capacity(32), Timeout::NONE, move |result, buf| {
            tx.send((result, buf)).ok();
            Ok(())
        })
        .unwrap();

    group.shutdown();
    assert_eq!(group.state(), GroupState::ShuttingDown);
    assert!(!group.await_termination(Duration::from_millis(100)));

    // No new channels, no new operations
    assert_eq!(
        provider.open_socket_channel(Some(&group)).err(),
        Some(GroupError::GroupShutdown)
    );
    assert_eq!(
        channel
            .write(bytes::Bytes::from_static(b"x"), Timeout::NONE, |_, _| Ok(()))
            .err(),
        Some(GroupError::GroupShutdown)
    );

    peer.write_all(b"late").unwrap();
    let (result, buf) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(result, Ok(Transfer::Bytes(4)));
    assert_eq!(&buf[..], b"late");

    assert!(group.await_termination(WAIT));
    assert!(group.is_terminated());
}

#[test]
fn test_shutdown_now_cancels_each_operation_once() {
    let provider = provider();
    let group = fixed_group(&provider, 2);
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let mut pairs = Vec::new();
    for _ in 0..3 {
        let (channel, peer) = connected_pair(&provider, &group);
        let calls = Arc::clone(&calls);
        let tx = tx.clone();
        channel
            .read(BytesMut::with_capacity(16), Timeout::NONE, move |result, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                tx.send(result).ok();
                Ok(())
            })
            .unwrap();
        pairs.push((channel, peer));
    }
    drop(tx);
    assert_eq!(group.pending_count(), 3);

    group.shutdown_now();
    assert_eq!(group.pending_count(), 0);
    assert!(group.await_termination(WAIT));

    for _ in 0..3 {
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Err(CompletionError::Cancelled));
    }
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    for (channel, _) in &pairs {
        assert!(!channel.is_open());
    }
    assert_eq!(group.stats().cancelled, 3);

    // Second call has nothing left to cancel
    group.shutdown_now();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_close_fails_pending_operation_with_closed() {
    let provider = provider();
    let group = fixed_group(&provider, 1);
    let (channel, _peer) = connected_pair(&provider, &group);

    let (tx, rx) = mpsc::channel();
    channel
        .read(BytesMut::with_capacity(16), Timeout::NONE, move |result, _| {
            tx.send(result).ok();
            Ok(())
        })
        .unwrap();

    channel.close();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Err(CompletionError::Closed));
    assert!(!channel.is_open());
    assert_eq!(group.pending_count(), 0);

    assert_eq!(
        channel
            .read(BytesMut::with_capacity(16), Timeout::NONE, |_, _| Ok(()))
            .err(),
        Some(GroupError::ChannelClosed)
    );

    // Closing twice is harmless
    channel.close();
    terminate(&group);
}

#[test]
fn test_cached_termination_waits_for_running_callback() {
    let provider = provider();
    let group = provider.open_channel_group(PoolKind::Cached, 1).unwrap();
    let (channel, mut peer) = connected_pair(&provider, &group);

    let finished = Arc::new(AtomicBool::new(false));
    let (entered_tx, entered_rx) = mpsc::channel();
    let flag = Arc::clone(&finished);
    channel
        .read(BytesMut::with_capacity(8), Timeout::NONE, move |_, _| {
            entered_tx.send(()).ok();
            std::thread::sleep(Duration::from_millis(200));
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    peer.write_all(b"go").unwrap();
    entered_rx.recv_timeout(WAIT).unwrap();

    group.shutdown_now();
    assert!(group.await_termination(WAIT));
    assert!(finished.load(Ordering::SeqCst), "termination reported before the callback returned");
}
