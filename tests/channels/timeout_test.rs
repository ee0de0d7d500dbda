/*!
 * Operation Timeout Tests
 */

use crate::support::{connected_pair, fixed_group, provider, terminate, WAIT};
use aio_groups::{CompletionError, PoolKind, TimeUnit, Timeout, Transfer};
use bytes::BytesMut;
use pretty_assertions::assert_eq;
use std::io::Write;
use std::sync::mpsc;
use std::time::{Duration, Instant};

#[test]
fn test_read_times_out_within_bounds_and_channel_is_reusable() {
    let provider = provider();
    let group = fixed_group(&provider, 2);
    let (channel, mut peer) = connected_pair(&provider, &group);

    let (tx, rx) = mpsc::channel();
    let issued = Instant::now();
    channel
        .read(
            BytesMut::with_capacity(16),
            Timeout::new(200, TimeUnit::Milliseconds),
            move |result, _| {
                tx.send((result, Instant::now())).ok();
                Ok(())
            },
        )
        .unwrap();

    let (result, fired) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(result, Err(CompletionError::Timeout));
    let elapsed = fired.duration_since(issued);
    assert!(elapsed >= Duration::from_millis(200), "fired early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "fired late: {:?}", elapsed);
    assert_eq!(group.pending_count(), 0);

    // Timed-out reads leave the channel open and the slot free
    assert!(channel.is_open());
    let (tx, rx) = mpsc::channel();
    channel
        .read(BytesMut::with_capacity(16), Timeout::secs(5), move |result, buf| {
            tx.send((result, buf)).ok();
            Ok(())
        })
        .unwrap();
    peer.write_all(b"after").unwrap();

    let (result, buf) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(result, Ok(Transfer::Bytes(5)));
    assert_eq!(&buf[..], b"after");

    terminate(&group);
}

#[test]
fn test_deadlines_fire_in_order_on_cached_group() {
    let provider = provider();
    let group = provider.open_channel_group(PoolKind::Cached, 0).unwrap();

    let (tx, rx) = mpsc::channel();
    let mut pairs = Vec::new();
    for (tag, millis) in [(2u8, 300i64), (0, 100), (1, 200)] {
        let (channel, peer) = connected_pair(&provider, &group);
        let tx = tx.clone();
        channel
            .read(BytesMut::with_capacity(4), Timeout::millis(millis), move |result, _| {
                assert_eq!(result, Err(CompletionError::Timeout));
                tx.send(tag).ok();
                Ok(())
            })
            .unwrap();
        pairs.push((channel, peer));
    }

    let order: Vec<u8> = (0..3).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
    assert_eq!(order, vec![0, 1, 2]);
    assert_eq!(group.stats().timed_out, 3);

    terminate(&group);
}

#[test]
fn test_zero_timeout_means_no_deadline() {
    let provider = provider();
    let group = fixed_group(&provider, 1);
    let (channel, mut peer) = connected_pair(&provider, &group);

    let (tx, rx) = mpsc::channel();
    channel
        .read(BytesMut::with_capacity(4), Timeout::millis(0), move |result, _| {
            tx.send(result).ok();
            Ok(())
        })
        .unwrap();

    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    peer.write_all(b"z").unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ok(Transfer::Bytes(1)));

    terminate(&group);
}
