/*!
 * Socket Channel Tests
 * Connect, per-kind exclusivity and precondition errors
 */

use crate::support::{connected_pair, fixed_group, provider, terminate, WAIT};
use aio_groups::{
    BackendKind, CompletionError, GroupError, OpKind, PoolKind, Provider, Timeout, Transfer,
};
use bytes::{Bytes, BytesMut};
use pretty_assertions::assert_eq;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

#[test]
fn test_second_read_while_pending_is_rejected() {
    let provider = provider();
    let group = fixed_group(&provider, 2);
    let (channel, mut peer) = connected_pair(&provider, &group);

    let (tx, rx) = mpsc::channel();
    channel
        .read(BytesMut::with_capacity(16), Timeout::NONE, move |result, buf| {
            tx.send((result, buf)).ok();
            Ok(())
        })
        .unwrap();

    assert_eq!(
        channel
            .read(BytesMut::with_capacity(16), Timeout::NONE, |_, _| Ok(()))
            .err(),
        Some(GroupError::ConcurrentOperation(OpKind::Read))
    );

    // A write may run alongside the pending read
    let (wtx, wrx) = mpsc::channel();
    channel
        .write(Bytes::from_static(b"pong"), Timeout::NONE, move |result, rest| {
            wtx.send((result, rest.len())).ok();
            Ok(())
        })
        .unwrap();
    assert_eq!(wrx.recv_timeout(WAIT).unwrap(), (Ok(4), 0));
    let mut echo = [0u8; 4];
    peer.read_exact(&mut echo).unwrap();
    assert_eq!(&echo, b"pong");

    peer.write_all(b"ping").unwrap();
    let (result, buf) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(result, Ok(Transfer::Bytes(4)));
    assert_eq!(&buf[..], b"ping");

    // The read slot is free again
    let (tx, rx) = mpsc::channel();
    channel
        .read(BytesMut::with_capacity(16), Timeout::NONE, move |result, _| {
            tx.send(result).ok();
            Ok(())
        })
        .unwrap();
    drop(peer);
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ok(Transfer::Eof));

    terminate(&group);
}

#[test]
fn test_unconnected_channel_rejects_io() {
    let provider = provider();
    let group = fixed_group(&provider, 1);
    let channel = provider.open_socket_channel(Some(&group)).unwrap();

    assert!(!channel.is_connected());
    assert_eq!(channel.local_addr(), Ok(None));
    assert_eq!(
        channel
            .read(BytesMut::with_capacity(4), Timeout::NONE, |_, _| Ok(()))
            .err(),
        Some(GroupError::NotConnected)
    );
    assert_eq!(
        channel
            .write(Bytes::from_static(b"x"), Timeout::NONE, |_, _| Ok(()))
            .err(),
        Some(GroupError::NotConnected)
    );

    terminate(&group);
}

#[test]
fn test_connect_twice_is_rejected() {
    let provider = provider();
    let group = fixed_group(&provider, 1);
    let (channel, _peer) = connected_pair(&provider, &group);

    let addr = channel.peer_addr().unwrap().unwrap();
    assert_eq!(
        channel.connect(addr, Timeout::NONE, |_| Ok(())).err(),
        Some(GroupError::AlreadyConnected)
    );

    terminate(&group);
}

#[test]
fn test_refused_connect_reports_error_and_closes() {
    let provider = provider();
    let group = fixed_group(&provider, 1);

    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let channel = provider.open_socket_channel(Some(&group)).unwrap();
    let (tx, rx) = mpsc::channel();
    channel
        .connect(addr, Timeout::secs(5), move |result| {
            tx.send(result).ok();
            Ok(())
        })
        .unwrap();

    let err = rx.recv_timeout(WAIT).unwrap().unwrap_err();
    assert_eq!(err.io_kind(), Some(ErrorKind::ConnectionRefused));
    assert!(!channel.is_connected());
    assert!(!channel.is_open());

    terminate(&group);
}

#[test]
fn test_server_preconditions() {
    let provider = provider();
    let group = fixed_group(&provider, 1);
    let server = provider.open_server_channel(Some(&group)).unwrap();

    assert_eq!(
        server.accept(Timeout::NONE, |_| Ok(())).err(),
        Some(GroupError::NotBound)
    );
    assert_eq!(server.local_addr().err(), Some(GroupError::NotBound));

    server.bind("127.0.0.1:0".parse().unwrap(), 0).unwrap();
    assert_eq!(
        server.bind("127.0.0.1:0".parse().unwrap(), 16).err(),
        Some(GroupError::AlreadyBound)
    );

    let (tx, rx) = mpsc::channel();
    server
        .accept(Timeout::NONE, move |result| {
            tx.send(result.map(|c| c.is_connected())).ok();
            Ok(())
        })
        .unwrap();
    server.close();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Err(CompletionError::Closed));

    terminate(&group);
}

#[test]
fn test_idle_hung_up_channel_does_not_wake_dispatcher() {
    let mut backends = vec![BackendKind::Poll];
    if BackendKind::Epoll.is_supported() {
        backends.push(BackendKind::Epoll);
    }

    for backend in backends {
        let provider = Provider::builder().with_backend(backend).build().unwrap();
        let group = provider.open_channel_group(PoolKind::Fixed, 1).unwrap();
        let (channel, peer) = connected_pair(&provider, &group);

        channel.shutdown_output().unwrap();
        drop(peer);
        thread::sleep(Duration::from_millis(100));

        let before = group.stats().late_discarded;
        thread::sleep(Duration::from_millis(300));
        let after = group.stats().late_discarded;
        assert!(
            after - before <= 2,
            "{} dispatcher woke {} times for an idle channel",
            backend,
            after - before
        );

        // The hang-up is still observable once a read is issued
        let (tx, rx) = mpsc::channel();
        channel
            .read(BytesMut::with_capacity(8), Timeout::secs(5), move |result, _| {
                tx.send(result).ok();
                Ok(())
            })
            .unwrap();
        let result = rx.recv_timeout(WAIT).unwrap();
        assert!(
            matches!(result, Ok(Transfer::Eof)) || result.is_err(),
            "{}: {:?}",
            backend,
            result
        );

        terminate(&group);
    }
}

#[test]
fn test_read_slot_held_until_callback_is_entered() {
    let provider = provider();
    let group = fixed_group(&provider, 1);
    let (blocker, mut blocker_peer) = connected_pair(&provider, &group);
    let (channel, mut peer) = connected_pair(&provider, &group);

    // Occupy the only dispatcher thread inside a callback
    let (entered_tx, entered_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();
    blocker
        .read(BytesMut::with_capacity(8), Timeout::NONE, move |_, _| {
            entered_tx.send(()).ok();
            resume_rx.recv_timeout(WAIT).ok();
            Ok(())
        })
        .unwrap();
    blocker_peer.write_all(b"hold").unwrap();
    entered_rx.recv_timeout(WAIT).unwrap();

    peer.write_all(b"ready").unwrap();
    thread::sleep(Duration::from_millis(50));

    let (tx, rx) = mpsc::channel();
    channel
        .read(BytesMut::with_capacity(8), Timeout::NONE, move |result, _| {
            tx.send(result).ok();
            Ok(())
        })
        .unwrap();

    // Completed or not, the first callback has not run yet
    assert_eq!(
        channel
            .read(BytesMut::with_capacity(8), Timeout::NONE, |_, _| Ok(()))
            .err(),
        Some(GroupError::ConcurrentOperation(OpKind::Read))
    );

    resume_tx.send(()).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ok(Transfer::Bytes(5)));

    let (tx, rx) = mpsc::channel();
    channel
        .read(BytesMut::with_capacity(8), Timeout::millis(50), move |result, _| {
            tx.send(result).ok();
            Ok(())
        })
        .unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Err(CompletionError::Timeout));

    terminate(&group);
}
