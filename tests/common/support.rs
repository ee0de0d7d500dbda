/*!
 * Shared helpers for group and channel tests
 */

#![allow(dead_code)]

use aio_groups::{init_tracing, AsyncSocketChannel, ChannelGroup, PoolKind, Provider, Timeout};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::time::Duration;

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

pub fn provider() -> Provider {
    init_tracing();
    Provider::new().expect("Failed to create provider")
}

pub fn fixed_group(provider: &Provider, threads: isize) -> ChannelGroup {
    provider
        .open_channel_group(PoolKind::Fixed, threads)
        .expect("Failed to open fixed group")
}

/// Socket channel in `group` connected to a plain blocking peer
pub fn connected_pair(provider: &Provider, group: &ChannelGroup) -> (AsyncSocketChannel, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let addr = listener.local_addr().unwrap();

    let channel = provider.open_socket_channel(Some(group)).unwrap();
    let (tx, rx) = mpsc::channel();
    channel
        .connect(addr, Timeout::secs(5), move |result| {
            tx.send(result).ok();
            Ok(())
        })
        .expect("connect rejected");

    let (peer, _) = listener.accept().expect("Failed to accept");
    peer.set_read_timeout(Some(WAIT)).unwrap();
    rx.recv_timeout(WAIT)
        .expect("connect never completed")
        .expect("connect failed");
    assert!(channel.is_connected());
    (channel, peer)
}

/// Cancel everything and wait for the pool to be released
pub fn terminate(group: &ChannelGroup) {
    group.shutdown_now();
    assert!(group.await_termination(WAIT), "group did not terminate");
}
