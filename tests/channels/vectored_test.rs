/*!
 * Vectored I/O Tests
 * Scattering reads and gathering writes on stream and datagram channels
 */

use crate::support::{connected_pair, fixed_group, provider, terminate, WAIT};
use aio_groups::{ProtocolFamily, Timeout, Transfer};
use bytes::{Bytes, BytesMut};
use pretty_assertions::assert_eq;
use std::io::{Read, Write};
use std::net::Shutdown;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn joined(bufs: &[BytesMut]) -> Vec<u8> {
    bufs.iter().flat_map(|b| b.iter().copied()).collect()
}

#[test]
fn test_stream_scatter_and_gather() {
    let provider = provider();
    let group = fixed_group(&provider, 2);
    let (channel, mut peer) = connected_pair(&provider, &group);

    // Gathering write skips empty buffers
    let (wtx, wrx) = mpsc::channel();
    channel
        .write_vectored(
            vec![
                Bytes::from_static(b"abc"),
                Bytes::new(),
                Bytes::from_static(b"def"),
            ],
            Timeout::secs(5),
            move |result, rest| {
                wtx.send((result, rest.len())).ok();
                Ok(())
            },
        )
        .unwrap();
    assert_eq!(wrx.recv_timeout(WAIT).unwrap(), (Ok(6), 0));
    let mut got = [0u8; 6];
    peer.read_exact(&mut got).unwrap();
    assert_eq!(&got, b"abcdef");

    // Scattering read fills the first buffer before the second
    peer.write_all(b"hello world").unwrap();
    thread::sleep(Duration::from_millis(50));
    let (rtx, rrx) = mpsc::channel();
    channel
        .read_vectored(
            vec![BytesMut::with_capacity(4), BytesMut::with_capacity(32)],
            Timeout::secs(5),
            move |result, bufs| {
                rtx.send((result, bufs)).ok();
                Ok(())
            },
        )
        .unwrap();
    let (result, bufs) = rrx.recv_timeout(WAIT).unwrap();
    assert_eq!(result, Ok(Transfer::Bytes(11)));
    assert_eq!(joined(&bufs), b"hello world".to_vec());
    assert_eq!(bufs[0].len(), bufs[0].capacity());

    terminate(&group);
}

#[test]
fn test_stream_vectored_read_edges() {
    let provider = provider();
    let group = fixed_group(&provider, 1);
    let (channel, peer) = connected_pair(&provider, &group);

    // Every buffer already full
    let mut full = BytesMut::with_capacity(2);
    full.resize(full.capacity(), b'x');
    let (tx, rx) = mpsc::channel();
    channel
        .read_vectored(vec![full], Timeout::NONE, move |result, _| {
            tx.send(result).ok();
            Ok(())
        })
        .unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ok(Transfer::Bytes(0)));

    peer.shutdown(Shutdown::Write).unwrap();
    let (tx, rx) = mpsc::channel();
    channel
        .read_vectored(
            vec![BytesMut::with_capacity(8), BytesMut::with_capacity(8)],
            Timeout::secs(5),
            move |result, bufs| {
                tx.send((result, bufs.iter().map(BytesMut::len).sum::<usize>())).ok();
                Ok(())
            },
        )
        .unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (Ok(Transfer::Eof), 0));

    terminate(&group);
}

#[test]
fn test_datagram_vectored_round_trip() {
    let provider = provider();
    let group = fixed_group(&provider, 2);
    let a = provider
        .open_datagram_channel(ProtocolFamily::Inet, Some(&group))
        .unwrap();
    let b = provider
        .open_datagram_channel(ProtocolFamily::Inet, Some(&group))
        .unwrap();
    a.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    b.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    a.connect(b.local_addr().unwrap()).unwrap();
    b.connect(a.local_addr().unwrap()).unwrap();

    let (rtx, rrx) = mpsc::channel();
    b.read_vectored(
        vec![BytesMut::with_capacity(4), BytesMut::with_capacity(32)],
        Timeout::secs(5),
        move |result, bufs| {
            rtx.send((result, joined(&bufs))).ok();
            Ok(())
        },
    )
    .unwrap();

    // One datagram gathered from three buffers
    let (wtx, wrx) = mpsc::channel();
    a.write_vectored(
        vec![
            Bytes::from_static(b"head"),
            Bytes::from_static(b"-"),
            Bytes::from_static(b"tail"),
        ],
        Timeout::secs(5),
        move |result, _| {
            wtx.send(result).ok();
            Ok(())
        },
    )
    .unwrap();
    assert_eq!(wrx.recv_timeout(WAIT).unwrap(), Ok(9));
    assert_eq!(
        rrx.recv_timeout(WAIT).unwrap(),
        (Ok(Transfer::Bytes(9)), b"head-tail".to_vec())
    );

    terminate(&group);
}
