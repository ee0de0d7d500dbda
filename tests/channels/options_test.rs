/*!
 * Socket Option Tests
 * Per-flavour option sets and options set before the socket exists
 */

use crate::support::{fixed_group, provider, terminate, WAIT};
use aio_groups::{GroupError, ProtocolFamily, SocketOption, SocketOptionName, Timeout};
use pretty_assertions::assert_eq;
use std::net::TcpListener;
use std::sync::mpsc;

#[test]
fn test_stream_options_set_before_connect_are_applied() {
    let provider = provider();
    let group = fixed_group(&provider, 1);
    let channel = provider.open_socket_channel(Some(&group)).unwrap();

    channel.set_option(SocketOption::KeepAlive(true)).unwrap();
    assert_eq!(
        channel.get_option(SocketOptionName::KeepAlive),
        Ok(SocketOption::KeepAlive(true))
    );
    assert_eq!(
        channel.get_option(SocketOptionName::NoDelay),
        Err(GroupError::NotConnected)
    );
    assert!(matches!(
        channel.set_option(SocketOption::ReceiveBufferSize(0)),
        Err(GroupError::InvalidConfiguration(_))
    ));

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let (tx, rx) = mpsc::channel();
    channel
        .connect(listener.local_addr().unwrap(), Timeout::secs(5), move |result| {
            tx.send(result).ok();
            Ok(())
        })
        .unwrap();
    let _peer = listener.accept().unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ok(()));

    // Read back from the kernel now that the socket exists
    assert_eq!(
        channel.get_option(SocketOptionName::KeepAlive),
        Ok(SocketOption::KeepAlive(true))
    );
    channel.set_option(SocketOption::NoDelay(true)).unwrap();
    assert_eq!(
        channel.get_option(SocketOptionName::NoDelay),
        Ok(SocketOption::NoDelay(true))
    );

    channel.close();
    assert_eq!(
        channel.set_option(SocketOption::NoDelay(false)),
        Err(GroupError::ChannelClosed)
    );
    terminate(&group);
}

#[test]
fn test_listener_options() {
    let provider = provider();
    let group = fixed_group(&provider, 1);
    let server = provider.open_server_channel(Some(&group)).unwrap();

    assert_eq!(
        server.set_option(SocketOption::KeepAlive(true)),
        Err(GroupError::UnsupportedOption(SocketOptionName::KeepAlive))
    );
    assert_eq!(
        server.get_option(SocketOptionName::ReceiveBufferSize),
        Err(GroupError::NotBound)
    );

    // Overrides the listener's default of reusing the address
    server.set_option(SocketOption::ReuseAddress(false)).unwrap();
    server.bind("127.0.0.1:0".parse().unwrap(), 0).unwrap();
    assert_eq!(
        server.get_option(SocketOptionName::ReuseAddress),
        Ok(SocketOption::ReuseAddress(false))
    );
    assert!(matches!(
        server.get_option(SocketOptionName::ReceiveBufferSize),
        Ok(SocketOption::ReceiveBufferSize(n)) if n > 0
    ));

    terminate(&group);
}

#[test]
fn test_datagram_options() {
    let provider = provider();
    let group = fixed_group(&provider, 1);
    let channel = provider
        .open_datagram_channel(ProtocolFamily::Inet, Some(&group))
        .unwrap();

    assert_eq!(
        channel.set_option(SocketOption::NoDelay(true)),
        Err(GroupError::UnsupportedOption(SocketOptionName::NoDelay))
    );
    channel.set_option(SocketOption::SendBufferSize(64 * 1024)).unwrap();
    assert!(matches!(
        channel.get_option(SocketOptionName::SendBufferSize),
        Ok(SocketOption::SendBufferSize(n)) if n >= 32 * 1024
    ));
    channel.set_option(SocketOption::ReuseAddress(true)).unwrap();
    assert_eq!(
        channel.get_option(SocketOptionName::ReuseAddress),
        Ok(SocketOption::ReuseAddress(true))
    );

    channel.close();
    assert_eq!(
        channel.get_option(SocketOptionName::ReuseAddress),
        Err(GroupError::ChannelClosed)
    );
    terminate(&group);
}
