/*!
 * Socket Options
 *
 * Each channel flavour accepts a subset of options. Stream and listener
 * channels create their socket late, so options set before `connect` or
 * `bind` are kept on the core and applied to the new descriptor first.
 */

use crate::core::types::{SocketOption, SocketOptionName};
use crate::core::{GroupError, GroupResult};
use nix::sys::socket::{self, sockopt};
use std::io;
use std::os::fd::AsFd;

/// Options a connected or connecting TCP stream accepts
pub(crate) const STREAM_OPTIONS: &[SocketOptionName] = &[
    SocketOptionName::ReceiveBufferSize,
    SocketOptionName::SendBufferSize,
    SocketOptionName::KeepAlive,
    SocketOptionName::ReuseAddress,
    SocketOptionName::NoDelay,
];

pub(crate) const LISTENER_OPTIONS: &[SocketOptionName] = &[
    SocketOptionName::ReceiveBufferSize,
    SocketOptionName::ReuseAddress,
];

pub(crate) const DATAGRAM_OPTIONS: &[SocketOptionName] = &[
    SocketOptionName::ReceiveBufferSize,
    SocketOptionName::SendBufferSize,
    SocketOptionName::ReuseAddress,
];

/// Reject options the flavour does not take and sizes the kernel cannot use
pub(crate) fn validate(supported: &[SocketOptionName], option: SocketOption) -> GroupResult<()> {
    if !supported.contains(&option.name()) {
        return Err(GroupError::UnsupportedOption(option.name()));
    }
    match option {
        SocketOption::ReceiveBufferSize(0) | SocketOption::SendBufferSize(0) => {
            Err(GroupError::InvalidConfiguration(format!(
                "{} must be positive",
                option.name()
            )))
        }
        SocketOption::ReceiveBufferSize(n) | SocketOption::SendBufferSize(n)
            if i32::try_from(n).is_err() =>
        {
            Err(GroupError::InvalidConfiguration(format!(
                "{} of {} bytes is too large",
                option.name(),
                n
            )))
        }
        _ => Ok(()),
    }
}

pub(crate) fn apply<Fd: AsFd>(fd: &Fd, option: SocketOption) -> io::Result<()> {
    let result = match option {
        SocketOption::ReceiveBufferSize(n) => socket::setsockopt(fd, sockopt::RcvBuf, &n),
        SocketOption::SendBufferSize(n) => socket::setsockopt(fd, sockopt::SndBuf, &n),
        SocketOption::KeepAlive(on) => socket::setsockopt(fd, sockopt::KeepAlive, &on),
        SocketOption::ReuseAddress(on) => socket::setsockopt(fd, sockopt::ReuseAddr, &on),
        SocketOption::NoDelay(on) => socket::setsockopt(fd, sockopt::TcpNoDelay, &on),
    };
    result.map_err(io::Error::from)
}

pub(crate) fn apply_all<Fd: AsFd>(fd: &Fd, options: &[SocketOption]) -> io::Result<()> {
    options.iter().try_for_each(|option| apply(fd, *option))
}

pub(crate) fn query<Fd: AsFd>(fd: &Fd, name: SocketOptionName) -> io::Result<SocketOption> {
    let option = match name {
        SocketOptionName::ReceiveBufferSize => {
            SocketOption::ReceiveBufferSize(socket::getsockopt(fd, sockopt::RcvBuf)?)
        }
        SocketOptionName::SendBufferSize => {
            SocketOption::SendBufferSize(socket::getsockopt(fd, sockopt::SndBuf)?)
        }
        SocketOptionName::KeepAlive => {
            SocketOption::KeepAlive(socket::getsockopt(fd, sockopt::KeepAlive)?)
        }
        SocketOptionName::ReuseAddress => {
            SocketOption::ReuseAddress(socket::getsockopt(fd, sockopt::ReuseAddr)?)
        }
        SocketOptionName::NoDelay => {
            SocketOption::NoDelay(socket::getsockopt(fd, sockopt::TcpNoDelay)?)
        }
    };
    Ok(option)
}

/// Replace an earlier value of the same option or append
pub(crate) fn remember(deferred: &mut Vec<SocketOption>, option: SocketOption) {
    match deferred.iter_mut().find(|o| o.name() == option.name()) {
        Some(slot) => *slot = option,
        None => deferred.push(option),
    }
}
