/*!
 * Core Types
 * Identifiers and small value types shared by groups, channels and the dispatcher
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Result returned by every completion handler
///
/// `Err` is logged by the dispatcher and otherwise ignored.
pub type HandlerResult = anyhow::Result<()>;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $counter:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        static $counter: AtomicU64 = AtomicU64::new(1);

        impl $name {
            /// Allocate the next process-unique identifier
            pub(crate) fn next() -> Self {
                Self($counter.fetch_add(1, Ordering::Relaxed))
            }

            /// Raw value
            pub fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Provider identifier, used to reject groups minted by another provider
    ProviderId,
    NEXT_PROVIDER_ID,
    "provider"
);
define_id!(
    /// Channel group identifier
    GroupId,
    NEXT_GROUP_ID,
    "group"
);
define_id!(
    /// Worker pool identifier
    PoolId,
    NEXT_POOL_ID,
    "pool"
);
define_id!(
    /// Channel identifier, doubles as the backend token for the channel's fd
    ChannelId,
    NEXT_CHANNEL_ID,
    "channel"
);
define_id!(
    /// Pending operation identifier
    OpId,
    NEXT_OP_ID,
    "op"
);

/// Kind of an asynchronous operation
///
/// A channel holds at most one pending operation of each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Read,
    Write,
    Accept,
    Connect,
}

impl OpKind {
    pub const ALL: [OpKind; 4] = [OpKind::Read, OpKind::Write, OpKind::Accept, OpKind::Connect];

    /// Bit used in the per-channel pending mask
    #[inline]
    pub(crate) const fn bit(self) -> u8 {
        match self {
            OpKind::Read => 0b0001,
            OpKind::Write => 0b0010,
            OpKind::Accept => 0b0100,
            OpKind::Connect => 0b1000,
        }
    }

    /// Slot index in per-channel tables
    #[inline]
    pub(crate) const fn index(self) -> usize {
        match self {
            OpKind::Read => 0,
            OpKind::Write => 1,
            OpKind::Accept => 2,
            OpKind::Connect => 3,
        }
    }

    /// Readiness this operation waits on
    pub(crate) const fn interest(self) -> Interest {
        match self {
            OpKind::Read | OpKind::Accept => Interest::READABLE,
            OpKind::Write | OpKind::Connect => Interest::WRITABLE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Read => "read",
            OpKind::Write => "write",
            OpKind::Accept => "accept",
            OpKind::Connect => "connect",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Readiness interest registered with a completion backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Self = Self(0);
    pub const READABLE: Self = Self(0b01);
    pub const WRITABLE: Self = Self(0b10);

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn is_readable(&self) -> bool {
        self.0 & 0b01 != 0
    }

    #[inline]
    pub const fn is_writable(&self) -> bool {
        self.0 & 0b10 != 0
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Outcome of a successful read
///
/// End of stream is a success, not a failure: callers must check for `Eof`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transfer {
    Bytes(usize),
    Eof,
}

impl Transfer {
    pub fn is_eof(&self) -> bool {
        matches!(self, Transfer::Eof)
    }

    /// Bytes moved, zero for end of stream
    pub fn bytes(&self) -> usize {
        match self {
            Transfer::Bytes(n) => *n,
            Transfer::Eof => 0,
        }
    }

    /// Count with `-1` as the end-of-stream sentinel
    pub fn as_count(&self) -> isize {
        match self {
            Transfer::Bytes(n) => *n as isize,
            Transfer::Eof => -1,
        }
    }
}

/// Address family for datagram channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolFamily {
    Inet,
    Inet6,
}

/// Socket option with its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SocketOption {
    /// `SO_RCVBUF`; the kernel may round or double the size
    ReceiveBufferSize(usize),
    /// `SO_SNDBUF`; the kernel may round or double the size
    SendBufferSize(usize),
    KeepAlive(bool),
    ReuseAddress(bool),
    /// `TCP_NODELAY`, stream channels only
    NoDelay(bool),
}

impl SocketOption {
    pub const fn name(&self) -> SocketOptionName {
        match self {
            SocketOption::ReceiveBufferSize(_) => SocketOptionName::ReceiveBufferSize,
            SocketOption::SendBufferSize(_) => SocketOptionName::SendBufferSize,
            SocketOption::KeepAlive(_) => SocketOptionName::KeepAlive,
            SocketOption::ReuseAddress(_) => SocketOptionName::ReuseAddress,
            SocketOption::NoDelay(_) => SocketOptionName::NoDelay,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocketOptionName {
    ReceiveBufferSize,
    SendBufferSize,
    KeepAlive,
    ReuseAddress,
    NoDelay,
}

impl fmt::Display for SocketOptionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SocketOptionName::ReceiveBufferSize => "SO_RCVBUF",
            SocketOptionName::SendBufferSize => "SO_SNDBUF",
            SocketOptionName::KeepAlive => "SO_KEEPALIVE",
            SocketOptionName::ReuseAddress => "SO_REUSEADDR",
            SocketOptionName::NoDelay => "TCP_NODELAY",
        };
        f.write_str(name)
    }
}
