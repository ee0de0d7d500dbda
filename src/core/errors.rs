/*!
 * Error Types
 * Synchronous precondition errors and completion failures, with thiserror and miette
 */

use super::types::{OpKind, SocketOptionName};
use miette::Diagnostic;
use std::io;
use thiserror::Error;

/// Result for calls that fail synchronously
pub type GroupResult<T> = Result<T, GroupError>;

/// Errors raised to the caller before an operation is admitted
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum GroupError {
    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(group::invalid_configuration),
        help("Fixed pools need at least one thread. Check pool kind, size and AIO_* variables.")
    )]
    InvalidConfiguration(String),

    #[error("Channel group belongs to a different provider")]
    #[diagnostic(
        code(group::illegal_group),
        help("Open the channel through the provider that created the group.")
    )]
    IllegalGroup,

    #[error("Channel group is shut down")]
    #[diagnostic(
        code(group::shutdown),
        help("The group no longer accepts channels or operations. Stop issuing new work.")
    )]
    GroupShutdown,

    #[error("A {0} operation is already pending on this channel")]
    #[diagnostic(
        code(channel::concurrent_operation),
        help("Issue the next operation from the completion handler of the previous one.")
    )]
    ConcurrentOperation(OpKind),

    #[error("Channel is closed")]
    #[diagnostic(code(channel::closed))]
    ChannelClosed,

    #[error("Channel is not connected")]
    #[diagnostic(code(channel::not_connected))]
    NotConnected,

    #[error("Channel is already connected")]
    #[diagnostic(code(channel::already_connected))]
    AlreadyConnected,

    #[error("A connection attempt is already in progress")]
    #[diagnostic(code(channel::connection_pending))]
    ConnectionPending,

    #[error("Channel is not bound")]
    #[diagnostic(code(channel::not_bound), help("Call bind() before accepting."))]
    NotBound,

    #[error("Channel is already bound")]
    #[diagnostic(code(channel::already_bound))]
    AlreadyBound,

    #[error("{0} is not supported by this channel")]
    #[diagnostic(
        code(channel::unsupported_option),
        help("Listeners take SO_RCVBUF and SO_REUSEADDR; datagram channels also take SO_SNDBUF.")
    )]
    UnsupportedOption(SocketOptionName),

    #[error("Permission denied: {0}")]
    #[diagnostic(
        code(group::permission_denied),
        help("The installed permission gate refused the request.")
    )]
    PermissionDenied(String),

    #[error("Worker pool is shut down")]
    #[diagnostic(code(pool::shutdown))]
    PoolShutdown,

    #[error("I/O error ({kind:?}): {message}")]
    #[diagnostic(code(group::io))]
    Io { kind: io::ErrorKind, message: String },
}

impl From<io::Error> for GroupError {
    fn from(err: io::Error) -> Self {
        GroupError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<nix::errno::Errno> for GroupError {
    fn from(err: nix::errno::Errno) -> Self {
        io::Error::from(err).into()
    }
}

/// Failure delivered to a completion handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompletionError {
    /// The operation's deadline elapsed first
    #[error("Operation timed out")]
    Timeout,

    /// The group was shut down with `shutdown_now`
    #[error("Operation cancelled")]
    Cancelled,

    /// The channel was closed while the operation was pending
    #[error("Channel closed while operation was pending")]
    Closed,

    #[error("I/O error ({kind:?}): {message}")]
    Io { kind: io::ErrorKind, message: String },
}

impl CompletionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CompletionError::Timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CompletionError::Cancelled)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, CompletionError::Closed)
    }

    /// The I/O error kind, if this is an I/O failure
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            CompletionError::Io { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<io::Error> for CompletionError {
    fn from(err: io::Error) -> Self {
        CompletionError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<GroupError> for CompletionError {
    fn from(err: GroupError) -> Self {
        match err {
            GroupError::Io { kind, message } => CompletionError::Io { kind, message },
            GroupError::ChannelClosed => CompletionError::Closed,
            GroupError::GroupShutdown => CompletionError::Cancelled,
            other => CompletionError::Io {
                kind: io::ErrorKind::Other,
                message: other.to_string(),
            },
        }
    }
}
