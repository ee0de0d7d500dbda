/*!
 * Asynchronous Server Socket Channel
 *
 * Listening TCP channel. Each accept completes once; handlers that want
 * more connections issue the next accept themselves.
 */

use super::shared::{new_socket, Attempt, ChannelCore, Completion, Operation, Sock};
use super::io::would_block;
use super::options::{self, LISTENER_OPTIONS};
use super::socket::AsyncSocketChannel;
use crate::core::limits::DEFAULT_BACKLOG;
use crate::core::types::{ChannelId, HandlerResult, OpKind, SocketOption, SocketOptionName};
use crate::core::{CompletionError, GroupError, GroupResult, Timeout};
use crate::group::{ChannelGroup, GroupInner};
use nix::sys::socket::{self, sockopt, AddressFamily, Backlog, SockType, SockaddrStorage};
use std::fmt;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use tracing::{debug, info};

/// Asynchronous TCP listening channel
#[derive(Clone)]
pub struct AsyncServerSocketChannel {
    core: Arc<ChannelCore>,
    group: Arc<GroupInner>,
}

impl AsyncServerSocketChannel {
    pub(crate) fn open(group: &Arc<GroupInner>) -> GroupResult<Self> {
        let core = ChannelCore::new(group);
        group.register_channel(&core, false)?;
        debug!(group = %group.id(), channel = %core.id(), "Server channel opened");
        Ok(Self {
            core,
            group: Arc::clone(group),
        })
    }

    pub fn id(&self) -> ChannelId {
        self.core.id()
    }

    pub fn group(&self) -> ChannelGroup {
        ChannelGroup::from_inner(Arc::clone(&self.group))
    }

    pub fn is_open(&self) -> bool {
        self.core.is_open()
    }

    /// Bind to `addr` and start listening
    ///
    /// A backlog of zero uses the default.
    pub fn bind(&self, addr: SocketAddr, backlog: u32) -> GroupResult<()> {
        if !self.core.is_open() {
            return Err(GroupError::ChannelClosed);
        }
        let deferred = self.core.deferred_options();
        if self.core.has_socket() {
            return Err(GroupError::AlreadyBound);
        }

        let family = match addr {
            SocketAddr::V4(_) => AddressFamily::Inet,
            SocketAddr::V6(_) => AddressFamily::Inet6,
        };
        let fd = new_socket(family, SockType::Stream)?;
        socket::setsockopt(&fd, sockopt::ReuseAddr, &true)?;
        options::apply_all(&fd, &deferred)?;
        socket::bind(fd.as_raw_fd(), &SockaddrStorage::from(addr))?;

        let backlog = match backlog {
            0 => DEFAULT_BACKLOG,
            n => i32::try_from(n).unwrap_or(i32::MAX),
        };
        let backlog = Backlog::new(backlog).unwrap_or(Backlog::MAXCONN);
        socket::listen(&fd, backlog)?;

        let listener = TcpListener::from(fd);
        listener.set_nonblocking(true)?;
        let local = listener.local_addr()?;
        self.core.install(Sock::Listener(listener))?;
        drop(deferred);

        info!(group = %self.group.id(), channel = %self.core.id(), addr = %local, "Server channel listening");
        Ok(())
    }

    /// Accept one connection
    ///
    /// The accepted channel joins this channel's group.
    pub fn accept<F>(&self, timeout: impl Into<Timeout>, handler: F) -> GroupResult<()>
    where
        F: FnOnce(Result<AsyncSocketChannel, CompletionError>) -> HandlerResult + Send + 'static,
    {
        if !self.core.is_open() {
            return Err(GroupError::ChannelClosed);
        }
        if !self.core.has_socket() {
            return Err(GroupError::NotBound);
        }
        let op = Box::new(AcceptOp { handler });
        self.group.submit(&self.core, op, timeout.into())
    }

    pub fn local_addr(&self) -> GroupResult<SocketAddr> {
        if !self.core.is_open() {
            return Err(GroupError::ChannelClosed);
        }
        match self.core.io().as_ref() {
            Some(sock) => Ok(sock.local_addr()?),
            None => Err(GroupError::NotBound),
        }
    }

    /// Set `SO_RCVBUF` or `SO_REUSEADDR`; before `bind` the value is applied
    /// when the listener is created
    pub fn set_option(&self, option: SocketOption) -> GroupResult<()> {
        self.core.set_option(LISTENER_OPTIONS, option)
    }

    pub fn get_option(&self, name: SocketOptionName) -> GroupResult<SocketOption> {
        self.core
            .get_option(LISTENER_OPTIONS, name)?
            .ok_or(GroupError::NotBound)
    }

    /// Close the listener; a pending accept completes with `Closed`
    pub fn close(&self) {
        self.core.close();
    }
}

impl fmt::Debug for AsyncServerSocketChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncServerSocketChannel")
            .field("id", &self.core.id())
            .field("group", &self.group.id())
            .field("open", &self.core.is_open())
            .finish()
    }
}

struct AcceptOp<F> {
    handler: F,
}

impl<F> AcceptOp<F>
where
    F: FnOnce(Result<AsyncSocketChannel, CompletionError>) -> HandlerResult + Send + 'static,
{
    fn complete(self, result: Result<AsyncSocketChannel, CompletionError>) -> Completion {
        let handler = self.handler;
        Box::new(move || handler(result))
    }
}

impl<F> Operation for AcceptOp<F>
where
    F: FnOnce(Result<AsyncSocketChannel, CompletionError>) -> HandlerResult + Send + 'static,
{
    fn kind(&self) -> OpKind {
        OpKind::Accept
    }

    fn attempt(self: Box<Self>, core: &ChannelCore) -> Attempt {
        let accepted = {
            let io = core.io();
            match io.as_ref() {
                Some(Sock::Listener(listener)) => Some(listener.accept()),
                _ => None,
            }
        };

        match accepted {
            None => Attempt::Complete((*self).complete(Err(CompletionError::Closed))),
            Some(Err(e)) if would_block(&e) || e.kind() == std::io::ErrorKind::ConnectionAborted => {
                Attempt::Pending(self)
            }
            Some(Err(e)) => Attempt::Complete((*self).complete(Err(e.into()))),
            Some(Ok((stream, peer))) => {
                let adopted = core
                    .group()
                    .and_then(|group| AsyncSocketChannel::adopt(&group, stream))
                    .map_err(CompletionError::from);
                if let Ok(channel) = &adopted {
                    debug!(
                        listener = %core.id(),
                        channel = %channel.id(),
                        peer = %peer,
                        "Connection accepted"
                    );
                }
                Attempt::Complete((*self).complete(adopted))
            }
        }
    }

    fn fail(self: Box<Self>, err: CompletionError) -> Completion {
        (*self).complete(Err(err))
    }
}
