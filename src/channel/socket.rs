/*!
 * Asynchronous Stream Socket Channel
 *
 * TCP client channel. The socket itself is created by `connect`; channels
 * produced by an accept arrive already connected.
 */

use super::shared::{
    new_socket, shutdown_stream, Attempt, ChannelCore, Completion, Operation, Sock,
};
use super::io::{ReadOp, ReadVectoredOp, WriteOp, WriteVectoredOp};
use super::options::{self, STREAM_OPTIONS};
use crate::core::types::{
    ChannelId, HandlerResult, OpKind, SocketOption, SocketOptionName, Transfer,
};
use crate::core::{CompletionError, GroupError, GroupResult, Timeout};
use crate::group::{ChannelGroup, GroupInner};
use bytes::{Bytes, BytesMut};
use nix::errno::Errno;
use nix::sys::socket::{self, AddressFamily, SockType, SockaddrStorage};
use parking_lot::Mutex;
use std::fmt;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Unconnected,
    Pending,
    Connected,
}

/// Asynchronous TCP stream channel
#[derive(Clone)]
pub struct AsyncSocketChannel {
    core: Arc<ChannelCore>,
    group: Arc<GroupInner>,
    conn: Arc<Mutex<ConnState>>,
}

impl AsyncSocketChannel {
    pub(crate) fn open(group: &Arc<GroupInner>) -> GroupResult<Self> {
        let core = ChannelCore::new(group);
        group.register_channel(&core, false)?;
        debug!(group = %group.id(), channel = %core.id(), "Socket channel opened");
        Ok(Self {
            core,
            group: Arc::clone(group),
            conn: Arc::new(Mutex::new(ConnState::Unconnected)),
        })
    }

    /// Wrap a stream produced by an accept on a server channel of `group`
    pub(crate) fn adopt(group: &Arc<GroupInner>, stream: TcpStream) -> GroupResult<Self> {
        stream.set_nonblocking(true)?;
        let core = ChannelCore::new(group);
        group.register_channel(&core, true)?;
        if let Err(e) = core.install(Sock::Stream(stream)) {
            core.close();
            return Err(e);
        }
        Ok(Self {
            core,
            group: Arc::clone(group),
            conn: Arc::new(Mutex::new(ConnState::Connected)),
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

    pub fn is_connected(&self) -> bool {
        *self.conn.lock() == ConnState::Connected
    }

    /// Connect to `addr`
    ///
    /// A connect that fails or times out closes the channel.
    pub fn connect<F>(&self, addr: SocketAddr, timeout: impl Into<Timeout>, handler: F) -> GroupResult<()>
    where
        F: FnOnce(Result<(), CompletionError>) -> HandlerResult + Send + 'static,
    {
        if !self.core.is_open() {
            return Err(GroupError::ChannelClosed);
        }
        {
            let mut conn = self.conn.lock();
            match *conn {
                ConnState::Connected => return Err(GroupError::AlreadyConnected),
                ConnState::Pending => return Err(GroupError::ConnectionPending),
                ConnState::Unconnected => *conn = ConnState::Pending,
            }
        }

        let op = Box::new(ConnectOp {
            addr,
            started: false,
            core: Arc::clone(&self.core),
            conn: Arc::clone(&self.conn),
            handler,
        });
        let submitted = self.group.submit(&self.core, op, timeout.into());
        if submitted.is_err() {
            *self.conn.lock() = ConnState::Unconnected;
        }
        submitted
    }

    /// Read into the spare capacity of `buf`
    ///
    /// A full buffer completes immediately with zero bytes. End of stream is
    /// reported as `Transfer::Eof`.
    pub fn read<F>(&self, buf: BytesMut, timeout: impl Into<Timeout>, handler: F) -> GroupResult<()>
    where
        F: FnOnce(Result<Transfer, CompletionError>, BytesMut) -> HandlerResult + Send + 'static,
    {
        self.check_connected()?;
        self.group
            .submit(&self.core, ReadOp::boxed(buf, handler), timeout.into())
    }

    /// Write once from `buf`; the handler receives the count and the unwritten rest
    pub fn write<F>(&self, buf: Bytes, timeout: impl Into<Timeout>, handler: F) -> GroupResult<()>
    where
        F: FnOnce(Result<usize, CompletionError>, Bytes) -> HandlerResult + Send + 'static,
    {
        self.check_connected()?;
        self.group
            .submit(&self.core, WriteOp::boxed(buf, handler), timeout.into())
    }

    /// Scattering read into the spare capacity of `bufs`, in order
    ///
    /// Completes with zero bytes when every buffer is already full.
    pub fn read_vectored<F>(
        &self,
        bufs: Vec<BytesMut>,
        timeout: impl Into<Timeout>,
        handler: F,
    ) -> GroupResult<()>
    where
        F: FnOnce(Result<Transfer, CompletionError>, Vec<BytesMut>) -> HandlerResult
            + Send
            + 'static,
    {
        self.check_connected()?;
        self.group
            .submit(&self.core, ReadVectoredOp::boxed(bufs, handler), timeout.into())
    }

    /// Gathering write of `bufs`; the handler gets the count and the buffers
    /// still holding unwritten bytes
    pub fn write_vectored<F>(
        &self,
        bufs: Vec<Bytes>,
        timeout: impl Into<Timeout>,
        handler: F,
    ) -> GroupResult<()>
    where
        F: FnOnce(Result<usize, CompletionError>, Vec<Bytes>) -> HandlerResult + Send + 'static,
    {
        self.check_connected()?;
        self.group
            .submit(&self.core, WriteVectoredOp::boxed(bufs, handler), timeout.into())
    }

    fn check_connected(&self) -> GroupResult<()> {
        if !self.core.is_open() {
            return Err(GroupError::ChannelClosed);
        }
        match *self.conn.lock() {
            ConnState::Connected => Ok(()),
            _ => Err(GroupError::NotConnected),
        }
    }

    pub fn shutdown_input(&self) -> GroupResult<()> {
        shutdown_stream(&self.core, Shutdown::Read)
    }

    pub fn shutdown_output(&self) -> GroupResult<()> {
        shutdown_stream(&self.core, Shutdown::Write)
    }

    pub fn local_addr(&self) -> GroupResult<Option<SocketAddr>> {
        if !self.core.is_open() {
            return Err(GroupError::ChannelClosed);
        }
        match self.core.io().as_ref() {
            Some(sock) => Ok(Some(sock.local_addr()?)),
            None => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> GroupResult<Option<SocketAddr>> {
        if !self.core.is_open() {
            return Err(GroupError::ChannelClosed);
        }
        if !self.is_connected() {
            return Ok(None);
        }
        match self.core.io().as_ref() {
            Some(Sock::Stream(s)) => Ok(Some(s.peer_addr()?)),
            _ => Ok(None),
        }
    }

    pub fn set_nodelay(&self, nodelay: bool) -> GroupResult<()> {
        if !self.core.is_open() {
            return Err(GroupError::ChannelClosed);
        }
        match self.core.io().as_ref() {
            Some(Sock::Stream(s)) => Ok(s.set_nodelay(nodelay)?),
            _ => Err(GroupError::NotConnected),
        }
    }

    /// Set a socket option
    ///
    /// Before `connect` the value is kept and applied to the socket when it
    /// is created.
    pub fn set_option(&self, option: SocketOption) -> GroupResult<()> {
        self.core.set_option(STREAM_OPTIONS, option)
    }

    /// Read a socket option
    ///
    /// Before `connect` only values set on this channel are known.
    pub fn get_option(&self, name: SocketOptionName) -> GroupResult<SocketOption> {
        self.core
            .get_option(STREAM_OPTIONS, name)?
            .ok_or(GroupError::NotConnected)
    }

    /// Close the channel; pending operations complete with `Closed`
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) {
        self.core.close();
    }
}

impl fmt::Debug for AsyncSocketChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSocketChannel")
            .field("id", &self.core.id())
            .field("group", &self.group.id())
            .field("state", &*self.conn.lock())
            .field("open", &self.core.is_open())
            .finish()
    }
}

struct ConnectOp<F> {
    addr: SocketAddr,
    started: bool,
    core: Arc<ChannelCore>,
    conn: Arc<Mutex<ConnState>>,
    handler: F,
}

impl<F> ConnectOp<F>
where
    F: FnOnce(Result<(), CompletionError>) -> HandlerResult + Send + 'static,
{
    /// Create the socket, register it and start the connect
    fn start(&self, core: &ChannelCore) -> Result<bool, CompletionError> {
        let family = match self.addr {
            SocketAddr::V4(_) => AddressFamily::Inet,
            SocketAddr::V6(_) => AddressFamily::Inet6,
        };
        let deferred = core.deferred_options();
        let fd = new_socket(family, SockType::Stream)?;
        options::apply_all(&fd, &deferred)?;
        let stream = TcpStream::from(fd);
        stream.set_nonblocking(true)?;
        let raw = stream.as_raw_fd();
        core.install(Sock::Stream(stream))?;
        drop(deferred);

        match socket::connect(raw, &SockaddrStorage::from(self.addr)) {
            Ok(()) => Ok(true),
            Err(Errno::EINPROGRESS) | Err(Errno::EINTR) => Ok(false),
            Err(errno) => Err(std::io::Error::from(errno).into()),
        }
    }

    /// Check the outcome of a connect once the socket is writable
    fn finish(core: &ChannelCore) -> Option<Result<(), CompletionError>> {
        let io = core.io();
        let Some(Sock::Stream(stream)) = io.as_ref() else {
            return Some(Err(CompletionError::Closed));
        };
        match stream.take_error() {
            Ok(Some(e)) | Err(e) => return Some(Err(e.into())),
            Ok(None) => {}
        }
        match stream.peer_addr() {
            Ok(_) => Some(Ok(())),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => None,
            Err(e) => Some(Err(e.into())),
        }
    }

    fn complete(self, result: Result<(), CompletionError>) -> Completion {
        let Self {
            addr,
            core,
            conn,
            handler,
            ..
        } = self;
        match &result {
            Ok(()) => {
                *conn.lock() = ConnState::Connected;
                debug!(channel = %core.id(), addr = %addr, "Connected");
            }
            Err(e) => {
                *conn.lock() = ConnState::Unconnected;
                debug!(channel = %core.id(), addr = %addr, error = %e, "Connect failed");
            }
        }
        Box::new(move || {
            if result.is_err() {
                core.close();
            }
            handler(result)
        })
    }
}

impl<F> Operation for ConnectOp<F>
where
    F: FnOnce(Result<(), CompletionError>) -> HandlerResult + Send + 'static,
{
    fn kind(&self) -> OpKind {
        OpKind::Connect
    }

    fn attempt(mut self: Box<Self>, core: &ChannelCore) -> Attempt {
        if !self.started {
            self.started = true;
            return match self.start(core) {
                Ok(true) => Attempt::Complete((*self).complete(Ok(()))),
                Ok(false) => Attempt::Pending(self),
                Err(e) => Attempt::Complete((*self).complete(Err(e))),
            };
        }
        match Self::finish(core) {
            Some(result) => Attempt::Complete((*self).complete(result)),
            None => Attempt::Pending(self),
        }
    }

    fn fail(self: Box<Self>, err: CompletionError) -> Completion {
        (*self).complete(Err(err))
    }
}
