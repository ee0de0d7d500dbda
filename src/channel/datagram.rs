/*!
 * Asynchronous Datagram Channel
 *
 * UDP channel. `receive` and `send_to` work bound or not (the kernel binds
 * an ephemeral port on first send); `read` and `write` need `connect`.
 * Receives use the read slot and sends the write slot, so one of each may be
 * pending at a time.
 */

use super::shared::{new_socket, Attempt, ChannelCore, Completion, Operation, Sock};
use super::io::{fill_with, would_block, ReadOp, ReadVectoredOp, WriteOp, WriteVectoredOp};
use super::options::DATAGRAM_OPTIONS;
use crate::core::types::{
    ChannelId, HandlerResult, OpKind, ProtocolFamily, SocketOption, SocketOptionName, Transfer,
};
use crate::core::{CompletionError, GroupError, GroupResult, Timeout};
use crate::group::{ChannelGroup, GroupInner};
use bytes::{Buf, Bytes, BytesMut};
use nix::sys::socket::{self, AddressFamily, SockType, SockaddrStorage};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Asynchronous UDP channel
#[derive(Clone)]
pub struct AsyncDatagramChannel {
    core: Arc<ChannelCore>,
    group: Arc<GroupInner>,
    family: ProtocolFamily,
    bound: Arc<AtomicBool>,
    peer: Arc<Mutex<Option<SocketAddr>>>,
}

impl AsyncDatagramChannel {
    pub(crate) fn open(group: &Arc<GroupInner>, family: ProtocolFamily) -> GroupResult<Self> {
        let domain = match family {
            ProtocolFamily::Inet => AddressFamily::Inet,
            ProtocolFamily::Inet6 => AddressFamily::Inet6,
        };
        let fd = new_socket(domain, SockType::Datagram)?;
        let udp = UdpSocket::from(fd);
        udp.set_nonblocking(true)?;

        let core = ChannelCore::new(group);
        group.register_channel(&core, false)?;
        if let Err(e) = core.install(Sock::Datagram(udp)) {
            core.close();
            return Err(e);
        }
        debug!(group = %group.id(), channel = %core.id(), family = ?family, "Datagram channel opened");

        Ok(Self {
            core,
            group: Arc::clone(group),
            family,
            bound: Arc::new(AtomicBool::new(false)),
            peer: Arc::new(Mutex::new(None)),
        })
    }

    pub fn id(&self) -> ChannelId {
        self.core.id()
    }

    pub fn group(&self) -> ChannelGroup {
        ChannelGroup::from_inner(Arc::clone(&self.group))
    }

    pub fn family(&self) -> ProtocolFamily {
        self.family
    }

    pub fn is_open(&self) -> bool {
        self.core.is_open()
    }

    fn raw_fd(&self) -> GroupResult<RawFd> {
        if !self.core.is_open() {
            return Err(GroupError::ChannelClosed);
        }
        self.core
            .io()
            .as_ref()
            .map(Sock::raw_fd)
            .ok_or(GroupError::ChannelClosed)
    }

    pub fn bind(&self, addr: SocketAddr) -> GroupResult<()> {
        let fd = self.raw_fd()?;
        if self.bound.swap(true, Ordering::AcqRel) {
            return Err(GroupError::AlreadyBound);
        }
        if let Err(e) = socket::bind(fd, &SockaddrStorage::from(addr)) {
            self.bound.store(false, Ordering::Release);
            return Err(e.into());
        }
        debug!(channel = %self.core.id(), addr = %addr, "Datagram channel bound");
        Ok(())
    }

    /// Restrict the channel to one peer; enables `read` and `write`
    pub fn connect(&self, addr: SocketAddr) -> GroupResult<()> {
        if !self.core.is_open() {
            return Err(GroupError::ChannelClosed);
        }
        match self.core.io().as_ref() {
            Some(Sock::Datagram(udp)) => udp.connect(addr)?,
            _ => return Err(GroupError::ChannelClosed),
        }
        self.bound.store(true, Ordering::Release);
        *self.peer.lock() = Some(addr);
        Ok(())
    }

    /// Drop the peer association
    pub fn disconnect(&self) -> GroupResult<()> {
        let fd = self.raw_fd()?;
        let mut unspec: libc::sockaddr = unsafe { std::mem::zeroed() };
        unspec.sa_family = libc::AF_UNSPEC as libc::sa_family_t;
        let rc = unsafe {
            libc::connect(
                fd,
                &unspec,
                std::mem::size_of::<libc::sockaddr>() as libc::socklen_t,
            )
        };
        if rc == -1 {
            let err = io::Error::last_os_error();
            // Some platforms report the dissolved association this way
            if err.raw_os_error() != Some(libc::EAFNOSUPPORT) {
                return Err(err.into());
            }
        }
        *self.peer.lock() = None;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.peer.lock().is_some()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        *self.peer.lock()
    }

    pub fn local_addr(&self) -> GroupResult<SocketAddr> {
        if !self.core.is_open() {
            return Err(GroupError::ChannelClosed);
        }
        match self.core.io().as_ref() {
            Some(sock) => Ok(sock.local_addr()?),
            None => Err(GroupError::ChannelClosed),
        }
    }

    /// Send one datagram to `target`
    pub fn send_to<F>(
        &self,
        buf: Bytes,
        target: SocketAddr,
        timeout: impl Into<Timeout>,
        handler: F,
    ) -> GroupResult<()>
    where
        F: FnOnce(Result<usize, CompletionError>, Bytes) -> HandlerResult + Send + 'static,
    {
        let op = Box::new(SendToOp {
            buf,
            target,
            handler,
        });
        self.group.submit(&self.core, op, timeout.into())
    }

    /// Receive one datagram into the spare capacity of `buf`
    ///
    /// Bytes beyond the spare capacity are discarded by the kernel.
    pub fn receive<F>(&self, buf: BytesMut, timeout: impl Into<Timeout>, handler: F) -> GroupResult<()>
    where
        F: FnOnce(Result<(Transfer, SocketAddr), CompletionError>, BytesMut) -> HandlerResult
            + Send
            + 'static,
    {
        let op = Box::new(ReceiveOp { buf, handler });
        self.group.submit(&self.core, op, timeout.into())
    }

    /// Receive from the connected peer
    pub fn read<F>(&self, buf: BytesMut, timeout: impl Into<Timeout>, handler: F) -> GroupResult<()>
    where
        F: FnOnce(Result<Transfer, CompletionError>, BytesMut) -> HandlerResult + Send + 'static,
    {
        self.check_connected()?;
        self.group
            .submit(&self.core, ReadOp::boxed(buf, handler), timeout.into())
    }

    /// Send to the connected peer
    pub fn write<F>(&self, buf: Bytes, timeout: impl Into<Timeout>, handler: F) -> GroupResult<()>
    where
        F: FnOnce(Result<usize, CompletionError>, Bytes) -> HandlerResult + Send + 'static,
    {
        self.check_connected()?;
        self.group
            .submit(&self.core, WriteOp::boxed(buf, handler), timeout.into())
    }

    /// Receive one datagram from the connected peer across `bufs`
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

    /// Send `bufs` to the connected peer as one datagram
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

    /// Set `SO_RCVBUF`, `SO_SNDBUF` or `SO_REUSEADDR`
    pub fn set_option(&self, option: SocketOption) -> GroupResult<()> {
        self.core.set_option(DATAGRAM_OPTIONS, option)
    }

    pub fn get_option(&self, name: SocketOptionName) -> GroupResult<SocketOption> {
        self.core
            .get_option(DATAGRAM_OPTIONS, name)?
            .ok_or(GroupError::ChannelClosed)
    }

    fn check_connected(&self) -> GroupResult<()> {
        if !self.core.is_open() {
            return Err(GroupError::ChannelClosed);
        }
        if !self.is_connected() {
            return Err(GroupError::NotConnected);
        }
        Ok(())
    }

    pub fn close(&self) {
        self.core.close();
    }
}

impl fmt::Debug for AsyncDatagramChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncDatagramChannel")
            .field("id", &self.core.id())
            .field("group", &self.group.id())
            .field("family", &self.family)
            .field("peer", &*self.peer.lock())
            .field("open", &self.core.is_open())
            .finish()
    }
}

struct SendToOp<F> {
    buf: Bytes,
    target: SocketAddr,
    handler: F,
}

impl<F> SendToOp<F>
where
    F: FnOnce(Result<usize, CompletionError>, Bytes) -> HandlerResult + Send + 'static,
{
    fn complete(self, result: Result<usize, CompletionError>) -> Completion {
        let Self { buf, handler, .. } = self;
        Box::new(move || handler(result, buf))
    }
}

impl<F> Operation for SendToOp<F>
where
    F: FnOnce(Result<usize, CompletionError>, Bytes) -> HandlerResult + Send + 'static,
{
    fn kind(&self) -> OpKind {
        OpKind::Write
    }

    fn attempt(mut self: Box<Self>, core: &ChannelCore) -> Attempt {
        let sent = {
            let io = core.io();
            match io.as_ref() {
                Some(Sock::Datagram(udp)) => Some(udp.send_to(&self.buf, self.target)),
                _ => None,
            }
        };
        match sent {
            None => Attempt::Complete((*self).complete(Err(CompletionError::Closed))),
            Some(Err(e)) if would_block(&e) => Attempt::Pending(self),
            Some(Err(e)) => Attempt::Complete((*self).complete(Err(e.into()))),
            Some(Ok(n)) => {
                self.buf.advance(n);
                Attempt::Complete((*self).complete(Ok(n)))
            }
        }
    }

    fn fail(self: Box<Self>, err: CompletionError) -> Completion {
        (*self).complete(Err(err))
    }
}

struct ReceiveOp<F> {
    buf: BytesMut,
    handler: F,
}

impl<F> ReceiveOp<F>
where
    F: FnOnce(Result<(Transfer, SocketAddr), CompletionError>, BytesMut) -> HandlerResult
        + Send
        + 'static,
{
    fn complete(self, result: Result<(Transfer, SocketAddr), CompletionError>) -> Completion {
        let Self { buf, handler } = self;
        Box::new(move || handler(result, buf))
    }
}

impl<F> Operation for ReceiveOp<F>
where
    F: FnOnce(Result<(Transfer, SocketAddr), CompletionError>, BytesMut) -> HandlerResult
        + Send
        + 'static,
{
    fn kind(&self) -> OpKind {
        OpKind::Read
    }

    fn attempt(mut self: Box<Self>, core: &ChannelCore) -> Attempt {
        let received = {
            let io = core.io();
            match io.as_ref() {
                Some(Sock::Datagram(udp)) => Some(fill_with(&mut self.buf, |dst| udp.recv_from(dst))),
                _ => None,
            }
        };
        match received {
            None => Attempt::Complete((*self).complete(Err(CompletionError::Closed))),
            Some(Err(e)) if would_block(&e) => Attempt::Pending(self),
            Some(Err(e)) => Attempt::Complete((*self).complete(Err(e.into()))),
            Some(Ok((n, from))) => {
                Attempt::Complete((*self).complete(Ok((Transfer::Bytes(n), from))))
            }
        }
    }

    fn fail(self: Box<Self>, err: CompletionError) -> Completion {
        (*self).complete(Err(err))
    }
}
