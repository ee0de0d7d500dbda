/*!
 * Channel Core
 *
 * State shared by every channel flavour: the owning group, the socket once it
 * exists, the per-kind pending bits and the ids of parked operations.
 *
 * Lock order: `options` before `io`; the group's pending table or `io` before
 * `slots`. `io` is only held around a single non-blocking syscall or while
 * replacing the socket.
 */

use super::options;
use crate::core::types::{
    ChannelId, HandlerResult, Interest, OpId, OpKind, SocketOption, SocketOptionName,
};
use crate::core::{CompletionError, GroupError, GroupResult};
use crate::dispatch::backend::CompletionBackend;
use crate::group::GroupInner;
use nix::sys::socket::{self, AddressFamily, SockFlag, SockType};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Callback bound to its result, ready to run on a pool thread
pub(crate) type Completion = Box<dyn FnOnce() -> HandlerResult + Send + 'static>;

/// Outcome of trying an operation against the socket
pub(crate) enum Attempt {
    /// The socket was not ready; park the operation again
    Pending(Box<dyn Operation>),
    Complete(Completion),
}

/// A single-shot I/O operation owning its buffer and callback
pub(crate) trait Operation: Send {
    fn kind(&self) -> OpKind;

    /// Perform the non-blocking syscall once
    fn attempt(self: Box<Self>, core: &ChannelCore) -> Attempt;

    /// Bind the callback to a failure without touching the socket
    fn fail(self: Box<Self>, err: CompletionError) -> Completion;
}

pub(crate) enum Sock {
    Stream(TcpStream),
    Listener(TcpListener),
    Datagram(UdpSocket),
}

impl Sock {
    pub fn raw_fd(&self) -> RawFd {
        match self {
            Sock::Stream(s) => s.as_raw_fd(),
            Sock::Listener(l) => l.as_raw_fd(),
            Sock::Datagram(d) => d.as_raw_fd(),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        match self {
            Sock::Stream(s) => s.local_addr(),
            Sock::Listener(l) => l.local_addr(),
            Sock::Datagram(d) => d.local_addr(),
        }
    }
}

impl AsFd for Sock {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Sock::Stream(s) => s.as_fd(),
            Sock::Listener(l) => l.as_fd(),
            Sock::Datagram(d) => d.as_fd(),
        }
    }
}

/// Create a socket that is closed across exec
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "illumos",
    target_os = "solaris"
))]
pub(crate) fn new_socket(family: AddressFamily, ty: SockType) -> io::Result<OwnedFd> {
    socket::socket(family, ty, SockFlag::SOCK_CLOEXEC, None).map_err(io::Error::from)
}

/// Create a socket that is closed across exec
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "illumos",
    target_os = "solaris"
)))]
pub(crate) fn new_socket(family: AddressFamily, ty: SockType) -> io::Result<OwnedFd> {
    let fd = socket::socket(family, ty, SockFlag::empty(), None)?;
    // No atomic flag here; set it before anything else sees the descriptor
    let rc = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

pub(crate) struct ChannelCore {
    id: ChannelId,
    group: Weak<GroupInner>,
    pending: AtomicU8,
    slots: Mutex<[Option<OpId>; 4]>,
    open: AtomicBool,
    io: RwLock<Option<Sock>>,
    options: Mutex<Vec<SocketOption>>,
}

impl ChannelCore {
    pub fn new(group: &Arc<GroupInner>) -> Arc<Self> {
        Arc::new(Self {
            id: ChannelId::next(),
            group: Arc::downgrade(group),
            pending: AtomicU8::new(0),
            slots: Mutex::new([None; 4]),
            open: AtomicBool::new(true),
            io: RwLock::new(None),
            options: Mutex::new(Vec::new()),
        })
    }

    #[inline]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn group(&self) -> GroupResult<Arc<GroupInner>> {
        self.group.upgrade().ok_or(GroupError::GroupShutdown)
    }

    /// Shared access to the socket, `None` before it exists or after close
    pub fn io(&self) -> RwLockReadGuard<'_, Option<Sock>> {
        self.io.read()
    }

    pub fn has_socket(&self) -> bool {
        self.io.read().is_some()
    }

    /// Install the socket and register it with the group's backend
    pub fn install(&self, sock: Sock) -> GroupResult<()> {
        let group = self.group()?;
        let mut io = self.io.write();
        if !self.is_open() {
            return Err(GroupError::ChannelClosed);
        }
        let fd = sock.raw_fd();
        group.backend().register(fd, self.id.0)?;
        if let Some(old) = io.replace(sock) {
            let _ = group.backend().deregister(old.raw_fd());
        }
        trace!(channel = %self.id, fd = fd, "Socket registered");
        Ok(())
    }

    /// Options waiting for the socket; hold the guard until it is installed
    pub fn deferred_options(&self) -> MutexGuard<'_, Vec<SocketOption>> {
        self.options.lock()
    }

    /// Set an option on the socket, or keep it for a socket not created yet
    pub fn set_option(&self, supported: &[SocketOptionName], option: SocketOption) -> GroupResult<()> {
        if !self.is_open() {
            return Err(GroupError::ChannelClosed);
        }
        options::validate(supported, option)?;
        let mut deferred = self.options.lock();
        match self.io.read().as_ref() {
            Some(sock) => options::apply(sock, option)?,
            None => options::remember(&mut deferred, option),
        }
        trace!(channel = %self.id, option = ?option, "Socket option set");
        Ok(())
    }

    /// Current value of an option
    ///
    /// Without a socket only a deferred value is known; `None` otherwise.
    pub fn get_option(
        &self,
        supported: &[SocketOptionName],
        name: SocketOptionName,
    ) -> GroupResult<Option<SocketOption>> {
        if !self.is_open() {
            return Err(GroupError::ChannelClosed);
        }
        if !supported.contains(&name) {
            return Err(GroupError::UnsupportedOption(name));
        }
        let deferred = self.options.lock();
        match self.io.read().as_ref() {
            Some(sock) => Ok(Some(options::query(sock, name)?)),
            None => Ok(deferred.iter().copied().find(|o| o.name() == name)),
        }
    }

    /// Claim the pending bit for `kind`
    pub fn reserve(&self, kind: OpKind) -> GroupResult<()> {
        let prev = self.pending.fetch_or(kind.bit(), Ordering::AcqRel);
        if prev & kind.bit() != 0 {
            return Err(GroupError::ConcurrentOperation(kind));
        }
        Ok(())
    }

    pub fn release(&self, kind: OpKind) {
        self.pending.fetch_and(!kind.bit(), Ordering::AcqRel);
    }

    pub fn set_slot(&self, kind: OpKind, id: OpId) {
        self.slots.lock()[kind.index()] = Some(id);
    }

    pub fn take_slot(&self, kind: OpKind) -> Option<OpId> {
        self.slots.lock()[kind.index()].take()
    }

    /// Clear the slot only if it still refers to `id`
    pub fn clear_slot(&self, kind: OpKind, id: OpId) {
        let mut slots = self.slots.lock();
        if slots[kind.index()] == Some(id) {
            slots[kind.index()] = None;
        }
    }

    /// Re-arm one-shot interest for the kinds still parked
    pub fn rearm(&self, backend: &dyn CompletionBackend) {
        // Holding `io` keeps the descriptor from being closed and reused
        let io = self.io.read();
        let Some(fd) = io.as_ref().map(Sock::raw_fd) else {
            return;
        };
        let slots = self.slots.lock();
        let interest = OpKind::ALL
            .iter()
            .filter(|k| slots[k.index()].is_some())
            .fold(Interest::NONE, |acc, k| acc.union(k.interest()));
        if let Err(e) = backend.rearm(fd, self.id.0, interest) {
            debug!(channel = %self.id, error = %e, "Re-arm failed");
        }
    }

    /// Close the channel; returns false if it was already closed
    ///
    /// Parked operations complete with `Closed`.
    pub fn close(&self) -> bool {
        if !self.open.swap(false, Ordering::AcqRel) {
            return false;
        }

        let sock = self.io.write().take();

        if let Some(group) = self.group.upgrade() {
            group.close_channel(self);
            if let Some(sock) = &sock {
                let _ = group.backend().deregister(sock.raw_fd());
            }
        }
        drop(sock);

        debug!(channel = %self.id, "Channel closed");
        true
    }
}

/// Shut down the stream socket of a core
pub(crate) fn shutdown_stream(core: &ChannelCore, how: std::net::Shutdown) -> GroupResult<()> {
    if !core.is_open() {
        return Err(GroupError::ChannelClosed);
    }
    match core.io().as_ref() {
        Some(Sock::Stream(s)) => Ok(s.shutdown(how)?),
        _ => Err(GroupError::NotConnected),
    }
}
