/*!
 * Epoll Backend
 * Linux readiness notification with one-shot registrations
 */

use super::{CompletionBackend, Event, Waker, WAKE_TOKEN};
use crate::core::limits::EVENT_BATCH_CAPACITY;
use crate::core::types::Interest;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tracing::debug;

pub(crate) struct EpollBackend {
    epoll: OwnedFd,
    waker: Waker,
}

impl EpollBackend {
    pub fn new() -> io::Result<Self> {
        let raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if raw == -1 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: epoll_create1 returned a fresh descriptor we now own
        let epoll = unsafe { OwnedFd::from_raw_fd(raw) };
        let waker = Waker::new()?;

        let backend = Self { epoll, waker };
        // The wake-up pipe stays level-triggered so every pending byte is seen
        backend.ctl(
            libc::EPOLL_CTL_ADD,
            backend.waker.fd(),
            libc::EPOLLIN as u32,
            WAKE_TOKEN,
        )?;

        debug!(epfd = raw, "Epoll backend opened");
        Ok(backend)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, token: u64) -> io::Result<()> {
        let mut event = libc::epoll_event { events, u64: token };
        let result = unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) };
        if result == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

fn interest_bits(interest: Interest) -> u32 {
    let mut bits = 0u32;
    if interest.is_readable() {
        bits |= libc::EPOLLIN as u32 | libc::EPOLLRDHUP as u32;
    }
    if interest.is_writable() {
        bits |= libc::EPOLLOUT as u32;
    }
    bits
}

impl CompletionBackend for EpollBackend {
    fn name(&self) -> &'static str {
        "epoll"
    }

    fn register(&self, fd: RawFd, token: u64) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, libc::EPOLLONESHOT as u32, token)
    }

    fn rearm(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        // EPOLL_CTL_MOD always adds EPOLLERR | EPOLLHUP, so a hung-up socket
        // would fire forever; a reported one-shot registration is already disarmed
        if interest.is_empty() {
            return Ok(());
        }
        let events = libc::EPOLLONESHOT as u32 | interest_bits(interest);
        self.ctl(libc::EPOLL_CTL_MOD, fd, events, token)
    }

    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let result = unsafe {
            libc::epoll_ctl(
                self.epoll.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        };
        if result == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn wait(&self, events: &mut Vec<Event>, timeout_ms: i32) -> io::Result<()> {
        events.clear();
        let mut raw: [libc::epoll_event; EVENT_BATCH_CAPACITY] = unsafe { std::mem::zeroed() };

        let n = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                raw.as_mut_ptr(),
                EVENT_BATCH_CAPACITY as libc::c_int,
                timeout_ms,
            )
        };
        if n == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(());
            }
            return Err(err);
        }

        let failed = (libc::EPOLLERR | libc::EPOLLHUP) as u32;
        for ev in raw.iter().take(n as usize) {
            let token = ev.u64;
            let bits = ev.events;
            if token == WAKE_TOKEN {
                self.waker.drain_one();
                continue;
            }
            events.push(Event {
                token,
                readable: bits & (libc::EPOLLIN as u32 | libc::EPOLLRDHUP as u32 | failed) != 0,
                writable: bits & (libc::EPOLLOUT as u32 | failed) != 0,
            });
        }
        Ok(())
    }

    fn wake(&self) -> io::Result<()> {
        self.waker.wake()
    }
}
