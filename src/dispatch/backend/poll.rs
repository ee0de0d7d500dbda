/*!
 * Poll Backend
 * Portable poll(2) readiness with one-shot semantics emulated in userspace
 */

use super::{CompletionBackend, Event, Waker, WAKE_TOKEN};
use crate::core::types::Interest;
use ahash::RandomState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct Registration {
    token: u64,
    interest: Interest,
}

pub(crate) struct PollBackend {
    registry: Mutex<HashMap<RawFd, Registration, RandomState>>,
    waker: Waker,
}

impl PollBackend {
    pub fn new() -> io::Result<Self> {
        let waker = Waker::new()?;
        debug!("Poll backend opened");
        Ok(Self {
            registry: Mutex::new(HashMap::with_hasher(RandomState::new())),
            waker,
        })
    }

    fn snapshot(&self) -> Vec<libc::pollfd> {
        let registry = self.registry.lock();
        let mut fds = Vec::with_capacity(registry.len() + 1);
        fds.push(libc::pollfd {
            fd: self.waker.fd(),
            events: libc::POLLIN,
            revents: 0,
        });
        for (&fd, reg) in registry.iter() {
            if reg.interest.is_empty() {
                continue;
            }
            let mut events = 0;
            if reg.interest.is_readable() {
                events |= libc::POLLIN;
            }
            if reg.interest.is_writable() {
                events |= libc::POLLOUT;
            }
            fds.push(libc::pollfd {
                fd,
                events,
                revents: 0,
            });
        }
        fds
    }
}

impl CompletionBackend for PollBackend {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn register(&self, fd: RawFd, token: u64) -> io::Result<()> {
        let mut registry = self.registry.lock();
        if registry.contains_key(&fd) {
            return Err(io::Error::from_raw_os_error(libc::EEXIST));
        }
        registry.insert(
            fd,
            Registration {
                token,
                interest: Interest::NONE,
            },
        );
        Ok(())
    }

    fn rearm(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        {
            let mut registry = self.registry.lock();
            let reg = registry
                .get_mut(&fd)
                .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;
            reg.token = token;
            reg.interest = interest;
        }
        // Blocked pollers hold a stale descriptor set
        self.waker.wake()
    }

    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        if self.registry.lock().remove(&fd).is_none() {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        self.waker.wake()
    }

    fn wait(&self, events: &mut Vec<Event>, timeout_ms: i32) -> io::Result<()> {
        events.clear();
        let mut fds = self.snapshot();

        let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if n == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(());
            }
            return Err(err);
        }
        if n == 0 {
            return Ok(());
        }

        if fds[0].revents != 0 {
            self.waker.drain_one();
        }

        let failed = libc::POLLERR | libc::POLLHUP | libc::POLLNVAL;
        let mut registry = self.registry.lock();
        for pfd in fds.iter().skip(1).filter(|p| p.revents != 0) {
            let Some(reg) = registry.get_mut(&pfd.fd) else {
                continue;
            };
            // Another poller may already have reported and disarmed it
            if reg.interest.is_empty() || reg.token == WAKE_TOKEN {
                continue;
            }
            let readable = pfd.revents & (libc::POLLIN | failed) != 0;
            let writable = pfd.revents & (libc::POLLOUT | failed) != 0;
            if !readable && !writable {
                continue;
            }
            events.push(Event {
                token: reg.token,
                readable: readable && reg.interest.is_readable(),
                writable: writable && reg.interest.is_writable(),
            });
            reg.interest = Interest::NONE;
        }
        Ok(())
    }

    fn wake(&self) -> io::Result<()> {
        self.waker.wake()
    }
}
