/*!
 * Completion Backends
 *
 * Readiness notification behind a small trait so the dispatcher does not
 * care whether the platform offers epoll or only poll(2).
 *
 * Registrations are one-shot: after a descriptor is reported it stays
 * disarmed until `rearm` is called with the interest still wanted. A
 * wake-up pipe lets other threads interrupt a blocked `wait`.
 */

#[cfg(target_os = "linux")]
mod epoll;
mod poll;

use crate::core::types::Interest;
use crate::core::GroupResult;
use crate::provider::BackendKind;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

/// Token reserved for the wake-up pipe
pub(crate) const WAKE_TOKEN: u64 = u64::MAX;

/// Readiness reported for one registered descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Event {
    pub token: u64,
    pub readable: bool,
    pub writable: bool,
}

pub(crate) trait CompletionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Add a descriptor, initially disarmed
    fn register(&self, fd: RawFd, token: u64) -> io::Result<()>;

    /// Arm a registered descriptor for `interest`
    ///
    /// Empty interest leaves the descriptor disarmed once its current
    /// arming has been reported; error and hang-up conditions of an idle
    /// descriptor are never reported.
    fn rearm(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()>;

    fn deregister(&self, fd: RawFd) -> io::Result<()>;

    /// Block until readiness, a wake-up or the timeout (`-1` waits forever)
    ///
    /// `events` is cleared first. Wake-ups are consumed internally and never
    /// reported.
    fn wait(&self, events: &mut Vec<Event>, timeout_ms: i32) -> io::Result<()>;

    /// Interrupt one blocked `wait`
    fn wake(&self) -> io::Result<()>;
}

/// Open the backend selected by configuration
pub(crate) fn open(kind: BackendKind) -> GroupResult<Box<dyn CompletionBackend>> {
    match kind {
        #[cfg(target_os = "linux")]
        BackendKind::Epoll => Ok(Box::new(epoll::EpollBackend::new()?)),
        #[cfg(not(target_os = "linux"))]
        BackendKind::Epoll => Err(crate::core::GroupError::InvalidConfiguration(
            "epoll backend is only available on Linux".into(),
        )),
        BackendKind::Poll => Ok(Box::new(poll::PollBackend::new()?)),
    }
}

/// Self-pipe used to interrupt a blocked wait
pub(crate) struct Waker {
    reader: UnixStream,
    writer: UnixStream,
}

impl Waker {
    pub fn new() -> io::Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Self { reader, writer })
    }

    pub fn fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    pub fn wake(&self) -> io::Result<()> {
        match (&self.writer).write(&[1]) {
            Ok(_) => Ok(()),
            // A full pipe already guarantees a pending wake-up
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Consume a single wake-up
    pub fn drain_one(&self) {
        let mut byte = [0u8; 1];
        let _ = (&self.reader).read(&mut byte);
    }
}
