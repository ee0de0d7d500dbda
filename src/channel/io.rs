/*!
 * Read and Write Operations
 *
 * Shared by stream sockets and connected datagram sockets. Reads fill the
 * spare capacity of a `BytesMut`; writes send as much of a `Bytes` as the
 * socket takes in one call and hand back the rest. The vectored forms do the
 * same across a sequence of buffers with one readv/writev.
 */

use super::shared::{Attempt, ChannelCore, Completion, Operation, Sock};
use crate::core::limits::MAX_IOV;
use crate::core::types::{HandlerResult, OpKind, Transfer};
use crate::core::CompletionError;
use bytes::{Buf, Bytes, BytesMut};
use nix::sys::uio;
use std::io::{self, IoSlice, IoSliceMut, Read, Write};

pub(crate) struct ReadOp<F> {
    buf: BytesMut,
    handler: F,
}

impl<F> ReadOp<F>
where
    F: FnOnce(Result<Transfer, CompletionError>, BytesMut) -> HandlerResult + Send + 'static,
{
    pub fn boxed(buf: BytesMut, handler: F) -> Box<dyn Operation> {
        Box::new(Self { buf, handler })
    }

    fn complete(self, result: Result<Transfer, CompletionError>) -> Completion {
        let Self { buf, handler } = self;
        Box::new(move || handler(result, buf))
    }
}

impl<F> Operation for ReadOp<F>
where
    F: FnOnce(Result<Transfer, CompletionError>, BytesMut) -> HandlerResult + Send + 'static,
{
    fn kind(&self) -> OpKind {
        OpKind::Read
    }

    fn attempt(mut self: Box<Self>, core: &ChannelCore) -> Attempt {
        if self.buf.len() == self.buf.capacity() {
            return Attempt::Complete((*self).complete(Ok(Transfer::Bytes(0))));
        }

        let outcome = {
            let io = core.io();
            match io.as_ref() {
                Some(Sock::Stream(stream)) => Some((fill_spare(stream, &mut self.buf), true)),
                Some(Sock::Datagram(socket)) => Some((
                    fill_with(&mut self.buf, |dst| socket.recv(dst)),
                    false,
                )),
                _ => None,
            }
        };

        match outcome {
            None => Attempt::Complete((*self).complete(Err(CompletionError::Closed))),
            Some((Err(e), _)) if would_block(&e) => Attempt::Pending(self),
            Some((Err(e), _)) => Attempt::Complete((*self).complete(Err(e.into()))),
            Some((Ok(0), true)) => Attempt::Complete((*self).complete(Ok(Transfer::Eof))),
            Some((Ok(n), _)) => Attempt::Complete((*self).complete(Ok(Transfer::Bytes(n)))),
        }
    }

    fn fail(self: Box<Self>, err: CompletionError) -> Completion {
        (*self).complete(Err(err))
    }
}

pub(crate) struct WriteOp<F> {
    buf: Bytes,
    handler: F,
}

impl<F> WriteOp<F>
where
    F: FnOnce(Result<usize, CompletionError>, Bytes) -> HandlerResult + Send + 'static,
{
    pub fn boxed(buf: Bytes, handler: F) -> Box<dyn Operation> {
        Box::new(Self { buf, handler })
    }

    fn complete(self, result: Result<usize, CompletionError>) -> Completion {
        let Self { buf, handler } = self;
        Box::new(move || handler(result, buf))
    }
}

impl<F> Operation for WriteOp<F>
where
    F: FnOnce(Result<usize, CompletionError>, Bytes) -> HandlerResult + Send + 'static,
{
    fn kind(&self) -> OpKind {
        OpKind::Write
    }

    fn attempt(mut self: Box<Self>, core: &ChannelCore) -> Attempt {
        if self.buf.is_empty() {
            return Attempt::Complete((*self).complete(Ok(0)));
        }

        let outcome = {
            let io = core.io();
            match io.as_ref() {
                Some(Sock::Stream(stream)) => Some((&*stream).write(&self.buf)),
                Some(Sock::Datagram(socket)) => Some(socket.send(&self.buf)),
                _ => None,
            }
        };

        match outcome {
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

pub(crate) struct ReadVectoredOp<F> {
    bufs: Vec<BytesMut>,
    handler: F,
}

impl<F> ReadVectoredOp<F>
where
    F: FnOnce(Result<Transfer, CompletionError>, Vec<BytesMut>) -> HandlerResult + Send + 'static,
{
    pub fn boxed(bufs: Vec<BytesMut>, handler: F) -> Box<dyn Operation> {
        Box::new(Self { bufs, handler })
    }

    fn complete(self, result: Result<Transfer, CompletionError>) -> Completion {
        let Self { bufs, handler } = self;
        Box::new(move || handler(result, bufs))
    }
}

impl<F> Operation for ReadVectoredOp<F>
where
    F: FnOnce(Result<Transfer, CompletionError>, Vec<BytesMut>) -> HandlerResult + Send + 'static,
{
    fn kind(&self) -> OpKind {
        OpKind::Read
    }

    fn attempt(mut self: Box<Self>, core: &ChannelCore) -> Attempt {
        if self.bufs.iter().all(|b| b.len() == b.capacity()) {
            return Attempt::Complete((*self).complete(Ok(Transfer::Bytes(0))));
        }

        let outcome = {
            let io = core.io();
            match io.as_ref() {
                Some(Sock::Stream(stream)) => Some((
                    fill_vectored(&mut self.bufs, |iov| {
                        uio::readv(stream, iov).map_err(io::Error::from)
                    }),
                    true,
                )),
                Some(Sock::Datagram(socket)) => Some((
                    fill_vectored(&mut self.bufs, |iov| {
                        uio::readv(socket, iov).map_err(io::Error::from)
                    }),
                    false,
                )),
                _ => None,
            }
        };

        match outcome {
            None => Attempt::Complete((*self).complete(Err(CompletionError::Closed))),
            Some((Err(e), _)) if would_block(&e) => Attempt::Pending(self),
            Some((Err(e), _)) => Attempt::Complete((*self).complete(Err(e.into()))),
            Some((Ok(0), true)) => Attempt::Complete((*self).complete(Ok(Transfer::Eof))),
            Some((Ok(n), _)) => Attempt::Complete((*self).complete(Ok(Transfer::Bytes(n)))),
        }
    }

    fn fail(self: Box<Self>, err: CompletionError) -> Completion {
        (*self).complete(Err(err))
    }
}

pub(crate) struct WriteVectoredOp<F> {
    bufs: Vec<Bytes>,
    handler: F,
}

impl<F> WriteVectoredOp<F>
where
    F: FnOnce(Result<usize, CompletionError>, Vec<Bytes>) -> HandlerResult + Send + 'static,
{
    pub fn boxed(bufs: Vec<Bytes>, handler: F) -> Box<dyn Operation> {
        Box::new(Self { bufs, handler })
    }

    fn complete(self, result: Result<usize, CompletionError>) -> Completion {
        let Self { bufs, handler } = self;
        Box::new(move || handler(result, bufs))
    }
}

impl<F> Operation for WriteVectoredOp<F>
where
    F: FnOnce(Result<usize, CompletionError>, Vec<Bytes>) -> HandlerResult + Send + 'static,
{
    fn kind(&self) -> OpKind {
        OpKind::Write
    }

    fn attempt(mut self: Box<Self>, core: &ChannelCore) -> Attempt {
        self.bufs.retain(|b| !b.is_empty());
        if self.bufs.is_empty() {
            return Attempt::Complete((*self).complete(Ok(0)));
        }

        let outcome = {
            let slices: Vec<IoSlice<'_>> = self
                .bufs
                .iter()
                .take(MAX_IOV)
                .map(|b| IoSlice::new(b))
                .collect();
            let io = core.io();
            match io.as_ref() {
                Some(Sock::Stream(stream)) => Some(uio::writev(stream, &slices)),
                Some(Sock::Datagram(socket)) => Some(uio::writev(socket, &slices)),
                _ => None,
            }
        };

        match outcome.map(|r| r.map_err(io::Error::from)) {
            None => Attempt::Complete((*self).complete(Err(CompletionError::Closed))),
            Some(Err(e)) if would_block(&e) => Attempt::Pending(self),
            Some(Err(e)) => Attempt::Complete((*self).complete(Err(e.into()))),
            Some(Ok(n)) => {
                drain_written(&mut self.bufs, n);
                Attempt::Complete((*self).complete(Ok(n)))
            }
        }
    }

    fn fail(self: Box<Self>, err: CompletionError) -> Completion {
        (*self).complete(Err(err))
    }
}

/// True for errors that mean "try again when ready"
pub(crate) fn would_block(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Read from `src` into the spare capacity of `buf`
pub(crate) fn fill_spare(mut src: impl Read, buf: &mut BytesMut) -> io::Result<usize> {
    fill_with(buf, |dst| src.read(dst))
}

/// Expose the spare capacity of `buf` as a zeroed slice to `f`, keeping
/// only the bytes `f` reports as written
pub(crate) fn fill_with<T>(
    buf: &mut BytesMut,
    f: impl FnOnce(&mut [u8]) -> io::Result<T>,
) -> io::Result<T>
where
    T: Filled,
{
    let start = buf.len();
    buf.resize(buf.capacity(), 0);
    let result = f(&mut buf[start..]);
    let filled = result.as_ref().map(Filled::filled).unwrap_or(0);
    buf.truncate(start + filled);
    result
}

/// Expose the spare capacity of each buffer to one scattering read, then
/// keep the `n` bytes it reports in buffer order
pub(crate) fn fill_vectored(
    bufs: &mut [BytesMut],
    f: impl FnOnce(&mut [IoSliceMut<'_>]) -> io::Result<usize>,
) -> io::Result<usize> {
    let starts: Vec<usize> = bufs.iter().map(BytesMut::len).collect();
    for buf in bufs.iter_mut() {
        let capacity = buf.capacity();
        buf.resize(capacity, 0);
    }

    let result = {
        let mut slices: Vec<IoSliceMut<'_>> = bufs
            .iter_mut()
            .zip(&starts)
            .filter(|(buf, start)| buf.len() > **start)
            .take(MAX_IOV)
            .map(|(buf, start)| IoSliceMut::new(&mut buf[*start..]))
            .collect();
        f(&mut slices)
    };

    let mut left = result.as_ref().copied().unwrap_or(0);
    for (buf, start) in bufs.iter_mut().zip(starts) {
        let kept = (buf.len() - start).min(left);
        buf.truncate(start + kept);
        left -= kept;
    }
    result
}

/// Drop the first `n` written bytes across `bufs`
pub(crate) fn drain_written(bufs: &mut Vec<Bytes>, mut n: usize) {
    for buf in bufs.iter_mut() {
        let step = buf.len().min(n);
        buf.advance(step);
        n -= step;
        if n == 0 {
            break;
        }
    }
    bufs.retain(|b| !b.is_empty());
}

/// Results that report how many bytes were written into the buffer
pub(crate) trait Filled {
    fn filled(&self) -> usize;
}

impl Filled for usize {
    fn filled(&self) -> usize {
        *self
    }
}

impl Filled for (usize, std::net::SocketAddr) {
    fn filled(&self) -> usize {
        self.0
    }
}
