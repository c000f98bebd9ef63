// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! One side of an instance's relay: a Unix socket plus the four ring buffers that queue what has
//! been read from it and what is waiting to be written to it.
//!
//! Bytes and fds are queued independently but escorted together: an fd enqueued via `put_fd`
//! rides out on whichever `flush()` call still has bytes queued at the moment it was enqueued,
//! mirroring the real protocol's rule that an fd argument is anchored to the byte position of the
//! message that carries it, not sent as a separate message of its own.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;

use nix::errno::Errno;
use nix::sys::socket::{
    recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags, RecvMsg,
};
use nix::sys::uio::{IoSlice, IoSliceMut};

use crate::error::{Error, FramingError, Result};
use crate::ring_buffer::RingBuffer;

/// Upper bound on how many fds this repository will pass in a single `sendmsg`/`recvmsg` call.
/// Mirrors the cap real compositor implementations use to keep `SCM_RIGHTS` control messages a
/// bounded size.
pub const MAX_FDS_PER_CALL: usize = 28;

/// One endpoint of an instance: a connected socket and the read/write queues for it.
#[derive(Debug)]
pub struct WireConnection {
    socket: UnixStream,
    data_in: RingBuffer<u8>,
    data_out: RingBuffer<u8>,
    fds_in: RingBuffer<RawFd>,
    fds_out: RingBuffer<RawFd>,
}

impl WireConnection {
    pub fn new(socket: UnixStream) -> Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            data_in: RingBuffer::new_data_queue(),
            data_out: RingBuffer::new_data_queue(),
            fds_in: RingBuffer::new_fd_queue(),
            fds_out: RingBuffer::new_fd_queue(),
        })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// The fd this connection's socket owns, for registering with the event loop's multiplexer.
    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }

    pub fn data_in(&mut self) -> &mut RingBuffer<u8> {
        &mut self.data_in
    }

    pub fn data_out(&mut self) -> &mut RingBuffer<u8> {
        &mut self.data_out
    }

    pub fn fds_in(&mut self) -> &mut RingBuffer<RawFd> {
        &mut self.fds_in
    }

    pub fn fds_out(&mut self) -> &mut RingBuffer<RawFd> {
        &mut self.fds_out
    }

    /// Queues `fd` to escort the next `flush()` call. Ownership passes to this connection: the fd
    /// is closed if it is never flushed (dropped along with the instance), and the caller must not
    /// use or close it afterward.
    pub fn put_fd(&mut self, fd: RawFd) {
        self.fds_out.push(&[fd]);
    }

    /// Like `put_fd`, but takes ownership of an `OwnedFd` rather than a bare `RawFd`, for callers
    /// that hold one (e.g. a freshly inherited listening socket fd).
    pub fn put_owned_fd(&mut self, fd: OwnedFd) {
        use std::os::fd::IntoRawFd;
        self.put_fd(fd.into_raw_fd());
    }

    /// Reads as much as is available into `data_in`/`fds_in`, stopping at `WouldBlock`.
    ///
    /// Returns `Ok(0)` on end-of-file (the peer closed its write half); the caller treats this as
    /// the instance's teardown signal.
    pub fn read(&mut self) -> Result<usize> {
        let mut total = 0;
        loop {
            let (first, second) = self.data_in.write_spans();
            if first.is_empty() {
                break;
            }
            let mut iov = [IoSliceMut::new(first), IoSliceMut::new(second)];
            let mut cmsg_buffer = nix::cmsg_space!([RawFd; MAX_FDS_PER_CALL]);

            let received: RecvMsg<()> = match recvmsg(
                self.socket.as_fd().as_raw_fd(),
                &mut iov,
                Some(&mut cmsg_buffer),
                MsgFlags::MSG_CMSG_CLOEXEC,
            ) {
                Ok(received) => received,
                Err(Errno::EWOULDBLOCK) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(Error::from(e)),
            };

            if received.bytes == 0 {
                return Ok(total);
            }

            for cmsg in received.cmsgs().map_err(|e| Error::from(std::io::Error::from(e)))? {
                if let ControlMessageOwned::ScmRights(received_fds) = cmsg {
                    let data: Vec<RawFd> = received_fds;
                    self.fds_in.push(&data);
                }
            }

            self.data_in.advance_head(received.bytes);
            total += received.bytes;

            if received.bytes < first.len() {
                break;
            }
        }
        Ok(total)
    }

    /// Flushes as much of `data_out` (and, when it empties `data_out` entirely in this call, the
    /// fds queued in `fds_out`) as the socket will currently accept.
    pub fn flush(&mut self) -> Result<()> {
        while self.data_out.size() > 0 {
            let mut scratch = vec![0u8; self.data_out.size().min(self.data_out.capacity())];
            self.data_out.copy(&mut scratch);

            let will_drain_data = scratch.len() == self.data_out.size();
            let fds_to_send: Vec<RawFd> = if will_drain_data && self.fds_out.size() > 0 {
                let n = self.fds_out.size().min(MAX_FDS_PER_CALL);
                let mut fds = Vec::with_capacity(n);
                for _ in 0..n {
                    fds.push(self.fds_out.pop_front().expect("size() just checked"));
                }
                fds
            } else {
                Vec::new()
            };

            let iov = [IoSlice::new(&scratch)];
            let borrowed: Vec<BorrowedFd> =
                fds_to_send.iter().map(|fd| unsafe { BorrowedFd::borrow_raw(*fd) }).collect();
            let cmsgs = if borrowed.is_empty() {
                Vec::new()
            } else {
                vec![ControlMessage::ScmRights(&borrowed)]
            };

            let sent = match sendmsg::<()>(
                self.socket.as_fd().as_raw_fd(),
                &iov,
                &cmsgs,
                MsgFlags::MSG_NOSIGNAL,
                None,
            ) {
                Ok(sent) => sent,
                Err(Errno::EWOULDBLOCK) => {
                    // Put the fds back; they must still ride out with these same bytes next time.
                    for fd in fds_to_send.into_iter().rev() {
                        // restore order: pop_front took them off the front, so re-push at front
                        // isn't available on this type; push them back in original order instead.
                        self.fds_out.push(&[fd]);
                    }
                    break;
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(Error::from(e)),
            };

            // Closing our copies now that the kernel has duplicated them into the peer socket.
            for fd in fds_to_send {
                let _ = nix::unistd::close(fd);
            }

            self.data_out.consume(sent);
        }
        Ok(())
    }

    /// Appends bytes to the outgoing queue; does not itself perform I/O. Returns a
    /// `FramingError::ExceedsCapacity` if `data` alone is larger than the buffer can ever hold.
    pub fn queue_write(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.data_out.capacity() {
            return Err(Error::Framing(FramingError::ExceedsCapacity {
                size: data.len() as u32,
                capacity: self.data_out.capacity(),
            }));
        }
        while data.len() > self.data_out.free_space() {
            self.flush()?;
        }
        self.data_out.push(data);
        Ok(())
    }
}

impl Drop for WireConnection {
    fn drop(&mut self) {
        while let Some(fd) = self.fds_out.pop_front() {
            let _ = nix::unistd::close(fd);
        }
        while let Some(fd) = self.fds_in.pop_front() {
            let _ = nix::unistd::close(fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_pair() -> (WireConnection, WireConnection) {
        let (a, b) = UnixStream::pair().unwrap();
        (WireConnection::new(a).unwrap(), WireConnection::new(b).unwrap())
    }

    #[test]
    fn bytes_roundtrip_through_flush_and_read() {
        let (mut left, mut right) = connected_pair();
        left.queue_write(b"hello wire").unwrap();
        left.flush().unwrap();

        right.read().unwrap();
        assert_eq!(right.data_in().size(), b"hello wire".len());
        let mut out = vec![0u8; b"hello wire".len()];
        right.data_in().copy(&mut out);
        assert_eq!(&out, b"hello wire");
    }

    #[test]
    fn oversize_write_is_a_framing_error() {
        let (mut left, _right) = connected_pair();
        let huge = vec![0u8; left.data_out.capacity() + 1];
        assert!(matches!(left.queue_write(&huge), Err(Error::Framing(_))));
    }

    #[test]
    fn fd_escorts_the_flush_that_drains_its_bytes() {
        let (mut left, mut right) = connected_pair();
        let (r, w) = nix::unistd::pipe().unwrap();
        drop(r); // keep only `w` alive to pass across
        left.queue_write(b"payload").unwrap();
        left.put_owned_fd(w);
        left.flush().unwrap();

        right.read().unwrap();
        assert_eq!(right.fds_in().size(), 1);
    }
}
