// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The readiness-based multiplexer: one `epoll` instance watching the listening socket (in
//! server mode) and every instance's two connections, dispatching readable/hangup events back to
//! the caller by the token it was registered under.
//!
//! `tracer_run`'s `epoll_wait` loop in `tracer.c` polled one `epoll_event` at a time rather than
//! batching; this keeps that shape, since nothing here is throughput-sensitive enough to need
//! batching.

use std::os::fd::{AsFd, BorrowedFd};

use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use crate::error::Result;
use crate::registry::Side;

/// What a readiness event was registered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The server-mode listening socket has a pending connection.
    Listener,
    /// One side of a traced instance is readable or has hung up.
    Connection { instance_id: u64, side: Side },
}

const LISTENER_TOKEN: u64 = u64::MAX;

fn encode(instance_id: u64, side: Side) -> u64 {
    debug_assert!(instance_id < (1 << 63));
    (instance_id << 1) | matches!(side, Side::Compositor) as u64
}

fn decode(token: u64) -> Source {
    if token == LISTENER_TOKEN {
        Source::Listener
    } else {
        let side = if token & 1 == 1 { Side::Compositor } else { Side::Client };
        Source::Connection { instance_id: token >> 1, side }
    }
}

pub struct EventLoop {
    epoll: Epoll,
}

/// What the caller should do about one readiness notification.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub source: Source,
    pub readable: bool,
    pub hangup: bool,
}

impl EventLoop {
    pub fn new() -> Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::empty())?;
        Ok(Self { epoll })
    }

    pub fn add_listener(&self, fd: BorrowedFd) -> Result<()> {
        let event = EpollEvent::new(EpollFlags::EPOLLIN, LISTENER_TOKEN);
        self.epoll.add(fd, event)?;
        Ok(())
    }

    pub fn add_connection(&self, fd: BorrowedFd, instance_id: u64, side: Side) -> Result<()> {
        let event = EpollEvent::new(EpollFlags::EPOLLIN, encode(instance_id, side));
        self.epoll.add(fd, event)?;
        Ok(())
    }

    pub fn remove(&self, fd: BorrowedFd) -> Result<()> {
        self.epoll.delete(fd)?;
        Ok(())
    }

    /// Blocks until one fd is ready, returning what it was registered for.
    pub fn wait_one(&self) -> Result<Readiness> {
        let mut events = [EpollEvent::empty(); 1];
        loop {
            match self.epoll.wait(&mut events, EpollTimeout::NONE) {
                Ok(0) => continue,
                Ok(_) => break,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let event = events[0];
        let flags = event.events();
        Ok(Readiness {
            source: decode(event.data()),
            readable: flags.contains(EpollFlags::EPOLLIN),
            hangup: flags.intersects(EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn reports_readability_and_decodes_the_registered_token() {
        let event_loop = EventLoop::new().unwrap();
        let (a, b) = UnixStream::pair().unwrap();
        event_loop.add_connection(a.as_fd(), 7, Side::Compositor).unwrap();

        b.as_fd(); // keep b alive
        use std::io::Write;
        let mut b = b;
        b.write_all(b"x").unwrap();

        let readiness = event_loop.wait_one().unwrap();
        assert!(readiness.readable);
        assert_eq!(
            readiness.source,
            Source::Connection { instance_id: 7, side: Side::Compositor }
        );
    }

    #[test]
    fn hangup_is_reported_when_peer_closes() {
        let event_loop = EventLoop::new().unwrap();
        let (a, b) = UnixStream::pair().unwrap();
        event_loop.add_connection(a.as_fd(), 3, Side::Client).unwrap();
        drop(b);

        let readiness = event_loop.wait_one().unwrap();
        assert!(readiness.hangup);
    }
}
