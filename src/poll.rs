//! Readiness multiplexer: a level-triggered epoll loop over blocking sockets.
//!
//! Owns the interest set, the process-wide mapping from registered
//! descriptor to the leg of the relay it belongs to. Dispatch is always by
//! matching on the [`Leg`] tag, never by probing socket attributes.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags};
use tracing::debug;

use crate::defaults::POLL_EVENT_CAPACITY;
use crate::error::RelayError;

/// Which registered socket an event belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Leg {
    ListenerA,
    ListenerB,
    ServerLeg,
    TargetLeg,
    ClientA,
    ClientB,
}

/// What a descriptor reported. Hangup and error resolve to the same
/// teardown path as a readable event that reads zero bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Readable,
    Hangup,
    Error,
}

#[derive(Clone, Copy, Debug)]
pub struct Event {
    pub leg: Leg,
    pub kind: EventKind,
}

/// Blocks until at least one registered descriptor is ready, then reports
/// per-descriptor events tagged with the owning leg.
#[derive(Debug)]
pub struct Multiplexer {
    epoll: Epoll,
    interests: HashMap<RawFd, Leg>,
    timeout_ms: u16,
}

impl Multiplexer {
    /// The timeout only bounds how long one `poll` call may sleep; nothing
    /// is expired when it elapses.
    pub fn new(poll_timeout: Duration) -> Result<Self, RelayError> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)
            .map_err(|e| RelayError::Poll(errno_io(e)))?;
        let timeout_ms = u16::try_from(poll_timeout.as_millis()).unwrap_or(u16::MAX);
        Ok(Self {
            epoll,
            interests: HashMap::new(),
            timeout_ms,
        })
    }

    /// Register read interest for a descriptor. Each descriptor may be
    /// registered at most once.
    pub fn register<F: AsFd + AsRawFd>(&mut self, io: &F, leg: Leg) -> Result<(), RelayError> {
        let fd = io.as_raw_fd();
        let event = EpollEvent::new(EpollFlags::EPOLLIN, fd as u64);
        self.epoll
            .add(io, event)
            .map_err(|e| RelayError::Poll(errno_io(e)))?;
        self.interests.insert(fd, leg);
        debug!(fd, leg = ?leg, "registered");
        Ok(())
    }

    /// Drop interest for a descriptor. Must happen before the descriptor is
    /// closed, so no event can dispatch against a stale handle.
    pub fn unregister<F: AsFd + AsRawFd>(&mut self, io: &F) -> Result<(), RelayError> {
        let fd = io.as_raw_fd();
        self.interests.remove(&fd);
        self.epoll
            .delete(io)
            .map_err(|e| RelayError::Poll(errno_io(e)))?;
        debug!(fd, "unregistered");
        Ok(())
    }

    /// Wait for the next batch of events. An empty batch means the timeout
    /// elapsed with nothing ready.
    pub fn poll(&mut self, out: &mut Vec<Event>) -> Result<(), RelayError> {
        out.clear();
        let mut events = [EpollEvent::empty(); POLL_EVENT_CAPACITY];
        let n = loop {
            match self.epoll.wait(&mut events, self.timeout_ms) {
                Ok(n) => break n,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(RelayError::Poll(errno_io(e))),
            }
        };
        for ev in &events[..n] {
            let fd = ev.data() as RawFd;
            let Some(&leg) = self.interests.get(&fd) else {
                // Deregistered earlier in this batch.
                debug!(fd, "event for unregistered descriptor");
                continue;
            };
            let flags = ev.events();
            let kind = if flags.contains(EpollFlags::EPOLLIN) {
                EventKind::Readable
            } else if flags.contains(EpollFlags::EPOLLHUP) {
                EventKind::Hangup
            } else {
                EventKind::Error
            };
            out.push(Event { leg, kind });
        }
        Ok(())
    }
}

fn errno_io(e: Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}
