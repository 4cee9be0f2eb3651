//! Relay session: the pairing of two endpoints and the byte pump between
//! them.
//!
//! Each direction is tracked independently: a direction whose source has
//! signalled end-of-stream is half-closed while the opposite direction keeps
//! flowing. The pump performs exactly one read and forwards it in full; no
//! buffering survives beyond one read-write cycle.

use std::io::{self, Read, Write};

use crate::net::Endpoint;

/// The two seats of a session. Which real socket sits in each seat is the
/// topology driver's business.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn peer(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// Per-direction stream state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectionState {
    Open,
    /// This direction's source signalled end-of-stream.
    HalfClosed,
    /// Both directions ended, or the session was torn down.
    Closed,
}

/// Session-formation state of a topology driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    AwaitingPeerA,
    AwaitingPeerB,
    Paired,
    TornDown,
}

/// Result of one pump cycle. The driver decides what each outcome means for
/// its topology; the session itself never closes descriptors.
#[derive(Debug)]
pub enum PumpOutcome {
    /// Bytes were read and fully flushed to the peer.
    Forwarded(usize),
    /// Invoked while one seat is empty; nothing was read, the kernel keeps
    /// the data queued until the session is paired.
    AwaitingPeer,
    /// The source read zero bytes. Its direction is now half-closed; the
    /// close signal is not forwarded (a zero-length send is a no-op on a
    /// TCP stream).
    SourceEof,
    ReadFailed(io::Error),
    WriteFailed(io::Error),
}

/// A live or half-formed pairing of two endpoints.
#[derive(Debug)]
pub struct Session {
    a: Option<Endpoint>,
    b: Option<Endpoint>,
    a_to_b: DirectionState,
    b_to_a: DirectionState,
    buf: Vec<u8>,
}

impl Session {
    pub fn new(chunk_bytes: usize) -> Self {
        Self {
            a: None,
            b: None,
            a_to_b: DirectionState::Open,
            b_to_a: DirectionState::Open,
            buf: vec![0u8; chunk_bytes],
        }
    }

    /// Seat an endpoint. The seat must be empty.
    pub fn attach(&mut self, side: Side, endpoint: Endpoint) {
        let seat = self.seat_mut(side);
        debug_assert!(seat.is_none(), "attach over an occupied seat");
        *seat = Some(endpoint);
    }

    /// Vacate a seat, handing the endpoint back so the caller can
    /// deregister it before the descriptor closes on drop.
    pub fn detach(&mut self, side: Side) -> Option<Endpoint> {
        self.seat_mut(side).take()
    }

    pub fn endpoint(&self, side: Side) -> Option<&Endpoint> {
        match side {
            Side::A => self.a.as_ref(),
            Side::B => self.b.as_ref(),
        }
    }

    pub fn is_paired(&self) -> bool {
        self.a.is_some() && self.b.is_some()
    }

    pub fn direction(&self, from: Side) -> DirectionState {
        match from {
            Side::A => self.a_to_b,
            Side::B => self.b_to_a,
        }
    }

    /// Mark both directions closed; the pairing is over.
    pub fn mark_closed(&mut self) {
        self.a_to_b = DirectionState::Closed;
        self.b_to_a = DirectionState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.a_to_b != DirectionState::Open && self.b_to_a != DirectionState::Open
    }

    /// Reopen both directions for a fresh pairing on whatever endpoints
    /// remain seated.
    pub fn reset(&mut self) {
        self.a_to_b = DirectionState::Open;
        self.b_to_a = DirectionState::Open;
    }

    /// One pump cycle for the direction whose source is `from`: read one
    /// chunk and flush it, in full, to the peer seat.
    pub fn pump(&mut self, from: Side) -> PumpOutcome {
        let (src, dst) = match from {
            Side::A => (self.a.as_mut(), self.b.as_mut()),
            Side::B => (self.b.as_mut(), self.a.as_mut()),
        };
        let (Some(src), Some(dst)) = (src, dst) else {
            return PumpOutcome::AwaitingPeer;
        };

        let n = loop {
            match src.stream().read(&mut self.buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return PumpOutcome::ReadFailed(e),
            }
        };

        if n == 0 {
            match from {
                Side::A => self.a_to_b = DirectionState::HalfClosed,
                Side::B => self.b_to_a = DirectionState::HalfClosed,
            }
            return PumpOutcome::SourceEof;
        }

        // write_all retries partial writes until every byte is flushed.
        match dst.stream().write_all(&self.buf[..n]) {
            Ok(()) => PumpOutcome::Forwarded(n),
            Err(e) => PumpOutcome::WriteFailed(e),
        }
    }

    fn seat_mut(&mut self, side: Side) -> &mut Option<Endpoint> {
        match side {
            Side::A => &mut self.a,
            Side::B => &mut self.b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    /// A connected endpoint and the remote test socket talking to it.
    fn endpoint_pair() -> (Endpoint, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let endpoint = net::connect(
            &addr.ip().to_string(),
            addr.port(),
            Duration::from_secs(5),
        )
        .unwrap();
        let (remote, _) = listener.accept().unwrap();
        remote.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        (endpoint, remote)
    }

    #[test]
    fn pump_forwards_one_chunk() {
        let (ep_a, mut remote_a) = endpoint_pair();
        let (ep_b, mut remote_b) = endpoint_pair();

        let mut session = Session::new(8192);
        session.attach(Side::A, ep_a);
        session.attach(Side::B, ep_b);
        assert!(session.is_paired());

        remote_a.write_all(b"payload").unwrap();
        match session.pump(Side::A) {
            PumpOutcome::Forwarded(7) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }

        let mut buf = [0u8; 7];
        remote_b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"payload");
        assert_eq!(session.direction(Side::A), DirectionState::Open);
    }

    #[test]
    fn pump_without_peer_reads_nothing() {
        let (ep_a, mut remote_a) = endpoint_pair();

        let mut session = Session::new(8192);
        session.attach(Side::A, ep_a);

        remote_a.write_all(b"early").unwrap();
        assert!(matches!(session.pump(Side::A), PumpOutcome::AwaitingPeer));

        // The bytes stayed queued; they flow once the session is paired.
        let (ep_b, mut remote_b) = endpoint_pair();
        session.attach(Side::B, ep_b);
        assert!(matches!(session.pump(Side::A), PumpOutcome::Forwarded(5)));
        let mut buf = [0u8; 5];
        remote_b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"early");
    }

    #[test]
    fn source_eof_half_closes_its_direction_only() {
        let (ep_a, remote_a) = endpoint_pair();
        let (ep_b, mut remote_b) = endpoint_pair();

        let mut session = Session::new(8192);
        session.attach(Side::A, ep_a);
        session.attach(Side::B, ep_b);

        drop(remote_a);
        assert!(matches!(session.pump(Side::A), PumpOutcome::SourceEof));
        assert_eq!(session.direction(Side::A), DirectionState::HalfClosed);
        assert_eq!(session.direction(Side::B), DirectionState::Open);
        assert!(!session.is_closed());

        // Nothing was forwarded for the close signal: the peer read times
        // out instead of seeing data or end-of-stream.
        remote_b
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let mut buf = [0u8; 1];
        assert!(remote_b.read(&mut buf).is_err());
    }

    #[test]
    fn detach_and_reset_reopen_the_session() {
        let (ep_a, _remote_a) = endpoint_pair();
        let (ep_b, _remote_b) = endpoint_pair();

        let mut session = Session::new(1024);
        session.attach(Side::A, ep_a);
        session.attach(Side::B, ep_b);
        session.mark_closed();
        assert!(session.is_closed());

        let taken = session.detach(Side::B);
        assert!(taken.is_some());
        assert!(!session.is_paired());

        session.reset();
        assert_eq!(session.direction(Side::A), DirectionState::Open);
        assert_eq!(session.direction(Side::B), DirectionState::Open);
    }
}
