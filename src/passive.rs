//! Passive topology: two listeners, one inbound client each.
//!
//! The relay:
//! 1. Binds both listeners at startup
//! 2. Accepts exactly one client per listener and pairs them into a session
//! 3. Pumps bytes both ways while the pairing lives
//! 4. Tears down both client legs as soon as either one ends, then goes
//!    back to accepting a fresh pair
//!
//! While a side of the current session is occupied its listener's read
//! interest is dropped, so surplus connections wait in the accept backlog
//! and never relay a byte until the session is over.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, error, info, info_span, warn};

use crate::config::PassiveConfig;
use crate::error::RelayError;
use crate::net::{self, Listener};
use crate::poll::{Event, EventKind, Leg, Multiplexer};
use crate::session::{DriverState, PumpOutcome, Session, Side};

/// Passive-mode relay driver. Side A of the session is the client accepted
/// on listener A, side B the client from listener B.
#[derive(Debug)]
pub struct PassiveRelay {
    mux: Multiplexer,
    listener_a: Listener,
    listener_b: Listener,
    session: Session,
    state: DriverState,
}

impl PassiveRelay {
    /// Bind both listeners. Failure of either is fatal: the topology cannot
    /// form without them, and the caller is expected to exit non-zero.
    pub fn bind(cfg: PassiveConfig) -> Result<Self, RelayError> {
        let backlog = cfg.tuning.listen_backlog;
        let listener_a = net::listen(&cfg.listen_host_a, cfg.listen_port_a, backlog)?;
        let listener_b = net::listen(&cfg.listen_host_b, cfg.listen_port_b, backlog)?;

        let mut mux = Multiplexer::new(Duration::from_secs(cfg.tuning.poll_timeout_secs))?;
        mux.register(&listener_a, Leg::ListenerA)?;
        mux.register(&listener_b, Leg::ListenerB)?;

        let session = Session::new(cfg.tuning.chunk_bytes);
        Ok(Self {
            mux,
            listener_a,
            listener_b,
            session,
            state: DriverState::AwaitingPeerA,
        })
    }

    /// Addresses the listeners actually bound. Useful when configured with
    /// port 0.
    pub fn local_addrs(&self) -> (SocketAddr, SocketAddr) {
        (self.listener_a.local_addr(), self.listener_b.local_addr())
    }

    /// Run the event loop. Never returns during normal operation; every
    /// failure past startup degrades at most the current pairing.
    pub fn run(mut self) -> Result<(), RelayError> {
        let span = info_span!("passive");
        let _guard = span.enter();
        info!(
            listen_a = %self.listener_a.local_addr(),
            listen_b = %self.listener_b.local_addr(),
            "relay started, waiting for a client pair"
        );

        let mut events: Vec<Event> = Vec::new();
        loop {
            if let Err(e) = self.mux.poll(&mut events) {
                error!(error = %e, "poll failed");
                continue;
            }
            if events.is_empty() {
                debug!("poll timeout");
                continue;
            }
            for i in 0..events.len() {
                self.dispatch(events[i]);
            }
        }
    }

    fn dispatch(&mut self, event: Event) {
        match event.leg {
            Leg::ListenerA => self.on_listener_event(Side::A, event.kind),
            Leg::ListenerB => self.on_listener_event(Side::B, event.kind),
            Leg::ClientA => self.on_client_event(Side::A, event.kind),
            Leg::ClientB => self.on_client_event(Side::B, event.kind),
            other => {
                debug!(leg = ?other, "event for a leg this topology never registers");
            }
        }
    }

    fn on_listener_event(&mut self, side: Side, kind: EventKind) {
        if kind != EventKind::Readable {
            // A listener reporting hangup or error cannot accept; there is
            // nothing to tear down, so log and keep going.
            warn!(side = ?side, kind = ?kind, "listener event");
            return;
        }
        if self.session.endpoint(side).is_some() {
            // Interest is dropped while the seat is occupied, so this only
            // happens for events queued in the same poll batch.
            return;
        }

        let listener = match side {
            Side::A => &self.listener_a,
            Side::B => &self.listener_b,
        };
        let client = match listener.accept() {
            Ok(client) => client,
            Err(e) => {
                // The listener survives a failed accept.
                error!(error = %e, "accept failed");
                return;
            }
        };
        info!(side = ?side, peer = %client.peer(), "client connected");

        if let Err(e) = self.mux.register(&client, client_leg(side)) {
            error!(error = %e, "failed to register client leg");
            return;
        }
        // Stop accepting on this side until the session tears down.
        if let Err(e) = self.mux.unregister(listener) {
            error!(error = %e, "failed to pause listener");
        }
        self.session.attach(side, client);
        self.update_state();
    }

    fn on_client_event(&mut self, side: Side, kind: EventKind) {
        if self.session.endpoint(side).is_none() {
            // Torn down earlier in this poll batch.
            return;
        }
        match kind {
            EventKind::Readable => match self.session.pump(side) {
                PumpOutcome::Forwarded(n) => {
                    debug!(from = ?side, bytes = n, "forwarded");
                }
                PumpOutcome::AwaitingPeer => {
                    // First client talking before the second arrived; the
                    // kernel keeps its bytes queued until pairing.
                }
                PumpOutcome::SourceEof => {
                    info!(side = ?side, "client end-of-stream");
                    self.teardown_session();
                }
                PumpOutcome::ReadFailed(e) => {
                    error!(side = ?side, error = %e, "client read failed");
                    self.teardown_session();
                }
                PumpOutcome::WriteFailed(e) => {
                    error!(side = ?side.peer(), error = %e, "client write failed");
                    self.teardown_session();
                }
            },
            EventKind::Hangup | EventKind::Error => {
                warn!(side = ?side, "client hangup");
                if self.session.is_paired() {
                    self.teardown_session();
                } else {
                    self.drop_lone_client(side);
                }
            }
        }
    }

    /// Both directions die together in this topology: close and deregister
    /// whatever clients are seated and resume accepting on both listeners.
    fn teardown_session(&mut self) {
        for side in [Side::A, Side::B] {
            if let Some(client) = self.session.detach(side) {
                if let Err(e) = self.mux.unregister(&client) {
                    error!(error = %e, "failed to unregister client leg");
                }
                info!(side = ?side, peer = %client.peer(), "client closed");
            }
        }
        self.session.mark_closed();
        debug!("session closed");
        self.session.reset();
        self.resume_listener(Side::A);
        self.resume_listener(Side::B);
        self.update_state();
    }

    /// A client that hung up before its peer ever arrived: drop just that
    /// leg and accept on its listener again.
    fn drop_lone_client(&mut self, side: Side) {
        if let Some(client) = self.session.detach(side) {
            if let Err(e) = self.mux.unregister(&client) {
                error!(error = %e, "failed to unregister client leg");
            }
            info!(side = ?side, peer = %client.peer(), "client closed");
        }
        self.session.reset();
        self.resume_listener(side);
        self.update_state();
    }

    fn resume_listener(&mut self, side: Side) {
        let (listener, leg) = match side {
            Side::A => (&self.listener_a, Leg::ListenerA),
            Side::B => (&self.listener_b, Leg::ListenerB),
        };
        if let Err(e) = self.mux.register(listener, leg) {
            error!(side = ?side, error = %e, "failed to resume listener");
        }
    }

    fn update_state(&mut self) {
        let next = if self.session.endpoint(Side::A).is_none() {
            DriverState::AwaitingPeerA
        } else if self.session.endpoint(Side::B).is_none() {
            DriverState::AwaitingPeerB
        } else {
            DriverState::Paired
        };
        if next != self.state {
            debug!(from = ?self.state, to = ?next, "driver state");
            if next == DriverState::Paired {
                info!("clients paired, relaying");
            }
            self.state = next;
        }
    }
}

fn client_leg(side: Side) -> Leg {
    match side {
        Side::A => Leg::ClientA,
        Side::B => Leg::ClientB,
    }
}
