//! Active topology: persistent server leg, on-demand target leg.
//!
//! The relay:
//! 1. Dials the server at startup and keeps that leg for its whole lifetime
//! 2. Waits for readiness events on a single epoll loop
//! 3. Dials the target on the first server activity, then pumps bytes both
//!    ways
//! 4. Drops only the target leg when it ends, and re-dials on the next
//!    server activity
//!
//! The server leg is never re-established: losing it ends the relay with an
//! error, and the process exits non-zero.

use std::time::Duration;

use tracing::{debug, error, info, info_span, warn};

use crate::config::ActiveConfig;
use crate::error::RelayError;
use crate::net;
use crate::poll::{Event, EventKind, Leg, Multiplexer};
use crate::session::{DriverState, PumpOutcome, Session, Side};

/// Active-mode relay driver. Side A of the session is the server leg,
/// side B the target leg.
#[derive(Debug)]
pub struct ActiveRelay {
    cfg: ActiveConfig,
    mux: Multiplexer,
    session: Session,
    state: DriverState,
}

impl ActiveRelay {
    /// Acquire the mandatory server leg. Failure here is fatal: no relay is
    /// possible without it, and the caller is expected to exit non-zero.
    pub fn connect(cfg: ActiveConfig) -> Result<Self, RelayError> {
        let server = net::connect(
            &cfg.server_host,
            cfg.server_port,
            Duration::from_secs(cfg.tuning.connect_timeout_secs),
        )?;
        let mut mux = Multiplexer::new(Duration::from_secs(cfg.tuning.poll_timeout_secs))?;
        mux.register(&server, Leg::ServerLeg)?;

        let mut session = Session::new(cfg.tuning.chunk_bytes);
        session.attach(Side::A, server);

        Ok(Self {
            cfg,
            mux,
            session,
            state: DriverState::AwaitingPeerB,
        })
    }

    /// Run the event loop. Returns only when the server leg is lost; every
    /// other failure is logged and degrades the current pairing at most.
    pub fn run(mut self) -> Result<(), RelayError> {
        let span = info_span!("active", server = %format!("{}:{}", self.cfg.server_host, self.cfg.server_port));
        let _guard = span.enter();
        info!("relay started, waiting for server activity");

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
                self.dispatch(events[i])?;
            }
        }
    }

    fn dispatch(&mut self, event: Event) -> Result<(), RelayError> {
        match event.leg {
            Leg::ServerLeg => self.on_server_event(event.kind),
            Leg::TargetLeg => self.on_target_event(event.kind),
            other => {
                debug!(leg = ?other, "event for a leg this topology never registers");
                Ok(())
            }
        }
    }

    fn on_server_event(&mut self, kind: EventKind) -> Result<(), RelayError> {
        match kind {
            EventKind::Readable => self.on_server_readable(),
            EventKind::Hangup | EventKind::Error => {
                warn!("server leg hangup");
                self.fatal_teardown()
            }
        }
    }

    /// Server data is the trigger for acquiring the missing peer: dial the
    /// target first if needed, then pump the very bytes that woke us.
    fn on_server_readable(&mut self) -> Result<(), RelayError> {
        if !self.session.is_paired() {
            info!(
                target = %format!("{}:{}", self.cfg.target_host, self.cfg.target_port),
                "server activity, dialing target"
            );
            let target = match net::connect(
                &self.cfg.target_host,
                self.cfg.target_port,
                Duration::from_secs(self.cfg.tuning.connect_timeout_secs),
            ) {
                Ok(target) => target,
                Err(e) => {
                    // Stay in AwaitingPeerB; the still-pending server data
                    // retries the dial on the next poll wake.
                    error!(error = %e, "target dial failed");
                    return Ok(());
                }
            };
            if let Err(e) = self.mux.register(&target, Leg::TargetLeg) {
                error!(error = %e, "failed to register target leg");
                return Ok(());
            }
            self.session.attach(Side::B, target);
            self.transition(DriverState::Paired);
        }

        match self.session.pump(Side::A) {
            PumpOutcome::Forwarded(n) => {
                debug!(bytes = n, "server -> target");
                Ok(())
            }
            PumpOutcome::AwaitingPeer => Ok(()),
            PumpOutcome::SourceEof => {
                info!("server leg end-of-stream");
                self.fatal_teardown()
            }
            PumpOutcome::ReadFailed(e) => {
                error!(error = %e, "server leg read failed");
                self.fatal_teardown()
            }
            PumpOutcome::WriteFailed(e) => {
                // The target is the write peer here; dropping it is enough.
                error!(error = %e, "target write failed");
                self.teardown_target();
                Ok(())
            }
        }
    }

    fn on_target_event(&mut self, kind: EventKind) -> Result<(), RelayError> {
        if self.session.endpoint(Side::B).is_none() {
            // Torn down earlier in this poll batch.
            return Ok(());
        }
        match kind {
            EventKind::Readable => match self.session.pump(Side::B) {
                PumpOutcome::Forwarded(n) => {
                    debug!(bytes = n, "target -> server");
                    Ok(())
                }
                PumpOutcome::AwaitingPeer => Ok(()),
                PumpOutcome::SourceEof => {
                    info!("target end-of-stream, closing target leg");
                    self.teardown_target();
                    Ok(())
                }
                PumpOutcome::ReadFailed(e) => {
                    error!(error = %e, "target read failed");
                    self.teardown_target();
                    Ok(())
                }
                PumpOutcome::WriteFailed(e) => {
                    // The write peer of this direction is the server leg;
                    // failing to write to it is losing it.
                    error!(error = %e, "server write failed");
                    self.fatal_teardown()
                }
            },
            EventKind::Hangup | EventKind::Error => {
                warn!("target leg hangup");
                self.teardown_target();
                Ok(())
            }
        }
    }

    /// Drop the target leg and return to waiting for the next server
    /// activity to dial a fresh one.
    fn teardown_target(&mut self) {
        if let Some(target) = self.session.detach(Side::B) {
            if let Err(e) = self.mux.unregister(&target) {
                error!(error = %e, "failed to unregister target leg");
            }
            info!(peer = %target.peer(), "target leg closed");
        }
        self.session.reset();
        self.transition(DriverState::AwaitingPeerB);
    }

    /// The server leg is gone; close everything and end the relay.
    fn fatal_teardown(&mut self) -> Result<(), RelayError> {
        self.teardown_target();
        if let Some(server) = self.session.detach(Side::A) {
            if let Err(e) = self.mux.unregister(&server) {
                error!(error = %e, "failed to unregister server leg");
            }
            info!(peer = %server.peer(), "server leg closed");
        }
        self.session.mark_closed();
        self.transition(DriverState::TornDown);
        Err(RelayError::ServerLegLost)
    }

    fn transition(&mut self, next: DriverState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "driver state");
            self.state = next;
        }
    }
}
