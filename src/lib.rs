//! Event-driven duplex TCP relay.
//!
//! Joins two TCP endpoints and copies bytes between them in both directions
//! until either side closes, driven by a single-threaded readiness loop over
//! blocking sockets. Two acquisition topologies share the relay core:
//!
//! - **Active mode**: a persistent outbound connection to a fixed server;
//!   the target is dialed lazily, only once the server side produces data,
//!   and re-dialed on demand after its leg drops.
//! - **Passive mode**: two listening sockets; the relay waits for one
//!   inbound client on each listener and pairs them.
//!
//! The relay is payload-agnostic: no framing, no inspection, no TLS. At most
//! one session per configured pairing; this is not a fan-out proxy.

pub mod active;
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod net;
pub mod passive;
pub mod poll;
pub mod session;
