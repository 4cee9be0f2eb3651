//! Integration tests for the active (dial-out) topology.
//!
//! The harness plays both remote parties: it accepts the relay's persistent
//! connection as the "server" and its on-demand connections as the "target".

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use duplex_relay::active::ActiveRelay;
use duplex_relay::config::{ActiveConfig, TuningConfig};
use duplex_relay::error::RelayError;

fn active_config(server: SocketAddr, target: SocketAddr) -> ActiveConfig {
    ActiveConfig {
        server_host: server.ip().to_string(),
        server_port: server.port(),
        target_host: target.ip().to_string(),
        target_port: target.port(),
        tuning: TuningConfig {
            poll_timeout_secs: 1,
            ..TuningConfig::default()
        },
    }
}

fn spawn_relay(cfg: ActiveConfig) -> thread::JoinHandle<Result<(), RelayError>> {
    thread::spawn(move || ActiveRelay::connect(cfg)?.run())
}

/// Accept one connection, polling until `timeout` elapses.
fn accept_timeout(listener: &TcpListener, timeout: Duration) -> TcpStream {
    listener.set_nonblocking(true).unwrap();
    let deadline = Instant::now() + timeout;
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                listener.set_nonblocking(false).unwrap();
                stream
                    .set_read_timeout(Some(Duration::from_secs(5)))
                    .unwrap();
                return stream;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                assert!(
                    Instant::now() < deadline,
                    "timed out waiting for a connection"
                );
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => panic!("accept failed: {e}"),
        }
    }
}

fn assert_no_pending(listener: &TcpListener) {
    listener.set_nonblocking(true).unwrap();
    match listener.accept() {
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Ok(_) => panic!("unexpected pending connection"),
        Err(e) => panic!("accept failed: {e}"),
    }
    listener.set_nonblocking(false).unwrap();
}

#[test]
fn target_is_dialed_lazily_and_first_bytes_forwarded() {
    let server_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let target_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let cfg = active_config(
        server_listener.local_addr().unwrap(),
        target_listener.local_addr().unwrap(),
    );
    let _relay = spawn_relay(cfg);

    let mut server_conn = accept_timeout(&server_listener, Duration::from_secs(5));

    // No target connection may exist before the server talks.
    thread::sleep(Duration::from_millis(100));
    assert_no_pending(&target_listener);

    server_conn.write_all(b"PING").unwrap();

    let mut target_conn = accept_timeout(&target_listener, Duration::from_secs(5));
    let mut buf = [0u8; 4];
    target_conn.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"PING");
}

#[test]
fn bytes_flow_unmodified_in_both_directions() {
    let server_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let target_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let cfg = active_config(
        server_listener.local_addr().unwrap(),
        target_listener.local_addr().unwrap(),
    );
    let _relay = spawn_relay(cfg);

    let mut server_conn = accept_timeout(&server_listener, Duration::from_secs(5));
    server_conn.write_all(b"hello").unwrap();
    let mut target_conn = accept_timeout(&target_listener, Duration::from_secs(5));
    let mut buf = [0u8; 5];
    target_conn.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello");

    // A payload larger than one pump chunk survives intact, in order.
    let payload: Vec<u8> = (0..65536u32).map(|i| (i % 251) as u8).collect();
    server_conn.write_all(&payload).unwrap();
    let mut received = vec![0u8; payload.len()];
    target_conn.read_exact(&mut received).unwrap();
    assert_eq!(received, payload);

    // And the reverse direction.
    target_conn.write_all(&payload).unwrap();
    let mut received = vec![0u8; payload.len()];
    server_conn.read_exact(&mut received).unwrap();
    assert_eq!(received, payload);
}

#[test]
fn target_is_redialed_on_next_server_byte() {
    let server_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let target_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let cfg = active_config(
        server_listener.local_addr().unwrap(),
        target_listener.local_addr().unwrap(),
    );
    let _relay = spawn_relay(cfg);

    let mut server_conn = accept_timeout(&server_listener, Duration::from_secs(5));
    server_conn.write_all(b"PING").unwrap();
    let mut target_conn = accept_timeout(&target_listener, Duration::from_secs(5));
    let mut buf = [0u8; 4];
    target_conn.read_exact(&mut buf).unwrap();

    // Target goes away; the relay must drop only that leg.
    drop(target_conn);
    thread::sleep(Duration::from_millis(200));
    assert_no_pending(&target_listener);

    // The next server byte triggers exactly one fresh dial, and the byte
    // arrives through the new leg.
    server_conn.write_all(b"AGAIN").unwrap();
    let mut target_conn = accept_timeout(&target_listener, Duration::from_secs(5));
    let mut buf = [0u8; 5];
    target_conn.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"AGAIN");
    assert_no_pending(&target_listener);
}

#[test]
fn losing_the_server_leg_ends_the_relay() {
    let server_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let target_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let cfg = active_config(
        server_listener.local_addr().unwrap(),
        target_listener.local_addr().unwrap(),
    );
    let relay = spawn_relay(cfg);

    let mut server_conn = accept_timeout(&server_listener, Duration::from_secs(5));
    server_conn.write_all(b"PING").unwrap();
    let mut target_conn = accept_timeout(&target_listener, Duration::from_secs(5));
    let mut buf = [0u8; 4];
    target_conn.read_exact(&mut buf).unwrap();

    drop(server_conn);

    // The relay closes the target leg on its way out...
    let n = target_conn.read(&mut buf).unwrap();
    assert_eq!(n, 0, "target leg should be closed after server loss");

    // ...and the run loop reports the loss.
    let result = relay.join().unwrap();
    assert!(matches!(result, Err(RelayError::ServerLegLost)));
}

#[test]
fn unreachable_server_is_fatal_at_startup() {
    // Grab a free port, then release it so nothing is listening there.
    let probe = TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_addr = probe.local_addr().unwrap();
    drop(probe);

    let target_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let cfg = active_config(dead_addr, target_listener.local_addr().unwrap());

    let err = ActiveRelay::connect(cfg).unwrap_err();
    assert!(matches!(err, RelayError::Connect { .. }), "got {err:?}");
}

#[test]
fn failed_target_dial_keeps_the_server_leg_alive() {
    let server_listener = TcpListener::bind("127.0.0.1:0").unwrap();

    // Target address that refuses connections.
    let probe = TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_target = probe.local_addr().unwrap();
    drop(probe);

    let cfg = active_config(server_listener.local_addr().unwrap(), dead_target);
    let relay = spawn_relay(cfg);

    let mut server_conn = accept_timeout(&server_listener, Duration::from_secs(5));
    server_conn.write_all(b"X").unwrap();

    // The dial fails, but the relay stays up and keeps the server leg open:
    // the server can still write without error and the run loop is alive.
    thread::sleep(Duration::from_millis(300));
    server_conn.write_all(b"Y").unwrap();
    assert!(!relay.is_finished());
}
