//! Socket acquisition: blocking TCP connect, listen and accept.
//!
//! Streams are deliberately left in blocking mode. The readiness loop only
//! tells us *when* to issue a read or accept; the calls themselves block for
//! the duration of one syscall, which is the concurrency contract of the
//! whole engine.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::info;

use crate::error::RelayError;

/// One established TCP socket of a relay session.
///
/// The endpoint owns its stream; dropping it closes the descriptor. Callers
/// must deregister the descriptor from the multiplexer before dropping.
#[derive(Debug)]
pub struct Endpoint {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Endpoint {
    pub fn stream(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Remote address, for logging.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl AsFd for Endpoint {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl AsRawFd for Endpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// A bound, listening TCP socket.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local: SocketAddr,
}

impl Listener {
    /// Accept one pending connection.
    pub fn accept(&self) -> Result<Endpoint, RelayError> {
        let (stream, peer) = self.inner.accept().map_err(RelayError::Accept)?;
        stream.set_nodelay(true).map_err(RelayError::Accept)?;
        Ok(Endpoint { stream, peer })
    }

    /// Bound address. With port 0 this is where the OS actually put us.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

impl AsFd for Listener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::other("hostname resolved to no addresses"))
}

/// Open a client connection with a bounded connect attempt.
pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Endpoint, RelayError> {
    connect_inner(host, port, timeout).map_err(|source| RelayError::Connect {
        addr: format!("{host}:{port}"),
        source,
    })
}

fn connect_inner(host: &str, port: u16, timeout: Duration) -> io::Result<Endpoint> {
    let addr = resolve(host, port)?;
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_nodelay(true)?;
    info!(peer = %addr, "connected");
    Ok(Endpoint { stream, peer: addr })
}

/// Bind and listen with an explicit backlog.
pub fn listen(host: &str, port: u16, backlog: u32) -> Result<Listener, RelayError> {
    listen_inner(host, port, backlog).map_err(|source| RelayError::Bind {
        addr: format!("{host}:{port}"),
        source,
    })
}

fn listen_inner(host: &str, port: u16, backlog: u32) -> io::Result<Listener> {
    let addr = resolve(host, port)?;
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    let inner = TcpListener::from(socket);
    let local = inner.local_addr()?;
    info!(listen = %local, "listening");
    Ok(Listener { inner, local })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn listen_connect_accept_roundtrip() {
        let listener = listen("127.0.0.1", 0, 5).unwrap();
        let addr = listener.local_addr();

        let mut client = connect(
            &addr.ip().to_string(),
            addr.port(),
            Duration::from_secs(5),
        )
        .unwrap();
        let mut served = listener.accept().unwrap();

        client.stream().write_all(b"hi").unwrap();
        let mut buf = [0u8; 2];
        served.stream().read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn connect_to_unbound_port_is_a_connect_error() {
        // Grab a free port, then release it so nothing is listening there.
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let err = connect("127.0.0.1", addr.port(), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, RelayError::Connect { .. }), "got {err:?}");
    }

    #[test]
    fn second_bind_on_busy_port_is_a_bind_error() {
        let first = listen("127.0.0.1", 0, 5).unwrap();
        let port = first.local_addr().port();

        let err = listen("127.0.0.1", port, 5).unwrap_err();
        assert!(matches!(err, RelayError::Bind { .. }), "got {err:?}");
    }
}
