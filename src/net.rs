//! Connection setup: one listener, one accepted connection.

use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info};

use crate::error::{Result, StreamError};

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 5612;

/// Pending connections the listener queues before `accept`.
pub const LISTEN_BACKLOG: i32 = 1;

/// Socket options applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetConfig {
    /// Read and write deadline; `None` blocks indefinitely.
    pub io_timeout: Option<Duration>,
    /// Disable Nagle's algorithm.
    pub nodelay: bool,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            io_timeout: None,
            nodelay: true,
        }
    }
}

impl NetConfig {
    /// Apply the options to a connected stream.
    ///
    /// # Errors
    ///
    /// Returns an error if an option cannot be set.
    pub fn apply(&self, stream: &TcpStream) -> Result<()> {
        stream.set_read_timeout(self.io_timeout)?;
        stream.set_write_timeout(self.io_timeout)?;
        stream.set_nodelay(self.nodelay)?;
        Ok(())
    }
}

/// Bind a listener with address reuse and a backlog of [`LISTEN_BACKLOG`].
///
/// Each resolved address is tried in turn; the last bind error is returned
/// if none succeeds.
///
/// # Errors
///
/// Returns an error if the address does not resolve or cannot be bound.
pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<TcpListener> {
    let mut last_err = None;
    for addr in addr.to_socket_addrs()? {
        match listen_on(addr) {
            Ok(listener) => {
                debug!(addr = %listener.local_addr()?, backlog = LISTEN_BACKLOG, "listening");
                return Ok(listener);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.map_or_else(
        || StreamError::Argument("bind address resolved to nothing".into()),
        StreamError::Io,
    ))
}

fn listen_on(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

/// Accept a single connection, then stop listening.
///
/// # Errors
///
/// Returns an error if the accept fails or options cannot be applied.
pub fn accept_one(listener: TcpListener, config: &NetConfig) -> Result<(TcpStream, SocketAddr)> {
    let (stream, peer) = listener.accept()?;
    drop(listener);
    config.apply(&stream)?;
    info!(%peer, "connection accepted");
    Ok((stream, peer))
}

/// Connect to a server.
///
/// # Errors
///
/// Returns an error if the connection fails or options cannot be applied.
pub fn connect<A: ToSocketAddrs>(addr: A, config: &NetConfig) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr)?;
    config.apply(&stream)?;
    info!(peer = %stream.peer_addr()?, "connected");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::thread;

    #[test]
    fn default_config() {
        let config = NetConfig::default();
        assert!(config.nodelay);
        assert_eq!(config.io_timeout, None);
    }

    #[test]
    fn accept_and_connect_apply_options() {
        let listener = bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = NetConfig {
            io_timeout: Some(Duration::from_secs(5)),
            nodelay: true,
        };

        let client = thread::spawn(move || {
            let mut stream = connect(addr, &config).unwrap();
            assert!(stream.nodelay().unwrap());
            stream.write_all(b"ping").unwrap();
        });

        let (mut stream, _) = accept_one(listener, &config).unwrap();
        assert_eq!(stream.read_timeout().unwrap(), Some(Duration::from_secs(5)));
        assert_eq!(stream.write_timeout().unwrap(), Some(Duration::from_secs(5)));
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        client.join().unwrap();
    }

    #[test]
    fn listener_closed_after_accept() {
        let listener = bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let first = thread::spawn(move || connect(addr, &NetConfig::default()).unwrap());
        let (_stream, _) = accept_one(listener, &NetConfig::default()).unwrap();
        let _first = first.join().unwrap();

        assert!(TcpStream::connect(addr).is_err());
    }

    #[test]
    fn backlog_limits_pending_connections() {
        let listener = bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let pending: Vec<_> = (0..8)
            .filter_map(|_| TcpStream::connect_timeout(&addr, Duration::from_millis(300)).ok())
            .collect();

        // The kernel queues at most backlog + 1 completed handshakes.
        assert!(!pending.is_empty());
        assert!(
            pending.len() <= LISTEN_BACKLOG as usize + 1,
            "{} connections completed before accept",
            pending.len()
        );
        drop(listener);
    }

    #[test]
    fn bind_unresolvable_is_argument_error() {
        let none: &[SocketAddr] = &[];
        assert!(matches!(bind(none), Err(StreamError::Argument(_))));
    }
}
