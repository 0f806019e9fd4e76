//! TCP link to the streaming server

use socket2::{Domain, Protocol, SockAddr, Socket, TcpKeepalive, Type};
use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::StreamError;

/// Blocking TCP connection with bounded connect and write times
pub struct ServerLink {
    stream: TcpStream,
    peer: SocketAddr,
    bytes_sent: u64,
}

impl ServerLink {
    /// Resolve `config.address` and connect to the first address that answers
    pub fn connect(config: &ServerConfig) -> Result<Self, StreamError> {
        let addrs: Vec<SocketAddr> = config
            .address
            .to_socket_addrs()
            .map_err(|e| StreamError::InvalidAddress(format!("{}: {}", config.address, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(StreamError::InvalidAddress(config.address.clone()));
        }

        let mut last_error = None;
        for addr in addrs {
            match Self::connect_addr(addr, config) {
                Ok(link) => return Ok(link),
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }
        Err(StreamError::ConnectionFailed(
            last_error.map_or_else(|| config.address.clone(), |e| e.to_string()),
        ))
    }

    fn connect_addr(addr: SocketAddr, config: &ServerConfig) -> std::io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nodelay(true)?;
        socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(Duration::from_secs(10)))?;
        socket.connect_timeout(&SockAddr::from(addr), config.connect_timeout())?;

        let write_timeout = config.write_timeout();
        if !write_timeout.is_zero() {
            socket.set_write_timeout(Some(write_timeout))?;
        }

        Ok(Self {
            stream: socket.into(),
            peer: addr,
            bytes_sent: 0,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Write one packet in full
    pub fn send(&mut self, packet: &[u8]) -> std::io::Result<usize> {
        self.stream.write_all(packet)?;
        self.bytes_sent += packet.len() as u64;
        Ok(packet.len())
    }

    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}
