//! Listening sockets with TCP keep-alive.
//!
//! Browsers hold idle connections open to every commit they have visited.
//! Keep-alive probes let the kernel notice peers that went away without
//! closing, so dead connections do not pile up on long-running listeners.
//! Accepted connections inherit the option from the listening socket.

use std::io;
use std::net::SocketAddr;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpSocket};
use tracing::debug;

use crate::consts::{LISTEN_BACKLOG, TCP_KEEPALIVE_PERIOD};

/// Bind `addr` and start listening, with keep-alive enabled.
pub async fn listen(addr: SocketAddr) -> io::Result<TcpListener> {
  let socket = match addr {
    SocketAddr::V4(_) => TcpSocket::new_v4()?,
    SocketAddr::V6(_) => TcpSocket::new_v6()?,
  };

  #[cfg(not(windows))]
  socket.set_reuseaddr(true)?;
  socket.set_keepalive(true)?;
  SockRef::from(&socket).set_tcp_keepalive(&TcpKeepalive::new().with_time(TCP_KEEPALIVE_PERIOD))?;

  socket.bind(addr)?;
  let listener = socket.listen(LISTEN_BACKLOG)?;
  debug!(addr = ?listener.local_addr().ok(), period = ?TCP_KEEPALIVE_PERIOD, "listening with keep-alive");
  Ok(listener)
}
