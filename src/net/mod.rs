//! UDP socket setup
//!
//! All sub-streams run over plain blocking UDP sockets with a short read
//! timeout. Worker threads use the timeout as their poll tick, so socket
//! reads double as the timing loop and no async runtime is needed.

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::error::NetworkError;

/// Kernel send/receive buffer size requested for every socket
pub const SOCKET_BUFFER_SIZE: usize = 256 * 1024;

/// Read timeout on receiving sockets; also the worker poll tick
pub const POLL_TICK: Duration = Duration::from_millis(10);

fn new_socket(addr: SocketAddr) -> std::io::Result<Socket> {
    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE)?;
    socket.set_send_buffer_size(SOCKET_BUFFER_SIZE)?;
    socket.set_nonblocking(false)?;
    Ok(socket)
}

/// Bind a receiving socket.
///
/// The read timeout makes every `recv_from` an interruptible poll tick;
/// worker threads check for shutdown between ticks.
pub fn bind_socket(addr: SocketAddr) -> Result<UdpSocket, NetworkError> {
    let socket = (|| {
        let socket = new_socket(addr)?;
        socket.bind(&addr.into())?;
        socket.set_read_timeout(Some(POLL_TICK))?;
        Ok::<_, std::io::Error>(socket)
    })()
    .map_err(|source| NetworkError::BindFailed {
        addr: addr.to_string(),
        source,
    })?;

    let socket: UdpSocket = socket.into();
    if let Ok(local) = socket.local_addr() {
        debug!(%local, "bound UDP socket");
    }
    Ok(socket)
}

/// Open a sending socket connected to `remote`.
///
/// Bound to the wildcard address with an ephemeral port; connected so the
/// socket can also receive replies (control feedback) from the peer.
pub fn connect_socket(remote: SocketAddr) -> Result<UdpSocket, NetworkError> {
    let local: SocketAddr = if remote.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };

    let socket = (|| {
        let socket = new_socket(remote)?;
        socket.bind(&local.into())?;
        socket.set_read_timeout(Some(POLL_TICK))?;
        socket.connect(&remote.into())?;
        Ok::<_, std::io::Error>(socket)
    })()
    .map_err(|source| NetworkError::ConnectFailed {
        addr: remote.to_string(),
        source,
    })?;

    let socket: UdpSocket = socket.into();
    debug!(%remote, "connected UDP socket");
    Ok(socket)
}

/// True for the transient errors a poll loop should swallow.
pub fn is_poll_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_ephemeral() {
        let socket = bind_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_read_times_out() {
        let socket = bind_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut buf = [0u8; 16];
        let err = socket.recv_from(&mut buf).unwrap_err();
        assert!(is_poll_timeout(&err));
    }

    #[test]
    fn test_connected_pair_exchanges_datagrams() {
        let receiver = bind_socket("127.0.0.1:0".parse().unwrap()).unwrap();
        let sender = connect_socket(receiver.local_addr().unwrap()).unwrap();

        sender.send(b"ping").unwrap();
        let mut buf = [0u8; 16];
        let (len, from) = loop {
            match receiver.recv_from(&mut buf) {
                Ok(r) => break r,
                Err(e) if is_poll_timeout(&e) => continue,
                Err(e) => panic!("recv failed: {}", e),
            }
        };
        assert_eq!(&buf[..len], b"ping");

        // Replies reach the connected sender.
        receiver.send_to(b"pong", from).unwrap();
        let len = loop {
            match sender.recv(&mut buf) {
                Ok(l) => break l,
                Err(e) if is_poll_timeout(&e) => continue,
                Err(e) => panic!("recv failed: {}", e),
            }
        };
        assert_eq!(&buf[..len], b"pong");
    }
}
