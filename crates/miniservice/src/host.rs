use std::net::{IpAddr, SocketAddr};

use tokio::net::{TcpListener, UdpSocket};

use miniservice_core::Error;

/// Any routable address works; connecting a UDP socket sends nothing.
const PROBE_TARGET: &str = "8.8.8.8:80";

/// Address of the interface this host uses for outbound traffic.
///
/// Needs a default route; on a host without one this fails with
/// [`Error::Network`]. Set an advertise host or a specific bind address to
/// skip detection.
pub async fn detect() -> Result<String, Error> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| Error::network("failed determining ip address", e))?;
    socket
        .connect(PROBE_TARGET)
        .await
        .map_err(|e| Error::network("failed determining ip address", e))?;
    let local = socket
        .local_addr()
        .map_err(|e| Error::network("failed determining ip address", e))?;

    if local.ip().is_unspecified() {
        return Err(Error::Network {
            context: "failed determining ip address: no outbound interface".to_string(),
            source: None,
        });
    }
    Ok(local.ip().to_string())
}

/// Host to publish for a listener bound on `bind`: the bind address itself
/// when it names one interface, the detected outbound address otherwise.
pub async fn reachable(bind: IpAddr) -> Result<String, Error> {
    if bind.is_unspecified() {
        detect().await
    } else {
        Ok(bind.to_string())
    }
}

/// Binds `addr` and reports the port actually assigned.
pub(crate) async fn bind(addr: SocketAddr, what: &str) -> Result<(TcpListener, u16), Error> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::network(format!("failed starting {what} listener on {addr}"), e))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::network(format!("failed determining {what} port"), e))?
        .port();
    Ok((listener, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_reports_ephemeral_port() {
        let (listener, port) = bind("127.0.0.1:0".parse().unwrap(), "test").await.unwrap();
        assert_ne!(port, 0);
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn bind_conflict_is_network_error() {
        let (_held, port) = bind("127.0.0.1:0".parse().unwrap(), "test").await.unwrap();
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        assert!(matches!(bind(addr, "test").await, Err(Error::Network { .. })));
    }

    #[tokio::test]
    async fn specific_bind_address_is_published_without_detection() {
        assert_eq!(reachable("127.0.0.1".parse().unwrap()).await.unwrap(), "127.0.0.1");
        assert_eq!(reachable("::1".parse().unwrap()).await.unwrap(), "::1");
    }
}
