//! TCP link to a node endpoint

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpStream;

/// Connects to a node (or a bus gateway) over TCP
pub struct TcpConnector {
    address: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Open the connection, giving up after the connect timeout
    pub async fn connect(&self) -> Result<TcpStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .with_context(|| format!("Timed out connecting to {}", self.address))?
            .with_context(|| format!("Failed to connect to {}", self.address))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_and_refuse() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let connector = TcpConnector::new(addr, Duration::from_secs(1));
        assert_eq!(connector.address(), listener.local_addr().unwrap().to_string());
        let stream = connector.connect().await.unwrap();
        assert!(stream.nodelay().unwrap());

        drop(listener);
        let closed = TcpConnector::new(connector.address().to_string(), Duration::from_secs(1));
        assert!(closed.connect().await.is_err());
    }
}
