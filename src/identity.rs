//! Server identity: the (cluster-id, server-address) pair that names a
//! connection's destination. Immutable after creation.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Either a `host:port` pair or a Unix domain socket path, distinguished by
/// the conventional `.sock` suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerAddress {
    Tcp { host: String, port: u16 },
    Unix { path: PathBuf },
}

impl ServerAddress {
    /// Parses `host:port` or a bare path ending in `.sock`.
    pub fn parse(s: &str) -> Option<Self> {
        if s.ends_with(".sock") {
            return Some(ServerAddress::Unix {
                path: PathBuf::from(s),
            });
        }
        let (host, port) = s.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;
        Some(ServerAddress::Tcp {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> Option<&str> {
        match self {
            ServerAddress::Tcp { host, .. } => Some(host),
            ServerAddress::Unix { .. } => None,
        }
    }

    /// An IP literal cannot be used as an SNI hostname; TLS setup must skip
    /// SNI silently in that case per the stream abstraction contract.
    pub fn is_ip_literal(&self) -> bool {
        match self {
            ServerAddress::Tcp { host, .. } => host.parse::<std::net::IpAddr>().is_ok(),
            ServerAddress::Unix { .. } => false,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerAddress::Tcp { host, port } => write!(f, "{host}:{port}"),
            ServerAddress::Unix { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Identifies a single server within a cluster. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId {
    pub cluster_id: Uuid,
    pub address: ServerAddress,
}

impl ServerId {
    pub fn new(cluster_id: Uuid, address: ServerAddress) -> Self {
        Self {
            cluster_id,
            address,
        }
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_address() {
        let addr = ServerAddress::parse("localhost:27017").unwrap();
        assert_eq!(
            addr,
            ServerAddress::Tcp {
                host: "localhost".to_string(),
                port: 27017
            }
        );
        assert!(!addr.is_ip_literal());
    }

    #[test]
    fn parses_unix_socket_path() {
        let addr = ServerAddress::parse("/tmp/mongodb-27017.sock").unwrap();
        assert_eq!(
            addr,
            ServerAddress::Unix {
                path: PathBuf::from("/tmp/mongodb-27017.sock")
            }
        );
    }

    #[test]
    fn detects_ip_literal() {
        let addr = ServerAddress::parse("127.0.0.1:27017").unwrap();
        assert!(addr.is_ip_literal());
    }
}
