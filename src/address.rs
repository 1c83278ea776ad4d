use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;

// NodeAddress identifies one participant: a numeric id plus a port.
// The id doubles as an IPv4 address so a node can be reached over UDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub id: u32,
    pub port: u16,
}

impl NodeAddress {
    pub const fn new(id: u32, port: u16) -> Self {
        Self { id, port }
    }

    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.id)
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip(), self.port)
    }
}

impl From<SocketAddrV4> for NodeAddress {
    fn from(addr: SocketAddrV4) -> Self {
        Self {
            id: u32::from(*addr.ip()),
            port: addr.port(),
        }
    }
}

impl From<NodeAddress> for SocketAddrV4 {
    fn from(addr: NodeAddress) -> Self {
        addr.socket_addr()
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip(), self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid node address {0:?}, expected a.b.c.d:port")]
pub struct AddressParseError(pub String);

impl FromStr for NodeAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddrV4>()
            .map(NodeAddress::from)
            .map_err(|_| AddressParseError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let addr = NodeAddress::from(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 7946));
        assert_eq!(addr.to_string(), "127.0.0.1:7946");
        assert_eq!("127.0.0.1:7946".parse::<NodeAddress>(), Ok(addr));

        // Small ids render as low octets
        assert_eq!(NodeAddress::new(1, 0).to_string(), "0.0.0.1:0");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-an-address".parse::<NodeAddress>().is_err());
        assert!("127.0.0.1".parse::<NodeAddress>().is_err());
    }

    #[test]
    fn test_equality_is_by_id_and_port() {
        assert_eq!(NodeAddress::new(3, 10), NodeAddress::new(3, 10));
        assert_ne!(NodeAddress::new(3, 10), NodeAddress::new(3, 11));
        assert_ne!(NodeAddress::new(3, 10), NodeAddress::new(4, 10));
    }
}
