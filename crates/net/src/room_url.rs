//! Room URL generation and parsing
//!
//! Format: murmur://<host>:<port>/<room>/<token>

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::{Error, Result};

const SCHEME: &str = "murmur://";

/// Everything needed to join a relay room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomUrl {
    pub host: IpAddr,
    pub port: u16,
    pub room: String,
    pub token: String,
}

impl RoomUrl {
    pub fn new(host: IpAddr, port: u16, room: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            host,
            port,
            room: room.into(),
            token: token.into(),
        }
    }

    /// Socket address to connect to
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn to_url(&self) -> String {
        format!(
            "{}{}/{}/{}",
            SCHEME,
            self.socket_addr(),
            self.room,
            self.token
        )
    }

    pub fn parse(s: &str) -> Result<Self> {
        let rest = s
            .trim()
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::Protocol(format!("Invalid room URL: missing {}", SCHEME)))?;

        let mut parts = rest.splitn(3, '/');
        let (Some(host_port), Some(room), Some(token)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Protocol(
                "Invalid room URL: expected host:port/room/token".into(),
            ));
        };

        let addr: SocketAddr = host_port.parse().map_err(|_| {
            Error::Protocol(format!("Invalid room URL: bad address '{}'", host_port))
        })?;

        if room.is_empty() {
            return Err(Error::Protocol("Invalid room URL: empty room".into()));
        }
        if token.is_empty() || token.contains('/') {
            return Err(Error::Protocol("Invalid room URL: bad token".into()));
        }

        Ok(Self::new(addr.ip(), addr.port(), room, token))
    }
}

impl fmt::Display for RoomUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

impl FromStr for RoomUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_room_url_roundtrip() {
        let url = RoomUrl::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100)), 7331, "lounge", "abc123");
        assert_eq!(url.to_url(), "murmur://192.168.1.100:7331/lounge/abc123");
        assert_eq!(RoomUrl::parse(&url.to_url()).unwrap(), url);
    }

    #[test]
    fn test_room_url_ipv6() {
        let url: RoomUrl = "murmur://[::1]:7331/lounge/tok".parse().unwrap();
        assert_eq!(url.host, IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(url.port, 7331);
        assert_eq!(url.to_string(), "murmur://[::1]:7331/lounge/tok");
    }

    #[test]
    fn test_room_url_invalid() {
        assert!(RoomUrl::parse("http://127.0.0.1:7331/lounge/tok").is_err());
        assert!(RoomUrl::parse("murmur://127.0.0.1:7331").is_err());
        assert!(RoomUrl::parse("murmur://localhost:7331/lounge/tok").is_err());
        assert!(RoomUrl::parse("murmur://127.0.0.1:7331//tok").is_err());
        assert!(RoomUrl::parse("murmur://127.0.0.1:7331/lounge/").is_err());
        assert!(RoomUrl::parse("murmur://127.0.0.1:7331/lounge/a/b").is_err());
    }
}
