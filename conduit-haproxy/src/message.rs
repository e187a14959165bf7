//! The PROXY protocol header model (v1 ASCII, v2 binary).

/// Address family / transport the connection was proxied over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp4,
    Tcp6,
    Udp4,
    Udp6,
    Unix,
    UnixDgram,
    /// The proxy could not determine the original connection's
    /// protocol/address (v1 `UNKNOWN`, v2 family byte `0x00`).
    Unknown,
}

impl Protocol {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Tcp4 => "TCP4",
            Self::Tcp6 => "TCP6",
            Self::Udp4 => "UDP4",
            Self::Udp6 => "UDP6",
            Self::Unix => "UNIX",
            Self::UnixDgram => "UNIX_DGRAM",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// v2-only: whether the proxy is relaying a real connection (`Proxy`) or
/// the header was sent by a health check / local connection (`Local`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Local,
    Proxy,
}

/// A fully decoded PROXY protocol header.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyHeader {
    pub version: u8,
    pub command: Command,
    pub protocol: Protocol,
    pub source_address: Option<String>,
    pub source_port: Option<u16>,
    pub target_address: Option<String>,
    pub target_port: Option<u16>,
}

impl ProxyHeader {
    pub(crate) fn unaddressed(version: u8, command: Command, protocol: Protocol) -> Self {
        Self {
            version,
            command,
            protocol,
            source_address: None,
            source_port: None,
            target_address: None,
            target_port: None,
        }
    }
}
