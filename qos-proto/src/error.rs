/// Errors raised while decoding or encoding OpenFlow wire messages.
#[derive(Debug, thiserror::Error)]
pub enum OfpError {
    #[error("message too short: need at least {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("unsupported OpenFlow version {0:#x}, only OFP1.3 (0x04) is spoken here")]
    UnsupportedVersion(u8),
    #[error("unknown OpenFlow message type {0}")]
    UnknownType(u8),
    #[error("malformed match field (oxm class {class:#x}, field {field})")]
    MalformedOxm { class: u16, field: u8 },
    #[error("message length {declared} in header does not match OXM/body layout")]
    LengthMismatch { declared: usize },
}

/// Errors raised while parsing an Ethernet payload (ARP/IPv4/TCP/UDP).
#[derive(Debug, thiserror::Error)]
pub enum PacketParseError {
    #[error("packet too short for {what}: need {need}, got {got}")]
    TooShort {
        what: &'static str,
        need: usize,
        got: usize,
    },
    #[error("unrecognised protocol: {0}")]
    Unrecognised(&'static str),
}
