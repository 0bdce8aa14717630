//! Wire-level types shared between `qos-controller` and `qos-agent`: the OpenFlow 1.3
//! codec, Ethernet/ARP/IP packet parsing, the HTTP/JSON policy contract, and
//! environment-driven configuration.

pub mod config;
pub mod error;
pub mod ofp;
pub mod policy;

pub use error::{OfpError, PacketParseError};
