//! Parsing for the Ethernet payload carried in `ofp_packet_in` messages: just enough of
//! ARP, IPv4, TCP and UDP to drive flow classification and the ARP proxy.

use bytes::Buf;

use crate::error::PacketParseError;

pub const ETH_TYPE_ARP: u16 = 0x0806;
pub const ETH_TYPE_IPV4: u16 = 0x0800;

pub const ARP_OP_REQUEST: u16 = 1;
pub const ARP_OP_REPLY: u16 = 2;

pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EthernetHeader {
    pub dst: [u8; 6],
    pub src: [u8; 6],
    pub eth_type: u16,
}

impl EthernetHeader {
    pub const LEN: usize = 14;

    pub fn parse(buf: &[u8]) -> Result<(Self, &[u8]), PacketParseError> {
        if buf.len() < Self::LEN {
            return Err(PacketParseError::TooShort {
                what: "ethernet header",
                need: Self::LEN,
                got: buf.len(),
            });
        }
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&buf[0..6]);
        src.copy_from_slice(&buf[6..12]);
        let eth_type = u16::from_be_bytes([buf[12], buf[13]]);
        Ok((
            EthernetHeader { dst, src, eth_type },
            &buf[Self::LEN..],
        ))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ArpPacket {
    pub operation: u16,
    pub sender_mac: [u8; 6],
    pub sender_ip: u32,
    pub target_mac: [u8; 6],
    pub target_ip: u32,
}

impl ArpPacket {
    pub fn parse(mut buf: &[u8]) -> Result<Self, PacketParseError> {
        const LEN: usize = 28;
        if buf.len() < LEN {
            return Err(PacketParseError::TooShort {
                what: "arp packet",
                need: LEN,
                got: buf.len(),
            });
        }
        let _htype = buf.get_u16();
        let _ptype = buf.get_u16();
        let _hlen = buf.get_u8();
        let _plen = buf.get_u8();
        let operation = buf.get_u16();
        let mut sender_mac = [0u8; 6];
        buf.copy_to_slice(&mut sender_mac);
        let sender_ip = buf.get_u32();
        let mut target_mac = [0u8; 6];
        buf.copy_to_slice(&mut target_mac);
        let target_ip = buf.get_u32();
        Ok(ArpPacket {
            operation,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ipv4Header {
    pub proto: u8,
    pub src: u32,
    pub dst: u32,
    pub ihl_bytes: usize,
}

impl Ipv4Header {
    pub fn parse(buf: &[u8]) -> Result<(Self, &[u8]), PacketParseError> {
        if buf.len() < 20 {
            return Err(PacketParseError::TooShort {
                what: "ipv4 header",
                need: 20,
                got: buf.len(),
            });
        }
        let ihl_words = (buf[0] & 0x0f) as usize;
        let ihl_bytes = ihl_words * 4;
        if ihl_bytes < 20 || buf.len() < ihl_bytes {
            return Err(PacketParseError::TooShort {
                what: "ipv4 options",
                need: ihl_bytes,
                got: buf.len(),
            });
        }
        let proto = buf[9];
        let src = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let dst = u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);
        Ok((
            Ipv4Header {
                proto,
                src,
                dst,
                ihl_bytes,
            },
            &buf[ihl_bytes..],
        ))
    }
}

/// Destination port shared by the TCP and UDP header layouts this controller reads.
pub fn parse_dst_port(proto: u8, transport: &[u8]) -> Result<u16, PacketParseError> {
    match proto {
        IP_PROTO_TCP | IP_PROTO_UDP => {
            if transport.len() < 4 {
                return Err(PacketParseError::TooShort {
                    what: "transport header",
                    need: 4,
                    got: transport.len(),
                });
            }
            Ok(u16::from_be_bytes([transport[2], transport[3]]))
        }
        other => Err(PacketParseError::Unrecognised(match other {
            IP_PROTO_TCP => "tcp",
            IP_PROTO_UDP => "udp",
            _ => "ip-proto",
        })),
    }
}

pub fn format_mac(mac: [u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

pub fn format_ipv4(addr: u32) -> String {
    let o = addr.to_be_bytes();
    format!("{}.{}.{}.{}", o[0], o[1], o[2], o[3])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ethernet_then_ipv4_then_tcp_dst_port() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0xff; 6]); // dst
        frame.extend_from_slice(&[0x11; 6]); // src
        frame.extend_from_slice(&ETH_TYPE_IPV4.to_be_bytes());
        // ipv4 header, ihl=5
        frame.push(0x45);
        frame.push(0);
        frame.extend_from_slice(&[0, 0]); // total length (unused)
        frame.extend_from_slice(&[0, 0, 0, 0]); // id/flags/frag (unused)
        frame.push(64); // ttl
        frame.push(IP_PROTO_TCP);
        frame.extend_from_slice(&[0, 0]); // checksum
        frame.extend_from_slice(&[10, 0, 0, 1]);
        frame.extend_from_slice(&[10, 0, 100, 2]);
        // tcp header (just src/dst port needed)
        frame.extend_from_slice(&5555u16.to_be_bytes());
        frame.extend_from_slice(&5003u16.to_be_bytes());

        let (eth, rest) = EthernetHeader::parse(&frame).unwrap();
        assert_eq!(eth.eth_type, ETH_TYPE_IPV4);
        let (ip, transport) = Ipv4Header::parse(rest).unwrap();
        assert_eq!(ip.proto, IP_PROTO_TCP);
        assert_eq!(format_ipv4(ip.dst), "10.0.100.2");
        assert_eq!(parse_dst_port(ip.proto, transport).unwrap(), 5003);
    }
}
