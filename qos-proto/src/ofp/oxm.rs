//! OpenFlow Extensible Match (OXM) encoding for the small, closed set of fields this
//! controller ever needs. A full TLV bag that round-trips unknown classes would be
//! more general, but this controller never needs to echo back fields it didn't set, so
//! a closed enum keeps `ofp_match` handling a single match arm instead of a generic
//! byte-soup type.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::OfpError;
use crate::ofp::header::pad8;

const OFPXMC_OPENFLOW_BASIC: u16 = 0x8000;

const OFPXMT_IN_PORT: u8 = 0;
const OFPXMT_ETH_DST: u8 = 3;
const OFPXMT_ETH_SRC: u8 = 4;
const OFPXMT_ETH_TYPE: u8 = 5;
const OFPXMT_IPV4_SRC: u8 = 11;
const OFPXMT_IPV4_DST: u8 = 12;
const OFPXMT_IP_PROTO: u8 = 10;
const OFPXMT_TCP_DST: u8 = 14;
const OFPXMT_UDP_DST: u8 = 16;

/// A single OpenFlow match field, in the bounded vocabulary the classifier and
/// installer actually use.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MatchField {
    InPort(u32),
    EthDst([u8; 6]),
    EthSrc([u8; 6]),
    EthType(u16),
    Ipv4Src(u32),
    Ipv4Dst(u32),
    IpProto(u8),
    TcpDst(u16),
    UdpDst(u16),
}

impl MatchField {
    fn xm_field(&self) -> u8 {
        match self {
            MatchField::InPort(_) => OFPXMT_IN_PORT,
            MatchField::EthDst(_) => OFPXMT_ETH_DST,
            MatchField::EthSrc(_) => OFPXMT_ETH_SRC,
            MatchField::EthType(_) => OFPXMT_ETH_TYPE,
            MatchField::Ipv4Src(_) => OFPXMT_IPV4_SRC,
            MatchField::Ipv4Dst(_) => OFPXMT_IPV4_DST,
            MatchField::IpProto(_) => OFPXMT_IP_PROTO,
            MatchField::TcpDst(_) => OFPXMT_TCP_DST,
            MatchField::UdpDst(_) => OFPXMT_UDP_DST,
        }
    }

    fn encode_value(&self, out: &mut BytesMut) {
        match *self {
            MatchField::InPort(p) => out.put_u32(p),
            MatchField::EthDst(mac) | MatchField::EthSrc(mac) => out.put_slice(&mac),
            MatchField::EthType(t) => out.put_u16(t),
            MatchField::Ipv4Src(a) | MatchField::Ipv4Dst(a) => out.put_u32(a),
            MatchField::IpProto(p) => out.put_u8(p),
            MatchField::TcpDst(p) | MatchField::UdpDst(p) => out.put_u16(p),
        }
    }

    fn encode_tlv(&self, out: &mut BytesMut) {
        out.put_u16(OFPXMC_OPENFLOW_BASIC);
        let field = self.xm_field();
        let len = self.value_len();
        out.put_u8(field << 1); // has_mask = 0
        out.put_u8(len as u8);
        self.encode_value(out);
    }

    fn value_len(&self) -> usize {
        match self {
            MatchField::InPort(_) => 4,
            MatchField::EthDst(_) | MatchField::EthSrc(_) => 6,
            MatchField::EthType(_) => 2,
            MatchField::Ipv4Src(_) | MatchField::Ipv4Dst(_) => 4,
            MatchField::IpProto(_) => 1,
            MatchField::TcpDst(_) | MatchField::UdpDst(_) => 2,
        }
    }

    fn decode_one(buf: &mut Bytes) -> Result<Self, OfpError> {
        if buf.remaining() < 4 {
            return Err(OfpError::Truncated {
                need: 4,
                got: buf.remaining(),
            });
        }
        let class = buf.get_u16();
        let field_and_mask = buf.get_u8();
        let len = buf.get_u8() as usize;
        let field = field_and_mask >> 1;
        let has_mask = field_and_mask & 1 == 1;
        if class != OFPXMC_OPENFLOW_BASIC || has_mask {
            // Skip anything we don't understand rather than fail the whole match.
            if buf.remaining() < len {
                return Err(OfpError::Truncated {
                    need: len,
                    got: buf.remaining(),
                });
            }
            buf.advance(len);
            return Err(OfpError::MalformedOxm { class, field });
        }
        if buf.remaining() < len {
            return Err(OfpError::Truncated {
                need: len,
                got: buf.remaining(),
            });
        }
        let value = buf.copy_to_bytes(len);
        let mut v = value.as_ref();
        Ok(match field {
            OFPXMT_IN_PORT => MatchField::InPort(v.get_u32()),
            OFPXMT_ETH_DST => MatchField::EthDst(read_mac(v)),
            OFPXMT_ETH_SRC => MatchField::EthSrc(read_mac(v)),
            OFPXMT_ETH_TYPE => MatchField::EthType(v.get_u16()),
            OFPXMT_IPV4_SRC => MatchField::Ipv4Src(v.get_u32()),
            OFPXMT_IPV4_DST => MatchField::Ipv4Dst(v.get_u32()),
            OFPXMT_IP_PROTO => MatchField::IpProto(v.get_u8()),
            OFPXMT_TCP_DST => MatchField::TcpDst(v.get_u16()),
            OFPXMT_UDP_DST => MatchField::UdpDst(v.get_u16()),
            _ => return Err(OfpError::MalformedOxm { class, field }),
        })
    }
}

fn read_mac(mut v: &[u8]) -> [u8; 6] {
    let mut mac = [0u8; 6];
    v.copy_to_slice(&mut mac);
    mac
}

/// A full `ofp_match`: `OFPMT_OXM` header followed by a sequence of OXM TLVs, padded to
/// a multiple of 8 bytes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OxmMatch {
    pub fields: Vec<MatchField>,
}

impl OxmMatch {
    pub fn new(fields: Vec<MatchField>) -> Self {
        OxmMatch { fields }
    }

    /// Length of the `ofp_match` header plus OXM TLVs, before padding.
    fn unpadded_len(&self) -> usize {
        4 + self
            .fields
            .iter()
            .map(|f| 4 + f.value_len())
            .sum::<usize>()
    }

    pub fn encoded_len(&self) -> usize {
        pad8(self.unpadded_len())
    }

    pub fn encode(&self, out: &mut BytesMut) {
        const OFPMT_OXM: u16 = 1;
        let unpadded = self.unpadded_len();
        out.put_u16(OFPMT_OXM);
        out.put_u16(unpadded as u16);
        for field in &self.fields {
            field.encode_tlv(out);
        }
        let padding = pad8(unpadded) - unpadded;
        out.put_bytes(0, padding);
    }

    /// Decodes an `ofp_match`, returning the match and the total padded length consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), OfpError> {
        if buf.len() < 4 {
            return Err(OfpError::Truncated {
                need: 4,
                got: buf.len(),
            });
        }
        let mut header = buf;
        let _match_type = header.get_u16();
        let length = header.get_u16() as usize;
        if buf.len() < length {
            return Err(OfpError::Truncated {
                need: length,
                got: buf.len(),
            });
        }
        let mut body = Bytes::copy_from_slice(&buf[4..length]);
        let mut fields = Vec::new();
        while body.has_remaining() {
            match MatchField::decode_one(&mut body) {
                Ok(field) => fields.push(field),
                Err(OfpError::MalformedOxm { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok((OxmMatch { fields }, pad8(length)))
    }

    pub fn get_ipv4_dst(&self) -> Option<u32> {
        self.fields.iter().find_map(|f| match f {
            MatchField::Ipv4Dst(a) => Some(*a),
            _ => None,
        })
    }

    pub fn get_in_port(&self) -> Option<u32> {
        self.fields.iter().find_map(|f| match f {
            MatchField::InPort(p) => Some(*p),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_classified_flow_match() {
        let m = OxmMatch::new(vec![
            MatchField::EthType(0x0800),
            MatchField::IpProto(6),
            MatchField::Ipv4Dst(u32::from_be_bytes([10, 0, 100, 2])),
            MatchField::TcpDst(5003),
        ]);
        let mut buf = BytesMut::new();
        m.encode(&mut buf);
        assert_eq!(buf.len() % 8, 0);

        let (decoded, consumed) = OxmMatch::decode(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded.get_ipv4_dst(), Some(u32::from_be_bytes([10, 0, 100, 2])));
        assert!(decoded.fields.contains(&MatchField::TcpDst(5003)));
    }

    #[test]
    fn empty_match_is_just_the_header_padded() {
        let m = OxmMatch::new(vec![]);
        let mut buf = BytesMut::new();
        m.encode(&mut buf);
        assert_eq!(buf.len(), 8);
    }
}
