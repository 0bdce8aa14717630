use bytes::{Buf, BufMut};

use crate::error::OfpError;

pub const OFP_VERSION: u8 = 0x04;
pub const OFP_HEADER_LEN: usize = 8;

/// `ofp_type` values this controller speaks. Modelled as a tagged union rather than a
/// virtual-handler hierarchy: decoding produces one of these, and dispatch is a single match.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum OfpType {
    Hello = 0,
    Error = 1,
    EchoRequest = 2,
    EchoReply = 3,
    FeaturesRequest = 5,
    FeaturesReply = 6,
    PacketIn = 10,
    FlowRemoved = 11,
    PortStatus = 12,
    PacketOut = 13,
    FlowMod = 14,
    GroupMod = 15,
    MeterMod = 18,
    MultipartRequest = 19,
    MultipartReply = 20,
}

impl OfpType {
    pub fn from_u8(v: u8) -> Result<Self, OfpError> {
        Ok(match v {
            0 => Self::Hello,
            1 => Self::Error,
            2 => Self::EchoRequest,
            3 => Self::EchoReply,
            5 => Self::FeaturesRequest,
            6 => Self::FeaturesReply,
            10 => Self::PacketIn,
            11 => Self::FlowRemoved,
            12 => Self::PortStatus,
            13 => Self::PacketOut,
            14 => Self::FlowMod,
            15 => Self::GroupMod,
            18 => Self::MeterMod,
            19 => Self::MultipartRequest,
            20 => Self::MultipartReply,
            other => return Err(OfpError::UnknownType(other)),
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OfpHeader {
    pub version: u8,
    pub msg_type: u8,
    pub length: u16,
    pub xid: u32,
}

impl OfpHeader {
    pub fn decode(buf: &[u8]) -> Result<Self, OfpError> {
        if buf.len() < OFP_HEADER_LEN {
            return Err(OfpError::Truncated {
                need: OFP_HEADER_LEN,
                got: buf.len(),
            });
        }
        let mut b = buf;
        let version = b.get_u8();
        let msg_type = b.get_u8();
        let length = b.get_u16();
        let xid = b.get_u32();
        Ok(OfpHeader {
            version,
            msg_type,
            length,
            xid,
        })
    }

    pub fn encode(&self, out: &mut impl BufMut) {
        out.put_u8(self.version);
        out.put_u8(self.msg_type);
        out.put_u16(self.length);
        out.put_u32(self.xid);
    }
}

/// Rounds `n` up to the next multiple of 8, as OpenFlow requires for `ofp_match` and
/// action lists.
pub fn pad8(n: usize) -> usize {
    (n + 7) & !7
}
