use bytes::{Buf, BufMut, BytesMut};

use crate::ofp::header::pad8;
use crate::ofp::oxm::MatchField;

const OFPAT_OUTPUT: u16 = 0;
const OFPAT_SET_QUEUE: u16 = 21;
const OFPAT_SET_FIELD: u16 = 25;

pub const OFPP_CONTROLLER: u32 = 0xffff_fffd;
pub const OFPP_FLOOD: u32 = 0xffff_fffb;
pub const OFPCML_NO_BUFFER: u16 = 0xffff;

/// An action in an `OFPIT_APPLY_ACTIONS` instruction. This is the subset of
/// `ofp_action_header` variants this controller ever emits.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Action {
    Output { port: u32, max_len: u16 },
    SetField(MatchField),
    SetQueue(u32),
}

impl Action {
    pub fn output(port: u32) -> Self {
        Action::Output {
            port,
            max_len: OFPCML_NO_BUFFER,
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Action::Output { .. } => 16,
            Action::SetQueue(_) => 8,
            Action::SetField(field) => pad8(4 + 4 + field_value_len(field)),
        }
    }

    fn encode(&self, out: &mut BytesMut) {
        match self {
            Action::Output { port, max_len } => {
                out.put_u16(OFPAT_OUTPUT);
                out.put_u16(16);
                out.put_u32(*port);
                out.put_u16(*max_len);
                out.put_bytes(0, 6);
            }
            Action::SetQueue(queue_id) => {
                out.put_u16(OFPAT_SET_QUEUE);
                out.put_u16(8);
                out.put_u32(*queue_id);
            }
            Action::SetField(field) => {
                let start = out.len();
                out.put_u16(OFPAT_SET_FIELD);
                let len_pos = out.len();
                out.put_u16(0); // patched below
                encode_set_field_oxm(field, out);
                let total = out.len() - start;
                let padded = pad8(total);
                out.put_bytes(0, padded - total);
                let len = (out.len() - start) as u16;
                out[len_pos..len_pos + 2].copy_from_slice(&len.to_be_bytes());
            }
        }
    }
}

fn field_value_len(field: &MatchField) -> usize {
    match field {
        MatchField::InPort(_) | MatchField::Ipv4Src(_) | MatchField::Ipv4Dst(_) => 4,
        MatchField::EthDst(_) | MatchField::EthSrc(_) => 6,
        MatchField::EthType(_) | MatchField::TcpDst(_) | MatchField::UdpDst(_) => 2,
        MatchField::IpProto(_) => 1,
    }
}

fn encode_set_field_oxm(field: &MatchField, out: &mut BytesMut) {
    // Mirrors MatchField's own OXM TLV encoding; kept local because action-body OXM
    // TLVs don't live inside an ofp_match header.
    const OFPXMC_OPENFLOW_BASIC: u16 = 0x8000;
    let (xm_field, len): (u8, usize) = match field {
        MatchField::InPort(_) => (0, 4),
        MatchField::EthDst(_) => (3, 6),
        MatchField::EthSrc(_) => (4, 6),
        MatchField::EthType(_) => (5, 2),
        MatchField::IpProto(_) => (10, 1),
        MatchField::Ipv4Src(_) => (11, 4),
        MatchField::Ipv4Dst(_) => (12, 4),
        MatchField::TcpDst(_) => (14, 2),
        MatchField::UdpDst(_) => (16, 2),
    };
    out.put_u16(OFPXMC_OPENFLOW_BASIC);
    out.put_u8(xm_field << 1);
    out.put_u8(len as u8);
    match *field {
        MatchField::InPort(v) | MatchField::Ipv4Src(v) | MatchField::Ipv4Dst(v) => out.put_u32(v),
        MatchField::EthDst(mac) | MatchField::EthSrc(mac) => out.put_slice(&mac),
        MatchField::EthType(v) | MatchField::TcpDst(v) | MatchField::UdpDst(v) => out.put_u16(v),
        MatchField::IpProto(v) => out.put_u8(v),
    }
}

pub fn encode_actions(actions: &[Action]) -> BytesMut {
    let mut out = BytesMut::new();
    for action in actions {
        action.encode(&mut out);
    }
    out
}

pub fn actions_encoded_len(actions: &[Action]) -> usize {
    actions.iter().map(Action::encoded_len).sum()
}

/// Decodes a flat action list of the given byte length (used for `ofp_packet_out` and
/// for bucket bodies); unrecognised action types are skipped using their declared length.
pub fn decode_actions(mut buf: &[u8]) -> Vec<Action> {
    let mut actions = Vec::new();
    while buf.len() >= 4 {
        let action_type = u16::from_be_bytes([buf[0], buf[1]]);
        let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if len < 4 || len > buf.len() {
            break;
        }
        let body = &buf[4..len];
        match action_type {
            OFPAT_OUTPUT if body.len() >= 6 => {
                let port = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                let max_len = u16::from_be_bytes([body[4], body[5]]);
                actions.push(Action::Output { port, max_len });
            }
            OFPAT_SET_QUEUE if body.len() >= 4 => {
                let queue_id = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                actions.push(Action::SetQueue(queue_id));
            }
            _ => {
                // SET_FIELD and anything else we don't emit: skip, we never need to read
                // them back.
            }
        }
        buf = &buf[len..];
    }
    actions
}
