//! OpenFlow 1.3 message bodies, modelled as a single tagged union per the session
//! layer's dispatch loop: decode produces one `OfpMessage`, encode consumes one, and the
//! handshake/packet/stats code all match on it directly rather than visiting a trait
//! object per message kind.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::OfpError;
use crate::ofp::action::{self, Action};
use crate::ofp::header::{OfpHeader, OfpType, OFP_HEADER_LEN, OFP_VERSION};
use crate::ofp::oxm::OxmMatch;

const OFPMP_PORT_STATS: u16 = 4;
const OFPMP_QUEUE: u16 = 5;

const OFPIT_APPLY_ACTIONS: u16 = 4;
const OFPIT_GOTO_TABLE: u16 = 1;
const OFPIT_METER: u16 = 6;

const OFPMBT_DROP: u16 = 1;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FeaturesReply {
    pub datapath_id: u64,
    pub n_buffers: u32,
    pub n_tables: u8,
    pub capabilities: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PacketIn {
    pub buffer_id: u32,
    pub total_len: u16,
    pub reason: u8,
    pub table_id: u8,
    pub cookie: u64,
    pub oxm_match: OxmMatch,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PacketOut {
    pub buffer_id: u32,
    pub in_port: u32,
    pub actions: Vec<Action>,
    pub data: Vec<u8>,
}

/// `OFPFC_*` flow-mod commands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum FlowModCommand {
    Add = 0,
    Modify = 1,
    ModifyStrict = 2,
    Delete = 3,
    DeleteStrict = 4,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlowMod {
    pub cookie: u64,
    pub table_id: u8,
    pub command: FlowModCommand,
    pub priority: u16,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub buffer_id: u32,
    pub out_port: u32,
    pub out_group: u32,
    pub oxm_match: OxmMatch,
    pub goto_table: Option<u8>,
    pub meter_id: Option<u32>,
    pub apply_actions: Vec<Action>,
}

impl FlowMod {
    pub fn add(table_id: u8, priority: u16, oxm_match: OxmMatch, apply_actions: Vec<Action>) -> Self {
        FlowMod {
            cookie: 0,
            table_id,
            command: FlowModCommand::Add,
            priority,
            idle_timeout: 0,
            hard_timeout: 0,
            buffer_id: u32::MAX,
            out_port: 0,
            out_group: 0,
            oxm_match,
            goto_table: None,
            meter_id: None,
            apply_actions,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MeterBand {
    pub rate_kbps: u32,
    pub burst_size_kb: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum MeterModCommand {
    Add = 0,
    Modify = 1,
    Delete = 2,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MeterMod {
    pub command: MeterModCommand,
    pub meter_id: u32,
    pub bands: Vec<MeterBand>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GroupMod {
    pub command: u16,
    pub group_type: u8,
    pub group_id: u32,
    pub buckets: Vec<Vec<Action>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PortStats {
    pub port_no: u32,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
    pub duration_sec: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QueueStats {
    pub port_no: u32,
    pub queue_id: u32,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PortStatus {
    pub reason: u8,
    pub port_no: u32,
    pub link_down: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ErrorMsg {
    pub error_type: u16,
    pub code: u16,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OfpMessage {
    Hello,
    EchoRequest(Vec<u8>),
    EchoReply(Vec<u8>),
    FeaturesRequest,
    FeaturesReply(FeaturesReply),
    PacketIn(PacketIn),
    PacketOut(PacketOut),
    FlowMod(FlowMod),
    MeterMod(MeterMod),
    GroupMod(GroupMod),
    PortStatsRequest { port_no: u32 },
    PortStatsReply(Vec<PortStats>),
    QueueStatsRequest { port_no: u32, queue_id: u32 },
    QueueStatsReply(Vec<QueueStats>),
    PortStatus(PortStatus),
    Error(ErrorMsg),
}

impl OfpMessage {
    fn ofp_type(&self) -> OfpType {
        match self {
            OfpMessage::Hello => OfpType::Hello,
            OfpMessage::EchoRequest(_) => OfpType::EchoRequest,
            OfpMessage::EchoReply(_) => OfpType::EchoReply,
            OfpMessage::FeaturesRequest => OfpType::FeaturesRequest,
            OfpMessage::FeaturesReply(_) => OfpType::FeaturesReply,
            OfpMessage::PacketIn(_) => OfpType::PacketIn,
            OfpMessage::PacketOut(_) => OfpType::PacketOut,
            OfpMessage::FlowMod(_) => OfpType::FlowMod,
            OfpMessage::MeterMod(_) => OfpType::MeterMod,
            OfpMessage::GroupMod(_) => OfpType::GroupMod,
            OfpMessage::PortStatsRequest { .. } => OfpType::MultipartRequest,
            OfpMessage::PortStatsReply(_) => OfpType::MultipartReply,
            OfpMessage::QueueStatsRequest { .. } => OfpType::MultipartRequest,
            OfpMessage::QueueStatsReply(_) => OfpType::MultipartReply,
            OfpMessage::PortStatus(_) => OfpType::PortStatus,
            OfpMessage::Error(_) => OfpType::Error,
        }
    }

    /// Encodes the full message (header + body) with the given transaction id.
    pub fn encode(&self, xid: u32) -> BytesMut {
        let mut body = BytesMut::new();
        self.encode_body(&mut body);
        let total = OFP_HEADER_LEN + body.len();
        let header = OfpHeader {
            version: OFP_VERSION,
            msg_type: self.ofp_type() as u8,
            length: total as u16,
            xid,
        };
        let mut out = BytesMut::with_capacity(total);
        header.encode(&mut out);
        out.extend_from_slice(&body);
        out
    }

    fn encode_body(&self, out: &mut BytesMut) {
        match self {
            OfpMessage::Hello => {}
            OfpMessage::FeaturesRequest => {}
            OfpMessage::EchoRequest(data) | OfpMessage::EchoReply(data) => {
                out.extend_from_slice(data);
            }
            OfpMessage::FeaturesReply(f) => {
                out.put_u64(f.datapath_id);
                out.put_u32(f.n_buffers);
                out.put_u8(f.n_tables);
                out.put_u8(0); // auxiliary_id
                out.put_bytes(0, 2); // pad
                out.put_u32(f.capabilities);
                out.put_u32(0); // reserved
            }
            OfpMessage::PacketIn(p) => {
                out.put_u32(p.buffer_id);
                out.put_u16(p.total_len);
                out.put_u8(p.reason);
                out.put_u8(p.table_id);
                out.put_u64(p.cookie);
                p.oxm_match.encode(out);
                out.put_bytes(0, 2); // pad before data
                out.extend_from_slice(&p.data);
            }
            OfpMessage::PacketOut(p) => {
                out.put_u32(p.buffer_id);
                out.put_u32(p.in_port);
                let actions_len = action::actions_encoded_len(&p.actions);
                out.put_u16(actions_len as u16);
                out.put_bytes(0, 6); // pad
                out.extend_from_slice(&action::encode_actions(&p.actions));
                out.extend_from_slice(&p.data);
            }
            OfpMessage::FlowMod(m) => encode_flow_mod(m, out),
            OfpMessage::MeterMod(m) => encode_meter_mod(m, out),
            OfpMessage::GroupMod(m) => encode_group_mod(m, out),
            OfpMessage::PortStatsRequest { port_no } => {
                out.put_u16(OFPMP_PORT_STATS);
                out.put_u16(0); // flags
                out.put_bytes(0, 4); // pad
                out.put_u32(*port_no);
                out.put_bytes(0, 4); // pad
            }
            OfpMessage::PortStatsReply(stats) => {
                out.put_u16(OFPMP_PORT_STATS);
                out.put_u16(0);
                out.put_bytes(0, 4);
                for s in stats {
                    out.put_u32(s.port_no);
                    out.put_bytes(0, 4);
                    out.put_u64(s.rx_packets);
                    out.put_u64(s.tx_packets);
                    out.put_u64(s.rx_bytes);
                    out.put_u64(s.tx_bytes);
                    out.put_u64(s.rx_dropped);
                    out.put_u64(s.tx_dropped);
                    out.put_u64(0); // rx_errors
                    out.put_u64(0); // tx_errors
                    out.put_u64(0); // rx_frame_err
                    out.put_u64(0); // rx_over_err
                    out.put_u64(0); // rx_crc_err
                    out.put_u64(0); // collisions
                    out.put_u32(s.duration_sec);
                    out.put_u32(0); // duration_nsec
                }
            }
            OfpMessage::QueueStatsRequest { port_no, queue_id } => {
                out.put_u16(OFPMP_QUEUE);
                out.put_u16(0);
                out.put_bytes(0, 4);
                out.put_u32(*port_no);
                out.put_u32(*queue_id);
            }
            OfpMessage::QueueStatsReply(stats) => {
                out.put_u16(OFPMP_QUEUE);
                out.put_u16(0);
                out.put_bytes(0, 4);
                for s in stats {
                    out.put_u32(s.port_no);
                    out.put_u32(s.queue_id);
                    out.put_u64(s.tx_bytes);
                    out.put_u64(s.tx_packets);
                    out.put_u64(s.tx_errors);
                    out.put_u32(0); // duration_sec
                    out.put_u32(0); // duration_nsec
                }
            }
            OfpMessage::PortStatus(p) => {
                out.put_u8(p.reason);
                out.put_bytes(0, 7); // pad
                out.put_u32(p.port_no);
                out.put_bytes(0, 4); // pad
                out.put_bytes(0, 6); // hw_addr, unused here
                out.put_bytes(0, 2); // pad
                out.put_bytes(0, 16); // name, unused here
                let state = if p.link_down { 1 } else { 0 };
                out.put_u32(state);
                out.put_bytes(0, 24); // curr/advertised/supported/peer/curr_speed/max_speed
            }
            OfpMessage::Error(e) => {
                out.put_u16(e.error_type);
                out.put_u16(e.code);
                out.extend_from_slice(&e.data);
            }
        }
    }

    /// Decodes a body given the already-parsed header.
    pub fn decode(header: &OfpHeader, body: &[u8]) -> Result<Self, OfpError> {
        if header.version != OFP_VERSION {
            return Err(OfpError::UnsupportedVersion(header.version));
        }
        let msg_type = OfpType::from_u8(header.msg_type)?;
        Ok(match msg_type {
            OfpType::Hello => OfpMessage::Hello,
            OfpType::EchoRequest => OfpMessage::EchoRequest(body.to_vec()),
            OfpType::EchoReply => OfpMessage::EchoReply(body.to_vec()),
            OfpType::FeaturesRequest => OfpMessage::FeaturesRequest,
            OfpType::FeaturesReply => {
                let mut b = body;
                require(b.len() >= 24, 24, b.len())?;
                let datapath_id = b.get_u64();
                let n_buffers = b.get_u32();
                let n_tables = b.get_u8();
                let _aux_id = b.get_u8();
                b.advance(2);
                let capabilities = b.get_u32();
                OfpMessage::FeaturesReply(FeaturesReply {
                    datapath_id,
                    n_buffers,
                    n_tables,
                    capabilities,
                })
            }
            OfpType::PacketIn => decode_packet_in(body)?,
            OfpType::PacketOut => decode_packet_out(body)?,
            OfpType::FlowMod => decode_flow_mod(body)?,
            OfpType::MeterMod => decode_meter_mod(body)?,
            OfpType::GroupMod => decode_group_mod(body)?,
            OfpType::MultipartRequest => decode_multipart_request(body)?,
            OfpType::MultipartReply => decode_multipart_reply(body)?,
            OfpType::PortStatus => decode_port_status(body)?,
            OfpType::Error => {
                require(body.len() >= 4, 4, body.len())?;
                let mut b = body;
                let error_type = b.get_u16();
                let code = b.get_u16();
                OfpMessage::Error(ErrorMsg {
                    error_type,
                    code,
                    data: b.to_vec(),
                })
            }
            OfpType::FlowRemoved => {
                return Err(OfpError::UnknownType(header.msg_type));
            }
        })
    }
}

fn require(cond: bool, need: usize, got: usize) -> Result<(), OfpError> {
    if cond {
        Ok(())
    } else {
        Err(OfpError::Truncated { need, got })
    }
}

fn encode_flow_mod(m: &FlowMod, out: &mut BytesMut) {
    out.put_u64(m.cookie);
    out.put_u64(0); // cookie_mask
    out.put_u8(m.table_id);
    out.put_u8(m.command as u8);
    out.put_u16(m.idle_timeout);
    out.put_u16(m.hard_timeout);
    out.put_u16(m.priority);
    out.put_u32(m.buffer_id);
    out.put_u32(m.out_port);
    out.put_u32(m.out_group);
    out.put_u16(0); // flags
    out.put_bytes(0, 2); // pad
    m.oxm_match.encode(out);

    if let Some(meter_id) = m.meter_id {
        out.put_u16(OFPIT_METER);
        out.put_u16(8);
        out.put_u32(meter_id);
    }
    if !m.apply_actions.is_empty() {
        let actions_len = action::actions_encoded_len(&m.apply_actions);
        out.put_u16(OFPIT_APPLY_ACTIONS);
        out.put_u16((4 + actions_len) as u16);
        out.put_bytes(0, 4); // pad
        out.extend_from_slice(&action::encode_actions(&m.apply_actions));
    }
    if let Some(table) = m.goto_table {
        out.put_u16(OFPIT_GOTO_TABLE);
        out.put_u16(8);
        out.put_u8(table);
        out.put_bytes(0, 3);
    }
}

fn decode_flow_mod(body: &[u8]) -> Result<OfpMessage, OfpError> {
    require(body.len() >= 40, 40, body.len())?;
    let mut b = body;
    let cookie = b.get_u64();
    let _cookie_mask = b.get_u64();
    let table_id = b.get_u8();
    let command = match b.get_u8() {
        0 => FlowModCommand::Add,
        1 => FlowModCommand::Modify,
        2 => FlowModCommand::ModifyStrict,
        3 => FlowModCommand::Delete,
        _ => FlowModCommand::DeleteStrict,
    };
    let idle_timeout = b.get_u16();
    let hard_timeout = b.get_u16();
    let priority = b.get_u16();
    let buffer_id = b.get_u32();
    let out_port = b.get_u32();
    let out_group = b.get_u32();
    let _flags = b.get_u16();
    b.advance(2);

    let remaining = b.remaining();
    let match_bytes = &body[body.len() - remaining..];
    let (oxm_match, match_len) = OxmMatch::decode(match_bytes)?;
    b.advance(match_len);

    let mut goto_table = None;
    let mut meter_id = None;
    let mut apply_actions = Vec::new();
    while b.remaining() >= 4 {
        let inst_type = b.get_u16();
        let inst_len = b.get_u16() as usize;
        require(inst_len >= 4 && b.remaining() + 4 >= inst_len, inst_len, b.remaining() + 4)?;
        let inst_body_len = inst_len - 4;
        let inst_body = &b.chunk()[..inst_body_len.min(b.remaining())];
        match inst_type {
            OFPIT_APPLY_ACTIONS if inst_body.len() >= 4 => {
                apply_actions = action::decode_actions(&inst_body[4..]);
            }
            OFPIT_GOTO_TABLE if !inst_body.is_empty() => {
                goto_table = Some(inst_body[0]);
            }
            OFPIT_METER if inst_body.len() >= 4 => {
                meter_id = Some(u32::from_be_bytes([
                    inst_body[0],
                    inst_body[1],
                    inst_body[2],
                    inst_body[3],
                ]));
            }
            _ => {}
        }
        b.advance(inst_body_len);
    }

    Ok(OfpMessage::FlowMod(FlowMod {
        cookie,
        table_id,
        command,
        priority,
        idle_timeout,
        hard_timeout,
        buffer_id,
        out_port,
        out_group,
        oxm_match,
        goto_table,
        meter_id,
        apply_actions,
    }))
}

fn encode_meter_mod(m: &MeterMod, out: &mut BytesMut) {
    out.put_u16(m.command as u16);
    out.put_u16(0x0002); // OFPMF_KBPS
    out.put_u32(m.meter_id);
    for band in &m.bands {
        out.put_u16(OFPMBT_DROP);
        out.put_u16(16);
        out.put_u32(band.rate_kbps);
        out.put_u32(band.burst_size_kb);
        out.put_bytes(0, 4); // pad
    }
}

fn decode_meter_mod(body: &[u8]) -> Result<OfpMessage, OfpError> {
    require(body.len() >= 8, 8, body.len())?;
    let mut b = body;
    let command = match b.get_u16() {
        0 => MeterModCommand::Add,
        1 => MeterModCommand::Modify,
        _ => MeterModCommand::Delete,
    };
    let _flags = b.get_u16();
    let meter_id = b.get_u32();
    let mut bands = Vec::new();
    while b.remaining() >= 16 {
        let _band_type = b.get_u16();
        let _len = b.get_u16();
        let rate_kbps = b.get_u32();
        let burst_size_kb = b.get_u32();
        b.advance(4);
        bands.push(MeterBand {
            rate_kbps,
            burst_size_kb,
        });
    }
    Ok(OfpMessage::MeterMod(MeterMod {
        command,
        meter_id,
        bands,
    }))
}

fn encode_group_mod(m: &GroupMod, out: &mut BytesMut) {
    out.put_u16(m.command);
    out.put_u8(m.group_type);
    out.put_u8(0); // pad
    out.put_u32(m.group_id);
    for bucket in &m.buckets {
        let actions_len = action::actions_encoded_len(bucket);
        let bucket_len = 16 + actions_len;
        out.put_u16(bucket_len as u16);
        out.put_u16(0xffff); // weight, unused outside OFPGT_SELECT
        out.put_u32(0xffff_ffff); // watch_port
        out.put_u32(0xffff_ffff); // watch_group
        out.put_bytes(0, 4); // pad
        out.extend_from_slice(&action::encode_actions(bucket));
    }
}

fn decode_group_mod(body: &[u8]) -> Result<OfpMessage, OfpError> {
    require(body.len() >= 8, 8, body.len())?;
    let mut b = body;
    let command = b.get_u16();
    let group_type = b.get_u8();
    b.advance(1);
    let group_id = b.get_u32();
    let mut buckets = Vec::new();
    while b.remaining() >= 16 {
        let bucket_len = b.get_u16() as usize;
        let _weight = b.get_u16();
        let _watch_port = b.get_u32();
        let _watch_group = b.get_u32();
        b.advance(4);
        let actions_len = bucket_len.saturating_sub(16);
        let actions_bytes = &b.chunk()[..actions_len.min(b.remaining())];
        buckets.push(action::decode_actions(actions_bytes));
        b.advance(actions_len.min(b.remaining()));
    }
    Ok(OfpMessage::GroupMod(GroupMod {
        command,
        group_type,
        group_id,
        buckets,
    }))
}

fn decode_packet_in(body: &[u8]) -> Result<OfpMessage, OfpError> {
    require(body.len() >= 16, 16, body.len())?;
    let mut b = body;
    let buffer_id = b.get_u32();
    let total_len = b.get_u16();
    let reason = b.get_u8();
    let table_id = b.get_u8();
    let cookie = b.get_u64();

    let remaining = b.remaining();
    let match_bytes = &body[body.len() - remaining..];
    let (oxm_match, match_len) = OxmMatch::decode(match_bytes)?;
    b.advance(match_len);
    require(b.remaining() >= 2, 2, b.remaining())?;
    b.advance(2); // pad
    let data = b.to_vec();

    Ok(OfpMessage::PacketIn(PacketIn {
        buffer_id,
        total_len,
        reason,
        table_id,
        cookie,
        oxm_match,
        data,
    }))
}

fn decode_packet_out(body: &[u8]) -> Result<OfpMessage, OfpError> {
    require(body.len() >= 16, 16, body.len())?;
    let mut b = body;
    let buffer_id = b.get_u32();
    let in_port = b.get_u32();
    let actions_len = b.get_u16() as usize;
    b.advance(6); // pad
    require(b.remaining() >= actions_len, actions_len, b.remaining())?;
    let actions_bytes = &b.chunk()[..actions_len];
    let actions = action::decode_actions(actions_bytes);
    b.advance(actions_len);
    let data = b.to_vec();
    Ok(OfpMessage::PacketOut(PacketOut {
        buffer_id,
        in_port,
        actions,
        data,
    }))
}

fn decode_multipart_request(body: &[u8]) -> Result<OfpMessage, OfpError> {
    require(body.len() >= 8, 8, body.len())?;
    let mut b = body;
    let mp_type = b.get_u16();
    let _flags = b.get_u16();
    b.advance(4);
    match mp_type {
        OFPMP_PORT_STATS => {
            require(b.remaining() >= 4, 4, b.remaining())?;
            let port_no = b.get_u32();
            Ok(OfpMessage::PortStatsRequest { port_no })
        }
        OFPMP_QUEUE => {
            require(b.remaining() >= 8, 8, b.remaining())?;
            let port_no = b.get_u32();
            let queue_id = b.get_u32();
            Ok(OfpMessage::QueueStatsRequest { port_no, queue_id })
        }
        other => Err(OfpError::UnknownType(other as u8)),
    }
}

fn decode_multipart_reply(body: &[u8]) -> Result<OfpMessage, OfpError> {
    require(body.len() >= 8, 8, body.len())?;
    let mut b = body;
    let mp_type = b.get_u16();
    let _flags = b.get_u16();
    b.advance(4);
    match mp_type {
        OFPMP_PORT_STATS => {
            let mut stats = Vec::new();
            while b.remaining() >= 112 {
                let port_no = b.get_u32();
                b.advance(4);
                let rx_packets = b.get_u64();
                let tx_packets = b.get_u64();
                let rx_bytes = b.get_u64();
                let tx_bytes = b.get_u64();
                let rx_dropped = b.get_u64();
                let tx_dropped = b.get_u64();
                b.advance(8 * 6); // errors/collisions fields we don't track
                let duration_sec = b.get_u32();
                b.advance(4);
                stats.push(PortStats {
                    port_no,
                    rx_packets,
                    tx_packets,
                    rx_bytes,
                    tx_bytes,
                    rx_dropped,
                    tx_dropped,
                    duration_sec,
                });
            }
            Ok(OfpMessage::PortStatsReply(stats))
        }
        OFPMP_QUEUE => {
            let mut stats = Vec::new();
            while b.remaining() >= 32 {
                let port_no = b.get_u32();
                let queue_id = b.get_u32();
                let tx_bytes = b.get_u64();
                let tx_packets = b.get_u64();
                let tx_errors = b.get_u64();
                b.advance(8); // duration
                stats.push(QueueStats {
                    port_no,
                    queue_id,
                    tx_bytes,
                    tx_packets,
                    tx_errors,
                });
            }
            Ok(OfpMessage::QueueStatsReply(stats))
        }
        other => Err(OfpError::UnknownType(other as u8)),
    }
}

fn decode_port_status(body: &[u8]) -> Result<OfpMessage, OfpError> {
    require(body.len() >= 64, 64, body.len())?;
    let mut b = body;
    let reason = b.get_u8();
    b.advance(7);
    let port_no = b.get_u32();
    b.advance(4);
    b.advance(6); // hw_addr
    b.advance(2);
    b.advance(16); // name
    let state = b.get_u32();
    Ok(OfpMessage::PortStatus(PortStatus {
        reason,
        port_no,
        link_down: state & 1 == 1,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ofp::oxm::MatchField;

    #[test]
    fn flow_mod_round_trips_through_encode_decode() {
        let original = FlowMod::add(
            0,
            100,
            OxmMatch::new(vec![MatchField::EthType(0x0800), MatchField::TcpDst(5003)]),
            vec![Action::SetQueue(2), Action::output(3)],
        );
        let msg = OfpMessage::FlowMod(original.clone());
        let encoded = msg.encode(42);
        let header = OfpHeader::decode(&encoded).unwrap();
        assert_eq!(header.length as usize, encoded.len());
        let decoded = OfpMessage::decode(&header, &encoded[OFP_HEADER_LEN..]).unwrap();
        match decoded {
            OfpMessage::FlowMod(m) => {
                assert_eq!(m.priority, original.priority);
                assert_eq!(m.apply_actions, original.apply_actions);
                assert_eq!(m.oxm_match, original.oxm_match);
            }
            _ => panic!("expected FlowMod"),
        }
    }

    #[test]
    fn packet_in_round_trips_with_payload() {
        let pi = PacketIn {
            buffer_id: u32::MAX,
            total_len: 64,
            reason: 0,
            table_id: 0,
            cookie: 0,
            oxm_match: OxmMatch::new(vec![MatchField::InPort(1)]),
            data: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let msg = OfpMessage::PacketIn(pi.clone());
        let encoded = msg.encode(7);
        let header = OfpHeader::decode(&encoded).unwrap();
        let decoded = OfpMessage::decode(&header, &encoded[OFP_HEADER_LEN..]).unwrap();
        match decoded {
            OfpMessage::PacketIn(p) => {
                assert_eq!(p.data, pi.data);
                assert_eq!(p.oxm_match.get_in_port(), Some(1));
            }
            _ => panic!("expected PacketIn"),
        }
    }

    #[test]
    fn port_stats_reply_round_trips() {
        let stats = vec![PortStats {
            port_no: 3,
            rx_packets: 10,
            tx_packets: 20,
            rx_bytes: 1000,
            tx_bytes: 2000,
            rx_dropped: 1,
            tx_dropped: 0,
            duration_sec: 60,
        }];
        let msg = OfpMessage::PortStatsReply(stats.clone());
        let encoded = msg.encode(1);
        let header = OfpHeader::decode(&encoded).unwrap();
        let decoded = OfpMessage::decode(&header, &encoded[OFP_HEADER_LEN..]).unwrap();
        match decoded {
            OfpMessage::PortStatsReply(got) => assert_eq!(got, stats),
            _ => panic!("expected PortStatsReply"),
        }
    }
}
