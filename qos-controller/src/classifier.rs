//! Packet Classifier & Router: turns a `PacketIn` into an ARP reply, a flooded frame, or a
//! routed/QoS-classified `FlowMod` + `PacketOut` pair. LLDP is dropped outright; ARP is
//! proxied for the gateway IPs and otherwise flooded; IPv4 is routed by 3-octet subnet
//! prefix, falling back to L2 learning and then to flooding when the static table misses.

use std::sync::Arc;

use qos_proto::ofp::action::{Action, OFPP_FLOOD};
use qos_proto::ofp::message::PacketIn;
use qos_proto::ofp::packet::{
    ArpPacket, EthernetHeader, Ipv4Header, ARP_OP_REQUEST, ETH_TYPE_ARP, ETH_TYPE_IPV4, IP_PROTO_TCP, IP_PROTO_UDP,
};
use qos_proto::ofp::{MatchField, OxmMatch};
use qos_proto::policy::{ActRequest, ActionCandidate};
use tracing::{debug, warn};

use crate::installer;
use crate::policy_client;
use crate::routing::ElasticCandidate;
use crate::session::Session;
use crate::state::SharedState;

const ETH_TYPE_LLDP: u16 = 0x88cc;

const PRIORITY_CLASS_PRIORITY: u16 = 200;
const ELASTIC_CLASS_PRIORITY: u16 = 20;
const DEFAULT_FORWARD_PRIORITY: u16 = 10;

/// Sentinel rate used by the reference topology's backup candidate to mean "no meter".
const NO_METER_RATE: u32 = 65535;

pub async fn handle_packet_in(state: Arc<SharedState>, session: Arc<Session>, packet_in: PacketIn) {
    let dpid = session.dpid;
    let in_port = packet_in.oxm_match.get_in_port().unwrap_or(0);

    let (eth, payload) = match EthernetHeader::parse(&packet_in.data) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(dpid, error = %e, "dropping packet-in with unparseable ethernet header");
            return;
        }
    };

    if eth.eth_type == ETH_TYPE_LLDP {
        return;
    }

    state.learn_mac(dpid, eth.src, in_port);

    match eth.eth_type {
        ETH_TYPE_ARP => handle_arp(&state, &session, &packet_in, eth, payload, in_port).await,
        ETH_TYPE_IPV4 => handle_ipv4(&state, &session, &packet_in, eth, payload, in_port).await,
        _ => flood(&session, &packet_in, in_port).await,
    }
}

async fn handle_arp(
    state: &Arc<SharedState>,
    session: &Arc<Session>,
    packet_in: &PacketIn,
    eth: EthernetHeader,
    payload: &[u8],
    in_port: u32,
) {
    let arp = match ArpPacket::parse(payload) {
        Ok(arp) => arp,
        Err(e) => {
            debug!(dpid = session.dpid, error = %e, "dropping unparseable arp packet");
            return;
        }
    };

    if arp.operation == ARP_OP_REQUEST && state.routing.is_gateway(arp.target_ip) {
        let reply = build_arp_reply(state.routing.gateway_mac, eth.src, arp);
        let out = qos_proto::ofp::message::PacketOut {
            buffer_id: u32::MAX,
            in_port,
            actions: vec![Action::output(in_port)],
            data: reply,
        };
        if let Err(e) = session
            .send(&qos_proto::ofp::message::OfpMessage::PacketOut(out))
            .await
        {
            warn!(dpid = session.dpid, error = %e, "failed to send arp reply");
        }
        return;
    }

    flood(session, packet_in, in_port).await;
}

fn build_arp_reply(gateway_mac: [u8; 6], requester_mac: [u8; 6], arp: ArpPacket) -> Vec<u8> {
    let mut frame = Vec::with_capacity(42);
    frame.extend_from_slice(&requester_mac);
    frame.extend_from_slice(&gateway_mac);
    frame.extend_from_slice(&ETH_TYPE_ARP.to_be_bytes());
    frame.extend_from_slice(&1u16.to_be_bytes()); // htype: ethernet
    frame.extend_from_slice(&ETH_TYPE_IPV4.to_be_bytes()); // ptype
    frame.push(6); // hlen
    frame.push(4); // plen
    frame.extend_from_slice(&qos_proto::ofp::packet::ARP_OP_REPLY.to_be_bytes());
    frame.extend_from_slice(&gateway_mac);
    frame.extend_from_slice(&arp.target_ip.to_be_bytes());
    frame.extend_from_slice(&arp.sender_mac);
    frame.extend_from_slice(&arp.sender_ip.to_be_bytes());
    frame
}

async fn handle_ipv4(
    state: &Arc<SharedState>,
    session: &Arc<Session>,
    packet_in: &PacketIn,
    eth: EthernetHeader,
    payload: &[u8],
    in_port: u32,
) {
    let (ip, transport) = match Ipv4Header::parse(payload) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(dpid = session.dpid, error = %e, "dropping unparseable ipv4 packet");
            return;
        }
    };

    let prefix = subnet_prefix(ip.dst);
    let dpid = session.dpid;

    let out_port = match state.routing.lookup_route(dpid, &prefix) {
        Some(port) => port,
        None => match state.lookup_mac(dpid, eth.dst) {
            Some(port) => port,
            None => {
                flood(session, packet_in, in_port).await;
                return;
            }
        },
    };

    let dst_mac = state.routing.arp_mac(ip.dst).unwrap_or(state.routing.cloud_mac);
    let gateway_mac = state.routing.gateway_mac;

    let dst_port = match (ip.proto, parse_dst_port_opt(ip.proto, transport)) {
        (IP_PROTO_UDP, Some(p)) if p == state.config.classifier.crit_udp || p == state.config.classifier.tel_udp => {
            install_priority_class(state, session, &ip, p, gateway_mac, dst_mac, out_port).await;
            emit_packet_out(session, packet_in, gateway_mac, dst_mac, out_port, in_port).await;
            return;
        }
        (IP_PROTO_TCP, Some(p)) if p == state.config.classifier.bulk_tcp => Some(p),
        _ => None,
    };

    if dst_port.is_some() {
        install_elastic_class(state, session, dpid, &prefix, &ip, dst_port.unwrap(), gateway_mac, dst_mac, out_port, in_port, packet_in)
            .await;
        return;
    }

    install_default_forward(state, session, &ip, gateway_mac, dst_mac, out_port).await;
    emit_packet_out(session, packet_in, gateway_mac, dst_mac, out_port, in_port).await;
}

fn parse_dst_port_opt(proto: u8, transport: &[u8]) -> Option<u16> {
    qos_proto::ofp::packet::parse_dst_port(proto, transport).ok()
}

fn subnet_prefix(addr: u32) -> String {
    let o = addr.to_be_bytes();
    format!("{}.{}.{}", o[0], o[1], o[2])
}

fn mac_rewrite(gateway_mac: [u8; 6], dst_mac: [u8; 6], out_port: u32, extra: Vec<Action>) -> Vec<Action> {
    let mut actions = vec![
        Action::SetField(MatchField::EthSrc(gateway_mac)),
        Action::SetField(MatchField::EthDst(dst_mac)),
    ];
    actions.extend(extra);
    actions.push(Action::output(out_port));
    actions
}

async fn install_priority_class(
    state: &Arc<SharedState>,
    session: &Arc<Session>,
    ip: &Ipv4Header,
    udp_port: u16,
    gateway_mac: [u8; 6],
    dst_mac: [u8; 6],
    out_port: u32,
) {
    let oxm_match = OxmMatch::new(vec![
        MatchField::EthType(ETH_TYPE_IPV4),
        MatchField::IpProto(IP_PROTO_UDP),
        MatchField::Ipv4Dst(ip.dst),
        MatchField::UdpDst(udp_port),
    ]);
    let actions = mac_rewrite(gateway_mac, dst_mac, out_port, vec![Action::SetQueue(0)]);
    let (idle, hard) = (state.config.flow_idle_timeout, state.config.flow_hard_timeout);
    if let Err(e) = installer::add_flow(session, 0, PRIORITY_CLASS_PRIORITY, idle, hard, oxm_match, actions).await {
        warn!(dpid = session.dpid, error = %e, "failed to install priority-class flow");
    }
}

#[allow(clippy::too_many_arguments)]
async fn install_elastic_class(
    state: &Arc<SharedState>,
    session: &Arc<Session>,
    dpid: u64,
    prefix: &str,
    ip: &Ipv4Header,
    tcp_port: u16,
    gateway_mac: [u8; 6],
    dst_mac: [u8; 6],
    static_out_port: u32,
    in_port: u32,
    packet_in: &PacketIn,
) {
    let candidates = state.routing.lookup_elastic(dpid, prefix);

    let decision = match candidates {
        Some(candidates) if !candidates.is_empty() => {
            let req = ActRequest {
                dpid,
                dst_prefix: prefix.to_string(),
                candidates: candidates.iter().map(to_action_candidate).collect(),
            };
            match policy_client::act(&state.http, &state.config.agent_url, &req).await {
                Ok(resp) => Some((resp.out_port, resp.queue_id, resp.meter_rate_kbps)),
                Err(e) => {
                    debug!(dpid, error = %e, "policy act call failed, falling back to static routing");
                    None
                }
            }
        }
        _ => None,
    };

    let (out_port, queue_id, meter_rate_kbps) = decision.unwrap_or((static_out_port, 0, NO_METER_RATE));

    let oxm_match = OxmMatch::new(vec![
        MatchField::EthType(ETH_TYPE_IPV4),
        MatchField::IpProto(IP_PROTO_TCP),
        MatchField::Ipv4Dst(ip.dst),
        MatchField::TcpDst(tcp_port),
    ]);
    let actions = mac_rewrite(gateway_mac, dst_mac, out_port, vec![Action::SetQueue(queue_id)]);
    let (idle, hard) = (state.config.flow_idle_timeout, state.config.flow_hard_timeout);

    let install_result = if meter_rate_kbps < NO_METER_RATE {
        match state.meters.ensure_meter(session, dpid, meter_rate_kbps).await {
            Ok(meter_id) => {
                installer::add_flow_with_meter(session, 0, ELASTIC_CLASS_PRIORITY, idle, hard, oxm_match, actions, meter_id)
                    .await
            }
            Err(e) => Err(e),
        }
    } else {
        installer::add_flow(session, 0, ELASTIC_CLASS_PRIORITY, idle, hard, oxm_match, actions).await
    };
    if let Err(e) = install_result {
        warn!(dpid, error = %e, "failed to install elastic-class flow");
    }

    emit_packet_out(session, packet_in, gateway_mac, dst_mac, out_port, in_port).await;
}

fn to_action_candidate(c: &ElasticCandidate) -> ActionCandidate {
    ActionCandidate {
        action_idx: c.action_idx,
        out_port: c.out_port,
        queue_id: c.queue_id,
        meter_rate_kbps: c.meter_rate_kbps,
    }
}

async fn install_default_forward(
    state: &Arc<SharedState>,
    session: &Arc<Session>,
    ip: &Ipv4Header,
    gateway_mac: [u8; 6],
    dst_mac: [u8; 6],
    out_port: u32,
) {
    let oxm_match = OxmMatch::new(vec![MatchField::EthType(ETH_TYPE_IPV4), MatchField::Ipv4Dst(ip.dst)]);
    let actions = mac_rewrite(gateway_mac, dst_mac, out_port, Vec::new());
    let (idle, hard) = (state.config.flow_idle_timeout, state.config.flow_hard_timeout);
    if let Err(e) = installer::add_flow(session, 0, DEFAULT_FORWARD_PRIORITY, idle, hard, oxm_match, actions).await {
        warn!(dpid = session.dpid, error = %e, "failed to install default-forwarding flow");
    }
}

async fn emit_packet_out(
    session: &Arc<Session>,
    packet_in: &PacketIn,
    gateway_mac: [u8; 6],
    dst_mac: [u8; 6],
    out_port: u32,
    in_port: u32,
) {
    let actions = mac_rewrite(gateway_mac, dst_mac, out_port, Vec::new());
    let out = qos_proto::ofp::message::PacketOut {
        buffer_id: packet_in.buffer_id,
        in_port,
        actions,
        data: if packet_in.buffer_id == u32::MAX {
            packet_in.data.clone()
        } else {
            Vec::new()
        },
    };
    if let Err(e) = session
        .send(&qos_proto::ofp::message::OfpMessage::PacketOut(out))
        .await
    {
        warn!(dpid = session.dpid, error = %e, "failed to send packet-out");
    }
}

async fn flood(session: &Arc<Session>, packet_in: &PacketIn, in_port: u32) {
    let out = qos_proto::ofp::message::PacketOut {
        buffer_id: packet_in.buffer_id,
        in_port,
        actions: vec![Action::output(OFPP_FLOOD)],
        data: if packet_in.buffer_id == u32::MAX {
            packet_in.data.clone()
        } else {
            Vec::new()
        },
    };
    if let Err(e) = session
        .send(&qos_proto::ofp::message::OfpMessage::PacketOut(out))
        .await
    {
        warn!(dpid = session.dpid, error = %e, "failed to flood packet-out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_prefix_keeps_first_three_octets() {
        let addr = u32::from_be_bytes([10, 0, 100, 2]);
        assert_eq!(subnet_prefix(addr), "10.0.100");
    }

    #[test]
    fn mac_rewrite_ends_with_output_action() {
        let actions = mac_rewrite([1; 6], [2; 6], 3, vec![Action::SetQueue(1)]);
        assert_eq!(actions.last(), Some(&Action::output(3)));
        assert_eq!(actions.len(), 4);
    }
}
