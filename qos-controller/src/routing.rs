//! Static routing, ARP and elastic-class candidate tables: an explicit configuration blob
//! loaded once at startup rather than scattered across the classifier, because the test
//! topologies this controller targets rely on specific MACs and port assignments.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;

/// One egress option the classifier offers the Policy Service for an elastic-class flow.
#[derive(Clone, Copy, Debug)]
pub struct ElasticCandidate {
    pub action_idx: u32,
    pub out_port: u32,
    pub queue_id: u32,
    pub meter_rate_kbps: u32,
}

#[derive(Clone, Debug)]
pub struct RoutingConfig {
    pub gateway_mac: [u8; 6],
    pub cloud_mac: [u8; 6],
    gateway_ips: Vec<u32>,
    static_arp: HashMap<u32, [u8; 6]>,
    routes: HashMap<u64, HashMap<String, u32>>,
    elastic: HashMap<u64, HashMap<String, Vec<ElasticCandidate>>>,
}

impl RoutingConfig {
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_file(Path::new(p)),
            None => Ok(Self::default_topology()),
        }
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading routing config {}", path.display()))?;
        let raw: RawConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text)
                .with_context(|| format!("parsing {} as JSON", path.display()))?,
            _ => toml::from_str(&text)
                .with_context(|| format!("parsing {} as TOML", path.display()))?,
        };
        raw.into_routing_config()
    }

    /// Matches the reference topology used throughout this system's worked examples: a core
    /// switch (dpid 256) bridging two single-homed IoT subnets onto a dual-homed cloud host.
    pub fn default_topology() -> Self {
        let mut routes = HashMap::new();
        let mut core_routes = HashMap::new();
        core_routes.insert("10.0.100".to_string(), 1u32);
        core_routes.insert("10.0.200".to_string(), 2u32);
        core_routes.insert("default".to_string(), 3u32);
        routes.insert(256u64, core_routes);

        // Loop-prevention (§4.G): each cloud subnet's egress is fixed to its own port
        // (main for 10.0.100, backup for 10.0.200) regardless of policy output, so
        // neither subnet's candidate list ever offers the other subnet's port. Every
        // candidate here shares the subnet's one fixed `out_port`; the policy only
        // chooses among queue/meter options for that port.
        let mut elastic = HashMap::new();
        let mut core_elastic = HashMap::new();
        core_elastic.insert(
            "10.0.100".to_string(),
            vec![
                ElasticCandidate {
                    action_idx: 0,
                    out_port: 1,
                    queue_id: 1,
                    meter_rate_kbps: 800,
                },
                ElasticCandidate {
                    action_idx: 1,
                    out_port: 1,
                    queue_id: 1,
                    meter_rate_kbps: 1200,
                },
            ],
        );
        core_elastic.insert(
            "10.0.200".to_string(),
            vec![
                ElasticCandidate {
                    action_idx: 0,
                    out_port: 2,
                    queue_id: 1,
                    meter_rate_kbps: 800,
                },
                ElasticCandidate {
                    action_idx: 1,
                    out_port: 2,
                    queue_id: 1,
                    meter_rate_kbps: 1200,
                },
            ],
        );
        elastic.insert(256u64, core_elastic);

        let mut static_arp = HashMap::new();
        static_arp.insert(ip("10.0.100.2"), mac("02:00:00:00:01:02"));
        static_arp.insert(ip("10.0.200.2"), mac("02:00:00:00:02:02"));

        RoutingConfig {
            gateway_mac: mac("02:00:00:00:00:01"),
            cloud_mac: mac("02:00:00:00:ff:ff"),
            gateway_ips: vec![ip("10.0.100.1"), ip("10.0.200.1")],
            static_arp,
            routes,
            elastic,
        }
    }

    pub fn lookup_route(&self, dpid: u64, subnet_prefix: &str) -> Option<u32> {
        let table = self.routes.get(&dpid)?;
        table
            .get(subnet_prefix)
            .or_else(|| table.get("default"))
            .copied()
    }

    pub fn lookup_elastic(&self, dpid: u64, subnet_prefix: &str) -> Option<&[ElasticCandidate]> {
        self.elastic
            .get(&dpid)?
            .get(subnet_prefix)
            .map(|v| v.as_slice())
    }

    pub fn is_gateway(&self, ip_addr: u32) -> bool {
        self.gateway_ips.contains(&ip_addr)
    }

    pub fn arp_mac(&self, ip_addr: u32) -> Option<[u8; 6]> {
        self.static_arp.get(&ip_addr).copied()
    }

    pub fn entries(&self) -> Vec<(u64, String, u32)> {
        let mut out = Vec::new();
        for (dpid, table) in &self.routes {
            for (prefix, port) in table {
                out.push((*dpid, prefix.clone(), *port));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        out
    }
}

fn ip(s: &str) -> u32 {
    u32::from_be_bytes(Ipv4Addr::from_str(s).expect("valid default-topology IP literal").octets())
}

fn mac(s: &str) -> [u8; 6] {
    parse_mac(s).expect("valid default-topology MAC literal")
}

fn parse_mac(s: &str) -> Result<[u8; 6]> {
    let mut out = [0u8; 6];
    let parts: Vec<&str> = s.split(':').collect();
    anyhow::ensure!(parts.len() == 6, "malformed MAC address {s}");
    for (i, part) in parts.iter().enumerate() {
        out[i] = u8::from_str_radix(part, 16).with_context(|| format!("malformed MAC address {s}"))?;
    }
    Ok(out)
}

fn parse_ip(s: &str) -> Result<u32> {
    let addr = Ipv4Addr::from_str(s).with_context(|| format!("malformed IPv4 address {s}"))?;
    Ok(u32::from_be_bytes(addr.octets()))
}

#[derive(Deserialize)]
struct RawElasticCandidate {
    action_idx: u32,
    out_port: u32,
    queue_id: u32,
    meter_rate_kbps: u32,
}

#[derive(Deserialize)]
struct RawConfig {
    gateway_mac: String,
    cloud_mac: String,
    #[serde(default)]
    gateways: Vec<String>,
    #[serde(default)]
    static_arp: HashMap<String, String>,
    #[serde(default)]
    routes: HashMap<String, HashMap<String, u32>>,
    #[serde(default)]
    elastic: HashMap<String, HashMap<String, Vec<RawElasticCandidate>>>,
}

impl RawConfig {
    fn into_routing_config(self) -> Result<RoutingConfig> {
        let gateway_mac = parse_mac(&self.gateway_mac)?;
        let cloud_mac = parse_mac(&self.cloud_mac)?;
        let gateway_ips = self
            .gateways
            .iter()
            .map(|s| parse_ip(s))
            .collect::<Result<Vec<_>>>()?;
        let mut static_arp = HashMap::new();
        for (ip_str, mac_str) in &self.static_arp {
            static_arp.insert(parse_ip(ip_str)?, parse_mac(mac_str)?);
        }
        let mut routes = HashMap::new();
        for (dpid_str, table) in self.routes {
            let dpid: u64 = dpid_str
                .parse()
                .with_context(|| format!("malformed dpid key {dpid_str}"))?;
            routes.insert(dpid, table);
        }
        let mut elastic = HashMap::new();
        for (dpid_str, table) in self.elastic {
            let dpid: u64 = dpid_str
                .parse()
                .with_context(|| format!("malformed dpid key {dpid_str}"))?;
            let table = table
                .into_iter()
                .map(|(prefix, candidates)| {
                    let candidates = candidates
                        .into_iter()
                        .map(|c| ElasticCandidate {
                            action_idx: c.action_idx,
                            out_port: c.out_port,
                            queue_id: c.queue_id,
                            meter_rate_kbps: c.meter_rate_kbps,
                        })
                        .collect();
                    (prefix, candidates)
                })
                .collect();
            elastic.insert(dpid, table);
        }
        Ok(RoutingConfig {
            gateway_mac,
            cloud_mac,
            gateway_ips,
            static_arp,
            routes,
            elastic,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topology_falls_back_to_default_entry() {
        let cfg = RoutingConfig::default_topology();
        assert_eq!(cfg.lookup_route(256, "10.0.100"), Some(1));
        assert_eq!(cfg.lookup_route(256, "192.168.1"), Some(3));
        assert_eq!(cfg.lookup_route(999, "10.0.100"), None);
    }

    #[test]
    fn elastic_candidates_for_each_cloud_subnet_are_pinned_to_its_own_fixed_port() {
        let cfg = RoutingConfig::default_topology();

        let cands_100 = cfg.lookup_elastic(256, "10.0.100").unwrap();
        let ports_100: Vec<u32> = cands_100.iter().map(|c| c.out_port).collect();
        assert!(ports_100.iter().all(|p| *p == 1));

        let cands_200 = cfg.lookup_elastic(256, "10.0.200").unwrap();
        let ports_200: Vec<u32> = cands_200.iter().map(|c| c.out_port).collect();
        assert!(ports_200.iter().all(|p| *p == 2));

        // No port is ever offered to both subnets, so the policy can never be handed a
        // candidate that would send both sides of the dual-homed cloud host out the
        // same egress.
        assert!(ports_100.iter().all(|p| !ports_200.contains(p)));
    }

    #[test]
    fn mac_parsing_rejects_malformed_input() {
        assert!(parse_mac("not-a-mac").is_err());
        assert_eq!(parse_mac("02:00:00:00:00:01").unwrap(), [2, 0, 0, 0, 0, 1]);
    }
}
