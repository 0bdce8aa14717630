//! Telemetry Store: the latest port/queue counter sample per `(dpid, port, qid?)`,
//! sharded by `dpid` so unrelated switches never contend on the same lock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

/// `qid = None` is the port-level aggregate; `Some(n)` is a specific queue on that port.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SampleKey {
    pub port: u32,
    pub qid: Option<u32>,
}

#[derive(Clone, Copy, Debug)]
pub struct Sample {
    pub load_bps: f64,
    pub drops: u64,
    recorded_at: Instant,
}

impl Sample {
    fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.recorded_at) > ttl
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ObservationSample {
    pub port: u32,
    pub qid: Option<u32>,
    pub load_bps: f64,
    pub drops: u64,
    pub age: Duration,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Aggregate {
    pub max_load_bps: f64,
    pub total_drops: u64,
}

type DpidShard = Mutex<HashMap<SampleKey, Sample>>;

/// Absorbs counter samples from the controller's polling loop and serves queries for the
/// policy engine and the admin snapshot endpoint. All operations are linearisable: each
/// per-dpid shard is guarded by its own lock, so writers to one switch never block
/// readers of another.
#[derive(Default)]
pub struct TelemetryStore {
    shards: RwLock<HashMap<u64, DpidShard>>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        TelemetryStore::default()
    }

    fn with_shard<R>(&self, dpid: u64, f: impl FnOnce(&mut HashMap<SampleKey, Sample>) -> R) -> R {
        {
            let shards = self.shards.read();
            if let Some(shard) = shards.get(&dpid) {
                return f(&mut shard.lock());
            }
        }
        let mut shards = self.shards.write();
        let shard = shards.entry(dpid).or_insert_with(|| Mutex::new(HashMap::new()));
        f(&mut shard.lock())
    }

    /// Overwrites the sample for `(dpid, port, qid)`, timestamped from a monotonic clock
    /// so TTL checks are immune to wall-clock adjustment.
    pub fn update(&self, dpid: u64, port: u32, qid: Option<u32>, load_bps: f64, drops: u64) {
        let key = SampleKey { port, qid };
        self.with_shard(dpid, |shard| {
            shard.insert(
                key,
                Sample {
                    load_bps,
                    drops,
                    recorded_at: Instant::now(),
                },
            );
        });
    }

    /// All non-stale samples for `dpid`, optionally restricted to `port_filter`.
    pub fn snapshot(
        &self,
        dpid: u64,
        ttl: Duration,
        port_filter: Option<&[u32]>,
    ) -> Vec<ObservationSample> {
        let now = Instant::now();
        self.with_shard(dpid, |shard| {
            shard
                .iter()
                .filter(|(key, sample)| {
                    !sample.is_stale(now, ttl)
                        && port_filter.map_or(true, |ports| ports.contains(&key.port))
                })
                .map(|(key, sample)| ObservationSample {
                    port: key.port,
                    qid: key.qid,
                    load_bps: sample.load_bps,
                    drops: sample.drops,
                    age: now.saturating_duration_since(sample.recorded_at),
                })
                .collect()
        })
    }

    /// All non-stale samples across every dpid, keyed by dpid, for the admin `/snapshot`
    /// endpoint. Held shard-at-a-time so no single lock spans the whole store.
    pub fn snapshot_all(&self, ttl: Duration) -> Vec<(u64, Vec<ObservationSample>)> {
        let dpids: Vec<u64> = self.shards.read().keys().copied().collect();
        dpids
            .into_iter()
            .map(|dpid| (dpid, self.snapshot(dpid, ttl, None)))
            .collect()
    }

    /// Aggregate max load and summed drops across the port-level aggregate and any
    /// queue-level samples for `(dpid, port)`. Ignores staleness deliberately: callers
    /// that need freshness should consult `snapshot` first.
    pub fn query_port(&self, dpid: u64, port: u32) -> Aggregate {
        self.with_shard(dpid, |shard| {
            shard
                .iter()
                .filter(|(key, _)| key.port == port)
                .fold(Aggregate::default(), |acc, (_, sample)| Aggregate {
                    max_load_bps: acc.max_load_bps.max(sample.load_bps),
                    total_drops: acc.total_drops + sample.drops,
                })
        })
    }

    /// The sample for exactly `(dpid, port, qid)`, if present.
    pub fn query_queue(&self, dpid: u64, port: u32, qid: u32) -> Option<Aggregate> {
        let key = SampleKey {
            port,
            qid: Some(qid),
        };
        self.with_shard(dpid, |shard| {
            shard.get(&key).map(|sample| Aggregate {
                max_load_bps: sample.load_bps,
                total_drops: sample.drops,
            })
        })
    }

    /// Aggregate across the union of `ports` for `dpid`, used by the policy engine to
    /// compute the state for an `act` call spanning several candidate egress ports.
    pub fn query_ports(&self, dpid: u64, ports: &[u32]) -> Aggregate {
        ports
            .iter()
            .fold(Aggregate::default(), |acc, &port| {
                let a = self.query_port(dpid, port);
                Aggregate {
                    max_load_bps: acc.max_load_bps.max(a.max_load_bps),
                    total_drops: acc.total_drops + a.total_drops,
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn stale_samples_are_invisible_to_snapshot() {
        let store = TelemetryStore::new();
        store.update(256, 1, None, 10_000.0, 0);
        assert_eq!(store.snapshot(256, Duration::from_secs(10), None).len(), 1);

        sleep(Duration::from_millis(20));
        assert_eq!(store.snapshot(256, Duration::from_millis(5), None).len(), 0);
    }

    #[test]
    fn port_and_queue_samples_coexist_and_aggregate() {
        let store = TelemetryStore::new();
        store.update(256, 1, None, 5_000.0, 2);
        store.update(256, 1, Some(0), 3_000.0, 1);
        store.update(256, 1, Some(1), 9_000.0, 0);

        let agg = store.query_port(256, 1);
        assert_eq!(agg.max_load_bps, 9_000.0);
        assert_eq!(agg.total_drops, 3);

        let q0 = store.query_queue(256, 1, 0).unwrap();
        assert_eq!(q0.max_load_bps, 3_000.0);
        assert_eq!(q0.total_drops, 1);
    }

    #[test]
    fn unrelated_dpids_do_not_share_state() {
        let store = TelemetryStore::new();
        store.update(1, 1, None, 1.0, 0);
        store.update(2, 1, None, 2.0, 0);
        assert_eq!(store.query_port(1, 1).max_load_bps, 1.0);
        assert_eq!(store.query_port(2, 1).max_load_bps, 2.0);
    }

    #[test]
    fn port_filter_restricts_snapshot() {
        let store = TelemetryStore::new();
        store.update(256, 1, None, 1.0, 0);
        store.update(256, 2, None, 2.0, 0);
        let filtered = store.snapshot(256, Duration::from_secs(10), Some(&[2]));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].port, 2);
    }
}
