//! Flow/Meter Installer: idempotent helpers that compose `FlowMod`/`MeterMod`/`GroupMod`
//! messages and hand them to a session's writer queue. Meter (and group) identifier
//! allocation is centralised here so that `(dpid, rate)` never gets announced twice.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Result;
use parking_lot::Mutex;
use qos_proto::ofp::action::Action;
use qos_proto::ofp::message::{FlowMod, FlowModCommand, GroupMod, MeterBand, MeterMod, MeterModCommand};
use qos_proto::ofp::{OfpMessage, OxmMatch};
use tracing::debug;

use crate::session::Session;

/// First allocated meter (and group) id; lower values are reserved the way the reference
/// topology's own static configuration uses them.
const FIRST_METER_ID: u32 = 10;

#[derive(Default)]
pub struct MeterRegistry {
    next_id: AtomicU32,
    announced: Mutex<HashMap<(u64, u32), u32>>,
}

impl MeterRegistry {
    pub fn new() -> Self {
        MeterRegistry {
            next_id: AtomicU32::new(FIRST_METER_ID),
            announced: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the meter id for `(dpid, rate_kbps)`, announcing it to the switch with a
    /// single `OFPMBT_DROP` band if this is the first time this pair has been seen. The
    /// check-and-allocate step is one critical section so concurrent callers for the same
    /// pair never both believe they're the first announcer.
    pub async fn ensure_meter(&self, session: &Session, dpid: u64, rate_kbps: u32) -> Result<u32> {
        let key = (dpid, rate_kbps);
        let (id, first_announcement) = {
            let mut announced = self.announced.lock();
            match announced.get(&key) {
                Some(&id) => (id, false),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    announced.insert(key, id);
                    (id, true)
                }
            }
        };

        if first_announcement {
            let msg = OfpMessage::MeterMod(MeterMod {
                command: MeterModCommand::Add,
                meter_id: id,
                bands: vec![MeterBand {
                    rate_kbps,
                    burst_size_kb: rate_kbps / 10,
                }],
            });
            session.send(&msg).await?;
            debug!(dpid, rate_kbps, meter_id = id, "meter announced");
        }
        Ok(id)
    }
}

#[derive(Default)]
pub struct GroupRegistry {
    announced: Mutex<HashSet<(u64, u32)>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        GroupRegistry::default()
    }

    /// Sends a `GroupMod`, using `OFPGC_MODIFY` instead of `OFPGC_ADD` if this `(dpid,
    /// group_id)` has already been announced in this controller's lifetime.
    pub async fn add_group(
        &self,
        session: &Session,
        dpid: u64,
        group_id: u32,
        group_type: u8,
        buckets: Vec<Vec<Action>>,
    ) -> Result<()> {
        const OFPGC_ADD: u16 = 0;
        const OFPGC_MODIFY: u16 = 1;

        let key = (dpid, group_id);
        let mut announced = self.announced.lock();
        let command = if announced.contains(&key) {
            OFPGC_MODIFY
        } else {
            announced.insert(key);
            OFPGC_ADD
        };
        drop(announced);

        let msg = OfpMessage::GroupMod(GroupMod {
            command,
            group_type,
            group_id,
            buckets,
        });
        session.send(&msg).await
    }
}

/// Sends a plain `FlowMod` ADD with no meter instruction.
pub async fn add_flow(
    session: &Session,
    table_id: u8,
    priority: u16,
    idle_timeout: u16,
    hard_timeout: u16,
    oxm_match: OxmMatch,
    actions: Vec<Action>,
) -> Result<()> {
    let mut fm = FlowMod::add(table_id, priority, oxm_match, actions);
    fm.idle_timeout = idle_timeout;
    fm.hard_timeout = hard_timeout;
    session.send(&OfpMessage::FlowMod(fm)).await
}

/// Sends a `FlowMod` ADD whose instruction set applies the named meter ahead of the
/// apply-actions list, per OF1.3's required instruction ordering.
pub async fn add_flow_with_meter(
    session: &Session,
    table_id: u8,
    priority: u16,
    idle_timeout: u16,
    hard_timeout: u16,
    oxm_match: OxmMatch,
    actions: Vec<Action>,
    meter_id: u32,
) -> Result<()> {
    let mut fm = FlowMod::add(table_id, priority, oxm_match, actions);
    fm.idle_timeout = idle_timeout;
    fm.hard_timeout = hard_timeout;
    fm.meter_id = Some(meter_id);
    session.send(&OfpMessage::FlowMod(fm)).await
}

/// Deletes flows matching `oxm_match` at `priority`, used when rewriting the elastic-class
/// rules for a destination prefix rather than layering a new entry on top of the old one.
pub async fn delete_flow(
    session: &Session,
    table_id: u8,
    priority: u16,
    oxm_match: OxmMatch,
) -> Result<()> {
    let fm = FlowMod {
        cookie: 0,
        table_id,
        command: FlowModCommand::DeleteStrict,
        priority,
        idle_timeout: 0,
        hard_timeout: 0,
        buffer_id: u32::MAX,
        out_port: 0,
        out_group: 0,
        oxm_match,
        goto_table: None,
        meter_id: None,
        apply_actions: Vec::new(),
    };
    session.send(&OfpMessage::FlowMod(fm)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_ids_start_at_ten_and_increase() {
        let registry = MeterRegistry::new();
        assert_eq!(registry.next_id.load(Ordering::Relaxed), FIRST_METER_ID);
    }
}
