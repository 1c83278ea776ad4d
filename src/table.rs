use serde::Serialize;
use std::collections::BTreeMap;

use crate::address::NodeAddress;

// One entry per known participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MembershipRow {
    pub address: NodeAddress,
    pub heartbeat: u64,
    pub last_updated: u64,
}

impl MembershipRow {
    /// Ticks since the row was last refreshed. A clock running behind the
    /// row's timestamp counts as zero.
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_updated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// The local view of the cluster, owned by a single node.
///
/// Rows only move forward: a stored heartbeat is replaced exclusively by a
/// strictly greater one, so replaying old or duplicated snapshots is a no-op.
/// The table also carries the owner's heartbeat counter, which exists before
/// the owner's own row does (a joining node advertises it in its request).
#[derive(Debug, Clone)]
pub struct MembershipTable {
    owner: NodeAddress,
    local_heartbeat: u64,
    rows: BTreeMap<NodeAddress, MembershipRow>,
}

impl MembershipTable {
    pub fn new(owner: NodeAddress) -> Self {
        Self {
            owner,
            local_heartbeat: 0,
            rows: BTreeMap::new(),
        }
    }

    pub fn owner(&self) -> NodeAddress {
        self.owner
    }

    pub fn local_heartbeat(&self) -> u64 {
        self.local_heartbeat
    }

    pub fn insert_or_merge(&mut self, address: NodeAddress, heartbeat: u64, now: u64) -> MergeOutcome {
        match self.rows.get_mut(&address) {
            Some(row) if heartbeat > row.heartbeat => {
                row.heartbeat = heartbeat;
                row.last_updated = row.last_updated.max(now);
                MergeOutcome::Updated
            }
            Some(_) => MergeOutcome::Unchanged,
            None => {
                self.rows.insert(
                    address,
                    MembershipRow {
                        address,
                        heartbeat,
                        last_updated: now,
                    },
                );
                MergeOutcome::Inserted
            }
        }
    }

    /// Advance the owner's heartbeat, refreshing its row when present.
    pub fn self_increment(&mut self, now: u64) -> u64 {
        self.local_heartbeat += 1;
        let heartbeat = self.local_heartbeat;
        if let Some(row) = self.rows.get_mut(&self.owner) {
            row.heartbeat = heartbeat;
            row.last_updated = row.last_updated.max(now);
        }
        heartbeat
    }

    /// Insert the owner's row, or refresh it to the current local heartbeat.
    pub fn insert_owner(&mut self, now: u64) {
        let owner = self.owner;
        let heartbeat = self.local_heartbeat;
        let row = self.rows.entry(owner).or_insert(MembershipRow {
            address: owner,
            heartbeat,
            last_updated: now,
        });
        row.heartbeat = row.heartbeat.max(heartbeat);
        row.last_updated = row.last_updated.max(now);
    }

    pub fn get(&self, address: &NodeAddress) -> Option<&MembershipRow> {
        self.rows.get(address)
    }

    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.rows.contains_key(address)
    }

    pub fn remove(&mut self, address: &NodeAddress) -> Option<MembershipRow> {
        self.rows.remove(address)
    }

    // Copy of every current row, ordered by address
    pub fn snapshot(&self) -> Vec<MembershipRow> {
        self.rows.values().copied().collect()
    }

    /// Non-owner addresses whose rows are still within the suspicion timeout.
    pub fn alive_addresses(&self, now: u64, suspicion_timeout: u64) -> Vec<NodeAddress> {
        self.rows
            .values()
            .filter(|row| row.address != self.owner && row.age(now) <= suspicion_timeout)
            .map(|row| row.address)
            .collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = &MembershipRow> {
        self.rows.values()
    }

    pub fn addresses(&self) -> Vec<NodeAddress> {
        self.rows.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    // Forget every row and reset the local heartbeat
    pub fn clear(&mut self) {
        self.rows.clear();
        self.local_heartbeat = 0;
    }
}
