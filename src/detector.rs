//! Timeout based failure detection over the membership table.
//!
//! A row that has not been refreshed for more than `suspicion_timeout` ticks is
//! suspected: it stops being a gossip target but keeps being gossiped so the
//! rest of the cluster converges on the same view. Past `removal_timeout` ticks
//! the row is deleted. Deleted addresses are kept as tombstones for another
//! `removal_timeout` ticks, during which relayed gossip needs a strictly
//! fresher heartbeat to bring the address back.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::address::NodeAddress;
use crate::config::MembershipConfig;
use crate::table::{MembershipRow, MembershipTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RowStatus {
    Alive,
    Suspected,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tombstone {
    heartbeat: u64,
    removed_at: u64,
}

// Outcome of one sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DetectorReport {
    pub suspected: Vec<NodeAddress>,
    pub recovered: Vec<NodeAddress>,
    pub removed: Vec<MembershipRow>,
}

#[derive(Debug, Clone)]
pub struct FailureDetector {
    suspicion_timeout: u64,
    removal_timeout: u64,
    suspected: BTreeSet<NodeAddress>,
    tombstones: BTreeMap<NodeAddress, Tombstone>,
}

impl FailureDetector {
    pub fn new(suspicion_timeout: u64, removal_timeout: u64) -> Self {
        Self {
            suspicion_timeout,
            removal_timeout,
            suspected: BTreeSet::new(),
            tombstones: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &MembershipConfig) -> Self {
        Self::new(config.suspicion_timeout, config.removal_timeout)
    }

    pub fn suspicion_timeout(&self) -> u64 {
        self.suspicion_timeout
    }

    pub fn status(&self, row: &MembershipRow, now: u64) -> RowStatus {
        let age = row.age(now);
        if age > self.removal_timeout {
            RowStatus::Removed
        } else if age > self.suspicion_timeout {
            RowStatus::Suspected
        } else {
            RowStatus::Alive
        }
    }

    /// Classify every non-owner row, deleting the ones past the removal timeout.
    pub fn sweep(&mut self, table: &mut MembershipTable, now: u64) -> DetectorReport {
        let owner = table.owner();
        let mut report = DetectorReport::default();
        let mut still_suspected = BTreeSet::new();

        for row in table.snapshot() {
            if row.address == owner {
                continue;
            }
            match self.status(&row, now) {
                RowStatus::Removed => {
                    table.remove(&row.address);
                    self.tombstones.insert(
                        row.address,
                        Tombstone {
                            heartbeat: row.heartbeat,
                            removed_at: now,
                        },
                    );
                    report.removed.push(row);
                }
                RowStatus::Suspected => {
                    if !self.suspected.contains(&row.address) {
                        report.suspected.push(row.address);
                    }
                    still_suspected.insert(row.address);
                }
                RowStatus::Alive => {
                    if self.suspected.contains(&row.address) {
                        report.recovered.push(row.address);
                    }
                }
            }
        }

        self.suspected = still_suspected;

        // Expire tombstones
        let removal_timeout = self.removal_timeout;
        self.tombstones
            .retain(|_, tombstone| now.saturating_sub(tombstone.removed_at) <= removal_timeout);

        report
    }

    /// Whether gossip about `address` at `heartbeat` may enter the table.
    pub fn admits(&self, address: &NodeAddress, heartbeat: u64) -> bool {
        match self.tombstones.get(address) {
            Some(tombstone) => heartbeat > tombstone.heartbeat,
            None => true,
        }
    }

    pub fn is_tombstoned(&self, address: &NodeAddress) -> bool {
        self.tombstones.contains_key(address)
    }

    // An explicit join lifts the tombstone. Suspicion is left to the next sweep.
    pub fn lift_tombstone(&mut self, address: &NodeAddress) {
        self.tombstones.remove(address);
    }

    pub fn clear(&mut self) {
        self.suspected.clear();
        self.tombstones.clear();
    }
}
