use rand::seq::SliceRandom;
use rand::Rng;

use crate::address::NodeAddress;
use crate::codec::{GossipRow, Message};
use crate::detector::FailureDetector;
use crate::table::{MembershipTable, MergeOutcome};

// Push-only epidemic dissemination of the membership table
#[derive(Debug, Clone)]
pub struct GossipDisseminator {
    fanout: usize,
}

impl GossipDisseminator {
    pub fn new(fanout: usize) -> Self {
        Self { fanout }
    }

    /// Pick this round's gossip targets among peers that are not suspected.
    ///
    /// When the alive set fits within the fanout every alive peer is chosen,
    /// in address order. Otherwise a uniform sample of `fanout` peers is drawn.
    pub fn select_targets<R: Rng + ?Sized>(
        &self,
        table: &MembershipTable,
        now: u64,
        suspicion_timeout: u64,
        rng: &mut R,
    ) -> Vec<NodeAddress> {
        let alive = table.alive_addresses(now, suspicion_timeout);
        if alive.len() <= self.fanout {
            return alive;
        }
        alive
            .choose_multiple(rng, self.fanout)
            .copied()
            .collect()
    }

    // Gossip message carrying the full current snapshot
    pub fn build(&self, table: &MembershipTable) -> Message {
        let rows = table
            .snapshot()
            .into_iter()
            .map(|row| GossipRow {
                address: row.address,
                heartbeat: row.heartbeat,
            })
            .collect();

        Message::Gossip {
            sender: table.owner(),
            heartbeat: table.local_heartbeat(),
            rows,
        }
    }

    /// Merge a received snapshot into the local table.
    ///
    /// Rows naming the local node are skipped: only the owner advances its own
    /// heartbeat. The sender's own row is first-hand and always applied.
    /// Relayed rows about recently removed addresses are only re-admitted with
    /// a heartbeat newer than the one they were removed with. Returns the
    /// addresses that were newly inserted.
    pub fn merge(
        &self,
        table: &mut MembershipTable,
        detector: &FailureDetector,
        sender: GossipRow,
        rows: &[GossipRow],
        now: u64,
    ) -> Vec<NodeAddress> {
        let owner = table.owner();
        let mut added = Vec::new();

        if sender.address != owner
            && table.insert_or_merge(sender.address, sender.heartbeat, now) == MergeOutcome::Inserted
        {
            added.push(sender.address);
        }

        for row in rows {
            if row.address == owner {
                continue;
            }
            if row.address != sender.address && !detector.admits(&row.address, row.heartbeat) {
                log::trace!(
                    "Ignoring stale gossip about removed node {} (heartbeat {})",
                    row.address,
                    row.heartbeat
                );
                continue;
            }
            if table.insert_or_merge(row.address, row.heartbeat, now) == MergeOutcome::Inserted {
                added.push(row.address);
            }
        }

        added
    }
}
