//! The per-node protocol engine.
//!
//! A [`Node`] owns its membership table, failure detector and join state. It
//! has no timers or threads: the host calls [`Node::tick`] once per protocol
//! period with the current tick count and a [`Transport`]. Each tick drains and
//! dispatches every queued datagram first, then, once the node is a member,
//! runs failure detection, advances its own heartbeat and gossips.

use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::address::NodeAddress;
use crate::codec::{self, GossipRow, Message};
use crate::config::{ConfigError, MembershipConfig};
use crate::detector::{FailureDetector, RowStatus};
use crate::events::MembershipEvent;
use crate::gossip::GossipDisseminator;
use crate::lifecycle::{JoinAction, JoinAttempts, NodeState};
use crate::logging;
use crate::table::{MembershipTable, MergeOutcome};
use crate::transport::Transport;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("node address {0} does not identify a host")]
    UnspecifiedAddress(NodeAddress),
    #[error("cannot {action} while {from}")]
    InvalidTransition { from: NodeState, action: &'static str },
}

#[derive(Debug)]
pub struct Node {
    address: NodeAddress,
    introducer: NodeAddress,
    config: MembershipConfig,
    state: NodeState,
    table: MembershipTable,
    detector: FailureDetector,
    gossip: GossipDisseminator,
    join: JoinAttempts,
    rng: StdRng,
    events: Vec<MembershipEvent>,
}

impl Node {
    pub fn new(address: NodeAddress, config: MembershipConfig) -> Result<Self, NodeError> {
        config.validate()?;
        if address.id == 0 {
            return Err(NodeError::UnspecifiedAddress(address));
        }

        // Seeded nodes still get distinct streams
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(
                seed ^ ((u64::from(address.id) << 16) | u64::from(address.port)),
            ),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            address,
            introducer: config.introducer_address(),
            state: NodeState::Uninitialized,
            table: MembershipTable::new(address),
            detector: FailureDetector::from_config(&config),
            gossip: GossipDisseminator::new(config.fanout),
            join: JoinAttempts::new(config.join_retry.clone()),
            rng,
            events: Vec::new(),
            config,
        })
    }

    pub fn address(&self) -> NodeAddress {
        self.address
    }

    pub fn introducer(&self) -> NodeAddress {
        self.introducer
    }

    pub fn config(&self) -> &MembershipConfig {
        &self.config
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_member(&self) -> bool {
        self.state == NodeState::Member
    }

    pub fn is_introducer(&self) -> bool {
        self.address == self.introducer
    }

    pub fn heartbeat(&self) -> u64 {
        self.table.local_heartbeat()
    }

    pub fn table(&self) -> &MembershipTable {
        &self.table
    }

    // Addresses currently in the table, including this node once joined
    pub fn members(&self) -> Vec<NodeAddress> {
        self.table.addresses()
    }

    pub fn status_of(&self, address: &NodeAddress, now: u64) -> Option<RowStatus> {
        let row = self.table.get(address)?;
        if *address == self.address {
            return Some(RowStatus::Alive);
        }
        Some(self.detector.status(row, now))
    }

    pub fn join_attempts(&self) -> u32 {
        self.join.sent()
    }

    pub fn drain_events(&mut self) -> Vec<MembershipEvent> {
        std::mem::take(&mut self.events)
    }

    /// Bootstrap the node: reset local state, then either found the group
    /// (when this node is the introducer) or ask the introducer to join.
    pub fn start<T: Transport + ?Sized>(&mut self, now: u64, transport: &mut T) -> Result<(), NodeError> {
        if !self.state.can_start() {
            return Err(NodeError::InvalidTransition {
                from: self.state,
                action: "start",
            });
        }

        self.reset();
        self.set_state(NodeState::Initialized);

        if self.is_introducer() {
            info!("{} starting up group", self.address);
            self.table.self_increment(now);
            self.table.insert_owner(now);
            self.set_state(NodeState::Member);
        } else {
            info!("{} trying to join via {}", self.address, self.introducer);
            self.send_join_request(now, transport);
            self.set_state(NodeState::Joining);
        }

        Ok(())
    }

    /// Leave the group. Local state is dropped and no peer is notified;
    /// the others find out through their failure detectors.
    pub fn shutdown(&mut self) {
        self.set_state(NodeState::Left);
        self.reset();
    }

    // The host environment declared this node dead
    pub fn mark_failed(&mut self) {
        self.set_state(NodeState::Failed);
    }

    /// Run one protocol period.
    pub fn tick<T: Transport + ?Sized>(&mut self, now: u64, transport: &mut T) {
        if !self.state.is_running() {
            return;
        }

        for payload in transport.receive(self.address) {
            self.handle_datagram(&payload, now, transport);
        }

        if self.state == NodeState::Joining {
            self.poll_join(now, transport);
        }

        if self.state == NodeState::Member {
            self.detect_failures(now);
            self.table.self_increment(now);
            self.disseminate(now, transport);
        }
    }

    pub fn handle_datagram<T: Transport + ?Sized>(&mut self, payload: &[u8], now: u64, transport: &mut T) {
        match codec::decode(payload) {
            Ok(message) => self.handle_message(message, now, transport),
            Err(e) => {
                let reason = e.to_string();
                logging::log_dropped_message(self.address, &reason);
                self.events.push(MembershipEvent::MessageDropped { reason });
            }
        }
    }

    pub fn handle_message<T: Transport + ?Sized>(&mut self, message: Message, now: u64, transport: &mut T) {
        if !self.state.is_running() {
            return;
        }
        debug!("{} received {} from {}", self.address, message.kind(), message.sender());

        match message {
            Message::JoinRequest { sender, heartbeat } => {
                self.handle_join_request(sender, heartbeat, now, transport);
            }
            Message::JoinReply { sender, heartbeat } => {
                self.handle_join_reply(sender, heartbeat, now);
            }
            Message::Gossip {
                sender,
                heartbeat,
                rows,
            } => {
                self.handle_gossip(GossipRow { address: sender, heartbeat }, &rows, now);
            }
        }
    }

    fn handle_join_request<T: Transport + ?Sized>(
        &mut self,
        sender: NodeAddress,
        heartbeat: u64,
        now: u64,
        transport: &mut T,
    ) {
        if !self.state.answers_join_requests() {
            return;
        }

        self.table.self_increment(now);
        let reply = Message::JoinReply {
            sender: self.address,
            heartbeat: self.table.local_heartbeat(),
        };
        self.send(sender, &reply, transport);

        if sender != self.address {
            self.detector.lift_tombstone(&sender);
            self.merge_row(sender, heartbeat, now);
        }
    }

    fn handle_join_reply(&mut self, sender: NodeAddress, heartbeat: u64, now: u64) {
        if !matches!(self.state, NodeState::Joining | NodeState::Member) {
            debug!("{} ignoring join reply from {} while {}", self.address, sender, self.state);
            return;
        }

        self.table.self_increment(now);
        if sender != self.address {
            self.detector.lift_tombstone(&sender);
            self.merge_row(sender, heartbeat, now);
        }
        self.table.insert_owner(now);

        if self.state == NodeState::Joining {
            self.join.reset();
            self.set_state(NodeState::Member);
        }
    }

    fn handle_gossip(&mut self, sender: GossipRow, rows: &[GossipRow], now: u64) {
        if !matches!(self.state, NodeState::Joining | NodeState::Member) {
            return;
        }

        self.table.self_increment(now);
        let added = self
            .gossip
            .merge(&mut self.table, &self.detector, sender, rows, now);
        for address in added {
            self.record_added(address, now);
        }
    }

    fn poll_join<T: Transport + ?Sized>(&mut self, now: u64, transport: &mut T) {
        match self.join.poll(now) {
            JoinAction::Wait => {}
            JoinAction::Resend => {
                info!(
                    "{} retrying join via {} (attempt {})",
                    self.address,
                    self.introducer,
                    self.join.sent() + 1
                );
                self.send_join_request(now, transport);
            }
            JoinAction::GiveUp => {
                error!(
                    "{} unable to join via {} after {} attempts",
                    self.address,
                    self.introducer,
                    self.join.sent()
                );
                self.set_state(NodeState::JoinFailed);
            }
        }
    }

    fn detect_failures(&mut self, now: u64) {
        let report = self.detector.sweep(&mut self.table, now);

        for address in report.suspected {
            logging::log_node_suspected(self.address, address, now);
            self.events.push(MembershipEvent::RowSuspected(address));
        }
        for address in report.recovered {
            logging::log_node_recovered(self.address, address, now);
            self.events.push(MembershipEvent::RowRecovered(address));
        }
        for row in report.removed {
            logging::log_node_remove(self.address, row.address, now);
            self.events.push(MembershipEvent::RowRemoved(row.address));
        }
    }

    fn disseminate<T: Transport + ?Sized>(&mut self, now: u64, transport: &mut T) {
        let targets = self.gossip.select_targets(
            &self.table,
            now,
            self.detector.suspicion_timeout(),
            &mut self.rng,
        );
        if targets.is_empty() {
            return;
        }

        let message = self.gossip.build(&self.table);
        let payload = match codec::encode(&message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("{} failed to encode gossip: {}", self.address, e);
                return;
            }
        };

        for target in targets {
            logging::log_message_sent(self.address, target, message.kind());
            transport.send(self.address, target, payload.clone());
        }
    }

    fn send_join_request<T: Transport + ?Sized>(&mut self, now: u64, transport: &mut T) {
        let request = Message::JoinRequest {
            sender: self.address,
            heartbeat: self.table.local_heartbeat(),
        };
        self.send(self.introducer, &request, transport);
        self.join.record_sent(now);
    }

    fn send<T: Transport + ?Sized>(&self, to: NodeAddress, message: &Message, transport: &mut T) {
        match codec::encode(message) {
            Ok(payload) => {
                logging::log_message_sent(self.address, to, message.kind());
                transport.send(self.address, to, payload);
            }
            Err(e) => error!("{} failed to encode {}: {}", self.address, message.kind(), e),
        }
    }

    fn merge_row(&mut self, address: NodeAddress, heartbeat: u64, now: u64) {
        if self.table.insert_or_merge(address, heartbeat, now) == MergeOutcome::Inserted {
            self.record_added(address, now);
        }
    }

    fn record_added(&mut self, address: NodeAddress, now: u64) {
        logging::log_node_add(self.address, address, now);
        self.events.push(MembershipEvent::RowAdded(address));
    }

    fn set_state(&mut self, to: NodeState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        logging::log_state_transition(self.address, from, to);
        self.events.push(MembershipEvent::StateChanged { from, to });
    }

    fn reset(&mut self) {
        self.table.clear();
        self.detector.clear();
        self.join.reset();
    }
}
