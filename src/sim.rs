//! In-process network and cluster simulator.
//!
//! Time is logical: every call to [`Simulation::step`] advances the clock by
//! one tick and ticks each node in address order. The [`SimNetwork`] queues
//! datagrams per destination and can drop, duplicate and reorder them, or cut
//! nodes off entirely, all driven by a seeded RNG so runs are reproducible.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::address::NodeAddress;
use crate::config::MembershipConfig;
use crate::lifecycle::NodeState;
use crate::node::{Node, NodeError};
use crate::transport::Transport;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkConditions {
    /// Probability that a datagram is lost
    pub drop_rate: f64,
    /// Probability that a delivered datagram is delivered twice
    pub duplicate_rate: f64,
    /// Shuffle each inbound queue before it is drained
    pub reorder: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub duplicated: u64,
}

#[derive(Debug)]
pub struct SimNetwork {
    queues: BTreeMap<NodeAddress, Vec<Vec<u8>>>,
    conditions: NetworkConditions,
    partitioned: BTreeSet<NodeAddress>,
    rng: StdRng,
    stats: NetworkStats,
}

impl SimNetwork {
    pub fn new(conditions: NetworkConditions, seed: u64) -> Self {
        Self {
            queues: BTreeMap::new(),
            conditions,
            partitioned: BTreeSet::new(),
            rng: StdRng::seed_from_u64(seed),
            stats: NetworkStats::default(),
        }
    }

    // Lossless, in-order network
    pub fn reliable() -> Self {
        Self::new(NetworkConditions::default(), 0)
    }

    /// Cut a node off: everything it sends or is sent is lost.
    pub fn partition(&mut self, address: NodeAddress) {
        self.partitioned.insert(address);
    }

    pub fn heal(&mut self, address: &NodeAddress) {
        self.partitioned.remove(address);
    }

    // Queue a raw datagram for `to`, bypassing loss and partitions
    pub fn inject(&mut self, to: NodeAddress, payload: Vec<u8>) {
        self.queues.entry(to).or_default().push(payload);
    }

    pub fn pending(&self, at: &NodeAddress) -> usize {
        self.queues.get(at).map_or(0, Vec::len)
    }

    /// Queued datagrams for `at`, without draining them.
    pub fn peek(&self, at: &NodeAddress) -> &[Vec<u8>] {
        self.queues.get(at).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats
    }
}

impl Transport for SimNetwork {
    fn send(&mut self, from: NodeAddress, to: NodeAddress, payload: Vec<u8>) {
        self.stats.sent += 1;

        if self.partitioned.contains(&from) || self.partitioned.contains(&to) {
            self.stats.dropped += 1;
            return;
        }
        if self.conditions.drop_rate > 0.0 && self.rng.gen_bool(self.conditions.drop_rate.min(1.0)) {
            self.stats.dropped += 1;
            return;
        }

        let duplicate = self.conditions.duplicate_rate > 0.0
            && self.rng.gen_bool(self.conditions.duplicate_rate.min(1.0));
        let queue = self.queues.entry(to).or_default();
        if duplicate {
            self.stats.duplicated += 1;
            queue.push(payload.clone());
        }
        queue.push(payload);
    }

    fn receive(&mut self, at: NodeAddress) -> Vec<Vec<u8>> {
        let mut queued = self.queues.remove(&at).unwrap_or_default();
        if self.conditions.reorder {
            queued.shuffle(&mut self.rng);
        }
        self.stats.delivered += queued.len() as u64;
        queued
    }
}

// Node failures injected at a given tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailurePlan {
    pub at: u64,
    pub nodes: Vec<NodeAddress>,
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub nodes: usize,
    /// Ticks between two consecutive node starts
    pub start_interval: u64,
    pub conditions: NetworkConditions,
    pub failures: Vec<FailurePlan>,
    pub seed: u64,
    pub membership: MembershipConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            nodes: 10,
            start_interval: 1,
            conditions: NetworkConditions::default(),
            failures: Vec::new(),
            seed: 0,
            membership: MembershipConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub address: String,
    pub state: NodeState,
    pub heartbeat: u64,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub ticks: u64,
    pub converged: bool,
    pub network: NetworkStats,
    pub nodes: Vec<NodeReport>,
}

pub struct Simulation {
    nodes: Vec<Node>,
    start_at: Vec<u64>,
    failures: Vec<FailurePlan>,
    network: SimNetwork,
    now: u64,
}

impl Simulation {
    /// Build a cluster of `config.nodes` nodes with ids 1..=n on port 0.
    /// Node 1 is the introducer and starts first.
    pub fn new(config: SimulationConfig) -> Result<Self, NodeError> {
        let introducer = Self::address_of(0);
        let membership = MembershipConfig {
            rng_seed: Some(config.seed),
            ..config.membership.clone()
        }
        .with_introducer(introducer);

        let mut nodes = Vec::with_capacity(config.nodes);
        let mut start_at = Vec::with_capacity(config.nodes);
        for index in 0..config.nodes {
            nodes.push(Node::new(Self::address_of(index), membership.clone())?);
            start_at.push(index as u64 * config.start_interval);
        }

        Ok(Self {
            nodes,
            start_at,
            failures: config.failures,
            network: SimNetwork::new(config.conditions, config.seed),
            now: 0,
        })
    }

    pub fn address_of(index: usize) -> NodeAddress {
        NodeAddress::new(index as u32 + 1, 0)
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, address: &NodeAddress) -> Option<&Node> {
        self.nodes.iter().find(|node| node.address() == *address)
    }

    pub fn node_mut(&mut self, address: &NodeAddress) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.address() == *address)
    }

    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut SimNetwork {
        &mut self.network
    }

    // Advance the clock by one tick
    pub fn step(&mut self) {
        self.now += 1;
        let now = self.now;

        for plan in self.failures.iter().filter(|plan| plan.at == now) {
            for address in &plan.nodes {
                if let Some(node) = self.nodes.iter_mut().find(|node| node.address() == *address) {
                    node.mark_failed();
                }
            }
        }

        for (node, start_at) in self.nodes.iter_mut().zip(&self.start_at) {
            if node.state() == NodeState::Uninitialized && *start_at < now {
                if let Err(e) = node.start(now, &mut self.network) {
                    log::error!("{} failed to start: {}", node.address(), e);
                }
            }
        }

        for node in &mut self.nodes {
            node.tick(now, &mut self.network);
        }
    }

    pub fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Step until `done` holds or `max_ticks` more ticks have run.
    /// Returns whether `done` was reached.
    pub fn run_until<F>(&mut self, max_ticks: u64, mut done: F) -> bool
    where
        F: FnMut(&Simulation) -> bool,
    {
        for _ in 0..max_ticks {
            if done(self) {
                return true;
            }
            self.step();
        }
        done(self)
    }

    // Addresses of nodes that are members and have not failed
    pub fn live_members(&self) -> BTreeSet<NodeAddress> {
        self.nodes
            .iter()
            .filter(|node| node.is_member())
            .map(|node| node.address())
            .collect()
    }

    /// Every started, non-failed node is a member and sees exactly the set of
    /// live members.
    pub fn converged(&self) -> bool {
        let live = self.live_members();
        let all_started = self
            .nodes
            .iter()
            .all(|node| {
                node.is_member()
                    || (!node.state().is_running() && node.state() != NodeState::Uninitialized)
            });

        all_started
            && !live.is_empty()
            && self
                .nodes
                .iter()
                .filter(|node| node.is_member())
                .all(|node| node.members().into_iter().collect::<BTreeSet<_>>() == live)
    }

    pub fn report(&self) -> SimulationReport {
        SimulationReport {
            ticks: self.now,
            converged: self.converged(),
            network: self.network.stats(),
            nodes: self
                .nodes
                .iter()
                .map(|node| NodeReport {
                    address: node.address().to_string(),
                    state: node.state(),
                    heartbeat: node.heartbeat(),
                    members: node.members().iter().map(ToString::to_string).collect(),
                })
                .collect(),
        }
    }
}
