use anyhow::Result;
use gossip_membership::codec::{GossipRow, Message};
use gossip_membership::sim::{FailurePlan, NetworkConditions, SimNetwork, Simulation, SimulationConfig};
use gossip_membership::{
    JoinRetryConfig, MembershipConfig, Node, NodeAddress, NodeState, RowStatus,
};
use std::collections::BTreeSet;

const A: NodeAddress = NodeAddress::new(1, 0);
const B: NodeAddress = NodeAddress::new(2, 0);
const C: NodeAddress = NodeAddress::new(3, 0);

// Helper function to create a test config with A as introducer
fn test_config() -> MembershipConfig {
    MembershipConfig {
        suspicion_timeout: 5,
        removal_timeout: 20,
        fanout: 3,
        rng_seed: Some(7),
        ..Default::default()
    }
    .with_introducer(A)
}

// Helper function to tick every node once, in order
fn tick_all(nodes: &mut [&mut Node], now: u64, network: &mut SimNetwork) {
    for node in nodes.iter_mut() {
        node.tick(now, network);
    }
}

fn member_set(node: &Node) -> BTreeSet<NodeAddress> {
    node.members().into_iter().collect()
}

fn heartbeats_without_owner(node: &Node) -> Vec<(NodeAddress, u64)> {
    node.table()
        .rows()
        .filter(|row| row.address != node.address())
        .map(|row| (row.address, row.heartbeat))
        .collect()
}

#[test]
fn test_three_node_group_converges() -> Result<()> {
    let mut network = SimNetwork::reliable();
    let mut a = Node::new(A, test_config())?;
    let mut b = Node::new(B, test_config())?;
    let mut c = Node::new(C, test_config())?;

    a.start(0, &mut network)?;
    b.start(0, &mut network)?;
    tick_all(&mut [&mut a, &mut b], 1, &mut network);
    assert_eq!(member_set(&b), BTreeSet::from([A, B]));

    c.start(2, &mut network)?;
    // A answers C, then gossips the full table to B and C
    tick_all(&mut [&mut a, &mut b, &mut c], 2, &mut network);

    let expected = BTreeSet::from([A, B, C]);
    assert_eq!(member_set(&a), expected);
    assert_eq!(member_set(&b), expected);
    assert_eq!(member_set(&c), expected);
    assert_eq!(c.state(), NodeState::Member);

    Ok(())
}

#[test]
fn test_heartbeats_observed_never_decrease() -> Result<()> {
    let mut network = SimNetwork::new(
        NetworkConditions {
            drop_rate: 0.1,
            duplicate_rate: 0.2,
            reorder: true,
        },
        3,
    );
    let config = MembershipConfig {
        join_retry: Some(JoinRetryConfig::default()),
        ..test_config()
    };
    let mut a = Node::new(A, config.clone())?;
    let mut b = Node::new(B, config.clone())?;
    let mut c = Node::new(C, config)?;
    a.start(0, &mut network)?;
    b.start(0, &mut network)?;
    c.start(0, &mut network)?;

    let mut last_seen = 0;
    for now in 1..=50 {
        tick_all(&mut [&mut a, &mut b, &mut c], now, &mut network);
        if let Some(row) = b.table().get(&A) {
            assert!(row.heartbeat >= last_seen, "tick {}", now);
            last_seen = row.heartbeat;
        }
    }
    assert!(last_seen > 0);

    Ok(())
}

#[test]
fn test_partitioned_node_is_suspected_then_removed() -> Result<()> {
    let membership = test_config();
    let mut sim = Simulation::new(SimulationConfig {
        nodes: 4,
        membership: membership.clone(),
        ..Default::default()
    })?;
    assert!(sim.run_until(30, Simulation::converged));

    let observer = Simulation::address_of(0);
    let victim = Simulation::address_of(1);
    let cut_at = sim.now();
    sim.network_mut().partition(victim);

    let status = |sim: &Simulation| {
        sim.node(&observer)
            .and_then(|node| node.status_of(&victim, sim.now()))
    };

    assert!(sim.run_until(20, |sim| status(sim) == Some(RowStatus::Suspected)));
    assert!(sim.now() - cut_at > membership.suspicion_timeout);

    assert!(sim.run_until(30, |sim| status(sim).is_none()));
    assert!(sim.now() - cut_at > membership.removal_timeout);

    // Stale copies held by slower peers must not bring it back
    for _ in 0..40 {
        sim.step();
        for node in sim.nodes().iter().filter(|node| node.address() != victim) {
            assert!(!node.table().contains(&victim), "{} at tick {}", node.address(), sim.now());
        }
    }

    Ok(())
}

#[test]
fn test_restarted_node_is_visible_before_tombstone_expires() -> Result<()> {
    let mut network = SimNetwork::reliable();
    let mut a = Node::new(A, test_config())?;
    let mut b = Node::new(B, test_config())?;
    let mut c = Node::new(C, test_config())?;
    a.start(0, &mut network)?;
    b.start(0, &mut network)?;
    c.start(0, &mut network)?;
    for now in 1..=10 {
        tick_all(&mut [&mut a, &mut b, &mut c], now, &mut network);
    }
    assert_eq!(member_set(&c), BTreeSet::from([A, B, C]));

    network.partition(B);
    for now in 11..=40 {
        tick_all(&mut [&mut a, &mut c], now, &mut network);
    }
    assert!(!a.table().contains(&B));
    assert!(!c.table().contains(&B));

    // B comes back with its heartbeat starting over
    b.shutdown();
    network.heal(&B);
    b.start(41, &mut network)?;
    tick_all(&mut [&mut a, &mut b, &mut c], 41, &mut network);

    assert_eq!(b.state(), NodeState::Member);
    assert!(a.table().contains(&B));
    assert!(c.table().contains(&B), "C must accept B's first-hand gossip");

    Ok(())
}

#[test]
fn test_failed_node_is_dropped_from_group() -> Result<()> {
    let mut sim = Simulation::new(SimulationConfig {
        nodes: 5,
        failures: vec![FailurePlan {
            at: 20,
            nodes: vec![Simulation::address_of(4)],
        }],
        membership: test_config(),
        ..Default::default()
    })?;

    sim.run(20);
    assert_eq!(sim.live_members().len(), 4);
    assert!(!sim.converged());

    assert!(sim.run_until(60, Simulation::converged));
    let failed = Simulation::address_of(4);
    assert_eq!(sim.node(&failed).map(Node::state), Some(NodeState::Failed));
    assert!(sim
        .nodes()
        .iter()
        .filter(|node| node.is_member())
        .all(|node| !node.table().contains(&failed)));

    Ok(())
}

#[test]
fn test_duplicate_and_reordered_gossip_yield_same_table() -> Result<()> {
    let older = Message::Gossip {
        sender: B,
        heartbeat: 4,
        rows: vec![
            GossipRow { address: C, heartbeat: 1 },
            GossipRow { address: NodeAddress::new(4, 0), heartbeat: 2 },
        ],
    };
    let newer = Message::Gossip {
        sender: B,
        heartbeat: 6,
        rows: vec![
            GossipRow { address: C, heartbeat: 3 },
            GossipRow { address: NodeAddress::new(4, 0), heartbeat: 2 },
            GossipRow { address: NodeAddress::new(5, 0), heartbeat: 1 },
        ],
    };

    let deliveries = vec![
        vec![older.clone(), newer.clone()],
        vec![older.clone(), older.clone(), newer.clone(), newer.clone()],
        vec![newer.clone(), older.clone()],
        vec![newer.clone(), older.clone(), newer.clone()],
    ];

    let mut tables = Vec::new();
    for messages in deliveries {
        let mut network = SimNetwork::reliable();
        let mut a = Node::new(A, test_config())?;
        a.start(0, &mut network)?;
        for message in messages {
            a.handle_message(message, 1, &mut network);
        }
        tables.push(heartbeats_without_owner(&a));
    }

    assert_eq!(
        tables[0],
        vec![(B, 6), (C, 3), (NodeAddress::new(4, 0), 2), (NodeAddress::new(5, 0), 1)]
    );
    assert!(tables.iter().all(|table| *table == tables[0]));

    Ok(())
}

#[test]
fn test_lossy_network_converges() -> Result<()> {
    let mut sim = Simulation::new(SimulationConfig {
        nodes: 8,
        start_interval: 2,
        conditions: NetworkConditions {
            drop_rate: 0.2,
            duplicate_rate: 0.1,
            reorder: true,
        },
        seed: 11,
        membership: MembershipConfig {
            join_retry: Some(JoinRetryConfig::default()),
            ..test_config()
        },
        ..Default::default()
    })?;

    assert!(sim.run_until(200, Simulation::converged));
    assert_eq!(sim.live_members().len(), 8);

    let report = sim.report();
    assert!(report.converged);
    assert!(report.network.dropped > 0);

    Ok(())
}

#[test]
fn test_simulation_report_serializes() -> Result<()> {
    let mut sim = Simulation::new(SimulationConfig {
        nodes: 3,
        membership: test_config(),
        ..Default::default()
    })?;
    sim.run(10);

    let json = serde_json::to_value(sim.report())?;
    assert_eq!(json["ticks"], 10);
    assert_eq!(json["nodes"].as_array().map(Vec::len), Some(3));
    assert_eq!(json["nodes"][0]["address"], "0.0.0.1:0");
    assert_eq!(json["nodes"][0]["state"], "Member");

    Ok(())
}
