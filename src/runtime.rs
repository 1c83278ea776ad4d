use anyhow::{bail, Result};
use log::info;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

use crate::events::MembershipEvent;
use crate::lifecycle::NodeState;
use crate::node::Node;
use crate::transport::Transport;

// NodeRuntime drives a node from a tokio interval, one tick per protocol period
pub struct NodeRuntime<T: Transport> {
    node: Node,
    transport: T,
    event_tx: Option<mpsc::UnboundedSender<MembershipEvent>>,
    now: u64,
}

impl<T: Transport> NodeRuntime<T> {
    pub fn new(node: Node, transport: T) -> Self {
        Self {
            node,
            transport,
            event_tx: None,
            now: 0,
        }
    }

    // Forward membership events to a channel as they are produced
    pub fn with_events(mut self, event_tx: mpsc::UnboundedSender<MembershipEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Start the node and tick it until `shutdown` resolves.
    ///
    /// Fails if the join handshake is abandoned.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let period = Duration::from_millis(self.node.config().protocol_period_ms);
        let mut protocol_period = time::interval(period);
        protocol_period.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        self.node.start(self.now, &mut self.transport)?;
        self.forward_events();

        loop {
            tokio::select! {
                _ = protocol_period.tick() => {
                    self.now += 1;
                    self.node.tick(self.now, &mut self.transport);
                    self.forward_events();

                    if self.node.state() == NodeState::JoinFailed {
                        bail!(
                            "node {} could not join the group via {}",
                            self.node.address(),
                            self.node.introducer()
                        );
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutting down membership node {}", self.node.address());
                    self.node.shutdown();
                    self.forward_events();
                    break;
                }
            }
        }

        Ok(())
    }

    fn forward_events(&mut self) {
        let events = self.node.drain_events();
        if let Some(tx) = &self.event_tx {
            for event in events {
                let _ = tx.send(event);
            }
        }
    }
}
