use chrono::Local;
use env_logger::Builder;
use log::{debug, info, warn};
use std::io::Write;
use std::sync::Once;

use crate::address::NodeAddress;
use crate::lifecycle::NodeState;

static INIT: Once = Once::new();

/// Initialize the logging system
///
/// Honors `RUST_LOG`; falls back to `info` when it is unset.
pub fn init_logging() {
    INIT.call_once(|| {
        let mut builder = Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        });
        // Tests may have installed a logger already
        let _ = builder.try_init();
    });
}

/// Log a row entering the local table
pub fn log_node_add(observer: NodeAddress, added: NodeAddress, now: u64) {
    info!("[{}] {} node {} joined the membership list", now, observer, added);
}

/// Log a row leaving the local table
pub fn log_node_remove(observer: NodeAddress, removed: NodeAddress, now: u64) {
    info!("[{}] {} node {} removed from the membership list", now, observer, removed);
}

/// Log a row crossing the suspicion timeout
pub fn log_node_suspected(observer: NodeAddress, suspect: NodeAddress, now: u64) {
    warn!("[{}] {} suspects node {}", now, observer, suspect);
}

/// Log a suspected row refreshed by a newer heartbeat
pub fn log_node_recovered(observer: NodeAddress, node: NodeAddress, now: u64) {
    info!("[{}] {} no longer suspects node {}", now, observer, node);
}

/// Log a lifecycle transition
pub fn log_state_transition(node: NodeAddress, from: NodeState, to: NodeState) {
    info!("{} changed state: {} -> {}", node, from, to);
}

/// Log an inbound datagram that could not be used
pub fn log_dropped_message(node: NodeAddress, reason: &str) {
    warn!("{} dropped inbound message: {}", node, reason);
}

/// Log an outbound message
pub fn log_message_sent(from: NodeAddress, to: NodeAddress, kind: &str) {
    debug!("{} -> {}: {}", from, to, kind);
}
