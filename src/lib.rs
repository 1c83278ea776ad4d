pub mod address;
pub mod codec;
pub mod config;
pub mod detector;
pub mod events;
pub mod gossip;
pub mod lifecycle;
pub mod logging;
pub mod node;
pub mod runtime;
pub mod sim;
pub mod table;
pub mod transport;

// Re-export the types most callers need
pub use address::NodeAddress;
pub use codec::{decode, encode, DecodeError, GossipRow, Message};
pub use config::{ConfigError, JoinRetryConfig, MembershipConfig};
pub use detector::RowStatus;
pub use events::MembershipEvent;
pub use lifecycle::NodeState;
pub use node::{Node, NodeError};
pub use table::{MembershipRow, MembershipTable, MergeOutcome};
pub use transport::{Transport, UdpTransport};
