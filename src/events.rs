use serde::Serialize;

use crate::address::NodeAddress;
use crate::lifecycle::NodeState;

// MembershipEvent represents changes in the local view of the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MembershipEvent {
    RowAdded(NodeAddress),
    RowSuspected(NodeAddress),
    RowRecovered(NodeAddress),
    RowRemoved(NodeAddress),
    StateChanged { from: NodeState, to: NodeState },
    MessageDropped { reason: String },
}
