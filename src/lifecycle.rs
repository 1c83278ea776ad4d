use serde::Serialize;
use std::fmt;

use crate::config::JoinRetryConfig;

// Node states in the membership protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeState {
    Uninitialized,
    Initialized,
    Joining,
    Member,
    Left,
    Failed,
    JoinFailed,
}

impl NodeState {
    // States in which the tick driver processes messages
    pub fn is_running(&self) -> bool {
        matches!(self, NodeState::Initialized | NodeState::Joining | NodeState::Member)
    }

    pub fn answers_join_requests(&self) -> bool {
        self.is_running()
    }

    pub fn can_start(&self) -> bool {
        matches!(self, NodeState::Uninitialized | NodeState::Left)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Uninitialized => "uninitialized",
            NodeState::Initialized => "initialized",
            NodeState::Joining => "joining",
            NodeState::Member => "member",
            NodeState::Left => "left",
            NodeState::Failed => "failed",
            NodeState::JoinFailed => "join-failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinAction {
    Wait,
    Resend,
    GiveUp,
}

/// Bookkeeping for an outstanding join handshake.
///
/// Join replies are matched by message type only, so this just counts the
/// requests sent and schedules the next one.
#[derive(Debug, Clone)]
pub struct JoinAttempts {
    retry: Option<JoinRetryConfig>,
    sent: u32,
    next_at: Option<u64>,
}

impl JoinAttempts {
    pub fn new(retry: Option<JoinRetryConfig>) -> Self {
        Self {
            retry,
            sent: 0,
            next_at: None,
        }
    }

    pub fn sent(&self) -> u32 {
        self.sent
    }

    // Record a request sent at `now` and schedule the next one
    pub fn record_sent(&mut self, now: u64) {
        self.sent += 1;
        self.next_at = self
            .retry
            .as_ref()
            .map(|retry| now.saturating_add(retry.backoff(self.sent)));
    }

    pub fn poll(&self, now: u64) -> JoinAction {
        let (Some(retry), Some(next_at)) = (&self.retry, self.next_at) else {
            return JoinAction::Wait;
        };
        if now < next_at {
            JoinAction::Wait
        } else if self.sent >= retry.max_attempts {
            JoinAction::GiveUp
        } else {
            JoinAction::Resend
        }
    }

    pub fn reset(&mut self) {
        self.sent = 0;
        self.next_at = None;
    }
}
