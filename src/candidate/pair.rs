use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use stun::message::TransactionId;

/// Connectivity check state of a candidate pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum CandidatePairState {
    /// Pair exists but its check is held back by the freezing algorithm.
    #[default]
    #[serde(rename = "frozen")]
    Frozen,
    /// A check will be performed as soon as the checklist reaches it.
    #[serde(rename = "waiting")]
    Waiting,
    /// A check has been sent and its transaction is in progress.
    #[serde(rename = "in-progress")]
    InProgress,
    /// The check failed terminally.
    #[serde(rename = "failed")]
    Failed,
    /// The check produced a valid response.
    #[serde(rename = "succeeded")]
    Succeeded,
}

impl fmt::Display for CandidatePairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Self::Frozen => "frozen",
            Self::Waiting => "waiting",
            Self::InProgress => "in-progress",
            Self::Failed => "failed",
            Self::Succeeded => "succeeded",
        };
        write!(f, "{s}")
    }
}

/// A local/remote candidate combination on the checklist. Indices refer to
/// the agent's candidate lists.
#[derive(Clone, Debug)]
pub struct CandidatePair {
    pub local_index: usize,
    pub remote_index: usize,
    pub local_priority: u32,
    pub remote_priority: u32,
    pub(crate) controlling: bool,
    pub(crate) state: CandidatePairState,
    pub(crate) nominated: bool,
    pub(crate) binding_request_count: u16,
    pub(crate) rto: Duration,
    pub(crate) next_transmit: Option<Instant>,
    pub(crate) transaction_id: Option<TransactionId>,
}

impl fmt::Display for CandidatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "prio {} (local {} prio {}) <-> (remote {} prio {})",
            self.priority(),
            self.local_index,
            self.local_priority,
            self.remote_index,
            self.remote_priority,
        )
    }
}

impl PartialEq for CandidatePair {
    fn eq(&self, other: &Self) -> bool {
        self.local_index == other.local_index && self.remote_index == other.remote_index
    }
}

impl CandidatePair {
    pub fn new(
        local_index: usize,
        remote_index: usize,
        local_priority: u32,
        remote_priority: u32,
        controlling: bool,
        rto: Duration,
    ) -> Self {
        Self {
            local_index,
            remote_index,
            local_priority,
            remote_priority,
            controlling,
            state: CandidatePairState::Frozen,
            nominated: false,
            binding_request_count: 0,
            rto,
            next_transmit: None,
            transaction_id: None,
        }
    }

    /// RFC 5245 5.7.2 pair priority: G the controlling side's candidate
    /// priority, D the controlled side's.
    pub fn priority(&self) -> u64 {
        let (g, d) = if self.controlling {
            (self.local_priority, self.remote_priority)
        } else {
            (self.remote_priority, self.local_priority)
        };

        ((1u64 << 32) - 1) * u64::from(std::cmp::min(g, d))
            + 2 * u64::from(std::cmp::max(g, d))
            + u64::from(g > d)
    }
}
