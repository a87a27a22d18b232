//! Vote values and the outcome of one ledger step.
//!
//! A vote is applied as insert-or-replace keyed by (author, thread). The
//! thread's `votes` total is moved by [`VoteOutcome::delta`] only, never
//! recomputed from the vote rows.

use serde::{Deserialize, Serialize};

/// Extra attempts after a step reports [`VoteOutcome::Failed`].
pub const VOTE_RETRIES: usize = 1;

/// A vote value, either `-1` or `+1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Voice(i32);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("vote value must be -1 or 1, got {0}")]
pub struct InvalidVoice(pub i32);

impl Voice {
    pub const UP: Voice = Voice(1);
    pub const DOWN: Voice = Voice(-1);

    pub fn value(self) -> i32 {
        self.0
    }
}

impl TryFrom<i32> for Voice {
    type Error = InvalidVoice;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            1 | -1 => Ok(Voice(v)),
            other => Err(InvalidVoice(other)),
        }
    }
}

impl From<Voice> for i32 {
    fn from(v: Voice) -> i32 {
        v.0
    }
}

/// Result of one insert-or-update attempt on the vote ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// First vote by this author on the thread.
    Inserted(Voice),
    /// The author had voted before; the stored value was overwritten.
    UpdatedExisting { previous: Voice, current: Voice },
    /// The insert lost a uniqueness race but the winning row was not
    /// readable; the step may be retried.
    Failed,
}

impl VoteOutcome {
    /// Amount to add to the thread's `votes` total.
    pub fn delta(self) -> i64 {
        match self {
            VoteOutcome::Inserted(v) => i64::from(v.value()),
            VoteOutcome::UpdatedExisting { previous, current } => {
                i64::from(current.value()) - i64::from(previous.value())
            }
            VoteOutcome::Failed => 0,
        }
    }

    /// Classifies a step given the value stored before it ran (if any).
    pub fn of(previous: Option<Voice>, current: Voice) -> Self {
        match previous {
            None => VoteOutcome::Inserted(current),
            Some(previous) => VoteOutcome::UpdatedExisting { previous, current },
        }
    }
}
