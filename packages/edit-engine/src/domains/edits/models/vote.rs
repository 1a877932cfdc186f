//! Vote model - one user's stance on an edit

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{EditId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteValue {
    Accept,
    Reject,
    /// Recorded for the voter's history; never counted.
    Abstain,
}

impl std::fmt::Display for VoteValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoteValue::Accept => write!(f, "accept"),
            VoteValue::Reject => write!(f, "reject"),
            VoteValue::Abstain => write!(f, "abstain"),
        }
    }
}

impl std::str::FromStr for VoteValue {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "accept" => Ok(VoteValue::Accept),
            "reject" => Ok(VoteValue::Reject),
            "abstain" => Ok(VoteValue::Abstain),
            _ => Err(anyhow::anyhow!("Invalid vote value: {}", s)),
        }
    }
}

/// At most one vote exists per (edit, voter); casting again replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub edit_id: EditId,
    pub voter_id: UserId,
    pub value: VoteValue,
    pub cast_at: DateTime<Utc>,
}
