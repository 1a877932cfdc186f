//! Vote tally and resolution verdicts.
//!
//! Both functions here are pure: the same votes, configuration and elapsed
//! time always produce the same answer, whatever order the votes arrive in.

use serde::Serialize;
use std::time::Duration;

use crate::config::VotingConfig;
use crate::domains::edits::models::{Vote, VoteValue};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VoteTally {
    /// accept_count - reject_count
    pub score: i64,
    pub accept_count: i64,
    pub reject_count: i64,
}

impl VoteTally {
    /// Enough support to be evaluated ahead of other pending edits.
    pub fn is_promoted(&self, config: &VotingConfig) -> bool {
        self.accept_count > 0 && self.score >= config.vote_promotion_threshold
    }
}

/// Equal weight per voter; abstentions are ignored.
pub fn tally(votes: &[Vote]) -> VoteTally {
    let accept_count = votes
        .iter()
        .filter(|vote| vote.value == VoteValue::Accept)
        .count() as i64;
    let reject_count = votes
        .iter()
        .filter(|vote| vote.value == VoteValue::Reject)
        .count() as i64;

    VoteTally {
        score: accept_count - reject_count,
        accept_count,
        reject_count,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    /// Rejections outweigh acceptances by the application threshold.
    ThresholdUnreachable { score: i64 },
    VotingPeriodExpired { score: i64 },
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::ThresholdUnreachable { score } => {
                write!(f, "rejected by vote (score {})", score)
            }
            RejectionReason::VotingPeriodExpired { score } => {
                write!(f, "voting period expired with score {}", score)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(RejectionReason),
    Wait,
}

/// Decide what should happen to a pending edit right now.
pub fn evaluate(
    tally: &VoteTally,
    config: &VotingConfig,
    destructive: bool,
    elapsed: Duration,
) -> Verdict {
    let threshold = config.vote_application_threshold;

    if tally.accept_count > 0
        && tally.score >= threshold
        && elapsed >= config.minimum_open_period(destructive)
    {
        return Verdict::Accept;
    }

    if tally.score <= -threshold {
        return Verdict::Reject(RejectionReason::ThresholdUnreachable { score: tally.score });
    }

    if elapsed >= config.evaluation_window(destructive) {
        return Verdict::Reject(RejectionReason::VotingPeriodExpired { score: tally.score });
    }

    Verdict::Wait
}
