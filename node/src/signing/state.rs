use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::signing::messages::RejectReason;
use crate::signing::SigningError;

/// Progress of a single proposal on the proposer's side.
///
/// ```text
/// Proposed -> Sent -> Agreed | Rejected | TimedOut
/// Proposed -> Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningState {
    /// Request block created, not yet sent.
    Proposed,
    /// Request block sent, waiting for the counter signature.
    Sent,
    Agreed,
    Rejected,
    TimedOut,
}

impl SigningState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SigningState::Agreed | SigningState::Rejected | SigningState::TimedOut)
    }

    pub(crate) fn transition(self, next: SigningState) -> Result<SigningState, SigningError> {
        use SigningState::*;
        match (self, next) {
            (Proposed, Sent) | (Proposed, Rejected) | (Sent, Agreed) | (Sent, Rejected) | (Sent, TimedOut) => {
                Ok(next)
            }
            (from, to) => Err(SigningError::InvalidTransition { from, to }),
        }
    }
}

impl Display for SigningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Both committed halves of an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlockPair {
    /// Block on the proposer's chain.
    pub proposal: Block,
    /// Mirrored block on the counterparty's chain.
    pub counter: Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum SignOutcome {
    Agreed(BlockPair),
    Rejected(RejectReason),
    /// No answer within the signing timeout. Nothing was stored, the exchange can be retried.
    TimedOut,
}

impl SignOutcome {
    pub(crate) fn state(&self) -> SigningState {
        match self {
            SignOutcome::Agreed(_) => SigningState::Agreed,
            SignOutcome::Rejected(_) => SigningState::Rejected,
            SignOutcome::TimedOut => SigningState::TimedOut,
        }
    }
}
