//! Failure taxonomy for user initiated actions.
//!
//! Read paths (lists, metadata, eligibility, stats) use `eyre` and degrade to a
//! default value at the call site. Attempts report an `AttemptError` through their
//! status instead of returning `Err`.

use crate::{
    orchestrator::ActionKind,
    types::TxHash,
};
use thiserror::Error;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum InputError {
    #[error("malformed packet id: {reason}")]
    MalformedPacketId { reason: String },
    #[error("malformed address {raw:?}: {reason}")]
    MalformedAddress { raw: String, reason: String },
    #[error("malformed amount {raw:?}: {reason}")]
    MalformedAmount { raw: String, reason: String },
    #[error("malformed item id {raw:?}")]
    MalformedItemId { raw: String },
    #[error("a token address is required for {0} packets")]
    MissingTokenAddress(crate::types::Variant),
    #[error("share count must be greater than zero")]
    ZeroCount,
    #[error("amount must be greater than zero")]
    ZeroAmount,
    #[error("at least one item id is required")]
    NoItems,
    #[error("share count {count} exceeds the {items} supplied items")]
    CountExceedsItems { count: u64, items: usize },
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum AttemptError {
    #[error("signature rejected: {0}")]
    SignatureRejected(String),
    #[error("submission failed: {0}")]
    Submission(String),
    #[error("confirmation failed for {hash:#x}: {detail}")]
    Confirmation { hash: TxHash, detail: String },
    #[error("transaction {hash:#x} reverted")]
    Reverted { hash: TxHash },
    #[error(transparent)]
    InvalidInput(#[from] InputError),
    #[error("a {0} attempt is already in flight")]
    AlreadyInFlight(ActionKind),
    #[error("could not read approval state: {0}")]
    ApprovalCheck(String),
}

impl AttemptError {
    /// Rejections are shown as a dismissible notice rather than an error.
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, AttemptError::SignatureRejected(_))
    }
}
