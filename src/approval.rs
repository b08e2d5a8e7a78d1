use crate::{
    action::CreateRequest,
    ledger::{
        LedgerCall,
        TokenReader,
    },
    types::{
        Address,
        Amount,
        Variant,
    },
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ApprovalRequirement {
    NotRequired,
    Allowance {
        token: Address,
        current: Amount,
        required: Amount,
    },
    Operator {
        token: Address,
    },
}

impl ApprovalRequirement {
    pub fn is_required(&self) -> bool {
        !matches!(self, ApprovalRequirement::NotRequired)
    }

    /// The authorization transaction that must be confirmed before the create call.
    pub fn approval_call(&self, spender: Address) -> Option<LedgerCall> {
        match self {
            ApprovalRequirement::NotRequired => None,
            ApprovalRequirement::Allowance {
                token, required, ..
            } => Some(LedgerCall::Approve {
                token: *token,
                spender,
                amount: *required,
            }),
            ApprovalRequirement::Operator { token } => {
                Some(LedgerCall::SetApprovalForAll {
                    token: *token,
                    operator: spender,
                    approved: true,
                })
            }
        }
    }
}

/// Reads the actor's current authorization for `spender`. Never cached: every
/// submission attempt calls this again.
pub async fn evaluate<T: TokenReader>(
    tokens: &T,
    actor: Address,
    spender: Address,
    request: &CreateRequest,
) -> Result<ApprovalRequirement> {
    match request.variant {
        Variant::Native => Ok(ApprovalRequirement::NotRequired),
        Variant::Fungible => {
            let token = request.required_token()?;
            let current = tokens
                .allowance(token, actor, spender)
                .await
                .wrap_err_with(|| format!("failed to read allowance on {token:#x}"))?;
            if current < request.amount {
                Ok(ApprovalRequirement::Allowance {
                    token,
                    current,
                    required: request.amount,
                })
            } else {
                Ok(ApprovalRequirement::NotRequired)
            }
        }
        Variant::NonFungible => {
            let token = request.required_token()?;
            let approved = tokens
                .is_approved_for_all(token, actor, spender)
                .await
                .wrap_err_with(|| {
                    format!("failed to read operator approval on {token:#x}")
                })?;
            if approved {
                Ok(ApprovalRequirement::NotRequired)
            } else {
                Ok(ApprovalRequirement::Operator { token })
            }
        }
    }
}
