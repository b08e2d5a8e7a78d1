use crate::{
    action::Action,
    approval::{
        self,
        ApprovalRequirement,
    },
    error::AttemptError,
    expiry::now_secs,
    ledger::{
        LedgerCall,
        LedgerTransport,
        Receipt,
        ReceiptStatus,
        TokenReader,
        WalletSigner,
    },
    types::{
        Address,
        TxHash,
    },
};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Mutex,
        PoisonError,
    },
};
use tokio::sync::mpsc;
use tracing::{
    error,
    info,
    warn,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ActionKind {
    Create,
    Claim,
    Refund,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Create => "create",
            ActionKind::Claim => "claim",
            ActionKind::Refund => "refund",
        };
        write!(f, "{name}")
    }
}

impl From<&Action> for ActionKind {
    fn from(action: &Action) -> Self {
        match action {
            Action::Create(_) => ActionKind::Create,
            Action::Claim(_) => ActionKind::Claim,
            Action::Refund(_) => ActionKind::Refund,
        }
    }
}

/// Which transaction of an attempt is currently being driven.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TxKind {
    Approve,
    Create,
    Claim,
    Refund,
}

impl From<ActionKind> for TxKind {
    fn from(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Create => TxKind::Create,
            ActionKind::Claim => TxKind::Claim,
            ActionKind::Refund => TxKind::Refund,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    Idle,
    /// Reading allowance / operator approval before a token-backed create.
    CheckingApproval,
    AwaitingApprovalSignature,
    AwaitingApprovalConfirmation { hash: TxHash },
    AwaitingActionSignature,
    AwaitingActionConfirmation { hash: TxHash },
    Confirmed { hash: TxHash },
    Failed(AttemptError),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Confirmed { .. } | Phase::Failed(_))
    }

    pub fn status(&self) -> AttemptStatus {
        match self {
            Phase::Idle => AttemptStatus::Idle,
            Phase::CheckingApproval => AttemptStatus::Simulating,
            Phase::AwaitingApprovalSignature | Phase::AwaitingActionSignature => {
                AttemptStatus::AwaitingSignature
            }
            Phase::AwaitingApprovalConfirmation { .. }
            | Phase::AwaitingActionConfirmation { .. } => {
                AttemptStatus::PendingConfirmation
            }
            Phase::Confirmed { .. } => AttemptStatus::Confirmed,
            Phase::Failed(_) => AttemptStatus::Failed,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttemptStatus {
    Idle,
    Simulating,
    AwaitingSignature,
    PendingConfirmation,
    Confirmed,
    Failed,
}

/// One user initiated signature -> confirmation sequence.
#[derive(Clone, Debug)]
pub struct Attempt {
    pub id: u64,
    pub action: ActionKind,
    pub leg: TxKind,
    pub hash: Option<TxHash>,
    pub phase: Phase,
    pub transitions: Vec<Phase>,
    pub receipt: Option<Receipt>,
    epoch: u64,
}

impl Attempt {
    fn new(id: u64, action: ActionKind, epoch: u64) -> Self {
        Self {
            id,
            action,
            leg: action.into(),
            hash: None,
            phase: Phase::Idle,
            transitions: vec![Phase::Idle],
            receipt: None,
            epoch,
        }
    }

    pub fn status(&self) -> AttemptStatus {
        self.phase.status()
    }

    pub fn error(&self) -> Option<&AttemptError> {
        match &self.phase {
            Phase::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self.phase, Phase::Confirmed { .. })
    }
}

#[derive(Clone, Debug)]
pub struct AttemptUpdate {
    pub attempt_id: u64,
    pub action: ActionKind,
    pub leg: TxKind,
    pub phase: Phase,
}

#[derive(Debug, Default)]
struct GuardState {
    epoch: u64,
    next_id: u64,
    in_flight: HashMap<ActionKind, u64>,
}

struct InFlight<'a> {
    state: &'a Mutex<GuardState>,
    kind: ActionKind,
    id: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.in_flight.get(&self.kind) == Some(&self.id) {
            state.in_flight.remove(&self.kind);
        }
    }
}

/// Drives approval and primary-action legs strictly in sequence.
pub struct Orchestrator<C> {
    chain: C,
    spender: Address,
    state: Mutex<GuardState>,
    updates: Option<mpsc::UnboundedSender<AttemptUpdate>>,
}

impl<C> Orchestrator<C>
where
    C: WalletSigner + LedgerTransport + TokenReader,
{
    pub fn new(chain: C, spender: Address) -> Self {
        Self {
            chain,
            spender,
            state: Mutex::new(GuardState::default()),
            updates: None,
        }
    }

    /// Every phase change of every attempt is also sent here.
    pub fn with_updates(mut self, updates: mpsc::UnboundedSender<AttemptUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn spender(&self) -> Address {
        self.spender
    }

    pub fn is_in_flight(&self, kind: ActionKind) -> bool {
        self.lock().in_flight.contains_key(&kind)
    }

    /// Forgets every in-flight attempt without touching submitted transactions.
    /// Attempts started before this call report `is_current == false`.
    pub fn abandon(&self) {
        let mut state = self.lock();
        state.epoch += 1;
        if !state.in_flight.is_empty() {
            warn!(
                abandoned = state.in_flight.len(),
                "dropping in-flight attempts after context switch"
            );
        }
        state.in_flight.clear();
    }

    pub fn is_current(&self, attempt: &Attempt) -> bool {
        self.lock().epoch == attempt.epoch
    }

    pub async fn run(&self, actor: Address, action: &Action) -> Attempt {
        let kind = ActionKind::from(action);
        let (mut attempt, _guard) = match self.begin(kind) {
            Ok(started) => started,
            Err(mut rejected) => {
                self.fail(&mut rejected, AttemptError::AlreadyInFlight(kind));
                return rejected;
            }
        };

        if let Action::Create(request) = action
            && let Err(err) = request.validate()
        {
            self.fail(&mut attempt, err.into());
            return attempt;
        }

        if let Action::Create(request) = action
            && request.variant.is_token_backed()
        {
            self.transition(&mut attempt, Phase::CheckingApproval);
            let requirement =
                match approval::evaluate(&self.chain, actor, self.spender, request).await {
                    Ok(requirement) => requirement,
                    Err(err) => {
                        self.fail(&mut attempt, AttemptError::ApprovalCheck(format!("{err:#}")));
                        return attempt;
                    }
                };
            if let Err(err) = self.approve(&mut attempt, actor, &requirement).await {
                self.fail(&mut attempt, err);
                return attempt;
            }
        }

        attempt.leg = kind.into();
        match self.act(&mut attempt, actor, action).await {
            Ok(()) => attempt,
            Err(err) => {
                self.fail(&mut attempt, err);
                attempt
            }
        }
    }

    async fn approve(
        &self,
        attempt: &mut Attempt,
        actor: Address,
        requirement: &ApprovalRequirement,
    ) -> Result<(), AttemptError> {
        let Some(call) = requirement.approval_call(self.spender) else {
            return Ok(());
        };
        attempt.leg = TxKind::Approve;
        self.transition(attempt, Phase::AwaitingApprovalSignature);
        let hash = self.sign_and_submit(attempt, actor, &call).await?;
        self.transition(attempt, Phase::AwaitingApprovalConfirmation { hash });
        self.confirm(hash).await?;
        Ok(())
    }

    async fn act(
        &self,
        attempt: &mut Attempt,
        actor: Address,
        action: &Action,
    ) -> Result<(), AttemptError> {
        self.transition(attempt, Phase::AwaitingActionSignature);
        let call = match action {
            Action::Create(request) => request.to_call(now_secs())?,
            Action::Claim(packet_id) => LedgerCall::ClaimPacket {
                packet_id: *packet_id,
            },
            Action::Refund(packet_id) => LedgerCall::Refund {
                packet_id: *packet_id,
            },
        };
        let hash = self.sign_and_submit(attempt, actor, &call).await?;
        self.transition(attempt, Phase::AwaitingActionConfirmation { hash });
        let receipt = self.confirm(hash).await?;
        attempt.receipt = Some(receipt);
        self.transition(attempt, Phase::Confirmed { hash });
        Ok(())
    }

    async fn sign_and_submit(
        &self,
        attempt: &mut Attempt,
        actor: Address,
        call: &LedgerCall,
    ) -> Result<TxHash, AttemptError> {
        let signed = self
            .chain
            .request_signature(actor, call)
            .await
            .map_err(|err| AttemptError::SignatureRejected(format!("{err:#}")))?;
        let hash = self
            .chain
            .submit(&signed)
            .await
            .map_err(|err| AttemptError::Submission(format!("{err:#}")))?;
        attempt.hash = Some(hash);
        Ok(hash)
    }

    async fn confirm(&self, hash: TxHash) -> Result<Receipt, AttemptError> {
        let receipt = self.chain.wait_for_receipt(hash).await.map_err(|err| {
            AttemptError::Confirmation {
                hash,
                detail: format!("{err:#}"),
            }
        })?;
        match receipt.status {
            ReceiptStatus::Success => Ok(receipt),
            ReceiptStatus::Reverted => Err(AttemptError::Reverted { hash }),
        }
    }

    fn begin(&self, kind: ActionKind) -> Result<(Attempt, InFlight<'_>), Attempt> {
        let mut state = self.lock();
        state.next_id += 1;
        let attempt = Attempt::new(state.next_id, kind, state.epoch);
        if state.in_flight.contains_key(&kind) {
            return Err(attempt);
        }
        state.in_flight.insert(kind, attempt.id);
        let guard = InFlight {
            state: &self.state,
            kind,
            id: attempt.id,
        };
        Ok((attempt, guard))
    }

    fn transition(&self, attempt: &mut Attempt, phase: Phase) {
        info!(
            attempt = attempt.id,
            action = %attempt.action,
            leg = ?attempt.leg,
            phase = ?phase,
            "attempt transition"
        );
        attempt.phase = phase.clone();
        attempt.transitions.push(phase.clone());
        if let Some(updates) = &self.updates {
            let _ = updates.send(AttemptUpdate {
                attempt_id: attempt.id,
                action: attempt.action,
                leg: attempt.leg,
                phase,
            });
        }
    }

    fn fail(&self, attempt: &mut Attempt, err: AttemptError) {
        if err.is_user_rejection() {
            warn!(attempt = attempt.id, action = %attempt.action, %err, "attempt rejected");
        } else {
            error!(attempt = attempt.id, action = %attempt.action, %err, "attempt failed");
        }
        self.transition(attempt, Phase::Failed(err));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        action::CreateRequest,
        test_helpers::FakeLedger,
        types::PacketId,
    };
    use primitive_types::U256;

    const ACTOR: Address = primitive_types::H160([0xa1; 20]);
    const LEDGER: Address = primitive_types::H160([0xee; 20]);
    const TOKEN: Address = primitive_types::H160([0x20; 20]);

    fn phases_without_hashes(attempt: &Attempt) -> Vec<&'static str> {
        attempt
            .transitions
            .iter()
            .map(|phase| match phase {
                Phase::Idle => "Idle",
                Phase::CheckingApproval => "CheckingApproval",
                Phase::AwaitingApprovalSignature => "AwaitingApprovalSignature",
                Phase::AwaitingApprovalConfirmation { .. } => "AwaitingApprovalConfirmation",
                Phase::AwaitingActionSignature => "AwaitingActionSignature",
                Phase::AwaitingActionConfirmation { .. } => "AwaitingActionConfirmation",
                Phase::Confirmed { .. } => "Confirmed",
                Phase::Failed(_) => "Failed",
            })
            .collect()
    }

    #[tokio::test]
    async fn run__native_create_skips_approval() {
        // given
        let fake = FakeLedger::new(LEDGER);
        let orchestrator = Orchestrator::new(fake.clone(), LEDGER);
        let action = Action::Create(CreateRequest::native(10, U256::one(), false, ""));

        // when
        let attempt = orchestrator.run(ACTOR, &action).await;

        // then
        assert!(attempt.is_confirmed());
        assert_eq!(
            phases_without_hashes(&attempt),
            vec![
                "Idle",
                "AwaitingActionSignature",
                "AwaitingActionConfirmation",
                "Confirmed"
            ]
        );
        assert!(attempt.receipt.is_some());
    }

    #[tokio::test]
    async fn run__insufficient_allowance_sequences_approval_first() {
        // given
        let fake = FakeLedger::new(LEDGER);
        fake.add_fungible_token(TOKEN, "USDC", 6);
        fake.set_allowance(TOKEN, ACTOR, U256::from(50u64));
        let orchestrator = Orchestrator::new(fake.clone(), LEDGER);
        let action = Action::Create(CreateRequest::fungible(
            TOKEN,
            5,
            U256::from(100u64),
            false,
            "",
        ));

        // when
        let attempt = orchestrator.run(ACTOR, &action).await;

        // then
        assert!(attempt.is_confirmed(), "{:?}", attempt.phase);
        assert_eq!(
            phases_without_hashes(&attempt),
            vec![
                "Idle",
                "CheckingApproval",
                "AwaitingApprovalSignature",
                "AwaitingApprovalConfirmation",
                "AwaitingActionSignature",
                "AwaitingActionConfirmation",
                "Confirmed"
            ]
        );
        let calls = fake.calls();
        let approval_confirmed = calls.iter().position(|c| c == "confirm:approve").unwrap();
        let action_signed = calls
            .iter()
            .position(|c| c == "sign:createFungiblePacket")
            .unwrap();
        assert!(approval_confirmed < action_signed, "{calls:?}");
    }

    #[tokio::test]
    async fn run__rejected_signature_fails_without_submitting() {
        // given
        let fake = FakeLedger::new(LEDGER);
        fake.reject_next_signature();
        let orchestrator = Orchestrator::new(fake.clone(), LEDGER);

        // when
        let attempt = orchestrator
            .run(ACTOR, &Action::Claim(PacketId::repeat_byte(1)))
            .await;

        // then
        assert!(matches!(
            attempt.error(),
            Some(AttemptError::SignatureRejected(_))
        ));
        assert!(fake.calls().iter().all(|c| !c.starts_with("submit:")));
        assert!(!orchestrator.is_in_flight(ActionKind::Claim));
    }

    #[tokio::test]
    async fn run__rejected_approval_never_requests_action_signature() {
        let fake = FakeLedger::new(LEDGER);
        fake.add_non_fungible_token(TOKEN, "PUNK");
        fake.reject_next_signature();
        let orchestrator = Orchestrator::new(fake.clone(), LEDGER);
        let action = Action::Create(CreateRequest::non_fungible(
            TOKEN,
            vec![U256::from(1u64)],
            "",
        ));

        let attempt = orchestrator.run(ACTOR, &action).await;

        assert_eq!(attempt.leg, TxKind::Approve);
        assert_eq!(attempt.status(), AttemptStatus::Failed);
        assert_eq!(fake.calls(), vec!["sign:setApprovalForAll".to_string()]);
    }

    #[tokio::test]
    async fn run__confirmation_failure_carries_transport_detail() {
        let fake = FakeLedger::new(LEDGER);
        fake.fail_next_confirmation("timed out waiting for receipt");
        let orchestrator = Orchestrator::new(fake.clone(), LEDGER);
        let action = Action::Create(CreateRequest::native(1, U256::one(), false, ""));

        let attempt = orchestrator.run(ACTOR, &action).await;

        match attempt.error() {
            Some(AttemptError::Confirmation { detail, .. }) => {
                assert!(detail.contains("timed out"), "{detail}")
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn run__invalid_input_is_rejected_before_signing() {
        let fake = FakeLedger::new(LEDGER);
        let orchestrator = Orchestrator::new(fake.clone(), LEDGER);
        let action = Action::Create(CreateRequest::native(0, U256::one(), false, ""));

        let attempt = orchestrator.run(ACTOR, &action).await;

        assert!(matches!(
            attempt.error(),
            Some(AttemptError::InvalidInput(_))
        ));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn run__second_attempt_of_same_kind_is_rejected_while_first_pending() {
        // given
        let fake = FakeLedger::new(LEDGER);
        fake.hold_signatures();
        let orchestrator = Orchestrator::new(fake.clone(), LEDGER);
        let first_action = Action::Create(CreateRequest::native(1, U256::one(), false, ""));
        let second_action = first_action.clone();

        // when
        let first = orchestrator.run(ACTOR, &first_action);
        let second = async {
            tokio::task::yield_now().await;
            let rejected = orchestrator.run(ACTOR, &second_action).await;
            fake.release_signatures();
            rejected
        };
        let (first, second) = tokio::join!(first, second);

        // then
        assert!(first.is_confirmed(), "{:?}", first.phase);
        assert_eq!(
            second.error(),
            Some(&AttemptError::AlreadyInFlight(ActionKind::Create))
        );
        assert!(!orchestrator.is_in_flight(ActionKind::Create));
    }

    #[tokio::test]
    async fn abandon__marks_older_attempts_stale_and_frees_the_guard() {
        let fake = FakeLedger::new(LEDGER);
        let orchestrator = Orchestrator::new(fake.clone(), LEDGER);
        let attempt = orchestrator
            .run(ACTOR, &Action::Refund(PacketId::repeat_byte(3)))
            .await;
        assert!(orchestrator.is_current(&attempt));

        orchestrator.abandon();

        assert!(!orchestrator.is_current(&attempt));
        assert!(!orchestrator.is_in_flight(ActionKind::Refund));
    }

    #[tokio::test]
    async fn with_updates__streams_every_transition() {
        let fake = FakeLedger::new(LEDGER);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = Orchestrator::new(fake.clone(), LEDGER).with_updates(tx);
        let action = Action::Create(CreateRequest::native(2, U256::from(2u64), true, ""));

        let attempt = orchestrator.run(ACTOR, &action).await;

        let mut seen = Vec::new();
        while let Ok(update) = rx.try_recv() {
            seen.push(update.phase);
        }
        assert_eq!(seen.len(), attempt.transitions.len() - 1);
        assert_eq!(seen.last(), Some(&attempt.phase));
    }
}
