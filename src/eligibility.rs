use crate::{
    ledger::PacketLedger,
    types::{
        Address,
        PacketId,
        parse_packet_id,
    },
};
use std::time::Duration;
use tokio::{
    sync::watch,
    time,
};
use tracing::{
    debug,
    warn,
};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Dry-runs a claim. Anything short of a successful simulation is `false`.
pub async fn check<L: PacketLedger>(ledger: &L, packet_id: PacketId, actor: Address) -> bool {
    match ledger.simulate_claim(packet_id, actor).await {
        Ok(simulation) => {
            debug!(packet = %format!("{packet_id:#x}"), ?simulation, "claim simulated");
            simulation.succeeds()
        }
        Err(err) => {
            warn!(?err, "claim simulation unavailable, reporting ineligible");
            false
        }
    }
}

/// Parses the raw identifier first; malformed ids and missing actors are ineligible
/// without touching the ledger.
pub async fn check_raw<L: PacketLedger>(
    ledger: &L,
    raw_id: &str,
    actor: Option<Address>,
) -> bool {
    match (parse_packet_id(raw_id), actor) {
        (Ok(id), Some(actor)) => check(ledger, id, actor).await,
        _ => false,
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EligibilityInput {
    pub raw_id: String,
    pub actor: Option<Address>,
}

impl EligibilityInput {
    fn ready(&self) -> Option<(PacketId, Address)> {
        let id = parse_packet_id(&self.raw_id).ok()?;
        Some((id, self.actor?))
    }
}

/// Re-evaluates eligibility whenever the entered id or the actor changes.
pub struct EligibilityWatcher<L> {
    ledger: L,
    debounce: Duration,
}

impl<L: PacketLedger> EligibilityWatcher<L> {
    pub fn new(ledger: L, debounce: Duration) -> Self {
        Self { ledger, debounce }
    }

    /// Runs until the input sender is dropped. The output drops to `false` on every
    /// input change and only rises again after a completed simulation for the
    /// still-current input.
    pub async fn run(
        self,
        mut inputs: watch::Receiver<EligibilityInput>,
        output: watch::Sender<bool>,
    ) {
        loop {
            let input = inputs.borrow_and_update().clone();
            output.send_replace(false);

            if let Some((packet_id, actor)) = input.ready() {
                tokio::select! {
                    changed = inputs.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    _ = time::sleep(self.debounce) => {}
                }
                tokio::select! {
                    changed = inputs.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    eligible = check(&self.ledger, packet_id, actor) => {
                        output.send_replace(eligible);
                    }
                }
            }

            if inputs.changed().await.is_err() {
                break;
            }
        }
    }
}
