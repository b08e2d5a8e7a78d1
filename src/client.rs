use crate::{
    action::{
        Action,
        CreateRequest,
    },
    decoder::{
        ClaimedEvent,
        CreatedEvent,
        DomainEvent,
        EventSchema,
        ReceiptDecoder,
    },
    eligibility,
    error::AttemptError,
    expiry::now_secs,
    format::{
        DEFAULT_IPFS_GATEWAY,
        resolve_cover_uri,
        short_hex,
    },
    ledger::{
        LedgerTransport,
        ListCategory,
        PacketLedger,
        TokenReader,
        WalletSigner,
    },
    list_sync::{
        DEFAULT_PAGE_SIZE,
        FetchedPage,
        ListSynchronizer,
        PacketView,
        SyncOutcome,
        SyncTicket,
        fetch_page,
        resolve_metadata,
    },
    orchestrator::{
        ActionKind,
        Attempt,
        AttemptUpdate,
        Orchestrator,
        Phase,
    },
    stats::Stats,
    types::{
        Address,
        PacketId,
        parse_packet_id,
    },
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use futures::future::{
    FutureExt,
    LocalBoxFuture,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{
    debug,
    error,
    info,
};

const MAX_ERRORS: usize = 50;

#[derive(Clone, Debug)]
pub struct ClientSettings {
    pub page_size: u64,
    pub ipfs_gateway: String,
    pub native_symbol: String,
    pub native_decimals: u8,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            ipfs_gateway: DEFAULT_IPFS_GATEWAY.to_string(),
            native_symbol: "MON".to_string(),
            native_decimals: 18,
        }
    }
}

/// Everything shown for a single packet lookup.
#[derive(Clone, Debug)]
pub struct PacketDetails {
    pub view: PacketView,
    pub cover_url: String,
    pub claimable: bool,
}

/// Drives one actor's session against the ledger: submits actions, decodes their
/// receipts and keeps the packet list in step with confirmed state.
///
/// `submit` and `refresh` run to completion under `&mut self`. An event loop that
/// must keep handling actor or page changes while work is pending uses
/// [`RedPacketClient::launch`] / [`RedPacketClient::settle`] and
/// [`RedPacketClient::launch_refresh`] / [`RedPacketClient::apply_refresh`]
/// instead; the returned futures own their collaborators, and results that were
/// overtaken by a switch are ignored when handed back.
pub struct RedPacketClient<C> {
    chain: C,
    orchestrator: Arc<Orchestrator<C>>,
    decoder: ReceiptDecoder,
    list: ListSynchronizer,
    settings: ClientSettings,
    actor: Option<Address>,
    latest_created: Option<CreatedEvent>,
    latest_claimed: Option<ClaimedEvent>,
    status: String,
    errors: Vec<String>,
}

impl<C> RedPacketClient<C>
where
    C: PacketLedger + TokenReader + WalletSigner + LedgerTransport + Clone + 'static,
{
    pub fn new(chain: C, schema: EventSchema, settings: ClientSettings) -> Self {
        Self {
            orchestrator: Arc::new(Orchestrator::new(chain.clone(), schema.ledger)),
            chain,
            decoder: ReceiptDecoder::new(schema),
            list: ListSynchronizer::new(settings.page_size),
            settings,
            actor: None,
            latest_created: None,
            latest_claimed: None,
            status: String::from("Ready"),
            errors: Vec::new(),
        }
    }

    pub fn with_updates(mut self, updates: mpsc::UnboundedSender<AttemptUpdate>) -> Self {
        let orchestrator = Orchestrator::new(self.chain.clone(), self.orchestrator.spender());
        self.orchestrator = Arc::new(orchestrator.with_updates(updates));
        self
    }

    pub fn actor(&self) -> Option<Address> {
        self.actor
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Newest first, at most five.
    pub fn recent_errors(&self) -> Vec<String> {
        self.errors.iter().rev().take(5).cloned().collect()
    }

    pub fn latest_created(&self) -> Option<&CreatedEvent> {
        self.latest_created.as_ref()
    }

    pub fn latest_claimed(&self) -> Option<&ClaimedEvent> {
        self.latest_claimed.as_ref()
    }

    pub fn list(&self) -> &ListSynchronizer {
        &self.list
    }

    pub fn items(&self) -> &[PacketView] {
        self.list.items()
    }

    /// Switching identity abandons in-flight attempts and clears personal data.
    pub async fn set_actor(&mut self, actor: Option<Address>) {
        if self.actor == actor {
            return;
        }
        self.orchestrator.abandon();
        self.actor = actor;
        self.latest_created = None;
        self.latest_claimed = None;
        self.list.set_actor(actor);
        self.status = match actor {
            Some(actor) => format!("Connected {}", short_hex(&format!("{actor:#x}"))),
            None => String::from("Disconnected"),
        };
        self.refresh().await;
    }

    pub async fn set_category(&mut self, category: ListCategory) {
        if self.list.set_category(category) {
            self.refresh().await;
        }
    }

    pub async fn next_page(&mut self) {
        if self.list.next_page() {
            self.refresh().await;
        }
    }

    pub async fn prev_page(&mut self) {
        if self.list.prev_page() {
            self.refresh().await;
        }
    }

    pub async fn go_to_page(&mut self, page: u64) {
        if self.list.go_to_page(page) {
            self.refresh().await;
        }
    }

    /// Re-reads the current page. Safe to call on a timer.
    pub async fn refresh(&mut self) -> SyncOutcome {
        self.list.refresh(&self.chain, &self.chain, now_secs()).await
    }

    /// Starts reading the current page without holding the client. `None` when
    /// no actor is connected.
    pub fn launch_refresh(
        &self,
    ) -> Option<(SyncTicket, LocalBoxFuture<'static, Result<FetchedPage>>)> {
        let ticket = self.list.ticket()?;
        let chain = self.chain.clone();
        let fetch = async move { fetch_page(&chain, &chain, ticket, now_secs()).await };
        Some((ticket, fetch.boxed_local()))
    }

    /// Hands back a page started by [`RedPacketClient::launch_refresh`]. A page
    /// for an older actor, category or page is discarded. On `Reclamped` the
    /// caller launches again.
    pub fn apply_refresh(
        &mut self,
        ticket: SyncTicket,
        fetched: Result<FetchedPage>,
    ) -> SyncOutcome {
        match fetched {
            Ok(page) => self.list.apply(page),
            Err(err) => {
                self.list.apply_failure(ticket, &err);
                SyncOutcome::Failed
            }
        }
    }

    pub async fn create(&mut self, request: CreateRequest) -> Result<Attempt> {
        self.submit(Action::Create(request)).await
    }

    pub async fn claim(&mut self, packet_id: PacketId) -> Result<Attempt> {
        self.submit(Action::Claim(packet_id)).await
    }

    pub async fn refund(&mut self, packet_id: PacketId) -> Result<Attempt> {
        self.submit(Action::Refund(packet_id)).await
    }

    pub async fn submit(&mut self, action: Action) -> Result<Attempt> {
        let actor = self
            .actor
            .ok_or_else(|| eyre!("connect a wallet before submitting"))?;
        let attempt = self.run_for(actor, action).await;
        self.settle(&attempt).await;
        Ok(attempt)
    }

    /// Starts an attempt for the connected actor without holding the client.
    /// The finished attempt goes back through [`RedPacketClient::settle`].
    pub fn launch(&self, action: Action) -> Result<LocalBoxFuture<'static, Attempt>> {
        let actor = self
            .actor
            .ok_or_else(|| eyre!("connect a wallet before submitting"))?;
        Ok(self.run_for(actor, action).boxed_local())
    }

    fn run_for(&self, actor: Address, action: Action) -> impl Future<Output = Attempt> + use<C> {
        let orchestrator = Arc::clone(&self.orchestrator);
        async move { orchestrator.run(actor, &action).await }
    }

    /// Reconciles after an attempt: decode once, update the event slot, refresh.
    /// Attempts started before an actor switch are ignored.
    pub async fn settle(&mut self, attempt: &Attempt) {
        let kind = attempt.action;
        if !self.orchestrator.is_current(attempt) {
            debug!(attempt = attempt.id, "ignoring outcome of abandoned attempt");
            return;
        }
        match &attempt.phase {
            Phase::Confirmed { hash } => {
                let events = attempt
                    .receipt
                    .as_ref()
                    .and_then(|receipt| self.decoder.decode(receipt));
                if let Some(events) = events {
                    self.record_events(kind, &events);
                }
                self.status = format!(
                    "{} confirmed in {}",
                    capitalized(kind),
                    short_hex(&format!("{hash:#x}"))
                );
                info!(attempt = attempt.id, action = %kind, "reconciling after confirmation");
                self.refresh().await;
            }
            Phase::Failed(err) => {
                self.status = format!("{} failed: {err}", capitalized(kind));
                if !matches!(err, AttemptError::AlreadyInFlight(_)) {
                    self.push_errors(vec![format!("{kind}: {err}")]);
                }
            }
            other => {
                error!(attempt = attempt.id, phase = ?other, "attempt returned without settling");
            }
        }
    }

    /// A confirmed receipt replaces the slot for its action kind, even when it
    /// carried no matching event.
    fn record_events(&mut self, kind: ActionKind, events: &[DomainEvent]) {
        match kind {
            ActionKind::Create => {
                self.latest_created = events.iter().rev().find_map(|event| match event {
                    DomainEvent::Created(created) => Some(created.clone()),
                    DomainEvent::Claimed(_) => None,
                });
            }
            ActionKind::Claim => {
                self.latest_claimed = events.iter().rev().find_map(|event| match event {
                    DomainEvent::Claimed(claimed) => Some(claimed.clone()),
                    DomainEvent::Created(_) => None,
                });
            }
            ActionKind::Refund => {}
        }
    }

    pub async fn show(&self, raw_id: &str) -> Result<Option<PacketDetails>> {
        let packet_id = parse_packet_id(raw_id)?;
        let Some(mut packet) = self
            .chain
            .packet(packet_id)
            .await
            .wrap_err("failed to read packet")?
        else {
            return Ok(None);
        };
        packet.id = packet_id;
        let metadata = resolve_metadata(&self.chain, std::slice::from_ref(&packet)).await;
        let token = packet
            .token_address()
            .and_then(|address| metadata.get(&address).cloned());
        let claimable = match self.actor {
            Some(actor) => eligibility::check(&self.chain, packet_id, actor).await,
            None => false,
        };
        let actor = self.actor.unwrap_or_default();
        let view = PacketView::merge(packet, token, &actor, now_secs());
        Ok(Some(PacketDetails {
            cover_url: self.cover_url(&view),
            view,
            claimable,
        }))
    }

    pub async fn is_claimable(&self, raw_id: &str) -> bool {
        eligibility::check_raw(&self.chain, raw_id, self.actor).await
    }

    pub async fn stats(&self) -> Stats {
        Stats::load(&self.chain, self.actor).await
    }

    pub fn cover_url(&self, view: &PacketView) -> String {
        resolve_cover_uri(&view.packet.cover_uri, &self.settings.ipfs_gateway)
    }

    /// One line per packet: short id, amount, progress and status.
    pub fn describe(&self, view: &PacketView) -> String {
        format!(
            "{}  {}  Claimed: {}/{}  {}{}",
            short_hex(&format!("{:#x}", view.packet.id)),
            view.amount_label(&self.settings.native_symbol, self.settings.native_decimals),
            view.packet.claimed_shares(),
            view.packet.count,
            view.status,
            if view.refundable { "  (refundable)" } else { "" }
        )
    }

    fn push_errors(&mut self, mut items: Vec<String>) {
        if items.is_empty() {
            return;
        }
        for item in &items {
            error!("{}", item);
        }
        self.errors.append(&mut items);
        if self.errors.len() > MAX_ERRORS {
            let drain = self.errors.len() - MAX_ERRORS;
            self.errors.drain(0..drain);
        }
    }
}

fn capitalized(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Create => "Create",
        ActionKind::Claim => "Claim",
        ActionKind::Refund => "Refund",
    }
}
