use crate::{
    expiry::{
        PacketStatus,
        is_expired_at,
        is_refundable_at,
    },
    format::format_units,
    ledger::{
        ListCategory,
        PacketLedger,
        TokenReader,
    },
    types::{
        Address,
        Packet,
        TokenMetadata,
        Variant,
    },
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use itertools::Itertools;
use std::collections::HashMap;
use tracing::{
    debug,
    warn,
};

pub const DEFAULT_PAGE_SIZE: u64 = 10;

/// A packet merged with everything needed to render it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PacketView {
    pub packet: Packet,
    pub token: Option<TokenMetadata>,
    pub status: PacketStatus,
    pub expired: bool,
    pub refundable: bool,
}

impl PacketView {
    pub fn merge(
        packet: Packet,
        token: Option<TokenMetadata>,
        actor: &Address,
        now: u64,
    ) -> Self {
        Self {
            status: PacketStatus::of(&packet, now),
            expired: is_expired_at(&packet, now),
            refundable: is_refundable_at(&packet, actor, now),
            token,
            packet,
        }
    }

    /// `1.5 MON`, `100 USDC`, `3 PUNK`. A fungible amount whose decimals could
    /// not be read is shown in base units: `2500000 USDC (base units)`.
    pub fn amount_label(&self, native_symbol: &str, native_decimals: u8) -> String {
        let symbol = self.token.as_ref().map(|t| t.symbol.as_str());
        match self.packet.variant {
            Variant::Native => format!(
                "{} {native_symbol}",
                format_units(self.packet.total_amount, native_decimals)
            ),
            Variant::Fungible => {
                let symbol = symbol.unwrap_or("tokens");
                match self.token.as_ref().and_then(|t| t.decimals) {
                    Some(decimals) => format!(
                        "{} {symbol}",
                        format_units(self.packet.total_amount, decimals)
                    ),
                    None => format!("{} {symbol} (base units)", self.packet.total_amount),
                }
            }
            Variant::NonFungible => format!(
                "{} {}",
                self.packet.item_ids.len(),
                symbol.unwrap_or("items")
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ListQuery {
    pub actor: Address,
    pub category: ListCategory,
    pub page: u64,
    pub page_size: u64,
}

impl ListQuery {
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.page_size)
    }
}

/// Identifies the dependency values a fetch was started for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SyncTicket {
    pub generation: u64,
    pub query: ListQuery,
}

#[derive(Clone, Debug)]
pub struct FetchedPage {
    pub ticket: SyncTicket,
    pub total: u64,
    pub items: Vec<PacketView>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncOutcome {
    Applied,
    /// The response belonged to an older actor/category/page and was dropped.
    Discarded,
    /// The page fell beyond the last page and was clamped; fetch again.
    Reclamped,
    /// No actor connected, nothing to fetch.
    Idle,
    Failed,
}

pub fn total_pages(total: u64, page_size: u64) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(page_size)
}

/// Holds the displayed page for one actor and keeps it keyed to the current
/// actor, category and page. Every dependency change bumps the generation.
#[derive(Debug)]
pub struct ListSynchronizer {
    page_size: u64,
    actor: Option<Address>,
    category: ListCategory,
    page: u64,
    generation: u64,
    loaded_generation: Option<u64>,
    total: u64,
    items: Vec<PacketView>,
}

impl ListSynchronizer {
    pub fn new(page_size: u64) -> Self {
        Self {
            page_size: page_size.max(1),
            actor: None,
            category: ListCategory::Created,
            page: 1,
            generation: 0,
            loaded_generation: None,
            total: 0,
            items: Vec::new(),
        }
    }

    pub fn items(&self) -> &[PacketView] {
        &self.items
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn category(&self) -> ListCategory {
        self.category
    }

    pub fn actor(&self) -> Option<Address> {
        self.actor
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn total_pages(&self) -> u64 {
        total_pages(self.total, self.page_size)
    }

    /// Clears the list immediately; personal data never outlives an identity switch.
    pub fn set_actor(&mut self, actor: Option<Address>) -> bool {
        if self.actor == actor {
            return false;
        }
        self.actor = actor;
        self.page = 1;
        self.clear();
        self.invalidate();
        true
    }

    pub fn set_category(&mut self, category: ListCategory) -> bool {
        if self.category == category {
            return false;
        }
        self.category = category;
        self.page = 1;
        self.clear();
        self.invalidate();
        true
    }

    /// Clamps to `[1, total_pages]`; a request that lands on the current page is a no-op.
    pub fn go_to_page(&mut self, page: u64) -> bool {
        let last = self.total_pages().max(1);
        let target = page.clamp(1, last);
        if target == self.page {
            return false;
        }
        self.page = target;
        self.invalidate();
        true
    }

    pub fn next_page(&mut self) -> bool {
        self.go_to_page(self.page.saturating_add(1))
    }

    pub fn prev_page(&mut self) -> bool {
        self.go_to_page(self.page.saturating_sub(1))
    }

    pub fn ticket(&self) -> Option<SyncTicket> {
        let actor = self.actor?;
        Some(SyncTicket {
            generation: self.generation,
            query: ListQuery {
                actor,
                category: self.category,
                page: self.page,
                page_size: self.page_size,
            },
        })
    }

    pub fn apply(&mut self, fetched: FetchedPage) -> SyncOutcome {
        if fetched.ticket.generation != self.generation {
            debug!(
                stale = fetched.ticket.generation,
                current = self.generation,
                "discarding superseded page"
            );
            return SyncOutcome::Discarded;
        }
        self.total = fetched.total;
        let last = self.total_pages().max(1);
        if self.page > last {
            self.page = last;
            self.invalidate();
            return SyncOutcome::Reclamped;
        }
        self.items = fetched.items;
        self.loaded_generation = Some(self.generation);
        SyncOutcome::Applied
    }

    /// A failed read keeps what is on screen for the same dependencies and shows
    /// nothing otherwise. The next poll is expected to recover.
    pub fn apply_failure(&mut self, ticket: SyncTicket, err: &color_eyre::Report) {
        if ticket.generation != self.generation {
            return;
        }
        warn!(?err, page = ticket.query.page, "packet list refresh failed");
        if self.loaded_generation != Some(self.generation) {
            self.items.clear();
        }
    }

    pub async fn refresh<L, T>(&mut self, ledger: &L, tokens: &T, now: u64) -> SyncOutcome
    where
        L: PacketLedger,
        T: TokenReader,
    {
        loop {
            let Some(ticket) = self.ticket() else {
                return SyncOutcome::Idle;
            };
            match fetch_page(ledger, tokens, ticket, now).await {
                Ok(fetched) => match self.apply(fetched) {
                    SyncOutcome::Reclamped => continue,
                    outcome => return outcome,
                },
                Err(err) => {
                    self.apply_failure(ticket, &err);
                    return SyncOutcome::Failed;
                }
            }
        }
    }

    fn invalidate(&mut self) {
        self.generation += 1;
    }

    fn clear(&mut self) {
        self.items.clear();
        self.total = 0;
        self.loaded_generation = None;
    }
}

/// Resolves one page: id slice, then records in slice order, then token metadata.
pub async fn fetch_page<L, T>(
    ledger: &L,
    tokens: &T,
    ticket: SyncTicket,
    now: u64,
) -> Result<FetchedPage>
where
    L: PacketLedger,
    T: TokenReader,
{
    let query = ticket.query;
    let page = ledger
        .user_packets(query.actor, query.category, query.offset(), query.page_size)
        .await
        .wrap_err_with(|| format!("failed to list {:?} packets", query.category))?;
    if page.ids.is_empty() {
        return Ok(FetchedPage {
            ticket,
            total: page.total,
            items: Vec::new(),
        });
    }

    let records = ledger
        .packets(&page.ids)
        .await
        .wrap_err("failed to resolve packet details")?;
    if records.len() != page.ids.len() {
        return Err(eyre!(
            "ledger returned {} records for {} ids",
            records.len(),
            page.ids.len()
        ));
    }
    let packets: Vec<Packet> = page
        .ids
        .iter()
        .zip(records)
        .map(|(id, mut packet)| {
            packet.id = *id;
            packet
        })
        .collect();

    let metadata = resolve_metadata(tokens, &packets).await;
    let items = packets
        .into_iter()
        .map(|packet| {
            if !packet.holds_invariants() {
                warn!(
                    packet = %format!("{:#x}", packet.id),
                    remaining = packet.remaining,
                    count = packet.count,
                    "packet violates remaining <= count or amount bounds"
                );
            }
            let token = packet
                .token_address()
                .and_then(|address| metadata.get(&address).cloned());
            PacketView::merge(packet, token, &query.actor, now)
        })
        .collect();

    Ok(FetchedPage {
        ticket,
        total: page.total,
        items,
    })
}

/// Fungible and non-fungible tokens are resolved concurrently; a failed batch
/// leaves its tokens without metadata.
pub async fn resolve_metadata<T: TokenReader>(
    tokens: &T,
    packets: &[Packet],
) -> HashMap<Address, TokenMetadata> {
    let addresses_of = |variant: Variant| -> Vec<Address> {
        packets
            .iter()
            .filter(|p| p.variant == variant)
            .filter_map(Packet::token_address)
            .unique()
            .collect()
    };
    let fungible = addresses_of(Variant::Fungible);
    let non_fungible = addresses_of(Variant::NonFungible);

    let (mut resolved, nft) = futures::join!(
        fungible_metadata(tokens, &fungible),
        non_fungible_metadata(tokens, &non_fungible)
    );
    resolved.extend(nft);
    resolved
}

async fn fungible_metadata<T: TokenReader>(
    tokens: &T,
    addresses: &[Address],
) -> HashMap<Address, TokenMetadata> {
    if addresses.is_empty() {
        return HashMap::new();
    }
    let (symbols, decimals) =
        futures::join!(tokens.symbols(addresses), tokens.decimals(addresses));
    let symbols = match symbols {
        Ok(symbols) if symbols.len() == addresses.len() => symbols,
        Ok(symbols) => {
            warn!(
                expected = addresses.len(),
                got = symbols.len(),
                "symbol batch length mismatch"
            );
            return HashMap::new();
        }
        Err(err) => {
            warn!(?err, "fungible symbol batch failed");
            return HashMap::new();
        }
    };
    let decimals: Vec<Option<u8>> = match decimals {
        Ok(decimals) if decimals.len() == addresses.len() => {
            decimals.into_iter().map(Some).collect()
        }
        other => {
            if let Err(err) = other {
                warn!(?err, "fungible decimals batch failed");
            }
            vec![None; addresses.len()]
        }
    };
    addresses
        .iter()
        .zip(symbols.into_iter().zip(decimals))
        .map(|(address, (symbol, decimals))| (*address, TokenMetadata { symbol, decimals }))
        .collect()
}

async fn non_fungible_metadata<T: TokenReader>(
    tokens: &T,
    addresses: &[Address],
) -> HashMap<Address, TokenMetadata> {
    if addresses.is_empty() {
        return HashMap::new();
    }
    match tokens.symbols(addresses).await {
        Ok(symbols) if symbols.len() == addresses.len() => addresses
            .iter()
            .zip(symbols)
            .map(|(address, symbol)| {
                (
                    *address,
                    TokenMetadata {
                        symbol,
                        decimals: None,
                    },
                )
            })
            .collect(),
        Ok(_) => HashMap::new(),
        Err(err) => {
            warn!(?err, "non-fungible symbol batch failed");
            HashMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::{
        FakeLedger,
        sample_packet,
    };
    use primitive_types::U256;
    use proptest::prelude::*;

    const LEDGER: Address = primitive_types::H160([0xee; 20]);
    const ALICE: Address = primitive_types::H160([0xa1; 20]);
    const BOB: Address = primitive_types::H160([0xb0; 20]);
    const USDC: Address = primitive_types::H160([0x20; 20]);
    const PUNK: Address = primitive_types::H160([0x30; 20]);

    fn seeded(count: u64) -> FakeLedger {
        let fake = FakeLedger::new(LEDGER);
        for n in 0..count {
            fake.add_packet(sample_packet(n + 1, ALICE, Variant::Native, fake.now() + 60));
        }
        fake
    }

    #[test]
    fn total_pages__is_ceiling_division() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(1, 10), 1);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
    }

    #[tokio::test]
    async fn refresh__resolves_page_in_id_order() {
        // given
        let fake = seeded(12);
        let mut sync = ListSynchronizer::new(DEFAULT_PAGE_SIZE);
        sync.set_actor(Some(ALICE));

        // when
        let outcome = sync.refresh(&fake, &fake, fake.now()).await;

        // then
        assert_eq!(outcome, SyncOutcome::Applied);
        assert_eq!(sync.total_pages(), 2);
        let ids: Vec<_> = sync.items().iter().map(|v| v.packet.id).collect();
        let expected: Vec<_> = fake.created_by(ALICE)[..10].to_vec();
        assert_eq!(ids, expected);
        assert!(sync.items().iter().all(|v| v.status == PacketStatus::Active));
    }

    #[tokio::test]
    async fn go_to_page__clamps_and_is_noop_at_bounds() {
        let fake = seeded(12);
        let mut sync = ListSynchronizer::new(DEFAULT_PAGE_SIZE);
        sync.set_actor(Some(ALICE));
        sync.refresh(&fake, &fake, fake.now()).await;

        assert!(!sync.prev_page());
        assert!(sync.go_to_page(99));
        assert_eq!(sync.page(), 2);
        assert!(!sync.next_page());
        sync.refresh(&fake, &fake, fake.now()).await;
        assert_eq!(sync.items().len(), 2);
    }

    #[tokio::test]
    async fn set_category__resets_page_to_first() {
        let fake = seeded(25);
        let mut sync = ListSynchronizer::new(DEFAULT_PAGE_SIZE);
        sync.set_actor(Some(ALICE));
        sync.refresh(&fake, &fake, fake.now()).await;
        sync.go_to_page(3);

        assert!(sync.set_category(ListCategory::Claimed));
        assert_eq!(sync.page(), 1);
        assert!(sync.items().is_empty());
    }

    #[tokio::test]
    async fn apply__late_response_for_old_actor_is_discarded() {
        // given
        let fake = seeded(25);
        let mut sync = ListSynchronizer::new(DEFAULT_PAGE_SIZE);
        sync.set_actor(Some(ALICE));
        sync.refresh(&fake, &fake, fake.now()).await;
        sync.go_to_page(2);
        let in_flight = sync.ticket().unwrap();
        let late = fetch_page(&fake, &fake, in_flight, fake.now()).await.unwrap();

        // when
        sync.set_actor(None);
        let displayed_after_disconnect = sync.items().len();
        let outcome = sync.apply(late);

        // then
        assert_eq!(displayed_after_disconnect, 0);
        assert_eq!(outcome, SyncOutcome::Discarded);
        assert!(sync.items().is_empty());
        assert_eq!(sync.ticket(), None);
    }

    #[tokio::test]
    async fn refresh__page_beyond_total_is_clamped_to_last() {
        let fake = seeded(12);
        let mut sync = ListSynchronizer::new(DEFAULT_PAGE_SIZE);
        sync.set_actor(Some(ALICE));
        sync.refresh(&fake, &fake, fake.now()).await;
        sync.go_to_page(2);
        fake.forget_created(ALICE, 5);

        let outcome = sync.refresh(&fake, &fake, fake.now()).await;

        assert_eq!(outcome, SyncOutcome::Applied);
        assert_eq!(sync.page(), 1);
        assert_eq!(sync.items().len(), 7);
    }

    #[tokio::test]
    async fn refresh__emptied_list_returns_to_first_page() {
        // given
        let fake = seeded(25);
        let mut sync = ListSynchronizer::new(DEFAULT_PAGE_SIZE);
        sync.set_actor(Some(ALICE));
        sync.refresh(&fake, &fake, fake.now()).await;
        sync.go_to_page(3);
        sync.refresh(&fake, &fake, fake.now()).await;
        assert_eq!(sync.items().len(), 5);
        fake.forget_created(ALICE, 25);

        // when
        let outcome = sync.refresh(&fake, &fake, fake.now()).await;

        // then
        assert_eq!(outcome, SyncOutcome::Applied);
        assert_eq!(sync.page(), 1);
        assert_eq!(sync.total_pages(), 0);
        assert!(sync.items().is_empty());
    }

    #[tokio::test]
    async fn refresh__read_failure_keeps_same_page_and_blanks_new_page() {
        let fake = seeded(12);
        let mut sync = ListSynchronizer::new(DEFAULT_PAGE_SIZE);
        sync.set_actor(Some(ALICE));
        sync.refresh(&fake, &fake, fake.now()).await;

        fake.fail_reads(true);
        sync.refresh(&fake, &fake, fake.now()).await;
        assert_eq!(sync.items().len(), 10);

        sync.next_page();
        sync.refresh(&fake, &fake, fake.now()).await;
        assert!(sync.items().is_empty());
    }

    #[tokio::test]
    async fn fetch_page__enriches_token_packets_with_metadata() {
        // given
        let fake = FakeLedger::new(LEDGER);
        fake.add_fungible_token(USDC, "USDC", 6);
        fake.add_non_fungible_token(PUNK, "PUNK");
        let mut fungible = sample_packet(1, BOB, Variant::Fungible, fake.now() + 60);
        fungible.token = USDC;
        fungible.total_amount = U256::from(2_500_000u64);
        fungible.remaining_amount = fungible.total_amount;
        let mut nft = sample_packet(2, BOB, Variant::NonFungible, fake.now() + 60);
        nft.token = PUNK;
        nft.item_ids = vec![U256::from(4u64), U256::from(5u64)];
        fake.add_packet(fungible);
        fake.add_packet(nft);
        fake.add_packet(sample_packet(3, BOB, Variant::Native, fake.now() + 60));
        let mut sync = ListSynchronizer::new(DEFAULT_PAGE_SIZE);
        sync.set_actor(Some(BOB));

        // when
        sync.refresh(&fake, &fake, fake.now()).await;

        // then
        let labels: Vec<String> = sync
            .items()
            .iter()
            .map(|v| v.amount_label("MON", 18))
            .collect();
        assert_eq!(labels, vec!["2.5 USDC", "2 PUNK", "1 MON"]);
        assert_eq!(
            sync.items()[0].token,
            Some(TokenMetadata {
                symbol: "USDC".to_string(),
                decimals: Some(6)
            })
        );
    }

    #[test]
    fn amount_label__unknown_decimals_shows_base_units() {
        // given
        let mut packet = sample_packet(1, BOB, Variant::Fungible, 100);
        packet.total_amount = U256::from(2_500_000u64);
        let symbol_only = TokenMetadata {
            symbol: "USDC".to_string(),
            decimals: None,
        };

        // when
        let with_symbol = PacketView::merge(packet.clone(), Some(symbol_only), &ALICE, 0);
        let without_metadata = PacketView::merge(packet, None, &ALICE, 0);

        // then
        assert_eq!(
            with_symbol.amount_label("MON", 18),
            "2500000 USDC (base units)"
        );
        assert_eq!(
            without_metadata.amount_label("MON", 18),
            "2500000 tokens (base units)"
        );
    }

    #[tokio::test]
    async fn merge__flags_refundable_only_for_expired_own_packets() {
        let fake = FakeLedger::new(LEDGER);
        fake.add_packet(sample_packet(1, ALICE, Variant::Native, fake.now() - 10));
        let mut sync = ListSynchronizer::new(DEFAULT_PAGE_SIZE);
        sync.set_actor(Some(ALICE));
        sync.refresh(&fake, &fake, fake.now()).await;

        let view = &sync.items()[0];
        assert!(view.expired);
        assert!(view.refundable);
        assert_eq!(view.status, PacketStatus::Expired);
    }

    proptest! {
        #[test]
        fn go_to_page__always_lands_within_bounds(
            total in 0u64..200,
            page_size in 1u64..25,
            requested in 0u64..50,
        ) {
            let mut sync = ListSynchronizer::new(page_size);
            sync.set_actor(Some(ALICE));
            let ticket = sync.ticket().unwrap();
            sync.apply(FetchedPage { ticket, total, items: Vec::new() });
            sync.go_to_page(requested);
            let last = total_pages(total, page_size).max(1);
            prop_assert!(sync.page() >= 1 && sync.page() <= last);
        }

        #[test]
        fn synchronized_views_hold_packet_invariants(
            shapes in proptest::collection::vec((1u64..50, 0u64..50, 1u64..1_000), 1..15)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let fake = FakeLedger::new(LEDGER);
            for (n, (count, claimed, total)) in shapes.iter().enumerate() {
                let mut packet = sample_packet(n as u64 + 1, ALICE, Variant::Native, fake.now() + 60);
                packet.count = *count;
                packet.remaining = count.saturating_sub(*claimed);
                packet.total_amount = U256::from(*total);
                packet.remaining_amount = U256::from(total * packet.remaining / count);
                fake.add_packet(packet);
            }
            let mut sync = ListSynchronizer::new(DEFAULT_PAGE_SIZE);
            sync.set_actor(Some(ALICE));
            runtime.block_on(sync.refresh(&fake, &fake, fake.now()));
            prop_assert!(sync.items().iter().all(|v| v.packet.holds_invariants()));
            prop_assert_eq!(sync.items().len() as u64, shapes.len().min(10) as u64);
        }
    }
}
