//! In-memory ledger, wallet and token contracts for tests.

use crate::{
    client::{
        ClientSettings,
        RedPacketClient,
    },
    decoder::{
        ClaimedEvent,
        CreatedEvent,
        EventSchema,
        PACKET_CLAIMED_TOPIC,
        PACKET_CREATED_TOPIC,
    },
    expiry::{
        is_expired_at,
        now_secs,
    },
    ledger::{
        ClaimSimulation,
        LedgerCall,
        LedgerTransport,
        ListCategory,
        PacketLedger,
        PacketPage,
        RawLog,
        Receipt,
        ReceiptStatus,
        SignedTransaction,
        TokenReader,
        WalletSigner,
    },
    types::{
        Address,
        Amount,
        Packet,
        PacketId,
        TxHash,
        Variant,
    },
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use primitive_types::{
    H256,
    U256,
};
use std::{
    collections::{
        HashMap,
        HashSet,
    },
    sync::{
        Arc,
        Mutex,
    },
};
use tokio::sync::watch;

const FIRST_CREATED_ID: u64 = 0x1_0000;

pub fn sample_packet(n: u64, creator: Address, variant: Variant, expire_time: u64) -> Packet {
    let (total_amount, token, item_ids) = match variant {
        Variant::Native => (U256::exp10(18), Address::zero(), Vec::new()),
        Variant::Fungible => (U256::from(1_000u64), Address::repeat_byte(0x20), Vec::new()),
        Variant::NonFungible => (
            U256::from(10u64),
            Address::repeat_byte(0x30),
            (1..=10u64).map(U256::from).collect(),
        ),
    };
    Packet {
        id: PacketId::from_low_u64_be(n),
        creator,
        total_amount,
        remaining_amount: total_amount,
        count: 10,
        remaining: 10,
        expire_time,
        is_random: false,
        cover_uri: format!("ipfs://cover-{n}"),
        token,
        variant,
        item_ids,
    }
}

fn word(value: U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, limb) in value.0.iter().enumerate() {
        out[24 - i * 8..32 - i * 8].copy_from_slice(&limb.to_be_bytes());
    }
    out
}

fn address_word(address: Address) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(address.as_bytes());
    out
}

pub fn encode_created_log(ledger: Address, event: &CreatedEvent) -> RawLog {
    let mut data = Vec::new();
    data.extend_from_slice(&word(event.total_amount));
    data.extend_from_slice(&word(U256::from(event.count)));
    data.extend_from_slice(&word(U256::from(event.expire_time)));
    data.extend_from_slice(&word(U256::from(u64::from(event.is_random))));
    data.extend_from_slice(&word(U256::from(7 * 32u64)));
    data.extend_from_slice(&address_word(event.token));
    data.extend_from_slice(&word(U256::from(event.variant.tag())));
    let cover = event.cover_uri.as_bytes();
    data.extend_from_slice(&word(U256::from(cover.len())));
    data.extend_from_slice(cover);
    data.resize(data.len().div_ceil(32) * 32, 0);
    RawLog {
        address: ledger,
        topics: vec![
            PACKET_CREATED_TOPIC,
            event.packet_id,
            H256(address_word(event.creator)),
        ],
        data,
    }
}

pub fn encode_claimed_log(ledger: Address, event: &ClaimedEvent) -> RawLog {
    let mut data = Vec::new();
    data.extend_from_slice(&word(event.amount));
    data.extend_from_slice(&word(event.item_id));
    RawLog {
        address: ledger,
        topics: vec![
            PACKET_CLAIMED_TOPIC,
            event.packet_id,
            H256(address_word(event.claimer)),
        ],
        data,
    }
}

#[derive(Clone, Debug)]
struct FakeToken {
    symbol: String,
    decimals: Option<u8>,
}

#[derive(Debug, Default)]
struct FakeState {
    clock_offset: i64,
    next_packet: u64,
    next_tx: u64,
    packets: HashMap<PacketId, Packet>,
    created: HashMap<Address, Vec<PacketId>>,
    claimed: HashMap<Address, Vec<PacketId>>,
    claimers: HashMap<PacketId, HashSet<Address>>,
    tokens: HashMap<Address, FakeToken>,
    allowances: HashMap<(Address, Address, Address), Amount>,
    operators: HashMap<(Address, Address, Address), bool>,
    mined: HashMap<TxHash, (&'static str, Receipt)>,
    calls: Vec<String>,
    reject_next_signature: bool,
    fail_next_confirmation: Option<String>,
    drop_next_logs: bool,
    fail_reads: bool,
    simulations: usize,
}

/// Emulates the ledger contract, its tokens and a wallet in memory. Clones share
/// state.
#[derive(Clone, Debug)]
pub struct FakeLedger {
    ledger: Address,
    state: Arc<Mutex<FakeState>>,
    held: Arc<watch::Sender<bool>>,
}

impl FakeLedger {
    pub fn new(ledger: Address) -> Self {
        let (held, _) = watch::channel(false);
        Self {
            ledger,
            state: Arc::new(Mutex::new(FakeState {
                next_packet: FIRST_CREATED_ID,
                ..FakeState::default()
            })),
            held: Arc::new(held),
        }
    }

    pub fn address(&self) -> Address {
        self.ledger
    }

    /// Ledger clock in epoch seconds.
    pub fn now(&self) -> u64 {
        let offset = self.lock().clock_offset;
        now_secs().saturating_add_signed(offset)
    }

    pub fn advance(&self, secs: u64) {
        self.lock().clock_offset += secs as i64;
    }

    pub fn add_packet(&self, packet: Packet) {
        let mut state = self.lock();
        state
            .created
            .entry(packet.creator)
            .or_default()
            .push(packet.id);
        state.packets.insert(packet.id, packet);
    }

    pub fn stored_packet(&self, id: PacketId) -> Option<Packet> {
        self.lock().packets.get(&id).cloned()
    }

    pub fn created_by(&self, actor: Address) -> Vec<PacketId> {
        self.lock().created.get(&actor).cloned().unwrap_or_default()
    }

    pub fn claimed_by(&self, actor: Address) -> Vec<PacketId> {
        self.lock().claimed.get(&actor).cloned().unwrap_or_default()
    }

    /// Drops the newest `n` entries from the actor's created list.
    pub fn forget_created(&self, actor: Address, n: usize) {
        let mut state = self.lock();
        if let Some(ids) = state.created.get_mut(&actor) {
            let keep = ids.len().saturating_sub(n);
            ids.truncate(keep);
        }
    }

    pub fn add_fungible_token(&self, token: Address, symbol: &str, decimals: u8) {
        self.lock().tokens.insert(
            token,
            FakeToken {
                symbol: symbol.to_string(),
                decimals: Some(decimals),
            },
        );
    }

    pub fn add_non_fungible_token(&self, token: Address, symbol: &str) {
        self.lock().tokens.insert(
            token,
            FakeToken {
                symbol: symbol.to_string(),
                decimals: None,
            },
        );
    }

    /// Allowance granted by `owner` to this ledger.
    pub fn set_allowance(&self, token: Address, owner: Address, amount: Amount) {
        let ledger = self.ledger;
        self.lock().allowances.insert((token, owner, ledger), amount);
    }

    pub fn set_operator_approval(&self, token: Address, owner: Address, approved: bool) {
        let ledger = self.ledger;
        self.lock().operators.insert((token, owner, ledger), approved);
    }

    pub fn reject_next_signature(&self) {
        self.lock().reject_next_signature = true;
    }

    pub fn fail_next_confirmation(&self, detail: &str) {
        self.lock().fail_next_confirmation = Some(detail.to_string());
    }

    /// The next mined receipt succeeds but carries no logs.
    pub fn drop_next_logs(&self) {
        self.lock().drop_next_logs = true;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Signature requests block until [`FakeLedger::release_signatures`].
    pub fn hold_signatures(&self) {
        self.held.send_replace(true);
    }

    pub fn release_signatures(&self) {
        self.held.send_replace(false);
    }

    pub fn simulations(&self) -> usize {
        self.lock().simulations
    }

    /// `sign:<method>`, `submit:<method>` and `confirm:<method>` in call order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read(&self) -> Result<std::sync::MutexGuard<'_, FakeState>> {
        let state = self.lock();
        if state.fail_reads {
            return Err(eyre!("ledger node unreachable"));
        }
        Ok(state)
    }

    fn execute(&self, from: Address, call: &LedgerCall) -> Result<Vec<RawLog>, String> {
        let now = self.now();
        let ledger = self.ledger;
        let mut state = self.lock();
        match call {
            LedgerCall::Approve {
                token,
                spender,
                amount,
            } => {
                state.allowances.insert((*token, from, *spender), *amount);
                Ok(Vec::new())
            }
            LedgerCall::SetApprovalForAll {
                token,
                operator,
                approved,
            } => {
                state.operators.insert((*token, from, *operator), *approved);
                Ok(Vec::new())
            }
            LedgerCall::CreateNativePacket {
                count,
                expire_time,
                is_random,
                cover_uri,
                value,
            } => {
                if *count == 0 || value.is_zero() {
                    return Err("invalid packet".to_string());
                }
                Ok(vec![state.create(
                    ledger,
                    from,
                    Variant::Native,
                    *count,
                    *value,
                    *expire_time,
                    *is_random,
                    cover_uri,
                    Address::zero(),
                    Vec::new(),
                )])
            }
            LedgerCall::CreateFungiblePacket {
                count,
                expire_time,
                is_random,
                cover_uri,
                token,
                amount,
            } => {
                let key = (*token, from, ledger);
                let allowance = state.allowances.get(&key).copied().unwrap_or_default();
                if allowance < *amount {
                    return Err("insufficient allowance".to_string());
                }
                if *count == 0 || amount.is_zero() {
                    return Err("invalid packet".to_string());
                }
                state.allowances.insert(key, allowance - *amount);
                Ok(vec![state.create(
                    ledger,
                    from,
                    Variant::Fungible,
                    *count,
                    *amount,
                    *expire_time,
                    *is_random,
                    cover_uri,
                    *token,
                    Vec::new(),
                )])
            }
            LedgerCall::CreateNonFungiblePacket {
                count,
                expire_time,
                cover_uri,
                token,
                item_ids,
            } => {
                let approved = state
                    .operators
                    .get(&(*token, from, ledger))
                    .copied()
                    .unwrap_or(false);
                if !approved {
                    return Err("operator not approved".to_string());
                }
                if *count == 0 || *count > item_ids.len() as u64 {
                    return Err("invalid packet".to_string());
                }
                Ok(vec![state.create(
                    ledger,
                    from,
                    Variant::NonFungible,
                    *count,
                    U256::from(item_ids.len()),
                    *expire_time,
                    false,
                    cover_uri,
                    *token,
                    item_ids.clone(),
                )])
            }
            LedgerCall::ClaimPacket { packet_id } => {
                let (amount, item_id) = state.claim_share(*packet_id, from, now)?;
                let packet = state
                    .packets
                    .get_mut(packet_id)
                    .ok_or_else(|| "packet not found".to_string())?;
                packet.remaining -= 1;
                packet.remaining_amount = packet.remaining_amount.saturating_sub(amount);
                state.claimers.entry(*packet_id).or_default().insert(from);
                state.claimed.entry(from).or_default().push(*packet_id);
                Ok(vec![encode_claimed_log(
                    ledger,
                    &ClaimedEvent {
                        packet_id: *packet_id,
                        claimer: from,
                        amount,
                        item_id,
                    },
                )])
            }
            LedgerCall::Refund { packet_id } => {
                let packet = state
                    .packets
                    .get_mut(packet_id)
                    .ok_or_else(|| "packet not found".to_string())?;
                if packet.creator != from {
                    return Err("not the creator".to_string());
                }
                if !is_expired_at(packet, now) {
                    return Err("packet not expired".to_string());
                }
                if packet.remaining_amount.is_zero() {
                    return Err("nothing to refund".to_string());
                }
                packet.remaining_amount = U256::zero();
                Ok(Vec::new())
            }
        }
    }
}

impl FakeState {
    #[allow(clippy::too_many_arguments)]
    fn create(
        &mut self,
        ledger: Address,
        creator: Address,
        variant: Variant,
        count: u64,
        total_amount: Amount,
        expire_time: u64,
        is_random: bool,
        cover_uri: &str,
        token: Address,
        item_ids: Vec<U256>,
    ) -> RawLog {
        self.next_packet += 1;
        let packet = Packet {
            id: PacketId::from_low_u64_be(self.next_packet),
            creator,
            total_amount,
            remaining_amount: total_amount,
            count,
            remaining: count,
            expire_time,
            is_random,
            cover_uri: cover_uri.to_string(),
            token,
            variant,
            item_ids,
        };
        let event = CreatedEvent {
            packet_id: packet.id,
            creator,
            total_amount,
            count,
            expire_time,
            is_random,
            cover_uri: packet.cover_uri.clone(),
            token,
            variant,
        };
        self.created.entry(creator).or_default().push(packet.id);
        self.packets.insert(packet.id, packet);
        encode_created_log(ledger, &event)
    }

    /// The share a claim would pay out, or the revert reason.
    fn claim_share(&self, id: PacketId, claimer: Address, now: u64) -> Result<(Amount, U256), String> {
        let packet = self
            .packets
            .get(&id)
            .ok_or_else(|| "packet not found".to_string())?;
        if packet.is_exhausted() {
            return Err("packet fully claimed".to_string());
        }
        if is_expired_at(packet, now) {
            return Err("packet expired".to_string());
        }
        if self
            .claimers
            .get(&id)
            .is_some_and(|claimers| claimers.contains(&claimer))
        {
            return Err("already claimed".to_string());
        }
        match packet.variant {
            Variant::NonFungible => {
                let index = packet.claimed_shares() as usize;
                let item = packet
                    .item_ids
                    .get(index)
                    .copied()
                    .ok_or_else(|| "no items left".to_string())?;
                Ok((U256::one(), item))
            }
            _ => {
                let amount = if packet.remaining == 1 {
                    packet.remaining_amount
                } else {
                    packet.remaining_amount / U256::from(packet.remaining)
                };
                Ok((amount, U256::zero()))
            }
        }
    }
}

impl PacketLedger for FakeLedger {
    async fn packet(&self, id: PacketId) -> Result<Option<Packet>> {
        Ok(self.read()?.packets.get(&id).cloned())
    }

    async fn packets(&self, ids: &[PacketId]) -> Result<Vec<Packet>> {
        let state = self.read()?;
        ids.iter()
            .map(|id| {
                state
                    .packets
                    .get(id)
                    .cloned()
                    .ok_or_else(|| eyre!("unknown packet {id:#x}"))
            })
            .collect()
    }

    async fn user_packets(
        &self,
        actor: Address,
        category: ListCategory,
        offset: u64,
        limit: u64,
    ) -> Result<PacketPage> {
        let state = self.read()?;
        let list = match category {
            ListCategory::Created => state.created.get(&actor),
            ListCategory::Claimed => state.claimed.get(&actor),
        };
        let all = list.map(Vec::as_slice).unwrap_or_default();
        let ids = all
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .copied()
            .collect();
        Ok(PacketPage {
            ids,
            total: all.len() as u64,
        })
    }

    async fn total_packets(&self) -> Result<u64> {
        Ok(self.read()?.packets.len() as u64)
    }

    async fn user_packet_count(&self, actor: Address, category: ListCategory) -> Result<u64> {
        let state = self.read()?;
        let list = match category {
            ListCategory::Created => state.created.get(&actor),
            ListCategory::Claimed => state.claimed.get(&actor),
        };
        Ok(list.map_or(0, |ids| ids.len() as u64))
    }

    async fn simulate_claim(&self, id: PacketId, actor: Address) -> Result<ClaimSimulation> {
        let now = self.now();
        let mut state = self.lock();
        state.simulations += 1;
        if state.fail_reads {
            return Err(eyre!("ledger node unreachable"));
        }
        Ok(match state.claim_share(id, actor, now) {
            Ok((amount, item_id)) => ClaimSimulation::Succeeds { amount, item_id },
            Err(reason) => ClaimSimulation::Reverts { reason },
        })
    }
}

impl TokenReader for FakeLedger {
    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<Amount> {
        let state = self.read()?;
        Ok(state
            .allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn is_approved_for_all(
        &self,
        token: Address,
        owner: Address,
        operator: Address,
    ) -> Result<bool> {
        let state = self.read()?;
        Ok(state
            .operators
            .get(&(token, owner, operator))
            .copied()
            .unwrap_or(false))
    }

    async fn symbols(&self, tokens: &[Address]) -> Result<Vec<String>> {
        let state = self.read()?;
        tokens
            .iter()
            .map(|token| {
                state
                    .tokens
                    .get(token)
                    .map(|t| t.symbol.clone())
                    .ok_or_else(|| eyre!("unknown token {token:#x}"))
            })
            .collect()
    }

    async fn decimals(&self, tokens: &[Address]) -> Result<Vec<u8>> {
        let state = self.read()?;
        tokens
            .iter()
            .map(|token| {
                state
                    .tokens
                    .get(token)
                    .and_then(|t| t.decimals)
                    .ok_or_else(|| eyre!("token {token:#x} has no decimals"))
            })
            .collect()
    }
}

impl WalletSigner for FakeLedger {
    async fn request_signature(
        &self,
        actor: Address,
        call: &LedgerCall,
    ) -> Result<SignedTransaction> {
        self.lock()
            .calls
            .push(format!("sign:{}", call.method_name()));
        let mut held = self.held.subscribe();
        let _ = held.wait_for(|held| !*held).await;
        let mut state = self.lock();
        if std::mem::take(&mut state.reject_next_signature) {
            return Err(eyre!("user rejected the request"));
        }
        Ok(SignedTransaction {
            from: actor,
            call: call.clone(),
            raw: format!("signed:{}", call.method_name()),
        })
    }
}

impl LedgerTransport for FakeLedger {
    async fn submit(&self, tx: &SignedTransaction) -> Result<TxHash> {
        let logs = self.execute(tx.from, &tx.call);
        let mut state = self.lock();
        state.calls.push(format!("submit:{}", tx.call.method_name()));
        state.next_tx += 1;
        let hash = TxHash::from_low_u64_be(0xface_0000 + state.next_tx);
        let (status, mut logs) = match logs {
            Ok(logs) => (ReceiptStatus::Success, logs),
            Err(_) => (ReceiptStatus::Reverted, Vec::new()),
        };
        if std::mem::take(&mut state.drop_next_logs) {
            logs.clear();
        }
        let receipt = Receipt {
            tx_hash: hash,
            block_number: state.next_tx,
            status,
            logs,
        };
        state.mined.insert(hash, (tx.call.method_name(), receipt));
        Ok(hash)
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<Receipt> {
        let mut state = self.lock();
        let (method, receipt) = state
            .mined
            .get(&hash)
            .cloned()
            .ok_or_else(|| eyre!("unknown transaction {hash:#x}"))?;
        state.calls.push(format!("confirm:{method}"));
        if let Some(detail) = state.fail_next_confirmation.take() {
            return Err(eyre!(detail));
        }
        Ok(receipt)
    }
}

pub const TEST_LEDGER: Address = primitive_types::H160([0xee; 20]);

/// A fresh ledger with two funded accounts.
pub struct TestContext {
    ledger: FakeLedger,
    alice: Address,
    bob: Address,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            ledger: FakeLedger::new(TEST_LEDGER),
            alice: Address::repeat_byte(0xa1),
            bob: Address::repeat_byte(0xb0),
        }
    }

    pub fn ledger(&self) -> FakeLedger {
        self.ledger.clone()
    }

    pub fn alice(&self) -> Address {
        self.alice
    }

    pub fn bob(&self) -> Address {
        self.bob
    }

    pub async fn client_for(&self, actor: Address) -> RedPacketClient<FakeLedger> {
        let mut client = RedPacketClient::new(
            self.ledger.clone(),
            EventSchema::for_ledger(TEST_LEDGER),
            ClientSettings::default(),
        );
        client.set_actor(Some(actor)).await;
        client
    }
}
