//! Seams to the outside world: the ledger contract, the token contracts it holds
//! custody of, the wallet that signs, and the transport that mines.

use crate::types::{
    Address,
    Amount,
    Packet,
    PacketId,
    TxHash,
};
use color_eyre::eyre::Result;
use primitive_types::{
    H256,
    U256,
};
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListCategory {
    Created,
    Claimed,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PacketPage {
    pub ids: Vec<PacketId>,
    pub total: u64,
}

/// Outcome of a non-mutating claim dry run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClaimSimulation {
    Succeeds { amount: Amount, item_id: U256 },
    Reverts { reason: String },
}

impl ClaimSimulation {
    pub fn succeeds(&self) -> bool {
        matches!(self, ClaimSimulation::Succeeds { .. })
    }
}

pub trait PacketLedger {
    fn packet(&self, id: PacketId) -> impl Future<Output = Result<Option<Packet>>>;

    /// Order preserving: the n-th record belongs to the n-th id.
    fn packets(&self, ids: &[PacketId]) -> impl Future<Output = Result<Vec<Packet>>>;

    fn user_packets(
        &self,
        actor: Address,
        category: ListCategory,
        offset: u64,
        limit: u64,
    ) -> impl Future<Output = Result<PacketPage>>;

    fn total_packets(&self) -> impl Future<Output = Result<u64>>;

    fn user_packet_count(
        &self,
        actor: Address,
        category: ListCategory,
    ) -> impl Future<Output = Result<u64>>;

    fn simulate_claim(
        &self,
        id: PacketId,
        actor: Address,
    ) -> impl Future<Output = Result<ClaimSimulation>>;
}

pub trait TokenReader {
    fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> impl Future<Output = Result<Amount>>;

    fn is_approved_for_all(
        &self,
        token: Address,
        owner: Address,
        operator: Address,
    ) -> impl Future<Output = Result<bool>>;

    /// Batched read, one symbol per token in input order.
    fn symbols(&self, tokens: &[Address]) -> impl Future<Output = Result<Vec<String>>>;

    /// Batched read, one precision per token in input order.
    fn decimals(&self, tokens: &[Address]) -> impl Future<Output = Result<Vec<u8>>>;
}

/// Every call that needs the actor's signature.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum LedgerCall {
    Approve {
        token: Address,
        spender: Address,
        amount: Amount,
    },
    SetApprovalForAll {
        token: Address,
        operator: Address,
        approved: bool,
    },
    CreateNativePacket {
        count: u64,
        expire_time: u64,
        is_random: bool,
        cover_uri: String,
        value: Amount,
    },
    CreateFungiblePacket {
        count: u64,
        expire_time: u64,
        is_random: bool,
        cover_uri: String,
        token: Address,
        amount: Amount,
    },
    CreateNonFungiblePacket {
        count: u64,
        expire_time: u64,
        cover_uri: String,
        token: Address,
        item_ids: Vec<U256>,
    },
    ClaimPacket {
        packet_id: PacketId,
    },
    Refund {
        packet_id: PacketId,
    },
}

impl LedgerCall {
    pub fn is_approval(&self) -> bool {
        matches!(
            self,
            LedgerCall::Approve { .. } | LedgerCall::SetApprovalForAll { .. }
        )
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            LedgerCall::Approve { .. } => "approve",
            LedgerCall::SetApprovalForAll { .. } => "setApprovalForAll",
            LedgerCall::CreateNativePacket { .. } => "createNativePacket",
            LedgerCall::CreateFungiblePacket { .. } => "createFungiblePacket",
            LedgerCall::CreateNonFungiblePacket { .. } => "createNonFungiblePacket",
            LedgerCall::ClaimPacket { .. } => "claimPacket",
            LedgerCall::Refund { .. } => "refund",
        }
    }
}

/// A call the wallet agreed to sign, opaque to the client.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub from: Address,
    pub call: LedgerCall,
    pub raw: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<H256>,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub status: ReceiptStatus,
    pub logs: Vec<RawLog>,
}

pub trait WalletSigner {
    /// Suspends until the actor accepts or declines. Declining is an `Err`.
    fn request_signature(
        &self,
        actor: Address,
        call: &LedgerCall,
    ) -> impl Future<Output = Result<SignedTransaction>>;
}

pub trait LedgerTransport {
    fn submit(&self, tx: &SignedTransaction) -> impl Future<Output = Result<TxHash>>;

    /// Suspends until the transaction is mined, or fails on timeout.
    fn wait_for_receipt(&self, hash: TxHash) -> impl Future<Output = Result<Receipt>>;
}

mod hex_bytes {
    use serde::{
        Deserialize,
        Deserializer,
        Serializer,
        de::Error,
    };

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        let digits = raw.strip_prefix("0x").unwrap_or(&raw);
        hex::decode(digits).map_err(D::Error::custom)
    }
}
