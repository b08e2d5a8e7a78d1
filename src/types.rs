use crate::error::InputError;
use primitive_types::{
    H160,
    H256,
    U256,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

pub type Address = H160;
pub type PacketId = H256;
pub type TxHash = H256;
pub type Amount = U256;

/// `0x` followed by 64 hex digits.
pub const PACKET_ID_HEX_LEN: usize = 66;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Native,
    Fungible,
    NonFungible,
}

impl Variant {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Variant::Native),
            1 => Some(Variant::Fungible),
            2 => Some(Variant::NonFungible),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            Variant::Native => 0,
            Variant::Fungible => 1,
            Variant::NonFungible => 2,
        }
    }

    pub fn is_token_backed(self) -> bool {
        !matches!(self, Variant::Native)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Variant::Native => "Native",
            Variant::Fungible => "Fungible",
            Variant::NonFungible => "NonFungible",
        };
        write!(f, "{name}")
    }
}

/// Read-through projection of one packet as the ledger last reported it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub id: PacketId,
    pub creator: Address,
    pub total_amount: Amount,
    pub remaining_amount: Amount,
    pub count: u64,
    pub remaining: u64,
    pub expire_time: u64,
    pub is_random: bool,
    pub cover_uri: String,
    /// Zero for the native variant.
    pub token: Address,
    pub variant: Variant,
    #[serde(default)]
    pub item_ids: Vec<U256>,
}

impl Packet {
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    pub fn claimed_shares(&self) -> u64 {
        self.count.saturating_sub(self.remaining)
    }

    /// `remaining <= count` and `remaining_amount <= total_amount`.
    pub fn holds_invariants(&self) -> bool {
        self.remaining <= self.count && self.remaining_amount <= self.total_amount
    }

    pub fn token_address(&self) -> Option<Address> {
        if self.variant.is_token_backed() && !self.token.is_zero() {
            Some(self.token)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub symbol: String,
    /// Only fungible tokens carry a precision.
    pub decimals: Option<u8>,
}

/// Parses a user supplied packet identifier. Only the exact `0x` + 64 hex digit form
/// is accepted, so partially typed ids never reach the ledger.
pub fn parse_packet_id(raw: &str) -> Result<PacketId, InputError> {
    let trimmed = raw.trim();
    if trimmed.len() != PACKET_ID_HEX_LEN {
        return Err(InputError::MalformedPacketId {
            reason: format!(
                "expected {PACKET_ID_HEX_LEN} characters, got {}",
                trimmed.len()
            ),
        });
    }
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| InputError::MalformedPacketId {
            reason: "missing 0x prefix".to_string(),
        })?;
    let bytes = hex::decode(digits).map_err(|e| InputError::MalformedPacketId {
        reason: e.to_string(),
    })?;
    Ok(PacketId::from_slice(&bytes))
}

pub fn parse_address(raw: &str) -> Result<Address, InputError> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let bytes = hex::decode(digits).map_err(|e| InputError::MalformedAddress {
        raw: raw.to_string(),
        reason: e.to_string(),
    })?;
    if bytes.len() != Address::len_bytes() {
        return Err(InputError::MalformedAddress {
            raw: raw.to_string(),
            reason: format!("expected 20 bytes, got {}", bytes.len()),
        });
    }
    Ok(Address::from_slice(&bytes))
}
