use crate::{
    error::InputError,
    ledger::LedgerCall,
    types::{
        Address,
        Amount,
        PacketId,
        Variant,
    },
};
use primitive_types::U256;
use std::time::Duration;

pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(3_600);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateRequest {
    pub variant: Variant,
    pub count: u64,
    /// Smallest units. For non-fungible packets the item list is the payload instead.
    pub amount: Amount,
    pub expires_in: Duration,
    pub is_random: bool,
    pub cover_uri: String,
    pub token: Option<Address>,
    pub item_ids: Vec<U256>,
}

impl CreateRequest {
    pub fn native(count: u64, amount: Amount, is_random: bool, cover_uri: impl Into<String>) -> Self {
        Self {
            variant: Variant::Native,
            count,
            amount,
            expires_in: DEFAULT_EXPIRY,
            is_random,
            cover_uri: cover_uri.into(),
            token: None,
            item_ids: Vec::new(),
        }
    }

    pub fn fungible(
        token: Address,
        count: u64,
        amount: Amount,
        is_random: bool,
        cover_uri: impl Into<String>,
    ) -> Self {
        Self {
            variant: Variant::Fungible,
            count,
            amount,
            expires_in: DEFAULT_EXPIRY,
            is_random,
            cover_uri: cover_uri.into(),
            token: Some(token),
            item_ids: Vec::new(),
        }
    }

    /// One share per item.
    pub fn non_fungible(
        token: Address,
        item_ids: Vec<U256>,
        cover_uri: impl Into<String>,
    ) -> Self {
        Self {
            variant: Variant::NonFungible,
            count: item_ids.len() as u64,
            amount: U256::from(item_ids.len()),
            expires_in: DEFAULT_EXPIRY,
            is_random: false,
            cover_uri: cover_uri.into(),
            token: Some(token),
            item_ids,
        }
    }

    pub fn with_expiry(mut self, expires_in: Duration) -> Self {
        self.expires_in = expires_in;
        self
    }

    pub fn validate(&self) -> Result<(), InputError> {
        if self.count == 0 {
            return Err(InputError::ZeroCount);
        }
        match self.variant {
            Variant::Native => {
                if self.amount.is_zero() {
                    return Err(InputError::ZeroAmount);
                }
            }
            Variant::Fungible => {
                self.required_token()?;
                if self.amount.is_zero() {
                    return Err(InputError::ZeroAmount);
                }
            }
            Variant::NonFungible => {
                self.required_token()?;
                if self.item_ids.is_empty() {
                    return Err(InputError::NoItems);
                }
                if self.count > self.item_ids.len() as u64 {
                    return Err(InputError::CountExceedsItems {
                        count: self.count,
                        items: self.item_ids.len(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn required_token(&self) -> Result<Address, InputError> {
        match self.token {
            Some(token) if !token.is_zero() => Ok(token),
            _ => Err(InputError::MissingTokenAddress(self.variant)),
        }
    }

    /// Builds the ledger call with the expiry anchored at `now`.
    pub fn to_call(&self, now: u64) -> Result<LedgerCall, InputError> {
        self.validate()?;
        let expire_time = now.saturating_add(self.expires_in.as_secs());
        let call = match self.variant {
            Variant::Native => LedgerCall::CreateNativePacket {
                count: self.count,
                expire_time,
                is_random: self.is_random,
                cover_uri: self.cover_uri.clone(),
                value: self.amount,
            },
            Variant::Fungible => LedgerCall::CreateFungiblePacket {
                count: self.count,
                expire_time,
                is_random: self.is_random,
                cover_uri: self.cover_uri.clone(),
                token: self.required_token()?,
                amount: self.amount,
            },
            Variant::NonFungible => LedgerCall::CreateNonFungiblePacket {
                count: self.count,
                expire_time,
                cover_uri: self.cover_uri.clone(),
                token: self.required_token()?,
                item_ids: self.item_ids.clone(),
            },
        };
        Ok(call)
    }
}

/// A user intent that ends in exactly one primary transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Action {
    Create(CreateRequest),
    Claim(PacketId),
    Refund(PacketId),
}

/// Parses `"1, 2, 3"` into item ids.
pub fn parse_item_ids(raw: &str) -> Result<Vec<U256>, InputError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            U256::from_dec_str(part).map_err(|_| InputError::MalformedItemId {
                raw: part.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn to_call__anchors_expiry_at_submission_time() {
        // given
        let request = CreateRequest::native(10, U256::exp10(18), false, "ipfs://cover");

        // when
        let call = request.to_call(1_000).unwrap();

        // then
        assert!(matches!(
            call,
            LedgerCall::CreateNativePacket { expire_time: 4_600, count: 10, .. }
        ));
    }

    #[test]
    fn validate__token_variants_need_a_token_address() {
        let mut request =
            CreateRequest::fungible(Address::zero(), 5, U256::from(100u64), true, "");
        assert_eq!(
            request.validate(),
            Err(InputError::MissingTokenAddress(Variant::Fungible))
        );
        request.token = None;
        assert!(request.validate().is_err());
    }

    #[test]
    fn validate__non_fungible_needs_items() {
        let request = CreateRequest::non_fungible(Address::repeat_byte(3), vec![], "");
        assert_eq!(request.validate(), Err(InputError::ZeroCount));
        let mut request =
            CreateRequest::non_fungible(Address::repeat_byte(3), vec![U256::one()], "");
        request.count = 2;
        assert!(matches!(
            request.validate(),
            Err(InputError::CountExceedsItems { count: 2, items: 1 })
        ));
    }

    #[test]
    fn parse_item_ids__accepts_comma_separated_list() {
        assert_eq!(
            parse_item_ids("1, 2,3 ").unwrap(),
            vec![U256::from(1u64), U256::from(2u64), U256::from(3u64)]
        );
        assert!(parse_item_ids("1, two").is_err());
    }
}
