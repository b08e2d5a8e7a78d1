use crate::{
    ledger::{
        RawLog,
        Receipt,
    },
    types::{
        Address,
        Amount,
        PacketId,
        TxHash,
        Variant,
    },
};
use primitive_types::{
    H256,
    U256,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::HashSet;
use tracing::{
    debug,
    warn,
};

/// keccak256("PacketCreated(bytes32,address,uint256,uint256,uint256,bool,string,address,uint8)")
pub const PACKET_CREATED_TOPIC: H256 = H256([
    0xed, 0xb8, 0x49, 0xb0, 0x13, 0xdd, 0xfd, 0xf7, 0x01, 0x35, 0xfc, 0x50, 0x37, 0xe3, 0xe3,
    0xcb, 0xf4, 0xa7, 0xf1, 0xac, 0x14, 0x16, 0x62, 0xdf, 0x4c, 0xc9, 0x2c, 0xa3, 0x70, 0xd5,
    0x23, 0xd3,
]);

/// keccak256("PacketClaimed(bytes32,address,uint256,uint256)")
pub const PACKET_CLAIMED_TOPIC: H256 = H256([
    0xa1, 0xdd, 0x3f, 0xa4, 0xf4, 0xbb, 0x90, 0x62, 0x7b, 0x9b, 0x50, 0x62, 0x00, 0x91, 0x40,
    0x10, 0xa4, 0x9a, 0xfe, 0x80, 0x4a, 0x84, 0x8d, 0x45, 0x3c, 0x67, 0x14, 0xd9, 0xc2, 0x3b,
    0xbf, 0xa9,
]);

const WORD: usize = 32;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CreatedEvent {
    pub packet_id: PacketId,
    pub creator: Address,
    pub total_amount: Amount,
    pub count: u64,
    pub expire_time: u64,
    pub is_random: bool,
    pub cover_uri: String,
    pub token: Address,
    pub variant: Variant,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClaimedEvent {
    pub packet_id: PacketId,
    pub claimer: Address,
    pub amount: Amount,
    /// Only meaningful for non-fungible packets.
    pub item_id: U256,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DomainEvent {
    Created(CreatedEvent),
    Claimed(ClaimedEvent),
}

impl DomainEvent {
    pub fn packet_id(&self) -> PacketId {
        match self {
            DomainEvent::Created(e) => e.packet_id,
            DomainEvent::Claimed(e) => e.packet_id,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct EventSchema {
    pub ledger: Address,
    pub created_topic: H256,
    pub claimed_topic: H256,
}

impl EventSchema {
    pub fn for_ledger(ledger: Address) -> Self {
        Self {
            ledger,
            created_topic: PACKET_CREATED_TOPIC,
            claimed_topic: PACKET_CLAIMED_TOPIC,
        }
    }
}

/// Decodes one log entry, `None` when it is not a packet event of this ledger.
pub fn decode_log(schema: &EventSchema, log: &RawLog) -> Option<DomainEvent> {
    if log.address != schema.ledger {
        return None;
    }
    let topic0 = log.topics.first()?;
    if *topic0 == schema.created_topic {
        decode_created(log).map(DomainEvent::Created)
    } else if *topic0 == schema.claimed_topic {
        decode_claimed(log).map(DomainEvent::Claimed)
    } else {
        None
    }
}

fn decode_created(log: &RawLog) -> Option<CreatedEvent> {
    let packet_id = *log.topics.get(1)?;
    let creator = topic_address(log.topics.get(2)?)?;
    let words = Words::new(&log.data);
    let event = CreatedEvent {
        packet_id,
        creator,
        total_amount: words.uint(0)?,
        count: words.u64(1)?,
        expire_time: words.u64(2)?,
        is_random: words.bool(3)?,
        cover_uri: words.string_at(4)?,
        token: words.address(5)?,
        variant: Variant::from_tag(u8::try_from(words.u64(6)?).ok()?)?,
    };
    Some(event)
}

fn decode_claimed(log: &RawLog) -> Option<ClaimedEvent> {
    let packet_id = *log.topics.get(1)?;
    let claimer = topic_address(log.topics.get(2)?)?;
    let words = Words::new(&log.data);
    Some(ClaimedEvent {
        packet_id,
        claimer,
        amount: words.uint(0)?,
        item_id: words.uint(1)?,
    })
}

fn topic_address(topic: &H256) -> Option<Address> {
    let bytes = topic.as_bytes();
    if bytes[..12].iter().any(|b| *b != 0) {
        return None;
    }
    Some(Address::from_slice(&bytes[12..]))
}

/// Head/tail view over ABI encoded event data.
struct Words<'a> {
    data: &'a [u8],
}

impl<'a> Words<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn word(&self, index: usize) -> Option<&'a [u8]> {
        let start = index.checked_mul(WORD)?;
        self.data.get(start..start.checked_add(WORD)?)
    }

    fn uint(&self, index: usize) -> Option<U256> {
        self.word(index).map(U256::from_big_endian)
    }

    fn u64(&self, index: usize) -> Option<u64> {
        let value = self.uint(index)?;
        (value <= U256::from(u64::MAX)).then(|| value.low_u64())
    }

    fn bool(&self, index: usize) -> Option<bool> {
        match self.u64(index)? {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }

    fn address(&self, index: usize) -> Option<Address> {
        let word = self.word(index)?;
        if word[..12].iter().any(|b| *b != 0) {
            return None;
        }
        Some(Address::from_slice(&word[12..]))
    }

    fn string_at(&self, index: usize) -> Option<String> {
        let offset = usize::try_from(self.u64(index)?).ok()?;
        let len_word = self.data.get(offset..offset.checked_add(WORD)?)?;
        let len = usize::try_from(U256::from_big_endian(len_word).low_u64()).ok()?;
        let start = offset + WORD;
        let bytes = self.data.get(start..start.checked_add(len)?)?;
        String::from_utf8(bytes.to_vec()).ok()
    }
}

/// Turns confirmed receipts into domain events, at most once per transaction hash.
#[derive(Debug)]
pub struct ReceiptDecoder {
    schema: EventSchema,
    seen: HashSet<TxHash>,
}

impl ReceiptDecoder {
    pub fn new(schema: EventSchema) -> Self {
        Self {
            schema,
            seen: HashSet::new(),
        }
    }

    pub fn schema(&self) -> &EventSchema {
        &self.schema
    }

    /// `None` if this hash was already decoded. A first decode may yield an empty
    /// list, which callers must treat as "no event", not as "keep the last one".
    pub fn decode(&mut self, receipt: &Receipt) -> Option<Vec<DomainEvent>> {
        if !self.seen.insert(receipt.tx_hash) {
            debug!(hash = %format!("{:#x}", receipt.tx_hash), "receipt already decoded");
            return None;
        }
        let events: Vec<DomainEvent> = receipt
            .logs
            .iter()
            .filter_map(|log| {
                let event = decode_log(&self.schema, log);
                if event.is_none()
                    && log.address == self.schema.ledger
                    && log.topics.first().is_some_and(|t| {
                        *t == self.schema.created_topic || *t == self.schema.claimed_topic
                    })
                {
                    warn!(
                        hash = %format!("{:#x}", receipt.tx_hash),
                        "packet event log could not be decoded"
                    );
                }
                event
            })
            .collect();
        if events.is_empty() {
            debug!(
                hash = %format!("{:#x}", receipt.tx_hash),
                logs = receipt.logs.len(),
                "receipt carried no packet events"
            );
        }
        Some(events)
    }

    pub fn already_decoded(&self, hash: &TxHash) -> bool {
        self.seen.contains(hash)
    }
}
