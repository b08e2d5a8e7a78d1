use crate::types::{
    Address,
    Packet,
};
use chrono::Utc;
use std::fmt;

/// Current wall clock in epoch seconds. Read on every call, never cached.
pub fn now_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

pub fn is_expired_at(packet: &Packet, now: u64) -> bool {
    packet.expire_time < now
}

pub fn is_expired(packet: &Packet) -> bool {
    is_expired_at(packet, now_secs())
}

pub fn is_refundable_at(packet: &Packet, actor: &Address, now: u64) -> bool {
    is_expired_at(packet, now) && packet.creator == *actor && !packet.remaining_amount.is_zero()
}

pub fn is_refundable(packet: &Packet, actor: &Address) -> bool {
    is_refundable_at(packet, actor, now_secs())
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PacketStatus {
    Active,
    Expired,
    ClaimedOut,
}

impl PacketStatus {
    pub fn of(packet: &Packet, now: u64) -> Self {
        if is_expired_at(packet, now) {
            PacketStatus::Expired
        } else if packet.is_exhausted() {
            PacketStatus::ClaimedOut
        } else {
            PacketStatus::Active
        }
    }
}

impl fmt::Display for PacketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PacketStatus::Active => "Active",
            PacketStatus::Expired => "Expired",
            PacketStatus::ClaimedOut => "Claimed out",
        };
        write!(f, "{label}")
    }
}
