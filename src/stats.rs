use crate::{
    ledger::{
        ListCategory,
        PacketLedger,
    },
    types::Address,
};
use std::fmt;
use tracing::warn;

/// Aggregate counters. A counter that could not be read stays `None` and renders as `-`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    pub total_packets: Option<u64>,
    pub created: Option<u64>,
    pub claimed: Option<u64>,
}

impl Stats {
    pub async fn load<L: PacketLedger>(ledger: &L, actor: Option<Address>) -> Self {
        let total = async {
            ledger
                .total_packets()
                .await
                .inspect_err(|err| warn!(?err, "failed to read total packet count"))
                .ok()
        };
        let per_actor = |category: ListCategory| async move {
            let actor = actor?;
            ledger
                .user_packet_count(actor, category)
                .await
                .inspect_err(|err| warn!(?err, ?category, "failed to read packet count"))
                .ok()
        };
        let (total_packets, created, claimed) = futures::join!(
            total,
            per_actor(ListCategory::Created),
            per_actor(ListCategory::Claimed)
        );
        Self {
            total_packets,
            created,
            claimed,
        }
    }
}

fn or_dash(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total packets: {}\nCreated by you: {}\nClaimed by you: {}",
            or_dash(self.total_packets),
            or_dash(self.created),
            or_dash(self.claimed)
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        test_helpers::{
            FakeLedger,
            sample_packet,
        },
        types::Variant,
    };

    const LEDGER: Address = primitive_types::H160([0xee; 20]);
    const ALICE: Address = primitive_types::H160([0xa1; 20]);

    #[tokio::test]
    async fn load__counts_packets_for_actor() {
        // given
        let fake = FakeLedger::new(LEDGER);
        fake.add_packet(sample_packet(1, ALICE, Variant::Native, fake.now() + 60));
        fake.add_packet(sample_packet(2, Address::repeat_byte(2), Variant::Native, fake.now() + 60));

        // when
        let stats = Stats::load(&fake, Some(ALICE)).await;

        // then
        assert_eq!(
            stats,
            Stats {
                total_packets: Some(2),
                created: Some(1),
                claimed: Some(0),
            }
        );
    }

    #[tokio::test]
    async fn load__unreadable_counts_render_as_dash() {
        let fake = FakeLedger::new(LEDGER);
        fake.fail_reads(true);

        let stats = Stats::load(&fake, Some(ALICE)).await;

        assert_eq!(stats, Stats::default());
        assert_eq!(
            stats.to_string(),
            "Total packets: -\nCreated by you: -\nClaimed by you: -"
        );
    }

    #[tokio::test]
    async fn load__without_actor_only_reads_total() {
        let fake = FakeLedger::new(LEDGER);
        let stats = Stats::load(&fake, None).await;
        assert_eq!(stats.total_packets, Some(0));
        assert_eq!(stats.created, None);
    }
}
