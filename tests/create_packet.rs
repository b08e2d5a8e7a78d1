#![allow(non_snake_case)]
use primitive_types::U256;
use redpacket_client::{
    action::CreateRequest,
    expiry::PacketStatus,
    orchestrator::{
        AttemptStatus,
        Phase,
        TxKind,
    },
    test_helpers::*,
    types::{
        Address,
        Variant,
    },
};

const USDC: Address = primitive_types::H160([0x20; 20]);
const PUNK: Address = primitive_types::H160([0x30; 20]);

#[tokio::test]
async fn create_native__shows_active_and_claimable_by_others() {
    let ctx = TestContext::new();

    // given
    let mut alice = ctx.client_for(ctx.alice()).await;
    let bob = ctx.client_for(ctx.bob()).await;

    // when
    let attempt = alice
        .create(CreateRequest::native(10, U256::one(), false, "ipfs://bafy"))
        .await
        .unwrap();

    // then
    assert!(attempt.is_confirmed(), "{:?}", attempt.phase);
    let created = alice.latest_created().cloned().unwrap();
    assert_eq!(created.count, 10);
    assert_eq!(created.variant, Variant::Native);
    let view = &alice.items()[0];
    assert_eq!(view.packet.remaining, 10);
    assert_eq!(view.status, PacketStatus::Active);
    assert!(!view.refundable);
    let id = format!("{:#x}", created.packet_id);
    assert!(bob.is_claimable(&id).await);
}

#[tokio::test]
async fn create_native__expiry_defaults_to_one_hour_from_submission() {
    let ctx = TestContext::new();
    let mut alice = ctx.client_for(ctx.alice()).await;
    let before = ctx.ledger().now();

    alice
        .create(CreateRequest::native(1, U256::one(), false, ""))
        .await
        .unwrap();

    let created = alice.latest_created().unwrap();
    assert!(created.expire_time >= before + 3_600);
    assert!(created.expire_time <= ctx.ledger().now() + 3_600);
}

#[tokio::test]
async fn create_fungible__insufficient_allowance_approves_first() {
    let ctx = TestContext::new();
    let ledger = ctx.ledger();

    // given
    ledger.add_fungible_token(USDC, "USDC", 6);
    ledger.set_allowance(USDC, ctx.alice(), U256::from(50u64));
    let mut alice = ctx.client_for(ctx.alice()).await;

    // when
    let attempt = alice
        .create(CreateRequest::fungible(USDC, 4, U256::from(100u64), true, ""))
        .await
        .unwrap();

    // then
    let phases: Vec<_> = attempt
        .transitions
        .iter()
        .filter(|phase| {
            matches!(
                phase,
                Phase::AwaitingApprovalSignature
                    | Phase::AwaitingApprovalConfirmation { .. }
                    | Phase::AwaitingActionSignature
                    | Phase::AwaitingActionConfirmation { .. }
                    | Phase::Confirmed { .. }
            )
        })
        .map(|phase| phase.status())
        .collect();
    assert_eq!(
        phases,
        vec![
            AttemptStatus::AwaitingSignature,
            AttemptStatus::PendingConfirmation,
            AttemptStatus::AwaitingSignature,
            AttemptStatus::PendingConfirmation,
            AttemptStatus::Confirmed,
        ]
    );
    assert!(matches!(
        attempt.transitions[2],
        Phase::AwaitingApprovalSignature
    ));
    assert_eq!(alice.items()[0].amount_label("MON", 18), "0.0001 USDC");
}

#[tokio::test]
async fn create_fungible__approval_is_read_fresh_for_every_attempt() {
    let ctx = TestContext::new();
    let ledger = ctx.ledger();
    ledger.add_fungible_token(USDC, "USDC", 6);
    let mut alice = ctx.client_for(ctx.alice()).await;
    let request = CreateRequest::fungible(USDC, 2, U256::from(10u64), false, "");

    alice.create(request.clone()).await.unwrap();
    let second = alice.create(request).await.unwrap();

    assert!(second.is_confirmed());
    let approvals = ledger
        .calls()
        .iter()
        .filter(|call| *call == "confirm:approve")
        .count();
    assert_eq!(approvals, 2);
}

#[tokio::test]
async fn create_fungible__rejected_approval_leaves_no_packet() {
    let ctx = TestContext::new();
    let ledger = ctx.ledger();
    ledger.add_fungible_token(USDC, "USDC", 6);
    ledger.reject_next_signature();
    let mut alice = ctx.client_for(ctx.alice()).await;

    let attempt = alice
        .create(CreateRequest::fungible(USDC, 2, U256::from(10u64), false, ""))
        .await
        .unwrap();

    assert_eq!(attempt.leg, TxKind::Approve);
    assert_eq!(attempt.status(), AttemptStatus::Failed);
    assert!(alice.items().is_empty());
    assert!(alice.latest_created().is_none());
    assert!(alice.status().starts_with("Create failed"));
}

#[tokio::test]
async fn create_nft__grants_operator_then_creates_with_items() {
    let ctx = TestContext::new();
    let ledger = ctx.ledger();
    ledger.add_non_fungible_token(PUNK, "PUNK");
    let mut alice = ctx.client_for(ctx.alice()).await;
    let items = redpacket_client::action::parse_item_ids("7, 8, 9").unwrap();

    let attempt = alice
        .create(CreateRequest::non_fungible(PUNK, items.clone(), "ipfs://punks"))
        .await
        .unwrap();

    assert!(attempt.is_confirmed(), "{:?}", attempt.phase);
    let packet = &alice.items()[0].packet;
    assert_eq!(packet.item_ids, items);
    assert_eq!(packet.count, 3);
    assert_eq!(alice.items()[0].amount_label("MON", 18), "3 PUNK");
    assert_eq!(
        ledger.calls().first().map(String::as_str),
        Some("sign:setApprovalForAll")
    );
}
