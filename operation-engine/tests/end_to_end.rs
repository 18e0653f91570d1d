//! Session-level tests: full pre_process/process/close cycles

mod common;

use common::*;
use operation_engine::extension::{
    AuthenticationExtension, ProxyPayerExtension, SettlementExtension,
};
use operation_engine::operation::sign_message;
use operation_engine::processors::create_account::{
    CreateAccountFact, CreateAccountItem, CREATE_ACCOUNT_HINT,
};
use operation_engine::processors::suffrage::{SuffrageCandidateFact, SUFFRAGE_CANDIDATE_HINT};
use operation_engine::processors::transfer::{TransferProcessor, TRANSFER_HINT};
use operation_engine::state::{
    balance_state_key, AccountKeys, ContractAccountStatus, CurrencyPolicy, DidData, DidDocument,
    Feeer, VerificationMethod,
};
use operation_engine::{
    Error, Extensions, Fact, Genesis, Height, Hint, OpContext, Operation, OperationProcessorPool,
    ProcessorRegistry, ProcessorSettings, Proposal, ReasonKind, StateValue, Version,
};
use rust_decimal::Decimal;
use std::sync::Arc;

fn admit(
    session: &operation_engine::OperationProcessor,
    op: &Operation,
    reader: &Arc<dyn operation_engine::StateReader>,
) -> Option<ReasonKind> {
    let (_, reason) = session.pre_process(OpContext::new(), op, reader).unwrap();
    reason.map(|reason| reason.kind())
}

#[test]
fn test_transfer_with_flat_fee_accepted() {
    let pool = pool();
    let reader = reader(genesis(150));
    let session = pool.checkout(Height::new(2), None);
    let op = transfer("e2e", 100);

    let (ctx, reason) = session.pre_process(OpContext::new(), &op, &reader).unwrap();
    assert!(reason.is_none());
    let (values, reason) = session.process(&ctx, &op, &reader).unwrap();
    assert!(reason.is_none());

    let alice = balance_state_key(&address("alice01"), &cur());
    let bob = balance_state_key(&address("bob01"), &cur());
    let collector = balance_state_key(&address("feecollector"), &cur());
    let observed: Vec<(&str, &StateValue)> =
        values.iter().map(|value| (value.key(), value.value())).collect();
    assert_eq!(
        observed,
        vec![
            (alice.as_str(), &StateValue::DeductBalance(amount(100))),
            (bob.as_str(), &StateValue::AddBalance(amount(100))),
            (alice.as_str(), &StateValue::DeductBalance(amount(1))),
            (collector.as_str(), &StateValue::AddBalance(amount(1))),
        ]
    );
    session.close().unwrap();
}

#[test]
fn test_transfer_short_by_fee_rejected_without_values() {
    let pool = pool();
    let reader = reader(genesis(100));
    let session = pool.checkout(Height::new(2), None);
    let op = transfer("e2e", 100);

    let (ctx, reason) = session.pre_process(OpContext::new(), &op, &reader).unwrap();
    assert!(reason.is_none());
    let (values, reason) = session.process(&ctx, &op, &reader).unwrap();
    assert_eq!(reason.unwrap().kind(), ReasonKind::InsufficientBalance);
    assert!(values.is_empty());

    session.close().unwrap();
    let metrics = pool.settings().metrics();
    assert_eq!(
        metrics
            .rejected_total
            .with_label_values(&["insufficient_balance"])
            .get(),
        1
    );
}

fn create_account(token: &str, sender: &str, seed: u8, new_key_seed: u8) -> Operation {
    let item = CreateAccountItem::new(
        AccountKeys::single(keypair(new_key_seed).public_key()),
        vec![amount(10)],
    )
    .unwrap();
    let fact = CreateAccountFact::new(token, address(sender), vec![item]).unwrap();
    Operation::signed(
        CREATE_ACCOUNT_HINT,
        Arc::new(fact),
        &[&keypair(seed)],
        &network(),
        Extensions::none(),
    )
    .unwrap()
}

#[test]
fn test_duplicate_new_account_rejected_in_either_order() {
    let reader = reader(funded_genesis(150, 150));
    let by_alice = create_account("ca-a", "alice01", 1, 77);
    let by_bob = create_account("ca-b", "bob01", 2, 77);

    for (first, second) in [(&by_alice, &by_bob), (&by_bob, &by_alice)] {
        let pool = pool();
        let session = pool.checkout(Height::new(2), None);

        assert_eq!(admit(&session, first, &reader), None);
        assert_eq!(
            admit(&session, second, &reader),
            Some(ReasonKind::Duplicated)
        );
        session.close().unwrap();
    }
}

#[test]
fn test_rejected_operation_claims_no_keys() {
    let reader = reader(funded_genesis(150, 150));
    let pool = pool();
    let session = pool.checkout(Height::new(2), None);

    assert_eq!(
        admit(&session, &create_account("ca-a", "alice01", 1, 77), &reader),
        None
    );
    assert_eq!(
        admit(&session, &create_account("ca-b", "bob01", 2, 77), &reader),
        Some(ReasonKind::Duplicated)
    );

    // bob01's sender key stayed free
    let bob_transfer = Operation::signed(
        TRANSFER_HINT,
        transfer_fact("t-bob", "bob01", "alice01", 5),
        &[&keypair(2)],
        &network(),
        Extensions::none(),
    )
    .unwrap();
    assert_eq!(admit(&session, &bob_transfer, &reader), None);
    session.close().unwrap();
}

/// alice01's DID document lives in `didreg01`; `payer01` is an active
/// contract owned by bob01 holding 50
fn delegation_genesis() -> Arc<dyn operation_engine::StateReader> {
    let did = "did:test:alice01".to_string();
    let mut payer = ContractAccountStatus::new(address("bob01"));
    payer.is_active = true;

    reader(
        funded_genesis(150, 50)
            .did(
                &address("didreg01"),
                DidData {
                    address: address("alice01"),
                    did: did.clone(),
                },
                DidDocument {
                    did: did.clone(),
                    controller: address("alice01"),
                    active: true,
                    authentication: vec![VerificationMethod {
                        id: format!("{}#auth-key-1", did),
                        public_key: keypair(9).public_key(),
                    }],
                },
            )
            .contract(&address("payer01"), payer)
            .balance(&address("payer01"), amount(50)),
    )
}

fn delegated_transfer(proxy: bool) -> Operation {
    let fact = transfer_fact("delegated", "alice01", "bob01", 10);
    let proof = keypair(9).sign(&sign_message(&network(), &fact.hash()));
    let mut extensions = Extensions::none()
        .with_authentication(AuthenticationExtension::new(
            address("didreg01"),
            "did:test:alice01",
            "did:test:alice01#auth-key-1",
            proof,
        ))
        .with_settlement(SettlementExtension::new(address("bob01")));
    if proxy {
        extensions = extensions.with_proxy_payer(ProxyPayerExtension::new(address("payer01")));
    }
    Operation::signed(TRANSFER_HINT, fact, &[&keypair(2)], &network(), extensions).unwrap()
}

fn fee_payer_key(op: &Operation, reader: &Arc<dyn operation_engine::StateReader>) -> String {
    let pool = pool();
    let session = pool.checkout(Height::new(2), None);
    let (ctx, reason) = session.pre_process(OpContext::new(), op, reader).unwrap();
    assert!(reason.is_none(), "{:?}", reason);
    let (values, reason) = session.process(&ctx, op, reader).unwrap();
    assert!(reason.is_none(), "{:?}", reason);
    session.close().unwrap();

    let fee = values
        .iter()
        .rev()
        .find(|value| value.value() == &StateValue::DeductBalance(amount(1)))
        .unwrap();
    fee.key().to_string()
}

#[test]
fn test_payer_precedence() {
    let reader = delegation_genesis();

    assert_eq!(
        fee_payer_key(&delegated_transfer(true), &reader),
        balance_state_key(&address("payer01"), &cur())
    );
    assert_eq!(
        fee_payer_key(&delegated_transfer(false), &reader),
        balance_state_key(&address("bob01"), &cur())
    );
    assert_eq!(
        fee_payer_key(&transfer("plain", 10), &reader),
        balance_state_key(&address("alice01"), &cur())
    );
}

fn settled_transfer(
    token: &str,
    op_sender: Option<&str>,
    proxy_payer: Option<&str>,
    signers: &[&operation_engine::KeyPair],
) -> Operation {
    let mut extensions = Extensions::none();
    if let Some(op_sender) = op_sender {
        extensions = extensions.with_settlement(SettlementExtension::new(address(op_sender)));
    }
    if let Some(proxy_payer) = proxy_payer {
        extensions = extensions.with_proxy_payer(ProxyPayerExtension::new(address(proxy_payer)));
    }
    Operation::signed(
        TRANSFER_HINT,
        transfer_fact(token, "alice01", "bob01", 10),
        signers,
        &network(),
        extensions,
    )
    .unwrap()
}

#[test]
fn test_settlement_without_authentication() {
    let reader = delegation_genesis();

    // bob01 co-signs, so bob01 pays
    let cosigned = settled_transfer(
        "settle-ok",
        Some("bob01"),
        None,
        &[&keypair(1), &keypair(2)],
    );
    assert_eq!(
        fee_payer_key(&cosigned, &reader),
        balance_state_key(&address("bob01"), &cur())
    );

    let pool = pool();
    let session = pool.checkout(Height::new(2), None);
    let billed = settled_transfer("settle-no", Some("bob01"), None, &[&keypair(1)]);
    assert_eq!(admit(&session, &billed, &reader), Some(ReasonKind::Unauthorized));
    assert_eq!(session.duplication_key_count(), 0);
    session.close().unwrap();
}

#[test]
fn test_proxy_payer_checks() {
    let reader = delegation_genesis();
    let pool = pool();
    let session = pool.checkout(Height::new(2), None);

    // payer01 is owned by bob01, not by the op-sender alice01
    let foreign = settled_transfer(
        "proxy-foreign",
        Some("alice01"),
        Some("payer01"),
        &[&keypair(1)],
    );
    assert_eq!(admit(&session, &foreign, &reader), Some(ReasonKind::Unauthorized));

    let unsettled = settled_transfer("proxy-bare", None, Some("payer01"), &[&keypair(1)]);
    assert_eq!(admit(&session, &unsettled, &reader), Some(ReasonKind::InvalidFact));
    session.close().unwrap();

    // bob01 settles and owns payer01
    let owned = settled_transfer(
        "proxy-owned",
        Some("bob01"),
        Some("payer01"),
        &[&keypair(1), &keypair(2)],
    );
    assert_eq!(
        fee_payer_key(&owned, &reader),
        balance_state_key(&address("payer01"), &cur())
    );
}

#[test]
fn test_inactive_proxy_payer_rejected() {
    let reader = reader(
        funded_genesis(150, 50)
            .contract(&address("idle01"), ContractAccountStatus::new(address("bob01")))
            .balance(&address("idle01"), amount(50)),
    );
    let pool = pool();
    let session = pool.checkout(Height::new(2), None);
    let op = settled_transfer(
        "proxy-idle",
        Some("bob01"),
        Some("idle01"),
        &[&keypair(1), &keypair(2)],
    );
    assert_eq!(admit(&session, &op, &reader), Some(ReasonKind::ContractStatus));
    session.close().unwrap();
}

#[test]
fn test_fee_receiver_without_account_rejected_at_process() {
    let mut design = currency(1);
    design.policy = CurrencyPolicy::new(
        Decimal::ZERO,
        Feeer::Fixed {
            receiver: address("ghost01"),
            amount: Decimal::ONE,
        },
    );
    let reader = reader(
        Genesis::default()
            .currency(design)
            .account(user("alice01", 1))
            .account(user("bob01", 2))
            .balance(&address("alice01"), amount(150))
            .balance(&address("bob01"), amount(0)),
    );

    let pool = pool();
    let session = pool.checkout(Height::new(2), None);
    let op = transfer("ghost", 100);
    let (ctx, reason) = session.pre_process(OpContext::new(), &op, &reader).unwrap();
    assert!(reason.is_none(), "{:?}", reason);

    let (values, reason) = session.process(&ctx, &op, &reader).unwrap();
    assert_eq!(reason.map(|reason| reason.kind()), Some(ReasonKind::StateNotFound));
    assert!(values.is_empty());
    session.close().unwrap();
}

#[test]
fn test_pool_reset_between_sessions() {
    let settings = ProcessorSettings::from_config(&config()).unwrap();
    let pool = OperationProcessorPool::new(settings, 1);
    let reader = reader(funded_genesis(150, 150));
    let op = transfer("reuse", 10);

    let session = pool.checkout(Height::new(2), None);
    assert_eq!(admit(&session, &op, &reader), None);
    assert_eq!(
        admit(&session, &create_account("ca-b", "bob01", 2, 77), &reader),
        None
    );
    assert_eq!(session.duplication_key_count(), 3);
    session.close().unwrap();

    let session = pool.checkout(Height::new(3), None);
    assert_eq!(pool.stats().reused, 1);
    assert_eq!(session.height(), Height::new(3));
    assert_eq!(session.duplication_key_count(), 0);
    assert_eq!(session.tracked_processors(), 0);
    assert_eq!(admit(&session, &op, &reader), None);
    session.cancel().unwrap();
}

fn candidacy() -> Operation {
    let fact =
        SuffrageCandidateFact::new("sc", address("alice01"), keypair(1).public_key()).unwrap();
    Operation::signed(
        SUFFRAGE_CANDIDATE_HINT,
        Arc::new(fact),
        &[&keypair(1)],
        &network(),
        Extensions::none(),
    )
    .unwrap()
}

#[test]
fn test_proposal_aware_processor_needs_proposal() {
    let pool = pool();
    let reader = reader(genesis(150));

    let session = pool.checkout(Height::new(2), None);
    let result = session.pre_process(OpContext::new(), &candidacy(), &reader);
    assert!(matches!(result, Err(Error::Config(_))));
    session.close().unwrap();

    let proposal = Proposal {
        height: Height::new(2),
        suffrage: vec![address("node01"), address("node02")],
        operations: Vec::new(),
    };
    let session = pool.checkout(Height::new(2), Some(proposal));
    assert_eq!(admit(&session, &candidacy(), &reader), None);
    // exempt from duplication tracking
    assert_eq!(session.duplication_key_count(), 0);
    session.close().unwrap();
}

#[test]
fn test_state_only_table_wins_dispatch() {
    let mut registry = ProcessorRegistry::new();
    registry
        .register(TRANSFER_HINT, TransferProcessor::new_processor)
        .unwrap();
    registry
        .register_with_proposal(TRANSFER_HINT, |_, _, _| {
            Err(Error::Other("proposal table consulted".to_string()))
        })
        .unwrap();

    let config = config();
    let settings = ProcessorSettings::new(
        Arc::new(registry),
        config.network_id(),
        config.limits.clone(),
        operation_engine::Metrics::new().unwrap(),
    );
    let pool = OperationProcessorPool::new(settings, 1);
    let proposal = Proposal {
        height: Height::new(2),
        suffrage: vec![address("node01")],
        operations: Vec::new(),
    };
    let session = pool.checkout(Height::new(2), Some(proposal));

    assert_eq!(admit(&session, &transfer("both", 10), &reader(genesis(150))), None);
    session.close().unwrap();
}

#[test]
fn test_unregistered_hint_is_hard_error() {
    let pool = pool();
    let session = pool.checkout(Height::new(2), None);
    let op = Operation::signed(
        Hint::new("unknown-operation", Version::new(0, 0, 1)),
        transfer_fact("unknown", "alice01", "bob01", 10),
        &[&keypair(1)],
        &network(),
        Extensions::none(),
    )
    .unwrap();

    let result = session.pre_process(OpContext::new(), &op, &reader(genesis(150)));
    assert!(matches!(result, Err(Error::UnregisteredHint(_))));
    session.cancel().unwrap();
}

#[test]
fn test_cancelled_context_aborts_process() {
    let pool = pool();
    let reader = reader(genesis(150));
    let session = pool.checkout(Height::new(2), None);
    let op = transfer("cancel", 10);

    let (ctx, reason) = session.pre_process(OpContext::new(), &op, &reader).unwrap();
    assert!(reason.is_none());

    let child = ctx.child();
    ctx.cancel();
    assert!(matches!(
        session.process(&child, &op, &reader),
        Err(Error::Cancelled)
    ));
    session.cancel().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pre_process_claims_sender_once() {
    let pool = pool();
    let reader = reader(genesis(1_000));
    let session: Arc<operation_engine::OperationProcessor> =
        Arc::from(pool.checkout(Height::new(2), None));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let session = Arc::clone(&session);
            let reader = Arc::clone(&reader);
            tokio::task::spawn_blocking(move || {
                let op = transfer(&format!("race-{}", i), 10);
                admit(&session, &op, &reader)
            })
        })
        .collect();

    let mut admitted = 0;
    let mut duplicated = 0;
    for handle in handles {
        match handle.await.unwrap() {
            None => admitted += 1,
            Some(ReasonKind::Duplicated) => duplicated += 1,
            Some(other) => panic!("unexpected rejection {:?}", other),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(duplicated, 7);

    let session = Arc::try_unwrap(session).unwrap();
    assert_eq!(session.tracked_processors(), 8);
    Box::new(session).close().unwrap();
}
