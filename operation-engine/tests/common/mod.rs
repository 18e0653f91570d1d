//! Shared fixtures for integration tests

#![allow(dead_code)]

use operation_engine::processors::transfer::{TransferFact, TransferItem, TRANSFER_HINT};
use operation_engine::state::{Account, AccountKeys, CurrencyDesign, CurrencyPolicy, Feeer};
use operation_engine::{
    Address, Amount, Config, CurrencyId, Extensions, Genesis, KeyPair, NetworkId, Operation,
    OperationProcessorPool, StateReader,
};
use rust_decimal::Decimal;
use std::sync::Arc;

pub fn config() -> Config {
    let mut config = Config::default();
    config.network_id = "testnet".to_string();
    config
}

pub fn network() -> NetworkId {
    config().network_id()
}

pub fn pool() -> OperationProcessorPool {
    OperationProcessorPool::from_config(&config()).unwrap()
}

pub fn cur() -> CurrencyId {
    CurrencyId::new("CUR").unwrap()
}

pub fn amount(value: i64) -> Amount {
    Amount::new(Decimal::from(value), cur())
}

pub fn address(name: &str) -> Address {
    Address::new(name).unwrap()
}

pub fn keypair(seed: u8) -> KeyPair {
    KeyPair::from_seed(&[seed; 32])
}

pub fn user(name: &str, seed: u8) -> Account {
    Account::new(address(name), AccountKeys::single(keypair(seed).public_key()))
}

/// `CUR` with a flat fee of `fee` paid to `feecollector`
pub fn currency(fee: i64) -> CurrencyDesign {
    CurrencyDesign {
        currency: cur(),
        genesis_account: address("genesis01"),
        total_supply: Decimal::from(1_000_000),
        policy: CurrencyPolicy::new(
            Decimal::ZERO,
            Feeer::Fixed {
                receiver: address("feecollector"),
                amount: Decimal::from(fee),
            },
        ),
    }
}

/// alice01 (seed 1) holds `balance`; bob01 (seed 2) and feecollector hold 0
pub fn genesis(balance: i64) -> Genesis {
    funded_genesis(balance, 0)
}

pub fn funded_genesis(alice: i64, bob: i64) -> Genesis {
    Genesis::default()
        .currency(currency(1))
        .account(user("feecollector", 200))
        .account(user("alice01", 1))
        .account(user("bob01", 2))
        .balance(&address("alice01"), amount(alice))
        .balance(&address("bob01"), amount(bob))
        .balance(&address("feecollector"), amount(0))
}

pub fn reader(genesis: Genesis) -> Arc<dyn StateReader> {
    Arc::new(genesis.into_reader())
}

pub fn transfer_fact(token: &str, sender: &str, receiver: &str, value: i64) -> Arc<TransferFact> {
    Arc::new(
        TransferFact::new(
            token,
            address(sender),
            vec![TransferItem::new(address(receiver), vec![amount(value)])],
        )
        .unwrap(),
    )
}

/// alice01 sends `value` to bob01
pub fn transfer(token: &str, value: i64) -> Operation {
    Operation::signed(
        TRANSFER_HINT,
        transfer_fact(token, "alice01", "bob01", value),
        &[&keypair(1)],
        &network(),
        Extensions::none(),
    )
    .unwrap()
}
