//! Session demo binary
//!
//! Runs one transfer through a processing session twice: once against a
//! sender balance that covers amount and fee, once against one that doesn't.

use anyhow::Context;
use operation_engine::processors::transfer::{TransferFact, TransferItem, TRANSFER_HINT};
use operation_engine::state::{
    apply_merge_values, Account, AccountKeys, CurrencyDesign, CurrencyPolicy, Feeer,
};
use operation_engine::{
    Address, Amount, Config, CurrencyId, Extensions, Genesis, Height, KeyPair, OpContext,
    Operation, OperationProcessorPool, StateReader,
};
use prometheus::{Encoder, TextEncoder};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct Scenario {
    sender: Address,
    receiver: Address,
    collector: Address,
    sender_keys: KeyPair,
    currency: CurrencyId,
}

impl Scenario {
    fn new() -> anyhow::Result<Self> {
        Ok(Self {
            sender: Address::new("senderA")?,
            receiver: Address::new("receiverB")?,
            collector: Address::new("collectorF")?,
            sender_keys: KeyPair::generate(),
            currency: CurrencyId::new("CUR")?,
        })
    }

    fn amount(&self, value: i64) -> Amount {
        Amount::new(Decimal::from(value), self.currency.clone())
    }

    fn genesis(&self, sender_balance: i64) -> Arc<dyn StateReader> {
        let design = CurrencyDesign {
            currency: self.currency.clone(),
            genesis_account: self.collector.clone(),
            total_supply: Decimal::from(1_000_000),
            policy: CurrencyPolicy::new(
                Decimal::ZERO,
                Feeer::Fixed {
                    receiver: self.collector.clone(),
                    amount: Decimal::ONE,
                },
            ),
        };
        let user = |address: &Address| {
            Account::new(
                address.clone(),
                AccountKeys::single(KeyPair::generate().public_key()),
            )
        };

        Arc::new(
            Genesis::new(Height::new(1))
                .currency(design)
                .account(Account::new(
                    self.sender.clone(),
                    AccountKeys::single(self.sender_keys.public_key()),
                ))
                .account(user(&self.receiver))
                .account(user(&self.collector))
                .balance(&self.sender, self.amount(sender_balance))
                .balance(&self.receiver, self.amount(0))
                .balance(&self.collector, self.amount(0))
                .into_reader(),
        )
    }

    fn transfer(&self, config: &Config) -> anyhow::Result<Operation> {
        let fact = TransferFact::new(
            "demo-transfer",
            self.sender.clone(),
            vec![TransferItem::new(self.receiver.clone(), vec![self.amount(100)])],
        )?;
        Ok(Operation::signed(
            TRANSFER_HINT,
            Arc::new(fact),
            &[&self.sender_keys],
            &config.network_id(),
            Extensions::none(),
        )?)
    }
}

fn run_session(
    pool: &OperationProcessorPool,
    config: &Config,
    scenario: &Scenario,
    sender_balance: i64,
) -> anyhow::Result<()> {
    let reader = scenario.genesis(sender_balance);
    let op = scenario.transfer(config)?;
    let session = pool.checkout(Height::new(2), None);

    let (ctx, reason) = session.pre_process(OpContext::new(), &op, &reader)?;
    if let Some(reason) = reason {
        tracing::warn!(sender_balance, %reason, "transfer rejected in pre_process");
        session.close()?;
        return Ok(());
    }

    let (values, reason) = session.process(&ctx, &op, &reader)?;
    match reason {
        Some(reason) => {
            tracing::warn!(sender_balance, %reason, values = values.len(), "transfer rejected");
        }
        None => {
            for value in &values {
                tracing::info!(key = value.key(), value = ?value.value(), "merge value");
            }
            let states = apply_merge_values(
                Height::new(2),
                &[(op.hash(), values)],
                reader.as_ref(),
            )?;
            println!("{}", serde_json::to_string_pretty(&states)?);
        }
    }

    session.close()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("loading configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    if config.logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        "Starting session demo"
    );

    let pool = OperationProcessorPool::from_config(&config)?;
    let scenario = Scenario::new()?;

    // processing is synchronous; keep it off the runtime workers
    let demo_pool = pool.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        run_session(&demo_pool, &config, &scenario, 150)?;
        run_session(&demo_pool, &config, &scenario, 100)
    })
    .await??;

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&pool.settings().metrics().registry().gather(), &mut buffer)?;
    println!("{}", String::from_utf8_lossy(&buffer));

    tracing::info!(idle_sessions = pool.stats().idle, "Session demo finished");
    Ok(())
}
