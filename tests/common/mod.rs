//! Fixtures shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use launcher::coordinator::LaunchCoordinator;
use launcher::errors::LaunchResult;
use launcher::gas_price::{FixedGasPriceOracle, GasPriceOracle};
use launcher::key_store::LocalKeyStore;
use launcher::launch_log_store::SledLaunchLogStore;
use launcher::nonce_allocator::{NonceAllocator, SledNonceAllocator};
use launcher::types::CreateRequest;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

pub const FROM: &str = "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
pub const TO: &str = "0xBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB";
pub const ORACLE_PRICE: u64 = 30_000_000_000;

pub fn temp_db() -> sled::Db {
    sled::Config::new().temporary(true).open().unwrap()
}

pub struct Harness {
    pub db: sled::Db,
    pub store: Arc<SledLaunchLogStore>,
    pub coordinator: Arc<LaunchCoordinator>,
}

pub async fn harness() -> Harness {
    harness_with_oracle(
        Arc::new(FixedGasPriceOracle::new(Decimal::from(ORACLE_PRICE))),
        Duration::from_secs(5),
    )
    .await
}

pub async fn harness_with_oracle(oracle: Arc<dyn GasPriceOracle>, timeout: Duration) -> Harness {
    let db = temp_db();
    let nonces = SledNonceAllocator::open(&db, "testnet").unwrap();
    nonces.initialize(0).await.unwrap();
    let store = Arc::new(SledLaunchLogStore::open(&db).unwrap());
    let coordinator = Arc::new(LaunchCoordinator::new(
        store.clone(),
        Arc::new(nonces),
        Arc::new(LocalKeyStore::from_key_list("")),
        oracle,
        timeout,
    ));
    Harness {
        db,
        store,
        coordinator,
    }
}

pub fn request(value: &str, gas_price: &str) -> CreateRequest {
    CreateRequest {
        from: FROM.to_string(),
        to: TO.to_string(),
        value: value.to_string(),
        gas_price: gas_price.to_string(),
        data: String::new(),
        item_id: "7".to_string(),
        item_type: "reward".to_string(),
    }
}

/// Oracle that answers only after `delay`
pub struct SlowOracle {
    pub delay: Duration,
}

#[async_trait]
impl GasPriceOracle for SlowOracle {
    async fn current_gas_price(&self) -> LaunchResult<Decimal> {
        tokio::time::sleep(self.delay).await;
        Ok(Decimal::ONE)
    }
}
