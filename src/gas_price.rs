//! Gas price sources consulted when a request omits its gas price

use crate::errors::LaunchResult;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// External gas price oracle
#[async_trait]
pub trait GasPriceOracle: Send + Sync {
    /// Current gas price in wei
    async fn current_gas_price(&self) -> LaunchResult<Decimal>;
}

/// Oracle that always answers with a configured price
#[derive(Debug, Clone)]
pub struct FixedGasPriceOracle {
    price: Decimal,
}

impl FixedGasPriceOracle {
    pub fn new(price: Decimal) -> Self {
        Self { price }
    }
}

#[async_trait]
impl GasPriceOracle for FixedGasPriceOracle {
    async fn current_gas_price(&self) -> LaunchResult<Decimal> {
        Ok(self.price)
    }
}
