use async_trait::async_trait;
use bigdecimal::{BigDecimal, Signed};
use vortex_client::LcdClient;

use crate::error::QueryError;

/// Source of the price the ladder is centred on.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Always a positive decimal; anything else is a [`QueryError`].
    async fn reference_price(&self) -> Result<BigDecimal, QueryError>;
}

/// Reads the chain's oracle module exchange rate for one denom.
#[derive(Debug, Clone)]
pub struct LcdOracle {
    lcd: LcdClient,
    denom: String,
}

impl LcdOracle {
    pub fn new(lcd: LcdClient, denom: impl Into<String>) -> Self {
        Self {
            lcd,
            denom: denom.into(),
        }
    }
}

#[async_trait]
impl PriceOracle for LcdOracle {
    async fn reference_price(&self) -> Result<BigDecimal, QueryError> {
        let rate = self
            .lcd
            .exchange_rate(&self.denom)
            .await
            .map_err(|e| QueryError::client("oracle", e))?;
        ensure_positive(rate)
    }
}

/// A constant price, for paper trading and pinned-price deployments.
#[derive(Debug, Clone)]
pub struct FixedPrice(pub BigDecimal);

#[async_trait]
impl PriceOracle for FixedPrice {
    async fn reference_price(&self) -> Result<BigDecimal, QueryError> {
        ensure_positive(self.0.clone())
    }
}

fn ensure_positive(price: BigDecimal) -> Result<BigDecimal, QueryError> {
    if price.is_positive() {
        Ok(price)
    } else {
        Err(QueryError::InvalidPrice(price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn fixed_price_is_returned() {
        let oracle = FixedPrice(BigDecimal::from_str("10.25").unwrap());
        assert_eq!(
            oracle.reference_price().await.unwrap(),
            BigDecimal::from_str("10.25").unwrap()
        );
    }

    #[tokio::test]
    async fn zero_price_is_a_query_error() {
        let oracle = FixedPrice(BigDecimal::from(0));
        assert!(matches!(
            oracle.reference_price().await,
            Err(QueryError::InvalidPrice(_))
        ));
    }
}
