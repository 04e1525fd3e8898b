use async_trait::async_trait;
use bigdecimal::{BigDecimal, Signed};
use serde::Serialize;
use vortex_client::{AccountId, ContractOrder, LcdClient, OrderId, Side};

use crate::error::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OrderStatus {
    Open,
    /// A cancel was sent but its outcome is not known yet.
    PendingCancel,
    Filled,
    Canceled,
}

/// One of the bot's own resting orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub side: Side,
    pub price: BigDecimal,
    pub size: BigDecimal,
    pub remaining: BigDecimal,
    pub status: OrderStatus,
}

impl Order {
    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }
}

impl From<ContractOrder> for Order {
    fn from(order: ContractOrder) -> Self {
        let remaining = order.remaining_quantity.to_big_decimal();
        let status = if remaining.is_positive() {
            OrderStatus::Open
        } else {
            OrderStatus::Filled
        };
        Self {
            id: order.id,
            side: order.direction,
            price: order.price.to_big_decimal(),
            size: order.quantity.to_big_decimal(),
            remaining,
            status,
        }
    }
}

/// Read access to the account's resting orders.
#[async_trait]
pub trait OrderBookView: Send + Sync {
    async fn open_orders(&self, account: &AccountId) -> Result<Vec<Order>, QueryError>;
}

/// Orders as the Vortex contract reports them through `get_order`.
#[derive(Debug, Clone)]
pub struct ContractOrderBook {
    lcd: LcdClient,
    contract: AccountId,
    price_denom: String,
    asset_denom: String,
}

impl ContractOrderBook {
    pub fn new(
        lcd: LcdClient,
        contract: AccountId,
        price_denom: impl Into<String>,
        asset_denom: impl Into<String>,
    ) -> Self {
        Self {
            lcd,
            contract,
            price_denom: price_denom.into(),
            asset_denom: asset_denom.into(),
        }
    }
}

#[async_trait]
impl OrderBookView for ContractOrderBook {
    async fn open_orders(&self, account: &AccountId) -> Result<Vec<Order>, QueryError> {
        let orders = self
            .lcd
            .open_orders(&self.contract, account, &self.price_denom, &self.asset_denom)
            .await
            .map_err(|e| QueryError::client("order book", e))?;
        tracing::trace!(account = %account, count = orders.len(), "fetched contract orders");
        Ok(orders.into_iter().map(Order::from).collect())
    }
}
