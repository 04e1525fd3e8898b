//! Order messages routed through the dex module, and queries of the Vortex perpetuals contract.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::types::{ContractOrder, OrderId, OrderType, PositionEffect, Side};

/// Order messages of the chain's dex module.
///
/// The module forwards them to the registered contract as `bulk_order_placements` and
/// `bulk_order_cancellations` sudo calls; the contract exposes no execute entry point for orders.
#[derive(Debug, Clone, PartialEq)]
pub enum DexMsg {
    PlaceOrders { orders: Vec<OrderPlacement> },
    CancelOrders { ids: Vec<OrderId> },
}

impl DexMsg {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DexMsg::PlaceOrders { .. } => "place_orders",
            DexMsg::CancelOrders { .. } => "cancel_orders",
        }
    }

    /// `tx dex` subcommand of the chain CLI.
    pub fn subcommand(&self) -> &'static str {
        match self {
            DexMsg::PlaceOrders { .. } => "place-orders",
            DexMsg::CancelOrders { .. } => "cancel-orders",
        }
    }

    /// Positional arguments following the contract address.
    pub fn cli_args(&self) -> Vec<String> {
        match self {
            DexMsg::PlaceOrders { orders } => orders.iter().map(OrderPlacement::cli_arg).collect(),
            DexMsg::CancelOrders { ids } => ids.iter().map(|id| id.to_string()).collect(),
        }
    }
}

/// A single limit order placement.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderPlacement {
    pub position_direction: Side,
    pub price: BigDecimal,
    pub quantity: BigDecimal,
    pub price_denom: String,
    pub asset_denom: String,
    pub order_type: OrderType,
    /// JSON-encoded [`OrderData`].
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderData {
    pub leverage: BigDecimal,
    pub position_effect: PositionEffect,
}

impl OrderData {
    pub fn open(leverage: BigDecimal) -> Self {
        Self {
            leverage,
            position_effect: PositionEffect::Open,
        }
    }
}

impl OrderPlacement {
    pub fn limit(
        side: Side,
        price: BigDecimal,
        quantity: BigDecimal,
        price_denom: impl Into<String>,
        asset_denom: impl Into<String>,
        data: &OrderData,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            position_direction: side,
            price,
            quantity,
            price_denom: price_denom.into(),
            asset_denom: asset_denom.into(),
            order_type: OrderType::Limit,
            data: serde_json::to_string(data)?,
        })
    }

    /// `DIRECTION?price?quantity?price_denom?asset_denom?ORDER_TYPE?data`, the order syntax of
    /// `tx dex place-orders`.
    pub fn cli_arg(&self) -> String {
        format!(
            "{}?{}?{}?{}?{}?{}?{}",
            self.position_direction,
            self.price,
            self.quantity,
            self.price_denom,
            self.asset_denom,
            self.order_type,
            self.data
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMsg {
    GetOrder {
        account: String,
        price_denom: String,
        asset_denom: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "strict-serde", serde(deny_unknown_fields))]
pub struct GetOrderResponse {
    pub orders: Vec<ContractOrder>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn cancel_arguments_are_bare_ids() {
        let msg = DexMsg::CancelOrders {
            ids: vec![OrderId(7), OrderId(9)],
        };
        assert_eq!(msg.subcommand(), "cancel-orders");
        assert_eq!(msg.cli_args(), vec!["7", "9"]);
        assert_eq!(msg.kind(), "cancel_orders");
    }

    #[test]
    fn placement_uses_dex_order_syntax() {
        let data = OrderData::open(BigDecimal::from(1));
        let placement = OrderPlacement::limit(
            Side::Long,
            BigDecimal::from_str("99.90").unwrap(),
            BigDecimal::from(5),
            "USDC",
            "ATOM",
            &data,
        )
        .unwrap();
        let msg = DexMsg::PlaceOrders {
            orders: vec![placement],
        };
        assert_eq!(msg.subcommand(), "place-orders");

        let args = msg.cli_args();
        assert_eq!(args.len(), 1);
        let fields: Vec<&str> = args[0].splitn(7, '?').collect();
        assert_eq!(&fields[..6], &["LONG", "99.90", "5", "USDC", "ATOM", "LIMIT"]);
        let blob: OrderData = serde_json::from_str(fields[6]).unwrap();
        assert_eq!(blob, data);
        assert_eq!(blob.position_effect, PositionEffect::Open);
    }

    #[test]
    fn get_order_query_shape() {
        let q = QueryMsg::GetOrder {
            account: "sei1abc".into(),
            price_denom: "USDC".into(),
            asset_denom: "ATOM".into(),
        };
        assert_eq!(
            serde_json::to_value(&q).unwrap(),
            json!({"get_order": {"account": "sei1abc", "price_denom": "USDC", "asset_denom": "ATOM"}})
        );
    }
}
