use bigdecimal::{BigDecimal, Zero};
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumString};

/// Contract-assigned order identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Into, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OrderId(pub u64);

/// Order direction as the Vortex contract names it.
///
/// On the wire the contract uses `"Long"` / `"Short"`; logs and the CLI use the upper-case
/// form (`LONG` / `SHORT`).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumString,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Side {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay)]
#[strum(serialize_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
    Liquidation,
    FokMarket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionEffect {
    Open,
    Close,
}

/// Decimal with an explicit sign flag, the contract's representation for prices and quantities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDecimal {
    pub decimal: BigDecimal,
    pub negative: bool,
}

impl SignedDecimal {
    pub fn positive(decimal: BigDecimal) -> Self {
        Self {
            decimal,
            negative: false,
        }
    }

    pub fn to_big_decimal(&self) -> BigDecimal {
        if self.negative && !self.decimal.is_zero() {
            -self.decimal.clone()
        } else {
            self.decimal.clone()
        }
    }
}

/// A resting order as returned by the contract's `get_order` query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "strict-serde", serde(deny_unknown_fields))]
pub struct ContractOrder {
    pub id: OrderId,
    pub account: String,
    pub price_denom: String,
    pub asset_denom: String,
    pub price: SignedDecimal,
    pub quantity: SignedDecimal,
    pub remaining_quantity: SignedDecimal,
    pub direction: Side,
    pub effect: PositionEffect,
    pub leverage: SignedDecimal,
    pub order_type: OrderType,
}
