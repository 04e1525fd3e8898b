//! Asynchronous client for the Vortex perpetuals contract on a Cosmos (Sei) chain.
//!
//! The crate covers what a trading bot needs from the chain: the contract's message types,
//! REST queries for orders, oracle prices and account sequence numbers, and the hand-off of
//! dex order transactions to an external signer/broadcaster.

pub mod broadcast;
pub mod error;
pub mod lcd;
pub mod msg;
pub mod tx;
pub mod types;

pub use broadcast::{Broadcaster, CliBroadcaster};
pub use cosmrs::{AccountId, Coin};
pub use error::{BroadcastError, Error};
pub use lcd::{AccountInfo, LcdClient};
pub use msg::{DexMsg, GetOrderResponse, OrderData, OrderPlacement, QueryMsg};
pub use tx::{
    parse_address, parse_coin, BroadcastResponse, Credentials, TxBuilder, TxRequest, TxSigner,
    TxStatus,
};
pub use types::{ContractOrder, OrderId, OrderType, PositionEffect, Side, SignedDecimal};
