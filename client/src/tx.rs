//! Transaction requests handed to a [`Broadcaster`](crate::Broadcaster) and the responses
//! coming back from it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use cosmrs::{AccountId, Coin, Denom};
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};

use crate::error::Error;
use crate::msg::DexMsg;
use crate::types::OrderId;

/// Cosmos SDK `ErrWrongSequence`.
const SDK_WRONG_SEQUENCE: u32 = 32;
const WRONG_SEQUENCE_LOG: &str = "account sequence mismatch";
/// Event the dex module emits per accepted placement, carrying the `order_id` attribute.
const PLACE_ORDER_EVENT: &str = "place_orders";

/// Keyring reference for the external signer. The key material itself never enters this process.
#[derive(Clone)]
pub struct Credentials {
    pub key_name: String,
    password: Option<String>,
}

impl Credentials {
    pub fn new(key_name: impl Into<String>, password: Option<String>) -> Self {
        Self {
            key_name: key_name.into(),
            password,
        }
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key_name", &self.key_name)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// The account a transaction is sent from.
#[derive(Debug, Clone)]
pub struct TxSigner {
    pub address: AccountId,
    pub credentials: Arc<Credentials>,
}

/// Everything the external signer/broadcaster needs for one dex order transaction.
#[derive(Debug, Clone)]
pub struct TxRequest {
    pub chain_id: String,
    pub contract: AccountId,
    pub sender: AccountId,
    pub credentials: Arc<Credentials>,
    pub account_number: u64,
    pub sequence: u64,
    pub msg: DexMsg,
    /// Deposit sent along with the orders.
    pub funds: Vec<Coin>,
    pub gas: u64,
    pub fees: String,
    pub memo: String,
}

impl TxRequest {
    /// Funds in the `<amount><denom>,...` form the chain CLI expects.
    pub fn funds_arg(&self) -> Option<String> {
        if self.funds.is_empty() {
            return None;
        }
        Some(
            self.funds
                .iter()
                .map(|c| format!("{}{}", c.amount, c.denom))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

#[derive(Debug, Clone)]
pub struct TxBuilder {
    chain_id: String,
    contract: AccountId,
    gas: u64,
    fees: String,
    memo: String,
}

impl TxBuilder {
    pub fn new(chain_id: impl Into<String>, contract: AccountId, gas: u64, fees: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            contract,
            gas,
            fees: fees.into(),
            memo: String::new(),
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }

    pub fn build(
        &self,
        signer: &TxSigner,
        account_number: u64,
        sequence: u64,
        msg: DexMsg,
        funds: Vec<Coin>,
    ) -> TxRequest {
        TxRequest {
            chain_id: self.chain_id.clone(),
            contract: self.contract.clone(),
            sender: signer.address.clone(),
            credentials: Arc::clone(&signer.credentials),
            account_number,
            sequence,
            msg,
            funds,
            gas: self.gas,
            fees: self.fees.clone(),
            memo: self.memo.clone(),
        }
    }
}

/// Parses `100000000uusdc` into a coin.
pub fn parse_coin(raw: &str) -> Result<Coin, Error> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| Error::InvalidCoin(raw.to_string()))?;
    let (amount, denom) = raw.split_at(split);
    let amount = amount
        .parse::<u128>()
        .map_err(|_| Error::InvalidCoin(raw.to_string()))?;
    let denom = Denom::from_str(denom).map_err(|_| Error::InvalidCoin(raw.to_string()))?;
    Ok(Coin { denom, amount })
}

pub fn parse_address(raw: &str) -> Result<AccountId, Error> {
    AccountId::from_str(raw.trim()).map_err(|e| Error::InvalidAddress {
        address: raw.to_string(),
        reason: e.to_string(),
    })
}

/// What the chain said about a broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastResponse {
    pub tx_hash: String,
    pub height: u64,
    pub code: u32,
    pub codespace: String,
    pub raw_log: String,
    /// Order ids the dex module assigned (`place_orders` events, `order_id` attribute).
    pub order_ids: Vec<OrderId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Committed,
    SequenceMismatch { expected: Option<u64> },
    /// `included` is true when the failure happened inside a block, which consumes the sequence.
    Failed { included: bool },
}

impl BroadcastResponse {
    pub fn status(&self) -> TxStatus {
        if self.code == 0 {
            return TxStatus::Committed;
        }
        let wrong_sequence = (self.codespace == "sdk" && self.code == SDK_WRONG_SEQUENCE)
            || self.raw_log.contains(WRONG_SEQUENCE_LOG);
        if wrong_sequence {
            return TxStatus::SequenceMismatch {
                expected: expected_sequence(&self.raw_log),
            };
        }
        TxStatus::Failed {
            included: self.height > 0,
        }
    }

    /// Decodes the JSON a Cosmos SDK CLI prints with `--output json`.
    pub fn from_cli_json(bytes: &[u8]) -> Result<Self, Error> {
        let raw: RawTxResponse = serde_json::from_slice(bytes)?;

        let mut order_ids = Vec::new();
        let events = raw
            .logs
            .iter()
            .flat_map(|log| log.events.iter())
            .chain(raw.events.iter());
        for event in events {
            if event.kind != PLACE_ORDER_EVENT {
                continue;
            }
            for attr in event.attributes.iter().filter(|a| a.key == "order_id") {
                if let Ok(id) = attr.value.parse::<u64>() {
                    let id = OrderId(id);
                    if !order_ids.contains(&id) {
                        order_ids.push(id);
                    }
                }
            }
        }

        Ok(Self {
            tx_hash: raw.txhash,
            height: raw.height,
            code: raw.code,
            codespace: raw.codespace,
            raw_log: raw.raw_log,
            order_ids,
        })
    }
}

/// Pulls `N` out of "account sequence mismatch, expected N, got M".
fn expected_sequence(raw_log: &str) -> Option<u64> {
    let rest = &raw_log[raw_log.find("expected ")? + "expected ".len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[serde_as]
#[derive(Deserialize)]
struct RawTxResponse {
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default)]
    height: u64,
    txhash: String,
    #[serde(default)]
    code: u32,
    #[serde(default)]
    codespace: String,
    #[serde(default)]
    raw_log: String,
    #[serde(default)]
    logs: Vec<RawLog>,
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Deserialize)]
struct RawLog {
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Vec<RawAttribute>,
}

#[derive(Deserialize)]
struct RawAttribute {
    key: String,
    #[serde(default)]
    value: String,
}
