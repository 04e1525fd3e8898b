//! In-memory stand-in for the contract and chain.
//!
//! One `PaperExchange` models one account: its sequence, its resting orders and the
//! transactions it broadcast. It implements [`Broadcaster`], [`OrderBookView`] and
//! [`AccountSource`], so an engine can run end to end without a node. Faults can be scripted
//! per broadcast to exercise the submitter's failure handling.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::{BigDecimal, Signed};
use tracing::trace;
use vortex_client::{
    AccountId, AccountInfo, BroadcastError, BroadcastResponse, Broadcaster, DexMsg, OrderId,
    Side, TxRequest,
};

use crate::book::{Order, OrderBookView, OrderStatus};
use crate::error::QueryError;
use crate::submitter::AccountSource;

const ACCOUNT_NUMBER: u64 = 1;

/// What the next broadcast does instead of (or besides) committing normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    None,
    /// The caller sees a timeout. With `apply` the transaction still lands.
    Timeout { apply: bool },
    /// The chain rejects the transaction, either at CheckTx or inside a block.
    Reject { included: bool },
    /// Answer with a sequence mismatch whatever sequence was sent.
    Mismatch,
    Transport,
    Signing,
    /// Sleep before handling the transaction normally.
    Stall(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastRecord {
    pub sequence: u64,
    pub kind: &'static str,
    pub fault: Fault,
    pub applied: bool,
}

#[derive(Debug, Default)]
struct Ledger {
    sequence: u64,
    height: u64,
    next_order_id: u64,
    orders: BTreeMap<OrderId, Order>,
    faults: VecDeque<Fault>,
    failing_queries: u32,
    broadcasts: Vec<BroadcastRecord>,
}

impl Ledger {
    /// Executes `msg` in a block. Returns the emitted order ids, or the contract's error log.
    fn execute(&mut self, msg: &DexMsg) -> Result<Vec<OrderId>, String> {
        self.sequence += 1;
        self.height += 1;
        match msg {
            DexMsg::PlaceOrders { orders } => {
                let mut ids = Vec::with_capacity(orders.len());
                for placement in orders {
                    self.next_order_id += 1;
                    let id = OrderId(self.next_order_id);
                    self.orders.insert(
                        id,
                        Order {
                            id,
                            side: placement.position_direction,
                            price: placement.price.clone(),
                            size: placement.quantity.clone(),
                            remaining: placement.quantity.clone(),
                            status: OrderStatus::Open,
                        },
                    );
                    ids.push(id);
                }
                Ok(ids)
            }
            DexMsg::CancelOrders { ids } => {
                if let Some(missing) = ids.iter().find(|id| !self.orders.contains_key(*id)) {
                    return Err(format!("order {missing} not found"));
                }
                for id in ids {
                    self.orders.remove(id);
                }
                Ok(ids.clone())
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct PaperExchange {
    ledger: Mutex<Ledger>,
}

impl PaperExchange {
    pub fn new(sequence: u64) -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                sequence,
                ..Ledger::default()
            }),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        // A panicking test thread must not hide the ledger from the others.
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues faults for the next broadcasts, in order. Unscripted broadcasts commit.
    pub fn script(&self, faults: impl IntoIterator<Item = Fault>) {
        self.ledger().faults.extend(faults);
    }

    /// Advances the chain sequence as if another client had used the account.
    pub fn bump_sequence(&self, by: u64) {
        self.ledger().sequence += by;
    }

    /// Makes the next `count` order book and account queries fail.
    pub fn fail_queries(&self, count: u32) {
        self.ledger().failing_queries = count;
    }

    pub fn chain_sequence(&self) -> u64 {
        self.ledger().sequence
    }

    pub fn orders(&self) -> Vec<Order> {
        self.ledger().orders.values().cloned().collect()
    }

    pub fn open_order_count(&self) -> usize {
        self.ledger().orders.values().filter(|o| o.is_open()).count()
    }

    pub fn broadcasts(&self) -> Vec<BroadcastRecord> {
        self.ledger().broadcasts.clone()
    }

    /// Fills `quantity` of order `id`. A fully filled order leaves the book.
    pub fn fill(&self, id: OrderId, quantity: &BigDecimal) {
        let mut ledger = self.ledger();
        let exhausted = match ledger.orders.get_mut(&id) {
            Some(order) => {
                order.remaining = &order.remaining - quantity;
                !order.remaining.is_positive()
            }
            None => false,
        };
        if exhausted {
            ledger.orders.remove(&id);
        }
    }

    /// A trade at `price` fully fills every order it crosses.
    pub fn trade_through(&self, price: &BigDecimal) -> usize {
        let mut ledger = self.ledger();
        let before = ledger.orders.len();
        ledger.orders.retain(|_, o| match o.side {
            Side::Short => o.price > *price,
            Side::Long => o.price < *price,
        });
        before - ledger.orders.len()
    }

    fn take_failing_query(&self) -> bool {
        let mut ledger = self.ledger();
        if ledger.failing_queries > 0 {
            ledger.failing_queries -= 1;
            true
        } else {
            false
        }
    }

    fn respond(&self, tx: &TxRequest, fault: Fault) -> Result<BroadcastResponse, BroadcastError> {
        let mut ledger = self.ledger();
        let mut record = BroadcastRecord {
            sequence: tx.sequence,
            kind: tx.msg.kind(),
            fault: fault.clone(),
            applied: false,
        };

        let result = match fault {
            Fault::Signing => Err(BroadcastError::Signing("paper: key unavailable".into())),
            Fault::Transport => Err(BroadcastError::Transport("paper: connection reset".into())),
            Fault::Mismatch => Ok(mismatch(ledger.sequence, tx.sequence)),
            _ if tx.sequence != ledger.sequence => Ok(mismatch(ledger.sequence, tx.sequence)),
            Fault::Timeout { apply } => {
                if apply {
                    // The contract outcome is lost along with the response.
                    let _ = ledger.execute(&tx.msg);
                    record.applied = true;
                }
                Err(BroadcastError::Timeout)
            }
            Fault::Reject { included: false } => Ok(rejection(0, "insufficient fees")),
            Fault::Reject { included: true } => {
                ledger.sequence += 1;
                ledger.height += 1;
                Ok(rejection(ledger.height, "insufficient funds"))
            }
            Fault::None | Fault::Stall(_) => match ledger.execute(&tx.msg) {
                Ok(order_ids) => {
                    record.applied = true;
                    Ok(BroadcastResponse {
                        tx_hash: format!("PAPER{:08X}", ledger.height),
                        height: ledger.height,
                        code: 0,
                        codespace: String::new(),
                        raw_log: String::new(),
                        order_ids,
                    })
                }
                Err(log) => Ok(rejection(ledger.height, &log)),
            },
        };

        trace!(sequence = tx.sequence, kind = record.kind, fault = ?record.fault, "paper broadcast");
        ledger.broadcasts.push(record);
        result
    }
}

fn mismatch(expected: u64, got: u64) -> BroadcastResponse {
    BroadcastResponse {
        tx_hash: String::new(),
        height: 0,
        code: 32,
        codespace: "sdk".into(),
        raw_log: format!("account sequence mismatch, expected {expected}, got {got}: incorrect account sequence"),
        order_ids: Vec::new(),
    }
}

fn rejection(height: u64, log: &str) -> BroadcastResponse {
    BroadcastResponse {
        tx_hash: format!("PAPER{height:08X}"),
        height,
        code: 5,
        codespace: "dex".into(),
        raw_log: log.to_string(),
        order_ids: Vec::new(),
    }
}

#[async_trait]
impl Broadcaster for PaperExchange {
    async fn broadcast(&self, tx: &TxRequest) -> Result<BroadcastResponse, BroadcastError> {
        let fault = self.ledger().faults.pop_front().unwrap_or(Fault::None);
        if let Fault::Stall(delay) = fault {
            tokio::time::sleep(delay).await;
        }
        self.respond(tx, fault)
    }
}

#[async_trait]
impl OrderBookView for PaperExchange {
    async fn open_orders(&self, _account: &AccountId) -> Result<Vec<Order>, QueryError> {
        if self.take_failing_query() {
            return Err(QueryError::Unavailable("paper: order book unavailable".into()));
        }
        Ok(self.orders())
    }
}

#[async_trait]
impl AccountSource for PaperExchange {
    async fn account_info(&self, address: &AccountId) -> Result<AccountInfo, QueryError> {
        if self.take_failing_query() {
            return Err(QueryError::Unavailable("paper: account unavailable".into()));
        }
        Ok(AccountInfo {
            address: address.to_string(),
            account_number: ACCOUNT_NUMBER,
            sequence: self.chain_sequence(),
        })
    }
}
