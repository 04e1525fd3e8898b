//! One refresh cycle: read, quote, plan, submit.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use vortex_client::OrderId;

use crate::book::{Order, OrderBookView, OrderStatus};
use crate::error::{BotError, QueryError};
use crate::oracle::PriceOracle;
use crate::planner::{plan, Action};
use crate::quote::{compute_ladder, LadderParams, MarketSpec};
use crate::scheduler::CycleRunner;
use crate::submitter::{Outcome, Submission, TransactionSubmitter};

/// Record of one cycle, for logs and metrics. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Cycle {
    pub number: u64,
    pub started_at: DateTime<Utc>,
    pub reference_price: BigDecimal,
    pub levels: usize,
    pub submissions: Vec<Submission>,
}

impl Cycle {
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.submissions.iter().map(|s| &s.action)
    }

    pub fn confirmed(&self) -> usize {
        self.submissions.iter().filter(|s| s.outcome.is_confirmed()).count()
    }

    fn count(&self, label: &str) -> usize {
        self.submissions.iter().filter(|s| s.outcome.label() == label).count()
    }

    /// Attempted something and confirmed nothing.
    pub fn is_degraded(&self) -> bool {
        !self.submissions.is_empty() && self.confirmed() == 0
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub ladder: LadderParams,
    pub market: MarketSpec,
    pub query_timeout: Duration,
    /// Cycles a cancel with unknown outcome stays excluded from planning.
    pub pending_cancel_cycles: u32,
}

pub struct CycleEngine {
    oracle: Arc<dyn PriceOracle>,
    book: Arc<dyn OrderBookView>,
    submitter: TransactionSubmitter,
    config: EngineConfig,
    name: String,
    pending_cancels: HashMap<OrderId, u32>,
    cycles: u64,
}

impl CycleEngine {
    pub fn new(
        name: impl Into<String>,
        oracle: Arc<dyn PriceOracle>,
        book: Arc<dyn OrderBookView>,
        submitter: TransactionSubmitter,
        config: EngineConfig,
    ) -> Self {
        Self {
            oracle,
            book,
            submitter,
            config,
            name: name.into(),
            pending_cancels: HashMap::new(),
            cycles: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn submitter(&self) -> &TransactionSubmitter {
        &self.submitter
    }

    pub fn pending_cancels(&self) -> impl Iterator<Item = &OrderId> {
        self.pending_cancels.keys()
    }

    async fn read_state(&self) -> Result<(BigDecimal, Vec<Order>), QueryError> {
        let after = self.config.query_timeout;
        let address = self.submitter.address();
        tokio::try_join!(
            bounded("price", after, self.oracle.reference_price()),
            bounded("order book", after, self.book.open_orders(address)),
        )
    }

    /// Marks orders with an outstanding cancel and ages the pending set by one cycle.
    fn apply_pending_cancels(&mut self, orders: &mut [Order]) {
        let present: HashSet<OrderId> = orders.iter().map(|o| o.id).collect();
        self.pending_cancels.retain(|id, left| {
            if !present.contains(id) || *left == 0 {
                return false;
            }
            *left -= 1;
            true
        });
        for order in orders.iter_mut().filter(|o| o.is_open()) {
            if self.pending_cancels.contains_key(&order.id) {
                order.status = OrderStatus::PendingCancel;
            }
        }
    }

    fn track_unresolved_cancels(&mut self, submissions: &[Submission]) {
        for submission in submissions {
            if let (Action::Cancel { order_id }, Outcome::Timeout) = (&submission.action, &submission.outcome) {
                self.pending_cancels.insert(*order_id, self.config.pending_cancel_cycles);
            }
        }
    }

    pub async fn run_once(&mut self) -> Result<Cycle, BotError> {
        self.cycles += 1;
        let number = self.cycles;
        let started_at = Utc::now();

        let (reference_price, mut orders) = self.read_state().await?;
        let ladder = compute_ladder(&reference_price, &self.config.ladder, &self.config.market)?;
        self.apply_pending_cancels(&mut orders);

        let actions = plan(&ladder, &orders, &self.config.market.tick_size);
        debug!(bot = %self.name, cycle = number, levels = ladder.len(), actions = actions.len(), "planned");

        let submissions = self.submitter.submit(actions).await?;
        self.track_unresolved_cancels(&submissions);

        let cycle = Cycle {
            number,
            started_at,
            reference_price,
            levels: ladder.len(),
            submissions,
        };
        info!(
            bot = %self.name,
            cycle = cycle.number,
            price = %cycle.reference_price,
            resting = orders.len(),
            actions = cycle.submissions.len(),
            confirmed = cycle.confirmed(),
            rejected = cycle.count("rejected"),
            timed_out = cycle.count("timeout"),
            deferred = cycle.count("deferred"),
            "cycle complete"
        );
        Ok(cycle)
    }

    /// Cancels every resting order of the account.
    pub async fn withdraw_all(&mut self) -> Result<Vec<Submission>, BotError> {
        let orders = bounded(
            "order book",
            self.config.query_timeout,
            self.book.open_orders(self.submitter.address()),
        )
        .await?;
        let actions: Vec<Action> = orders
            .iter()
            .filter(|o| o.is_open())
            .map(|o| Action::Cancel { order_id: o.id })
            .collect();
        if actions.is_empty() {
            info!(bot = %self.name, "no resting orders to withdraw");
            return Ok(Vec::new());
        }

        info!(bot = %self.name, count = actions.len(), "withdrawing resting orders");
        let submissions = self.submitter.submit(actions).await?;
        let failed = submissions.iter().filter(|s| !s.outcome.is_confirmed()).count();
        if failed > 0 {
            warn!(bot = %self.name, failed, "some orders may still be resting");
        }
        Ok(submissions)
    }
}

#[async_trait]
impl CycleRunner for CycleEngine {
    fn name(&self) -> &str {
        CycleEngine::name(self)
    }

    async fn run_cycle(&mut self) -> Result<Cycle, BotError> {
        self.run_once().await
    }
}

async fn bounded<T>(
    what: &'static str,
    after: Duration,
    fut: impl Future<Output = Result<T, QueryError>>,
) -> Result<T, QueryError> {
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| QueryError::Timeout { what, after })?
}
