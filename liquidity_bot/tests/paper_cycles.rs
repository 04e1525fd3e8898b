// End-to-end runs of the engine against the paper exchange.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use tokio::sync::watch;
use vortex_client::{parse_address, Credentials, OrderData, Side, TxBuilder, TxSigner};

use liquidity_bot::{
    Action, BotError, Cycle, CycleEngine, CycleRunner, EngineConfig, Fault, LadderParams,
    ManualClock, MarketSpec, Outcome, PaperExchange, PlacementTemplate, PriceOracle, QueryError,
    RefreshScheduler, SchedulerConfig, TransactionSubmitter,
};

const SENDER: &str = "sei1pgm8hyk0pvphmlvfjc8wsvk4daluz5tgk0yfme";
const CONTRACT: &str = "sei1ejpjr43ht3y56pplm5pxpusmcrk9rkkvna4tklusnnwdxpqm0zls9ckj57";

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

/// Oracle the test can move between cycles.
struct MovablePrice(Mutex<BigDecimal>);

impl MovablePrice {
    fn new(price: &str) -> Arc<Self> {
        Arc::new(Self(Mutex::new(dec(price))))
    }

    fn set(&self, price: &str) {
        *self.0.lock().unwrap() = dec(price);
    }
}

#[async_trait]
impl PriceOracle for MovablePrice {
    async fn reference_price(&self) -> Result<BigDecimal, QueryError> {
        Ok(self.0.lock().unwrap().clone())
    }
}

async fn engine(exchange: &Arc<PaperExchange>, oracle: Arc<dyn PriceOracle>) -> CycleEngine {
    let signer = TxSigner {
        address: parse_address(SENDER).unwrap(),
        credentials: Arc::new(Credentials::new("mm1", None)),
    };
    let template = PlacementTemplate {
        price_denom: "USDC".into(),
        asset_denom: "ATOM".into(),
        data: OrderData::open(dec("1")),
        deposit: vec![],
    };
    let builder = TxBuilder::new("atlantic-2", parse_address(CONTRACT).unwrap(), 500_000, "100000usei");
    let submitter = TransactionSubmitter::connect(
        signer,
        builder,
        template,
        exchange.clone(),
        exchange.clone(),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let config = EngineConfig {
        ladder: LadderParams {
            spread_bps: 20,
            level_count: 2,
            level_spacing_bps: 10,
            level_size: dec("5"),
            skew: dec("0"),
        },
        market: MarketSpec {
            tick_size: dec("0.01"),
            lot_size: None,
        },
        query_timeout: Duration::from_secs(1),
        pending_cancel_cycles: 2,
    };
    CycleEngine::new("paper", oracle, exchange.clone(), submitter, config)
}

fn fixed(price: &str) -> Arc<dyn PriceOracle> {
    MovablePrice::new(price)
}

/// Wraps an engine, lets the test poke the exchange after each cycle and stops the scheduler
/// after a set number of cycles.
struct Driver {
    engine: CycleEngine,
    exchange: Arc<PaperExchange>,
    stop: watch::Sender<bool>,
    stop_after: u64,
    after_cycle: Box<dyn FnMut(u64, &PaperExchange) + Send>,
    cycles: Vec<Cycle>,
}

#[async_trait]
impl CycleRunner for Driver {
    fn name(&self) -> &str {
        self.engine.name()
    }

    async fn run_cycle(&mut self) -> Result<Cycle, BotError> {
        let result = self.engine.run_once().await;
        if let Ok(cycle) = &result {
            self.cycles.push(cycle.clone());
        }
        let done = self.cycles.len() as u64;
        (self.after_cycle)(done, &self.exchange);
        if done >= self.stop_after {
            let _ = self.stop.send(true);
        }
        result
    }
}

fn scheduler(clock: Arc<ManualClock>, max_consecutive_failures: u32) -> RefreshScheduler {
    let config = SchedulerConfig {
        interval: Duration::from_secs(30),
        max_consecutive_failures,
        backoff_base: Duration::from_secs(1),
        backoff_max: Duration::from_secs(60),
        jitter: Duration::ZERO,
    };
    RefreshScheduler::new(config, clock)
}

fn resting_keys(exchange: &PaperExchange) -> Vec<(Side, BigDecimal)> {
    let mut keys: Vec<_> = exchange.orders().into_iter().map(|o| (o.side, o.price)).collect();
    keys.sort_by(|a, b| a.1.cmp(&b.1));
    keys
}

#[tokio::test]
async fn scheduled_run_keeps_the_ladder_resting_then_withdraws() {
    let exchange = Arc::new(PaperExchange::new(0));
    let engine = engine(&exchange, fixed("100")).await;
    let clock = Arc::new(ManualClock::new());
    let (stop, shutdown) = watch::channel(false);
    let mut driver = Driver {
        engine,
        exchange: exchange.clone(),
        stop,
        stop_after: 3,
        after_cycle: Box::new(|_, _| {}),
        cycles: Vec::new(),
    };

    let exit = scheduler(clock.clone(), 3).run(&mut driver, shutdown).await.unwrap();
    assert_eq!(exit.cycles, 3);
    assert_eq!(exit.skipped_ticks, 0);
    assert_eq!(clock.elapsed(), Duration::from_secs(60));

    assert_eq!(driver.cycles[0].confirmed(), 4);
    assert!(driver.cycles[1].submissions.is_empty());
    assert!(driver.cycles[2].submissions.is_empty());
    assert_eq!(
        resting_keys(&exchange),
        vec![
            (Side::Long, dec("99.80")),
            (Side::Long, dec("99.90")),
            (Side::Short, dec("100.10")),
            (Side::Short, dec("100.20")),
        ]
    );

    let withdrawn = driver.engine.withdraw_all().await.unwrap();
    assert_eq!(withdrawn.len(), 4);
    assert!(withdrawn.iter().all(|s| s.outcome.is_confirmed()));
    assert_eq!(exchange.open_order_count(), 0);
    assert_eq!(exchange.chain_sequence(), 8);
}

#[tokio::test]
async fn fills_between_cycles_are_replenished() {
    let exchange = Arc::new(PaperExchange::new(0));
    let engine = engine(&exchange, fixed("100")).await;
    let (stop, shutdown) = watch::channel(false);
    let mut driver = Driver {
        engine,
        exchange: exchange.clone(),
        stop,
        stop_after: 3,
        after_cycle: Box::new(|done, exchange| {
            // Partially fill the best bid, fully take out the best ask.
            if done == 1 {
                let bid = exchange
                    .orders()
                    .into_iter()
                    .find(|o| o.side == Side::Long && o.price == dec("99.90"))
                    .unwrap();
                exchange.fill(bid.id, &dec("2"));
                assert_eq!(exchange.trade_through(&dec("100.15")), 1);
            }
        }),
        cycles: Vec::new(),
    };

    scheduler(Arc::new(ManualClock::new()), 3).run(&mut driver, shutdown).await.unwrap();

    let second = &driver.cycles[1];
    let cancels = second.actions().filter(|a| a.is_cancel()).count();
    let places = second.actions().filter(|a| !a.is_cancel()).count();
    assert_eq!((cancels, places), (1, 2));
    assert!(driver.cycles[2].submissions.is_empty());

    let orders = exchange.orders();
    assert_eq!(orders.len(), 4);
    assert!(orders.iter().all(|o| o.remaining == dec("5")));
}

#[tokio::test]
async fn price_move_requotes_every_level() {
    let exchange = Arc::new(PaperExchange::new(0));
    let price = MovablePrice::new("100");
    let mut engine = engine(&exchange, price.clone()).await;

    engine.run_once().await.unwrap();
    let before: HashSet<_> = exchange.orders().into_iter().map(|o| o.id).collect();

    price.set("101");
    let cycle = engine.run_once().await.unwrap();
    assert_eq!(cycle.submissions.len(), 8);
    // Cancels go out before any placement.
    assert!(cycle.actions().take(4).all(Action::is_cancel));
    assert!(cycle.actions().skip(4).all(|a| !a.is_cancel()));

    let after: HashSet<_> = exchange.orders().into_iter().map(|o| o.id).collect();
    assert!(before.is_disjoint(&after));
    assert_eq!(
        resting_keys(&exchange),
        vec![
            (Side::Long, dec("100.79")),
            (Side::Long, dec("100.89")),
            (Side::Short, dec("101.11")),
            (Side::Short, dec("101.21")),
        ]
    );
}

#[tokio::test]
async fn placement_that_landed_after_a_timeout_is_not_duplicated() {
    let exchange = Arc::new(PaperExchange::new(0));
    let mut engine = engine(&exchange, fixed("100")).await;
    exchange.script([Fault::Timeout { apply: true }]);

    let first = engine.run_once().await.unwrap();
    assert_eq!(first.submissions[0].outcome, Outcome::Timeout);
    assert!(first.submissions[1..].iter().all(|s| s.outcome == Outcome::Deferred));
    assert!(first.is_degraded());
    assert_eq!(exchange.open_order_count(), 1);

    let second = engine.run_once().await.unwrap();
    assert_eq!(second.submissions.len(), 3);
    assert_eq!(second.confirmed(), 3);
    // The landed transaction consumed sequence 0; the retry picks up after it.
    assert_eq!(second.submissions[0].sequence, Some(1));

    let keys = resting_keys(&exchange);
    let distinct: HashSet<_> = keys.iter().cloned().collect();
    assert_eq!(keys.len(), 4);
    assert_eq!(distinct.len(), 4);
}

#[tokio::test]
async fn sequence_recovers_after_another_client_uses_the_account() {
    let exchange = Arc::new(PaperExchange::new(0));
    let mut engine = engine(&exchange, fixed("100")).await;
    engine.run_once().await.unwrap();
    assert_eq!(engine.submitter().state().sequence, 4);

    exchange.bump_sequence(2);
    let victim = exchange.orders()[0].id;
    exchange.fill(victim, &dec("5"));

    let cycle = engine.run_once().await.unwrap();
    assert_eq!(cycle.submissions.len(), 1);
    assert!(cycle.submissions[0].outcome.is_confirmed());
    assert_eq!(cycle.submissions[0].sequence, Some(6));

    let sent: Vec<u64> = exchange.broadcasts().iter().map(|b| b.sequence).collect();
    assert_eq!(sent, vec![0, 1, 2, 3, 4, 6]);
    assert_eq!(engine.submitter().state().sequence, 7);
    assert_eq!(exchange.chain_sequence(), 7);
}

#[tokio::test]
async fn repeated_query_failures_stop_the_scheduler() {
    let exchange = Arc::new(PaperExchange::new(0));
    let engine = engine(&exchange, fixed("100")).await;
    exchange.fail_queries(10);
    let clock = Arc::new(ManualClock::new());
    let (stop, shutdown) = watch::channel(false);
    let mut driver = Driver {
        engine,
        exchange: exchange.clone(),
        stop,
        stop_after: u64::MAX,
        after_cycle: Box::new(|_, _| {}),
        cycles: Vec::new(),
    };

    let err = scheduler(clock.clone(), 3).run(&mut driver, shutdown).await.unwrap_err();
    match err {
        BotError::TooManyFailures { count, last } => {
            assert_eq!(count, 4);
            assert!(last.contains("order book"), "{last}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(exchange.broadcasts().is_empty());
    // Three failures are tolerated; backoffs of 1s, 2s and 4s still land on the next grid ticks.
    assert_eq!(clock.elapsed(), Duration::from_secs(90));
}
