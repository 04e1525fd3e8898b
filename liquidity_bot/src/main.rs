// liquidity_bot/src/main.rs
//
// Runs one quote engine per configured account until Ctrl-C or until an engine gives up.
// Usage: liquidity-bot [config.toml]

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use vortex_client::{parse_address, Broadcaster, CliBroadcaster, LcdClient, TxBuilder, TxSigner};

use liquidity_bot::error::BotError;
use liquidity_bot::settings::{self, AccountConfig, BotConfig, Mode, PriceConfig};
use liquidity_bot::{
    logging, AccountSource, ContractOrderBook, CycleEngine, FixedPrice, LcdOracle, OrderBookView,
    PaperExchange, PriceOracle, RefreshScheduler, TokioClock, TransactionSubmitter,
};

#[tokio::main]
async fn main() -> Result<()> {
    install_rustls_provider();

    let path = settings::config_path(std::env::args())?;
    let config = BotConfig::load(&path).with_context(|| format!("loading {}", path.display()))?;
    if let Err(err) = logging::init(&config.logging) {
        eprintln!("[liquidity-bot] logging already initialised: {err}");
    }
    info!(
        config = %path.display(),
        network = config.network().as_str(),
        chain_id = %config.chain_id,
        mode = ?config.mode,
        accounts = config.accounts.len(),
        "starting"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);
    {
        let stop_tx = Arc::clone(&stop_tx);
        ctrlc::set_handler(move || {
            let _ = stop_tx.send(true);
        })
        .context("installing Ctrl-C handler")?;
    }

    let lcd = if config.needs_lcd() {
        let endpoint = config.lcd_endpoint()?;
        info!(%endpoint, "using LCD");
        Some(LcdClient::new(endpoint, config.engine_config().query_timeout)?)
    } else {
        None
    };

    let oracle: Arc<dyn PriceOracle> = match &config.price {
        PriceConfig::Oracle { denom } => {
            let lcd = lcd.clone().ok_or_else(|| anyhow!("oracle prices need an LCD endpoint"))?;
            Arc::new(LcdOracle::new(lcd, denom.clone()))
        }
        PriceConfig::Fixed { value } => Arc::new(FixedPrice(value.clone())),
    };

    // Engines are built up front so a bad account stops the bot before anything trades.
    let mut engines = Vec::with_capacity(config.accounts.len());
    for account in &config.accounts {
        let engine = build_engine(&config, account, lcd.as_ref(), Arc::clone(&oracle))
            .await
            .with_context(|| format!("account {}", account.name))?;
        engines.push(engine);
    }

    let mut tasks = JoinSet::new();
    for engine in engines {
        let scheduler = RefreshScheduler::new(config.scheduler_config(), Arc::new(TokioClock));
        let shutdown = stop_rx.clone();
        let withdraw = config.cancel_on_shutdown;
        tasks.spawn(run_account(engine, scheduler, shutdown, withdraw));
    }

    let mut failure: Option<BotError> = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(error = %err, "engine stopped, shutting down the others");
                let _ = stop_tx.send(true);
                failure.get_or_insert(err);
            }
            Err(join_err) => {
                error!(error = %join_err, "engine task panicked, shutting down the others");
                let _ = stop_tx.send(true);
            }
        }
    }

    match failure {
        Some(err) => Err(err.into()),
        None => {
            info!("stopped");
            Ok(())
        }
    }
}

async fn build_engine(
    config: &BotConfig,
    account: &AccountConfig,
    lcd: Option<&LcdClient>,
    oracle: Arc<dyn PriceOracle>,
) -> Result<CycleEngine> {
    let address = parse_address(&account.address)?;
    let credentials = Arc::new(settings::resolve_credentials(account)?);
    let contract = config.contract()?;
    let builder = TxBuilder::new(&config.chain_id, contract.clone(), config.tx.gas, &config.tx.fees)
        .with_memo(&config.tx.memo);

    let (broadcaster, book, accounts): (Arc<dyn Broadcaster>, Arc<dyn OrderBookView>, Arc<dyn AccountSource>) =
        match config.mode {
            Mode::Live => {
                let lcd = lcd.cloned().ok_or_else(|| anyhow!("live mode needs an LCD endpoint"))?;
                let cli = CliBroadcaster::new(&config.binary, config.submit_timeout())
                    .with_node(config.node.clone())
                    .with_keyring_backend(config.keyring_backend.clone());
                let book = ContractOrderBook::new(
                    lcd.clone(),
                    contract,
                    &config.market.price_denom,
                    &config.market.asset_denom,
                );
                (Arc::new(cli), Arc::new(book), Arc::new(lcd))
            }
            Mode::Paper => {
                let exchange = Arc::new(PaperExchange::new(0));
                (exchange.clone(), exchange.clone(), exchange)
            }
        };

    let submitter = TransactionSubmitter::connect(
        TxSigner { address, credentials },
        builder,
        config.placement_template()?,
        broadcaster,
        accounts,
        config.submit_timeout(),
    )
    .await?;

    Ok(CycleEngine::new(
        account.name.clone(),
        oracle,
        book,
        submitter,
        config.engine_config(),
    ))
}

async fn run_account(
    mut engine: CycleEngine,
    scheduler: RefreshScheduler,
    shutdown: watch::Receiver<bool>,
    withdraw: bool,
) -> Result<(), BotError> {
    let result = scheduler.run(&mut engine, shutdown).await;

    if withdraw {
        match engine.withdraw_all().await {
            Ok(submissions) => {
                let confirmed = submissions.iter().filter(|s| s.outcome.is_confirmed()).count();
                info!(bot = %engine.name(), confirmed, total = submissions.len(), "withdrawn");
            }
            Err(err) => warn!(bot = %engine.name(), error = %err, "withdraw failed"),
        }
    }

    result.map(|exit| {
        info!(
            bot = %engine.name(),
            cycles = exit.cycles,
            skipped_ticks = exit.skipped_ticks,
            "engine finished"
        );
    })
}

fn install_rustls_provider() {
    // reqwest's rustls backend needs a process-wide crypto provider. If another part of the
    // process already installed one, keep it.
    let _ = rustls::crypto::ring::default_provider().install_default();
}
