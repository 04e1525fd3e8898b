//! Configuration file model.
//!
//! The file is TOML. Secrets never live in it: each account names the environment variable
//! holding its keyring password, which is read once when the bot starts.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bigdecimal::{BigDecimal, Signed};
use directories::ProjectDirs;
use serde::Deserialize;
use vortex_client::{parse_address, parse_coin, AccountId, Coin, Credentials, OrderData};

use crate::cycle::EngineConfig;
use crate::error::ConfigError;
use crate::logging::LogConfig;
use crate::quote::{LadderParams, MarketSpec};
use crate::scheduler::SchedulerConfig;
use crate::submitter::PlacementTemplate;

pub const CONFIG_PATH_ENV: &str = "LIQUIDITY_BOT_CONFIG";

const MAINNET_CHAIN_ID: &str = "pacific-1";
const TESTNET_CHAIN_ID: &str = "atlantic-2";
const DEFAULT_MAINNET_LCD: &str = "https://rest.sei-apis.com";
const DEFAULT_TESTNET_LCD: &str = "https://rest.atlantic-2.seinetwork.io";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Custom,
}

impl Network {
    pub fn from_chain_id(chain_id: &str) -> Self {
        match chain_id.trim().to_ascii_lowercase().as_str() {
            MAINNET_CHAIN_ID | "mainnet" => Network::Mainnet,
            TESTNET_CHAIN_ID | "testnet" => Network::Testnet,
            _ => Network::Custom,
        }
    }

    pub fn default_lcd(&self) -> Option<&'static str> {
        match self {
            Network::Mainnet => Some(DEFAULT_MAINNET_LCD),
            Network::Testnet => Some(DEFAULT_TESTNET_LCD),
            Network::Custom => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "Mainnet",
            Network::Testnet => "Testnet",
            Network::Custom => "Custom",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Live,
    /// In-memory exchange; nothing is broadcast.
    Paper,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MarketConfig {
    pub price_denom: String,
    pub asset_denom: String,
    pub tick_size: BigDecimal,
    #[serde(default)]
    pub lot_size: Option<BigDecimal>,
    #[serde(default = "default_leverage")]
    pub leverage: BigDecimal,
}

fn default_leverage() -> BigDecimal {
    BigDecimal::from(1)
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum PriceConfig {
    /// Oracle module exchange rate of `denom`.
    Oracle { denom: String },
    Fixed { value: BigDecimal },
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TxConfig {
    #[serde(default = "default_gas")]
    pub gas: u64,
    #[serde(default = "default_fees")]
    pub fees: String,
    /// Coin attached to every placement, e.g. `100000000uusdc`.
    #[serde(default)]
    pub deposit: Option<String>,
    #[serde(default)]
    pub memo: String,
}

fn default_gas() -> u64 {
    50_000_000
}

fn default_fees() -> String {
    "1000000usei".to_string()
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            gas: default_gas(),
            fees: default_fees(),
            deposit: None,
            memo: String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    pub address: String,
    /// Keyring entry the chain binary signs with. Defaults to `name`.
    #[serde(default)]
    pub key_name: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
}

impl AccountConfig {
    pub fn key_name(&self) -> &str {
        self.key_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub mode: Mode,
    pub chain_id: String,
    pub contract_address: String,
    #[serde(default)]
    pub lcd_endpoint: Option<String>,
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub keyring_backend: Option<String>,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    #[serde(default)]
    pub backoff_jitter_ms: u64,
    #[serde(default = "default_true")]
    pub cancel_on_shutdown: bool,
    #[serde(default = "default_pending_cancel_cycles")]
    pub pending_cancel_cycles: u32,

    pub market: MarketConfig,
    pub price: PriceConfig,
    pub ladder: LadderParams,
    #[serde(default)]
    pub tx: TxConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub logging: LogConfig,
}

fn default_binary() -> PathBuf {
    PathBuf::from("seid")
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_query_timeout() -> u64 {
    10
}

fn default_submit_timeout() -> u64 {
    60
}

fn default_max_failures() -> u32 {
    5
}

fn default_backoff_base() -> u64 {
    1_000
}

fn default_backoff_max() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

fn default_pending_cancel_cycles() -> u32 {
    3
}

impl BotConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: BotConfig = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ladder.validate()?;
        self.market_spec().validate()?;
        if !self.market.leverage.is_positive() {
            return Err(invalid("market.leverage", "must be > 0"));
        }
        if self.market.price_denom.trim().is_empty() || self.market.asset_denom.trim().is_empty() {
            return Err(invalid("market", "price_denom and asset_denom are required"));
        }

        match &self.price {
            PriceConfig::Oracle { denom } if denom.trim().is_empty() => {
                return Err(invalid("price.denom", "must not be empty"))
            }
            PriceConfig::Fixed { value } if !value.is_positive() => {
                return Err(invalid("price.value", "must be > 0"))
            }
            _ => {}
        }

        for (name, value) in [
            ("refresh_interval_secs", self.refresh_interval_secs),
            ("query_timeout_secs", self.query_timeout_secs),
            ("submit_timeout_secs", self.submit_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::MaxFailures);
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(invalid("backoff_base_ms", "must not exceed backoff_max_ms"));
        }

        self.contract()?;
        parse_coin(&self.tx.fees).map_err(|e| invalid("tx.fees", e))?;
        self.deposit()?;
        if self.needs_lcd() {
            self.lcd_endpoint()?;
        }

        if self.accounts.is_empty() {
            return Err(ConfigError::NoAccounts);
        }
        let mut names = HashSet::new();
        for account in &self.accounts {
            if !names.insert(account.name.as_str()) {
                return Err(invalid("accounts.name", format!("duplicate account {:?}", account.name)));
            }
            parse_address(&account.address).map_err(|e| invalid("accounts.address", e))?;
        }
        Ok(())
    }

    pub fn network(&self) -> Network {
        Network::from_chain_id(&self.chain_id)
    }

    /// Live trading always talks to the LCD; paper trading only for oracle prices.
    pub fn needs_lcd(&self) -> bool {
        self.mode == Mode::Live || matches!(self.price, PriceConfig::Oracle { .. })
    }

    pub fn lcd_endpoint(&self) -> Result<String, ConfigError> {
        match self.lcd_endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => Ok(endpoint.to_string()),
            _ => self
                .network()
                .default_lcd()
                .map(str::to_string)
                .ok_or_else(|| ConfigError::UnknownChain(self.chain_id.clone())),
        }
    }

    pub fn contract(&self) -> Result<AccountId, ConfigError> {
        parse_address(&self.contract_address).map_err(|e| invalid("contract_address", e))
    }

    pub fn deposit(&self) -> Result<Vec<Coin>, ConfigError> {
        match &self.tx.deposit {
            Some(raw) => Ok(vec![parse_coin(raw).map_err(|e| invalid("tx.deposit", e))?]),
            None => Ok(Vec::new()),
        }
    }

    pub fn market_spec(&self) -> MarketSpec {
        MarketSpec {
            tick_size: self.market.tick_size.clone(),
            lot_size: self.market.lot_size.clone(),
        }
    }

    pub fn placement_template(&self) -> Result<PlacementTemplate, ConfigError> {
        Ok(PlacementTemplate {
            price_denom: self.market.price_denom.clone(),
            asset_denom: self.market.asset_denom.clone(),
            data: OrderData::open(self.market.leverage.clone()),
            deposit: self.deposit()?,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            ladder: self.ladder.clone(),
            market: self.market_spec(),
            query_timeout: Duration::from_secs(self.query_timeout_secs),
            pending_cancel_cycles: self.pending_cancel_cycles,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.refresh_interval_secs),
            max_consecutive_failures: self.max_consecutive_failures,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            jitter: Duration::from_millis(self.backoff_jitter_ms),
        }
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }
}

fn invalid(field: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Reads the account's keyring password from its environment variable, if it names one.
pub fn resolve_credentials(account: &AccountConfig) -> Result<Credentials, ConfigError> {
    let password = match &account.password_env {
        Some(var) => Some(std::env::var(var).map_err(|_| ConfigError::MissingSecret(var.clone()))?),
        None => None,
    };
    Ok(Credentials::new(account.key_name(), password))
}

/// First CLI argument, then `LIQUIDITY_BOT_CONFIG`, then the platform config directory.
pub fn config_path(mut args: impl Iterator<Item = String>) -> Result<PathBuf, ConfigError> {
    if let Some(arg) = args.nth(1) {
        return Ok(PathBuf::from(arg));
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    default_config_path()
}

fn default_config_path() -> Result<PathBuf, ConfigError> {
    let proj = ProjectDirs::from("com", "vortex", "liquidity_bot")
        .ok_or_else(|| invalid("config path", "no home directory to derive a default from"))?;
    Ok(proj.config_dir().join("config.toml"))
}
