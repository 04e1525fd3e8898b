//! Market-making engine for the Vortex perpetuals contract.
//!
//! Each cycle the engine reads the reference price and the account's resting orders, computes
//! the desired quote ladder, plans the cancels and placements that turn one into the other and
//! submits them one transaction at a time. A [`RefreshScheduler`] repeats this on a fixed grid.

pub mod book;
pub mod cycle;
pub mod error;
pub mod logging;
pub mod oracle;
pub mod paper;
pub mod planner;
pub mod quote;
pub mod scheduler;
pub mod settings;
pub mod submitter;
pub mod telemetry;

pub use book::{ContractOrderBook, Order, OrderBookView, OrderStatus};
pub use cycle::{Cycle, CycleEngine, EngineConfig};
pub use error::{BotError, ConfigError, QueryError, QuoteError};
pub use oracle::{FixedPrice, LcdOracle, PriceOracle};
pub use paper::{Fault, PaperExchange};
pub use planner::{plan, Action};
pub use quote::{compute_ladder, Ladder, LadderParams, Level, MarketSpec};
pub use scheduler::{Clock, CycleRunner, ManualClock, RefreshScheduler, SchedulerConfig, SchedulerExit, TokioClock};
pub use settings::{BotConfig, Mode};
pub use submitter::{AccountSource, AccountState, Outcome, PlacementTemplate, RejectReason, Submission, TransactionSubmitter};
