//! Metric names and recording helpers.
//!
//! With the `telemetry` feature the values go to whatever `metrics` recorder the binary
//! installs (none by default). Without it every helper compiles to nothing.

pub const CYCLES: &str = "liquidity_bot.cycles";
pub const ACTIONS: &str = "liquidity_bot.actions";
pub const CONSECUTIVE_FAILURES: &str = "liquidity_bot.consecutive_failures";
pub const ACCOUNT_SEQUENCE: &str = "liquidity_bot.account_sequence";

#[cfg(feature = "telemetry")]
mod imp {
    use super::*;

    pub fn cycle(account: &str, result: &'static str) {
        metrics::counter!(CYCLES, "account" => account.to_string(), "result" => result).increment(1);
    }

    pub fn action(account: &str, kind: &'static str, outcome: &'static str) {
        metrics::counter!(
            ACTIONS,
            "account" => account.to_string(),
            "kind" => kind,
            "outcome" => outcome
        )
        .increment(1);
    }

    pub fn consecutive_failures(account: &str, count: u32) {
        metrics::gauge!(CONSECUTIVE_FAILURES, "account" => account.to_string()).set(f64::from(count));
    }

    pub fn account_sequence(account: &str, sequence: u64) {
        metrics::gauge!(ACCOUNT_SEQUENCE, "account" => account.to_string()).set(sequence as f64);
    }
}

#[cfg(not(feature = "telemetry"))]
mod imp {
    pub fn cycle(_account: &str, _result: &'static str) {}
    pub fn action(_account: &str, _kind: &'static str, _outcome: &'static str) {}
    pub fn consecutive_failures(_account: &str, _count: u32) {}
    pub fn account_sequence(_account: &str, _sequence: u64) {}
}

pub use imp::{account_sequence, action, consecutive_failures, cycle};
