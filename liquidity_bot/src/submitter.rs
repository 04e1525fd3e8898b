//! Sequence-numbered submission of planned actions.
//!
//! Every action becomes one dex-module transaction, sent strictly one at a time. The account's
//! sequence number is reserved before the transaction is built and only given back when the
//! chain provably did not consume it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use vortex_client::{
    AccountId, AccountInfo, BroadcastError, BroadcastResponse, Broadcaster, Coin, DexMsg,
    LcdClient, OrderData, OrderId, OrderPlacement, TxBuilder, TxSigner, TxStatus,
};

use crate::error::{BotError, QueryError};
use crate::planner::Action;
use crate::telemetry;

/// Account number and current sequence of the sending account.
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn account_info(&self, address: &AccountId) -> Result<AccountInfo, QueryError>;
}

#[async_trait]
impl AccountSource for LcdClient {
    async fn account_info(&self, address: &AccountId) -> Result<AccountInfo, QueryError> {
        self.account(address)
            .await
            .map_err(|e| QueryError::client("account", e))
    }
}

/// Local view of the sending account's sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountState {
    pub account_number: u64,
    /// Next number to hand out.
    pub sequence: u64,
    pub last_confirmed_sequence: Option<u64>,
    pub last_confirmed_height: Option<u64>,
    pub last_confirmed_at: Option<DateTime<Utc>>,
    /// Highest number the chain is known to have consumed, committed or failed in a block.
    pub last_included_sequence: Option<u64>,
    /// Number sent in a transaction whose fate is unknown.
    pub unresolved: Option<u64>,
    /// Set when the local sequence can no longer be trusted without a fresh query.
    pub stale: bool,
}

impl AccountState {
    pub fn from_info(info: &AccountInfo) -> Self {
        Self {
            account_number: info.account_number,
            sequence: info.sequence,
            ..Self::default()
        }
    }

    pub fn needs_resync(&self) -> bool {
        self.unresolved.is_some() || self.stale
    }

    fn reserve(&mut self) -> u64 {
        let sequence = self.sequence;
        self.sequence += 1;
        sequence
    }

    fn release(&mut self, sequence: u64) {
        if self.sequence == sequence + 1 {
            self.sequence = sequence;
        }
    }

    fn include(&mut self, sequence: u64) {
        self.last_included_sequence = Some(self.last_included_sequence.map_or(sequence, |s| s.max(sequence)));
    }

    fn confirm(&mut self, sequence: u64, height: u64) {
        self.include(sequence);
        self.last_confirmed_sequence = Some(sequence);
        self.last_confirmed_height = Some(height);
        self.last_confirmed_at = Some(Utc::now());
    }

    /// Lowest sequence the account can have: one past anything the chain consumed.
    pub fn floor(&self) -> u64 {
        self.last_included_sequence.map_or(0, |s| s + 1)
    }

    /// Adopts a fresh account query. Never moves below [`AccountState::floor`].
    pub fn resync(&mut self, info: &AccountInfo) {
        if let Some(pending) = self.unresolved.take() {
            if info.sequence > pending {
                self.include(pending);
            }
        }
        self.account_number = info.account_number;
        self.sequence = info.sequence.max(self.floor());
        self.stale = false;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    /// The chain still disagreed after a resync and one retry.
    SequenceMismatch { expected: Option<u64>, sent: u64 },
    /// The chain or contract refused the transaction.
    Chain { code: u32, codespace: String, log: String },
    Signing(String),
    Build(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::SequenceMismatch { expected, sent } => {
                write!(f, "sequence mismatch (sent {sent}, expected {expected:?})")
            }
            RejectReason::Chain { code, codespace, log } => write!(f, "{codespace}/{code}: {log}"),
            RejectReason::Signing(e) => write!(f, "signing failed: {e}"),
            RejectReason::Build(e) => write!(f, "build failed: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Confirmed { tx_hash: String, order_id: Option<OrderId> },
    Rejected(RejectReason),
    /// The outcome is unknown; the next book read decides.
    Timeout,
    /// Not attempted because an earlier action in the same cycle timed out.
    Deferred,
}

impl Outcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Outcome::Confirmed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Confirmed { .. } => "confirmed",
            Outcome::Rejected(_) => "rejected",
            Outcome::Timeout => "timeout",
            Outcome::Deferred => "deferred",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub action: Action,
    pub sequence: Option<u64>,
    pub outcome: Outcome,
}

/// Market fields and deposit attached to every placement.
#[derive(Debug, Clone)]
pub struct PlacementTemplate {
    pub price_denom: String,
    pub asset_denom: String,
    pub data: OrderData,
    pub deposit: Vec<Coin>,
}

impl PlacementTemplate {
    fn message(&self, action: &Action) -> Result<(DexMsg, Vec<Coin>), RejectReason> {
        match action {
            Action::Cancel { order_id } => Ok((DexMsg::CancelOrders { ids: vec![*order_id] }, Vec::new())),
            Action::Place { side, price, size } => {
                let placement = OrderPlacement::limit(
                    *side,
                    price.clone(),
                    size.clone(),
                    &self.price_denom,
                    &self.asset_denom,
                    &self.data,
                )
                .map_err(|e| RejectReason::Build(e.to_string()))?;
                Ok((
                    DexMsg::PlaceOrders {
                        orders: vec![placement],
                    },
                    self.deposit.clone(),
                ))
            }
        }
    }
}

pub struct TransactionSubmitter {
    signer: TxSigner,
    builder: TxBuilder,
    template: PlacementTemplate,
    broadcaster: Arc<dyn Broadcaster>,
    accounts: Arc<dyn AccountSource>,
    submit_timeout: Duration,
    state: AccountState,
    label: String,
}

impl TransactionSubmitter {
    /// Rehydrates the account state from a fresh account query.
    pub async fn connect(
        signer: TxSigner,
        builder: TxBuilder,
        template: PlacementTemplate,
        broadcaster: Arc<dyn Broadcaster>,
        accounts: Arc<dyn AccountSource>,
        submit_timeout: Duration,
    ) -> Result<Self, BotError> {
        let info = accounts.account_info(&signer.address).await?;
        let state = AccountState::from_info(&info);
        info!(
            account = %signer.address,
            account_number = state.account_number,
            sequence = state.sequence,
            "account state loaded"
        );
        let label = signer.address.to_string();
        telemetry::account_sequence(&label, state.sequence);
        Ok(Self {
            signer,
            builder,
            template,
            broadcaster,
            accounts,
            submit_timeout,
            state,
            label,
        })
    }

    pub fn address(&self) -> &AccountId {
        &self.signer.address
    }

    pub fn state(&self) -> &AccountState {
        &self.state
    }

    /// Replaces the local sequence with the chain's.
    pub async fn resync(&mut self) -> Result<(), QueryError> {
        let info = self.accounts.account_info(&self.signer.address).await?;
        let before = self.state.sequence;
        self.state.resync(&info);
        if info.sequence < self.state.sequence {
            warn!(
                account = %self.label,
                chain = info.sequence,
                kept = self.state.sequence,
                "chain reports a sequence below one already consumed"
            );
        }
        debug!(account = %self.label, from = before, to = self.state.sequence, "sequence resynced");
        telemetry::account_sequence(&self.label, self.state.sequence);
        Ok(())
    }

    /// Sends `actions` in order, one transaction each.
    ///
    /// Fails only when the account state cannot be trusted and a fresh account query fails;
    /// nothing is sent in that case. Once a transaction times out, the rest are `Deferred`.
    pub async fn submit(&mut self, actions: Vec<Action>) -> Result<Vec<Submission>, BotError> {
        if self.state.needs_resync() && !actions.is_empty() {
            if let Some(pending) = self.state.unresolved {
                debug!(account = %self.label, sequence = pending, "resolving timed out sequence");
            }
            self.resync().await?;
        }

        let mut submissions = Vec::with_capacity(actions.len());
        let mut halted = false;
        for action in actions {
            if halted {
                warn!(account = %self.label, %action, "deferred after earlier timeout");
                telemetry::action(&self.label, action.kind(), Outcome::Deferred.label());
                submissions.push(Submission {
                    action,
                    sequence: None,
                    outcome: Outcome::Deferred,
                });
                continue;
            }

            let (sequence, outcome) = self.submit_one(&action).await;
            match &outcome {
                Outcome::Confirmed { tx_hash, .. } => {
                    debug!(account = %self.label, %action, ?sequence, %tx_hash, "confirmed")
                }
                Outcome::Rejected(reason) => {
                    warn!(account = %self.label, %action, ?sequence, %reason, "rejected")
                }
                Outcome::Timeout => {
                    warn!(account = %self.label, %action, ?sequence, "outcome unknown, deferring rest of cycle");
                    halted = true;
                }
                Outcome::Deferred => {}
            }
            telemetry::action(&self.label, action.kind(), outcome.label());
            submissions.push(Submission {
                action,
                sequence,
                outcome,
            });
        }
        telemetry::account_sequence(&self.label, self.state.sequence);
        Ok(submissions)
    }

    async fn submit_one(&mut self, action: &Action) -> (Option<u64>, Outcome) {
        let (msg, funds) = match self.template.message(action) {
            Ok(parts) => parts,
            Err(reason) => return (None, Outcome::Rejected(reason)),
        };

        let mut retried = false;
        loop {
            let sequence = self.state.reserve();
            debug!(account = %self.label, sequence, kind = msg.kind(), "built");

            let tx = self.builder.build(
                &self.signer,
                self.state.account_number,
                sequence,
                msg.clone(),
                funds.clone(),
            );

            debug!(account = %self.label, sequence, "broadcast");
            let result = tokio::time::timeout(self.submit_timeout, self.broadcaster.broadcast(&tx)).await;
            let response = match result {
                Err(_) => return (Some(sequence), self.unresolved(sequence, "deadline elapsed")),
                Ok(Err(BroadcastError::Timeout)) => {
                    return (Some(sequence), self.unresolved(sequence, "broadcaster timed out"))
                }
                Ok(Err(BroadcastError::Transport(e))) => return (Some(sequence), self.unresolved(sequence, &e)),
                Ok(Err(BroadcastError::Signing(e))) => {
                    self.state.release(sequence);
                    return (Some(sequence), Outcome::Rejected(RejectReason::Signing(e)));
                }
                Ok(Ok(response)) => response,
            };

            match response.status() {
                TxStatus::Committed => {
                    self.state.confirm(sequence, response.height);
                    debug!(account = %self.label, sequence, height = response.height, "committed");
                    return (Some(sequence), confirmed(action, response));
                }
                TxStatus::SequenceMismatch { expected } => {
                    self.state.release(sequence);
                    if retried {
                        self.state.stale = true;
                        return (
                            Some(sequence),
                            Outcome::Rejected(RejectReason::SequenceMismatch { expected, sent: sequence }),
                        );
                    }
                    debug!(account = %self.label, sequence, ?expected, "sequence mismatch, resyncing");
                    if let Err(e) = self.resync().await {
                        warn!(account = %self.label, error = %e, "resync after mismatch failed");
                        self.state.stale = true;
                        return (
                            Some(sequence),
                            Outcome::Rejected(RejectReason::SequenceMismatch { expected, sent: sequence }),
                        );
                    }
                    retried = true;
                }
                TxStatus::Failed { included } => {
                    if included {
                        self.state.include(sequence);
                    } else {
                        self.state.release(sequence);
                    }
                    return (
                        Some(sequence),
                        Outcome::Rejected(RejectReason::Chain {
                            code: response.code,
                            codespace: response.codespace,
                            log: response.raw_log,
                        }),
                    );
                }
            }
        }
    }

    fn unresolved(&mut self, sequence: u64, detail: &str) -> Outcome {
        debug!(account = %self.label, sequence, detail, "timed out");
        self.state.unresolved = Some(sequence);
        Outcome::Timeout
    }
}

fn confirmed(action: &Action, response: BroadcastResponse) -> Outcome {
    let order_id = match action {
        Action::Cancel { order_id } => Some(*order_id),
        Action::Place { .. } => response.order_ids.first().copied(),
    };
    Outcome::Confirmed {
        tx_hash: response.tx_hash,
        order_id,
    }
}
