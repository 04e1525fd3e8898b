use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::BroadcastError;
use crate::tx::{BroadcastResponse, TxRequest};

/// Signs and broadcasts one transaction, returning the chain's verdict.
///
/// One request, one response: implementations must not stream or return partial results.
/// An implementation must only return `Ok` with `code == 0` once the transaction is committed.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, tx: &TxRequest) -> Result<BroadcastResponse, BroadcastError>;
}

/// Broadcaster backed by the chain's command line client (`seid` or compatible).
#[derive(Debug, Clone)]
pub struct CliBroadcaster {
    binary: PathBuf,
    node: Option<String>,
    keyring_backend: Option<String>,
    timeout: Duration,
}

impl CliBroadcaster {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            node: None,
            keyring_backend: None,
            timeout,
        }
    }

    pub fn with_node(mut self, node: Option<String>) -> Self {
        self.node = node;
        self
    }

    pub fn with_keyring_backend(mut self, backend: Option<String>) -> Self {
        self.keyring_backend = backend;
        self
    }

    fn args(&self, tx: &TxRequest) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "tx".into(),
            "dex".into(),
            tx.msg.subcommand().into(),
            tx.contract.to_string(),
        ];
        args.extend(tx.msg.cli_args());
        args.extend([
            "--from".into(),
            tx.credentials.key_name.clone(),
            "--chain-id".into(),
            tx.chain_id.clone(),
            "--account-number".into(),
            tx.account_number.to_string(),
            "--sequence".into(),
            tx.sequence.to_string(),
            "--gas".into(),
            tx.gas.to_string(),
            "--fees".into(),
            tx.fees.clone(),
            "--broadcast-mode".into(),
            "block".into(),
            "--output".into(),
            "json".into(),
            "-y".into(),
        ]);
        if let Some(funds) = tx.funds_arg() {
            args.push("--amount".into());
            args.push(funds);
        }
        if let Some(node) = &self.node {
            args.push("--node".into());
            args.push(node.clone());
        }
        if let Some(backend) = &self.keyring_backend {
            args.push("--keyring-backend".into());
            args.push(backend.clone());
        }
        if !tx.memo.is_empty() {
            args.push("--note".into());
            args.push(tx.memo.clone());
        }
        args
    }
}

#[async_trait]
impl Broadcaster for CliBroadcaster {
    async fn broadcast(&self, tx: &TxRequest) -> Result<BroadcastResponse, BroadcastError> {
        log::debug!(
            "exec {} tx dex {} {} seq={}",
            self.binary.display(),
            tx.msg.subcommand(),
            tx.contract,
            tx.sequence
        );

        let mut child = Command::new(&self.binary)
            .args(self.args(tx))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BroadcastError::Signing(format!("spawn {}: {e}", self.binary.display())))?;

        // The keyring prompts for its passphrase on stdin.
        if let Some(mut stdin) = child.stdin.take() {
            if let Some(password) = tx.credentials.password() {
                stdin
                    .write_all(format!("{password}\n").as_bytes())
                    .await
                    .map_err(|e| BroadcastError::Signing(format!("write passphrase: {e}")))?;
            }
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| BroadcastError::Timeout)?
            .map_err(|e| BroadcastError::Transport(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if let Some(json) = stdout.lines().find(|l| l.trim_start().starts_with('{')) {
            return BroadcastResponse::from_cli_json(json.as_bytes())
                .map_err(|e| BroadcastError::Transport(format!("unparseable tx response: {e}")));
        }

        Err(classify_cli_failure(&stderr))
    }
}

/// Maps CLI stderr, printed when no tx response was produced, onto a broadcast error.
fn classify_cli_failure(stderr: &str) -> BroadcastError {
    let lower = stderr.to_ascii_lowercase();
    let signing = ["key not found", "keyring", "passphrase", "incorrect password"];
    if signing.iter().any(|needle| lower.contains(needle)) {
        return BroadcastError::Signing(stderr.trim().to_string());
    }
    if lower.contains("timed out") || lower.contains("deadline exceeded") {
        return BroadcastError::Timeout;
    }
    BroadcastError::Transport(stderr.trim().to_string())
}
