//! In-process dispatcher
//!
//! Picks up CREATED launch logs, assigns each a nonce, signs it with the
//! managed key for its `from` address and broadcasts the raw transaction.
//! The log moves to PENDING with the transaction hash before the broadcast;
//! anything refused before or by the network moves it to FAILED. Disabled
//! unless configured.

use crate::coordinator::LaunchCoordinator;
use crate::errors::LaunchResult;
use crate::metrics::metrics;
use crate::transaction::{decimal_to_wei, parse_address, transaction_hash, LegacyTransaction};
use crate::types::{LaunchLog, LaunchLogStatus};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Why a broadcast did not produce a hash
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcastError {
    /// The node answered and refused the transaction
    #[error("rejected by node: {0}")]
    Rejected(String),

    /// No usable answer; the transaction may or may not have propagated
    #[error("node unreachable: {0}")]
    Unreachable(String),
}

/// Channel used to publish signed transactions
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Submit raw signed bytes, returning the hash the node reports
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, BroadcastError>;
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub chain_id: u64,
    /// Gas limit for plain value transfers
    pub gas_limit: u64,
    /// Gas limit when the log carries call data
    pub contract_call_gas_limit: u64,
    pub interval: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            chain_id: 1,
            gas_limit: 21_000,
            contract_call_gas_limit: 200_000,
            interval: Duration::from_secs(5),
        }
    }
}

/// Result of dispatching a single log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Moved to PENDING with this hash
    Pending(String),
    /// Moved to FAILED
    Failed(String),
}

pub struct Dispatcher {
    coordinator: Arc<LaunchCoordinator>,
    network: Arc<dyn NetworkClient>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        coordinator: Arc<LaunchCoordinator>,
        network: Arc<dyn NetworkClient>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            coordinator,
            network,
            settings,
        }
    }

    /// Dispatch every CREATED log once, oldest id first
    pub async fn dispatch_pending(&self) -> LaunchResult<Vec<(u64, DispatchOutcome)>> {
        let mut logs = self.coordinator.awaiting_dispatch().await?;
        logs.sort_by_key(|l| l.id);

        let mut outcomes = Vec::with_capacity(logs.len());
        for log in logs {
            let id = log.id;
            match self.dispatch_one(log).await {
                Ok(outcome) => outcomes.push((id, outcome)),
                // Transient store/nonce trouble leaves the log CREATED for the next pass
                Err(e) => warn!(log_id = id, error = %e, "dispatch deferred"),
            }
        }
        Ok(outcomes)
    }

    /// Sign and broadcast one CREATED log.
    ///
    /// The log is moved to PENDING with its hash and nonce before any bytes
    /// leave the process, so a log still in CREATED has never been broadcast
    /// and retrying it cannot send a second transaction. A nonce that never
    /// reached the network is released for the next log.
    pub async fn dispatch_one(&self, log: LaunchLog) -> LaunchResult<DispatchOutcome> {
        let unsigned = match self.prepare(&log) {
            Ok(tx) => tx,
            Err(reason) => return self.fail(&log, reason).await,
        };

        let nonce = self.coordinator.allocate_nonce().await?;
        let transaction = LegacyTransaction { nonce, ..unsigned };

        let signature = match self.coordinator.sign(&log.from, &transaction).await {
            Ok(sig) => sig,
            Err(e) => {
                self.give_back(log.id, nonce).await;
                if e.is_transient() {
                    return Err(e);
                }
                return self.fail(&log, e.to_string()).await;
            }
        };
        let raw = transaction.encode_signed(&signature);
        let local_hash = transaction_hash(&raw);

        if let Err(e) = self
            .coordinator
            .record_dispatch(log.id, local_hash.clone(), nonce)
            .await
        {
            match self.coordinator.launch_log(log.id).await {
                Ok(Some(stored)) if stored.hash.as_deref() == Some(local_hash.as_str()) => {
                    warn!(log_id = log.id, error = %e, "dispatch record stored despite error");
                }
                Ok(stored) => {
                    self.give_back(log.id, nonce).await;
                    let still_created =
                        matches!(&stored, Some(l) if l.status == LaunchLogStatus::Created);
                    if still_created && !e.is_transient() {
                        return self.fail(&log, e.to_string()).await;
                    }
                    return Err(e);
                }
                Err(read_err) => {
                    // Unknown whether the record landed; keep the nonce claimed
                    error!(log_id = log.id, nonce, error = %e, %read_err, "dispatch record unresolved");
                    return Err(e);
                }
            }
        }

        match self.network.send_raw_transaction(&raw).await {
            Ok(reported) => {
                if !reported.eq_ignore_ascii_case(&local_hash) {
                    warn!(log_id = log.id, %reported, %local_hash, "node reported a different hash");
                }
                metrics().transactions_dispatched.inc();
                info!(log_id = log.id, hash = %local_hash, nonce, "transaction dispatched");
                Ok(DispatchOutcome::Pending(local_hash))
            }
            Err(BroadcastError::Unreachable(reason)) => {
                // The transaction may already be in a mempool; track it by hash
                warn!(log_id = log.id, hash = %local_hash, %reason, "broadcast unanswered, tracking as pending");
                Ok(DispatchOutcome::Pending(local_hash))
            }
            Err(BroadcastError::Rejected(reason)) => {
                if nonce_is_spent(&reason) {
                    warn!(log_id = log.id, nonce, %reason, "node holds this nonce, not releasing it");
                } else {
                    self.give_back(log.id, nonce).await;
                }
                self.fail(&log, reason).await
            }
        }
    }

    async fn give_back(&self, log_id: u64, nonce: u64) {
        match self.coordinator.release_nonce(nonce).await {
            Ok(()) => debug!(log_id, nonce, "nonce released"),
            Err(e) => error!(log_id, nonce, error = %e, "failed to release nonce, sender may stall"),
        }
    }

    /// Checks that need no nonce: managed key, addresses, whole-wei amounts
    fn prepare(&self, log: &LaunchLog) -> Result<LegacyTransaction, String> {
        if !self.coordinator.keys().contains(&log.from) {
            return Err(format!("no managed key for {}", log.from));
        }
        let to = parse_address(&log.to).map_err(|e| e.to_string())?;
        let value = decimal_to_wei("value", &log.value).map_err(|e| e.to_string())?;
        let gas_price = decimal_to_wei("gas price", &log.gas_price).map_err(|e| e.to_string())?;
        let gas_limit = if log.data.is_empty() {
            self.settings.gas_limit
        } else {
            self.settings.contract_call_gas_limit
        };

        Ok(LegacyTransaction {
            nonce: 0,
            gas_price,
            gas_limit,
            to,
            value,
            data: log.data.clone(),
            chain_id: self.settings.chain_id,
        })
    }

    /// Move the log to FAILED from CREATED or PENDING
    async fn fail(&self, log: &LaunchLog, reason: String) -> LaunchResult<DispatchOutcome> {
        self.coordinator.record_rejection(log.id).await?;
        metrics().transactions_rejected.inc();
        warn!(log_id = log.id, from = %log.from, %reason, "launch failed before confirmation");
        Ok(DispatchOutcome::Failed(reason))
    }

    /// Run passes on the configured interval until shutdown flips to `true`
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            chain_id = self.settings.chain_id,
            "dispatcher started"
        );
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.dispatch_pending().await {
                        Ok(outcomes) if !outcomes.is_empty() => {
                            debug!(count = outcomes.len(), "dispatch pass complete");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "dispatch pass failed"),
                    }
                }
            }
        }
        info!("dispatcher stopped");
    }
}

/// Rejections that mean the node already has a transaction at this nonce
fn nonce_is_spent(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    reason.contains("nonce too low") || reason.contains("already known")
}
