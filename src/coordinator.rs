//! Launch coordinator
//!
//! Entry point for Create / Get / Notify. Validates requests, resolves
//! amounts and gas price, and drives the launch log store. Also exposes the
//! deadline-bounded nonce and signing steps used by the dispatcher.
//!
//! Every store, oracle, nonce and signing call is bounded by the request
//! deadline and surfaces as [`LaunchError::Timeout`] when exceeded. A timeout
//! does not cancel a write already handed to the store. Nothing is retried
//! here.

use crate::errors::{LaunchError, LaunchResult};
use crate::gas_price::GasPriceOracle;
use crate::key_store::KeyStore;
use crate::launch_log_store::{LaunchLogStore, StatusUpdate};
use crate::metrics::{metrics, Timer};
use crate::nonce_allocator::NonceAllocator;
use crate::structured_logging::RequestContext;
use crate::transaction::{LegacyTransaction, TransactionSignature};
use crate::types::{
    parse_amount, parse_call_data, validate_address, CreateRequest, GetQuery, LaunchLog,
    LaunchLogStatus, LogView, NewLaunchLog,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Notify request: a transaction hash and the status the network reported
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifyRequest {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub status: String,
}

pub struct LaunchCoordinator {
    store: Arc<dyn LaunchLogStore>,
    nonces: Arc<dyn NonceAllocator>,
    keys: Arc<dyn KeyStore>,
    oracle: Arc<dyn GasPriceOracle>,
    request_timeout: Duration,
}

impl LaunchCoordinator {
    pub fn new(
        store: Arc<dyn LaunchLogStore>,
        nonces: Arc<dyn NonceAllocator>,
        keys: Arc<dyn KeyStore>,
        oracle: Arc<dyn GasPriceOracle>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            nonces,
            keys,
            oracle,
            request_timeout,
        }
    }

    pub fn store(&self) -> Arc<dyn LaunchLogStore> {
        Arc::clone(&self.store)
    }

    pub fn keys(&self) -> &dyn KeyStore {
        self.keys.as_ref()
    }

    /// Validate and persist a new launch request in CREATED
    pub async fn create(&self, request: CreateRequest) -> LaunchResult<LaunchLog> {
        let ctx = RequestContext::new("create");
        let result = self.create_inner(&ctx, request).await;
        self.observe(&ctx, result)
    }

    async fn create_inner(&self, ctx: &RequestContext, req: CreateRequest) -> LaunchResult<LaunchLog> {
        validate_address("from", &req.from)?;
        validate_address("to", &req.to)?;

        let value = if req.value.trim().is_empty() {
            Decimal::ZERO
        } else {
            parse_amount("value", &req.value)?
        };
        let explicit_gas_price = if req.gas_price.trim().is_empty() {
            None
        } else {
            Some(parse_amount("gas price", &req.gas_price)?)
        };
        let data = parse_call_data(&req.data)?;

        let gas_price = match explicit_gas_price {
            Some(price) => price,
            None => {
                self.with_deadline("gas price lookup", self.oracle.current_gas_price())
                    .await?
            }
        };

        let new_log = NewLaunchLog {
            from: req.from,
            to: req.to,
            value,
            gas_price,
            data,
            item_id: req.item_id,
            item_type: req.item_type,
            created_at: Utc::now(),
        };
        let log = self
            .with_deadline("create launch log", self.store.create(new_log))
            .await?;

        ctx.logger.log_create_accepted(
            log.id,
            &log.item_type,
            &log.item_id,
            &log.gas_price.to_string(),
        );
        Ok(log)
    }

    /// Look up by hash, else by (itemType, itemId)
    pub async fn get(&self, query: GetQuery) -> LaunchResult<Vec<LogView>> {
        let ctx = RequestContext::new("get");
        let result = self.get_inner(&ctx, query).await;
        self.observe(&ctx, result)
    }

    async fn get_inner(&self, ctx: &RequestContext, query: GetQuery) -> LaunchResult<Vec<LogView>> {
        let (key, logs) = if !query.hash.is_empty() {
            let logs = self
                .with_deadline("find by hash", self.store.find_by_hash(&query.hash))
                .await?;
            (query.hash.clone(), logs)
        } else if !query.item_type.is_empty() && !query.item_id.is_empty() {
            let logs = self
                .with_deadline(
                    "find by item",
                    self.store.find_by_item(&query.item_type, &query.item_id),
                )
                .await?;
            (format!("{}/{}", query.item_type, query.item_id), logs)
        } else {
            return Err(LaunchError::invalid_argument(
                "need hash or (item_type, item_id)",
            ));
        };

        ctx.logger.log_lookup(&key, logs.len());
        Ok(logs.iter().map(LogView::from).collect())
    }

    /// Apply a network-reported status to the log holding `hash`
    pub async fn notify(&self, request: NotifyRequest) -> LaunchResult<LaunchLog> {
        let ctx = RequestContext::new("notify");
        let result = self.notify_inner(&ctx, request).await;
        self.observe(&ctx, result)
    }

    async fn notify_inner(&self, ctx: &RequestContext, req: NotifyRequest) -> LaunchResult<LaunchLog> {
        if req.hash.is_empty() {
            return Err(LaunchError::invalid_argument("need hash"));
        }
        let status: LaunchLogStatus = req.status.parse()?;

        let log = self
            .with_deadline("find by hash", self.store.find_by_hash(&req.hash))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LaunchError::NotFound(format!("no such log for hash {}", req.hash)))?;

        let updated = self
            .with_deadline(
                "update status",
                self.store.update_status(StatusUpdate::to(log.id, status)),
            )
            .await?;

        ctx.logger
            .log_transition(updated.id, &req.hash, log.status.as_str(), updated.status.as_str());
        Ok(updated)
    }

    /// Health check
    pub async fn hello(&self) -> LaunchResult<()> {
        metrics().record_request("hello");
        Ok(())
    }

    /// CREATED logs awaiting dispatch
    pub async fn awaiting_dispatch(&self) -> LaunchResult<Vec<LaunchLog>> {
        self.with_deadline(
            "list created",
            self.store.find_all_with_status(LaunchLogStatus::Created),
        )
        .await
    }

    /// Claim the next nonce for the network
    pub async fn allocate_nonce(&self) -> LaunchResult<u64> {
        self.with_deadline("allocate nonce", async {
            self.nonces.allocate_next().await.map_err(LaunchError::from)
        })
        .await
    }

    /// Return a claimed nonce that was never broadcast
    pub async fn release_nonce(&self, nonce: u64) -> LaunchResult<()> {
        self.with_deadline("release nonce", async {
            self.nonces.release(nonce).await.map_err(LaunchError::from)
        })
        .await
    }

    /// Re-read a single log by id
    pub async fn launch_log(&self, id: u64) -> LaunchResult<Option<LaunchLog>> {
        self.with_deadline("get launch log", self.store.get(id)).await
    }

    /// Sign a fully populated transaction for `from`
    pub async fn sign(
        &self,
        from: &str,
        transaction: &LegacyTransaction,
    ) -> LaunchResult<TransactionSignature> {
        self.with_deadline("sign", self.keys.sign(from, transaction))
            .await
    }

    /// CREATED -> PENDING with the signed transaction's hash and nonce.
    /// Recorded before the transaction is broadcast.
    pub async fn record_dispatch(&self, id: u64, hash: String, nonce: u64) -> LaunchResult<LaunchLog> {
        self.with_deadline(
            "record dispatch",
            self.store.update_status(StatusUpdate::dispatched(id, hash, nonce)),
        )
        .await
    }

    /// CREATED or PENDING -> FAILED when the launch was refused before or
    /// by the network
    pub async fn record_rejection(&self, id: u64) -> LaunchResult<LaunchLog> {
        self.with_deadline(
            "record rejection",
            self.store
                .update_status(StatusUpdate::to(id, LaunchLogStatus::Failed)),
        )
        .await
    }

    /// Bound `fut` by the request deadline.
    ///
    /// The deadline stops the caller from waiting, not the work itself. Store
    /// and nonce writes run on the blocking pool and may still commit after a
    /// [`LaunchError::Timeout`] is returned, so a timed-out Create can leave a
    /// log behind and a timed-out write must be re-read before it is retried.
    async fn with_deadline<T, F>(&self, operation: &str, fut: F) -> LaunchResult<T>
    where
        F: Future<Output = LaunchResult<T>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(LaunchError::Timeout {
                operation: operation.to_string(),
                elapsed_ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }

    fn observe<T>(&self, ctx: &RequestContext, result: LaunchResult<T>) -> LaunchResult<T> {
        let m = metrics();
        m.record_request(ctx.operation);
        Timer::started_at(ctx.operation, ctx.started_at).finish();
        if let Err(e) = &result {
            m.record_failure(ctx.operation, e.kind());
            ctx.logger
                .log_rejected(ctx.operation, e.kind(), &e.to_string(), ctx.elapsed_ms());
        }
        result
    }
}
