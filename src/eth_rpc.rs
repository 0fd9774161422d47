//! Minimal Ethereum JSON-RPC client
//!
//! Serves as the gas price oracle (`eth_gasPrice`) and as the broadcast
//! channel for the dispatcher (`eth_sendRawTransaction`).

use crate::dispatch::{BroadcastError, NetworkClient};
use crate::errors::{LaunchError, LaunchResult};
use crate::gas_price::GasPriceOracle;
use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

enum CallError {
    /// Node answered with a JSON-RPC error object
    Rpc { code: i64, message: String },
    /// Request never produced a usable answer
    Transport(String),
    Timeout,
}

/// JSON-RPC client bound to one node endpoint
pub struct EthJsonRpc {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl EthJsonRpc {
    pub fn new(url: &str, timeout: Duration) -> LaunchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LaunchError::Config(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, CallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(classify)?;
        let parsed: RpcResponse = response.json().await.map_err(classify)?;

        if let Some(err) = parsed.error {
            return Err(CallError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        parsed
            .result
            .ok_or_else(|| CallError::Transport(format!("{} returned neither result nor error", method)))
    }

    fn into_launch_error(&self, method: &str, err: CallError) -> LaunchError {
        match err {
            CallError::Rpc { code, message } => {
                LaunchError::Upstream(format!("{} failed ({}): {}", method, code, message))
            }
            CallError::Transport(message) => {
                LaunchError::Upstream(format!("{} transport: {}", method, message))
            }
            CallError::Timeout => LaunchError::Timeout {
                operation: method.to_string(),
                elapsed_ms: self.timeout.as_millis() as u64,
            },
        }
    }
}

fn classify(err: reqwest::Error) -> CallError {
    if err.is_timeout() {
        CallError::Timeout
    } else {
        CallError::Transport(err.to_string())
    }
}

/// Parse a JSON-RPC hex quantity into a decimal
pub fn parse_quantity(raw: &str) -> LaunchResult<Decimal> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| LaunchError::Upstream(format!("quantity {} lacks 0x", raw)))?;
    let value = u128::from_str_radix(digits, 16)
        .map_err(|e| LaunchError::Upstream(format!("quantity {}: {}", raw, e)))?;
    Decimal::from_u128(value)
        .ok_or_else(|| LaunchError::Upstream(format!("quantity {} exceeds decimal range", raw)))
}

#[async_trait]
impl GasPriceOracle for EthJsonRpc {
    async fn current_gas_price(&self) -> LaunchResult<Decimal> {
        let result = self
            .call("eth_gasPrice", json!([]))
            .await
            .map_err(|e| self.into_launch_error("eth_gasPrice", e))?;
        let raw = result
            .as_str()
            .ok_or_else(|| LaunchError::Upstream("eth_gasPrice result is not a string".into()))?;
        let price = parse_quantity(raw)?;
        debug!(gas_price = %price, "gas price resolved from node");
        Ok(price)
    }
}

#[async_trait]
impl NetworkClient for EthJsonRpc {
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, BroadcastError> {
        let encoded = format!("0x{}", hex::encode(raw));
        match self.call("eth_sendRawTransaction", json!([encoded])).await {
            Ok(Value::String(hash)) => Ok(hash),
            Ok(other) => Err(BroadcastError::Unreachable(format!(
                "unexpected eth_sendRawTransaction result: {}",
                other
            ))),
            Err(CallError::Rpc { code, message }) => {
                warn!(code, message = %message, "node rejected transaction");
                Err(BroadcastError::Rejected(message))
            }
            Err(CallError::Transport(message)) => Err(BroadcastError::Unreachable(message)),
            Err(CallError::Timeout) => Err(BroadcastError::Unreachable(format!(
                "no answer within {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}
