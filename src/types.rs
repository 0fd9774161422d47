//! Common types used throughout the launcher

use crate::errors::{LaunchError, LaunchResult};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

static ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("static address pattern"));

/// Lifecycle state of a launch log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LaunchLogStatus {
    Created,
    Pending,
    Successful,
    Failed,
}

impl LaunchLogStatus {
    pub const ALL: [LaunchLogStatus; 4] = [
        LaunchLogStatus::Created,
        LaunchLogStatus::Pending,
        LaunchLogStatus::Successful,
        LaunchLogStatus::Failed,
    ];

    /// Symbolic name used in storage and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchLogStatus::Created => "CREATED",
            LaunchLogStatus::Pending => "PENDING",
            LaunchLogStatus::Successful => "SUCCESSFUL",
            LaunchLogStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LaunchLogStatus::Successful | LaunchLogStatus::Failed)
    }

    /// Transition table. Anything not listed here is rejected.
    ///
    /// | from    | to         |
    /// |---------|------------|
    /// | CREATED | PENDING    |
    /// | CREATED | FAILED     |
    /// | PENDING | SUCCESSFUL |
    /// | PENDING | FAILED     |
    pub fn can_transition_to(&self, next: LaunchLogStatus) -> bool {
        use LaunchLogStatus::*;
        matches!(
            (self, next),
            (Created, Pending) | (Created, Failed) | (Pending, Successful) | (Pending, Failed)
        )
    }
}

impl fmt::Display for LaunchLogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LaunchLogStatus {
    type Err = LaunchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(LaunchLogStatus::Created),
            "PENDING" => Ok(LaunchLogStatus::Pending),
            "SUCCESSFUL" => Ok(LaunchLogStatus::Successful),
            "FAILED" => Ok(LaunchLogStatus::Failed),
            other => Err(LaunchError::invalid_argument(format!(
                "unknown launch log status `{}`",
                other
            ))),
        }
    }
}

/// Durable record of one launch request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchLog {
    pub id: u64,
    pub from: String,
    pub to: String,
    pub value: Decimal,
    pub gas_price: Decimal,
    pub nonce: Option<u64>,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    pub hash: Option<String>,
    pub item_id: String,
    pub item_type: String,
    pub status: LaunchLogStatus,
    pub created_at: DateTime<Utc>,
}

/// Fields of a launch log before the store assigns identity
#[derive(Debug, Clone, PartialEq)]
pub struct NewLaunchLog {
    pub from: String,
    pub to: String,
    pub value: Decimal,
    pub gas_price: Decimal,
    pub data: Vec<u8>,
    pub item_id: String,
    pub item_type: String,
    pub created_at: DateTime<Utc>,
}

impl NewLaunchLog {
    pub fn into_log(self, id: u64) -> LaunchLog {
        LaunchLog {
            id,
            from: self.from,
            to: self.to,
            value: self.value,
            gas_price: self.gas_price,
            nonce: None,
            data: self.data,
            hash: None,
            item_id: self.item_id,
            item_type: self.item_type,
            status: LaunchLogStatus::Created,
            created_at: self.created_at,
        }
    }
}

/// Create request as received at the RPC boundary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub gas_price: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub item_id: String,
    #[serde(default)]
    pub item_type: String,
}

/// Get query: a hash, or an (itemType, itemId) pair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetQuery {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub item_type: String,
    #[serde(default)]
    pub item_id: String,
}

/// External representation of a launch log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogView {
    pub hash: String,
    pub item_id: String,
    pub item_type: String,
    pub status: LaunchLogStatus,
    pub gas_price: String,
}

impl From<&LaunchLog> for LogView {
    fn from(log: &LaunchLog) -> Self {
        Self {
            hash: log.hash.clone().unwrap_or_default(),
            item_id: log.item_id.clone(),
            item_type: log.item_type.clone(),
            status: log.status,
            gas_price: log.gas_price.to_string(),
        }
    }
}

/// Check the canonical `0x` + 40 hex character address format
pub fn is_valid_address(address: &str) -> bool {
    ADDRESS_RE.is_match(address)
}

/// Validate an address field, naming the field in the error
pub fn validate_address(field: &str, address: &str) -> LaunchResult<()> {
    if is_valid_address(address) {
        Ok(())
    } else {
        Err(LaunchError::invalid_argument(format!(
            "`{}` format error, not a valid ethereum address",
            field
        )))
    }
}

/// Parse a non-negative decimal amount without rounding
pub fn parse_amount(field: &str, raw: &str) -> LaunchResult<Decimal> {
    let amount = Decimal::from_str_exact(raw.trim()).map_err(|_| {
        LaunchError::invalid_argument(format!("convert {} to decimal failed", field))
    })?;
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(LaunchError::invalid_argument(format!(
            "{} must not be negative",
            field
        )));
    }
    Ok(amount)
}

/// Decode optional `0x`-prefixed call data
pub fn parse_call_data(raw: &str) -> LaunchResult<Vec<u8>> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex::decode(digits)
        .map_err(|e| LaunchError::invalid_argument(format!("data is not valid hex: {}", e)))
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        let digits = raw.strip_prefix("0x").unwrap_or(&raw);
        hex::decode(digits).map_err(serde::de::Error::custom)
    }
}
