//! Transaction launch relay
//!
//! Accepts requests to send transactions, assigns each a durable nonce,
//! signs with managed keys and tracks every launch from creation through
//! confirmation. A background monitor reports how many launches are still
//! pending and how many of those have been pending too long.

pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod endpoints;
pub mod errors;
pub mod eth_rpc;
pub mod gas_price;
pub mod key_store;
pub mod launch_log_store;
pub mod metrics;
pub mod monitor;
pub mod nonce_allocator;
pub mod structured_logging;
pub mod transaction;
pub mod types;

// Re-export commonly used types
pub use coordinator::{LaunchCoordinator, NotifyRequest};
pub use errors::{LaunchError, LaunchResult, NonceError};
pub use types::{CreateRequest, GetQuery, LaunchLog, LaunchLogStatus, LogView};

#[cfg(test)]
mod tests {
    mod config_validation;
    mod dispatch_tests;
    mod test_helpers;
}
