//! Durable per-network nonce counter
//!
//! The counter lives in the backing store and every mutation is a single
//! compare-and-swap against it, so several launcher processes sharing one
//! store never hand out the same nonce. No nonce value is cached in memory
//! between calls.
//!
//! Operating constraint: this is one counter per network, not per sender.
//! It assumes this launcher is the only signer for every managed address.

use crate::errors::{NonceError, NonceResult};
use async_trait::async_trait;
use tracing::{debug, info};

/// Atomic "get current" / "advance to at least N" counter
///
/// The stored value is the next nonce to hand out, so a counter initialised
/// to `start` gives `start` to its first caller.
#[async_trait]
pub trait NonceAllocator: Send + Sync {
    /// Next value to hand out, without mutating it
    async fn current(&self) -> NonceResult<u64>;

    /// Move the counter to `n` if `n` is greater than the current value and
    /// return `n`. A non-advancing request fails with [`NonceError::Stale`].
    async fn advance_to(&self, n: u64) -> NonceResult<u64>;

    /// Set the counter to `start` only if it has never been set.
    /// Returns the value in effect afterwards.
    async fn initialize(&self, start: u64) -> NonceResult<u64>;

    /// Hand back a claimed nonce that never reached the network. It is
    /// returned again by the next [`allocate_next`](Self::allocate_next).
    async fn release(&self, nonce: u64) -> NonceResult<()>;

    /// Remove and return the lowest released nonce, if any
    async fn take_released(&self) -> NonceResult<Option<u64>>;

    /// Claim a nonce: a released one first, else the counter value, which
    /// then moves one past it. Retries on contention.
    async fn allocate_next(&self) -> NonceResult<u64> {
        if let Some(reused) = self.take_released().await? {
            debug!(nonce = reused, "reusing released nonce");
            return Ok(reused);
        }
        loop {
            let current = self.current().await?;
            let next = current
                .checked_add(1)
                .ok_or_else(|| NonceError::Storage(format!("nonce counter exhausted at {}", current)))?;
            match self.advance_to(next).await {
                Ok(_) => return Ok(current),
                Err(NonceError::Stale { .. }) => {
                    debug!(current, "nonce claim lost race, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

const COUNTER_TREE: &str = "nonce_counters";
const RELEASED_TREE: &str = "nonce_released";

/// sled-backed counter, one key per network. Released nonces live in a
/// second tree keyed by `network \0 nonce` so a prefix scan yields them in
/// ascending order.
#[derive(Clone)]
pub struct SledNonceAllocator {
    tree: sled::Tree,
    released: sled::Tree,
    network: String,
}

fn released_prefix(network: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(network.len() + 1);
    prefix.extend_from_slice(network.as_bytes());
    prefix.push(0);
    prefix
}

impl SledNonceAllocator {
    pub fn open(db: &sled::Db, network: &str) -> NonceResult<Self> {
        let tree = db.open_tree(COUNTER_TREE)?;
        let released = db.open_tree(RELEASED_TREE)?;
        Ok(Self {
            tree,
            released,
            network: network.to_string(),
        })
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    fn read(tree: &sled::Tree, network: &str) -> NonceResult<Option<u64>> {
        match tree.get(network.as_bytes())? {
            Some(raw) => decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    async fn blocking<T, F>(&self, op: F) -> NonceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(sled::Tree, String) -> NonceResult<T> + Send + 'static,
    {
        let tree = self.tree.clone();
        let network = self.network.clone();
        tokio::task::spawn_blocking(move || op(tree, network))
            .await
            .map_err(|e| NonceError::Storage(format!("nonce task aborted: {}", e)))?
    }
}

#[async_trait]
impl NonceAllocator for SledNonceAllocator {
    async fn current(&self) -> NonceResult<u64> {
        self.blocking(|tree, network| {
            Self::read(&tree, &network)?.ok_or(NonceError::Uninitialized(network))
        })
        .await
    }

    async fn advance_to(&self, n: u64) -> NonceResult<u64> {
        self.blocking(move |tree, network| loop {
            let existing = tree.get(network.as_bytes())?;
            let current = match &existing {
                Some(raw) => decode(raw)?,
                None => return Err(NonceError::Uninitialized(network)),
            };
            if n <= current {
                return Err(NonceError::Stale {
                    requested: n,
                    current,
                });
            }
            let swapped = tree.compare_and_swap(
                network.as_bytes(),
                existing.as_ref(),
                Some(&n.to_be_bytes()[..]),
            )?;
            if swapped.is_ok() {
                tree.flush()?;
                debug!(network = %network, from = current, to = n, "nonce counter advanced");
                return Ok(n);
            }
            // Counter moved underneath us; re-read and re-check monotonicity.
        })
        .await
    }

    async fn initialize(&self, start: u64) -> NonceResult<u64> {
        self.blocking(move |tree, network| {
            let swapped = tree.compare_and_swap(
                network.as_bytes(),
                None as Option<&[u8]>,
                Some(&start.to_be_bytes()[..]),
            )?;
            match swapped {
                Ok(()) => {
                    tree.flush()?;
                    info!(network = %network, start, "nonce counter initialised");
                    Ok(start)
                }
                Err(cas) => match cas.current {
                    Some(raw) => decode(&raw),
                    None => Err(NonceError::Storage("counter vanished during init".into())),
                },
            }
        })
        .await
    }

    async fn release(&self, nonce: u64) -> NonceResult<()> {
        let released = self.released.clone();
        self.blocking(move |tree, network| {
            let current = Self::read(&tree, &network)?
                .ok_or_else(|| NonceError::Uninitialized(network.clone()))?;
            if nonce >= current {
                return Err(NonceError::Stale {
                    requested: nonce,
                    current,
                });
            }
            let mut key = released_prefix(&network);
            key.extend_from_slice(&nonce.to_be_bytes());
            released.insert(key, &[][..])?;
            released.flush()?;
            info!(network = %network, nonce, "nonce released for reuse");
            Ok(())
        })
        .await
    }

    async fn take_released(&self) -> NonceResult<Option<u64>> {
        let released = self.released.clone();
        self.blocking(move |_, network| {
            let prefix = released_prefix(&network);
            for entry in released.scan_prefix(&prefix) {
                let (key, _) = entry?;
                // Only the caller whose remove finds the key owns the nonce
                if released.remove(&key)?.is_some() {
                    released.flush()?;
                    return decode(&key[prefix.len()..]).map(Some);
                }
            }
            Ok(None)
        })
        .await
    }
}

fn decode(raw: &[u8]) -> NonceResult<u64> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| NonceError::Storage(format!("corrupt counter value ({} bytes)", raw.len())))?;
    Ok(u64::from_be_bytes(bytes))
}
