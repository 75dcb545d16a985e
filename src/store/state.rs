//! Ephemeral State Store
//!
//! Short-lived key/value storage for the redirect round trip.  Each
//! in-flight authorization attempt owns exactly one entry, keyed by its
//! [`FlowCorrelationId`].  Entries are consumed exactly once through
//! [`StateStore::take`] and expire after a bounded TTL even when the user
//! never comes back.
//!
//! [`MemoryStateStore`] is the default implementation.  Deployments that
//! run several processes behind a load balancer plug in a shared cache by
//! implementing [`StateStore`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AuthloomError, Result};

/// Default lifetime of a correlation entry, matching typical
/// authorization-code lifetimes.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(600);

// ---------------------------------------------------------------------------
// FlowCorrelationId
// ---------------------------------------------------------------------------

/// Opaque identifier linking the redirect-out and callback-in halves of one
/// authorization attempt.
///
/// For OAuth 1.0a it is the temporary `oauth_token`; for OAuth 2.0 it is the
/// `state` value.
///
/// # Examples
///
/// ```
/// use authloom::store::FlowCorrelationId;
///
/// let id = FlowCorrelationId::new("xyz");
/// assert_eq!(id.storage_key("github"), "_state_6_github_xyz");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowCorrelationId(String);

impl FlowCorrelationId {
    /// Wraps a raw correlation value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the state-store key for this id under `provider`.
    ///
    /// The provider name is length-prefixed so that no two
    /// `(provider, id)` pairs share a key.
    pub fn storage_key(&self, provider: &str) -> String {
        format!("_state_{}_{}_{}", provider.len(), provider, self.0)
    }
}

impl fmt::Display for FlowCorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Short-TTL key/value cache used during the redirect round trip.
///
/// Implementations must be safe to call from concurrent flows.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the live value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key` for at most `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Removes `key`.  Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes and returns the live value under `key`.
    ///
    /// The default implementation is `get` followed by `delete`; stores that
    /// can do better should override it with an atomic operation so that two
    /// concurrent callbacks can never both consume the same entry.
    async fn take(&self, key: &str) -> Result<Option<String>> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.delete(key).await?;
        }
        Ok(value)
    }
}

/// Serializes `value` as JSON and stores it under `key`.
pub(crate) async fn put_json<T: Serialize + Sync>(
    store: &dyn StateStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<()> {
    let json = serde_json::to_string(value).map_err(AuthloomError::from)?;
    store.set(key, json, ttl).await
}

/// Consumes the entry under `key` and deserializes it.
pub(crate) async fn take_json<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &str,
) -> Result<Option<T>> {
    match store.take(key).await? {
        Some(json) => Ok(Some(
            serde_json::from_str(&json).map_err(AuthloomError::from)?,
        )),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// MemoryStateStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process [`StateStore`] with lazy expiry.
///
/// Expired entries are invisible to `get`/`take` and are swept on every
/// `set`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use authloom::store::{MemoryStateStore, StateStore};
///
/// # async fn example() -> authloom::error::Result<()> {
/// let store = MemoryStateStore::new();
/// store.set("k", "v".to_string(), Duration::from_secs(60)).await?;
/// assert_eq!(store.take("k").await?, Some("v".to_string()));
/// assert_eq!(store.take("k").await?, None);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map(|entries| entries.values().filter(|e| e.expires_at > now).count())
            .unwrap_or(0)
    }

    /// Returns `true` when no live entry exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| AuthloomError::Storage("state store lock poisoned".to_string()).into())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.lock()?;
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        let entry = self.lock()?.remove(key);
        Ok(entry
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
