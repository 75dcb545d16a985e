//! Single-flight refresh coordination
//!
//! At most one refresh grant runs per identity.  The first caller installs a
//! shared future; callers arriving while it runs await the same future and
//! receive a clone of its outcome, success or failure.  The leader owns the
//! registry entry and removes it when it stops waiting, whether the refresh
//! completed or the leader was dropped mid-flight, so a cancelled refresh
//! never blocks later callers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::error::{AuthloomError, Result};
use crate::token::{Identity, OAuth2Token};

type RefreshOutcome = std::result::Result<OAuth2Token, AuthloomError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// In-flight refreshes of one provider, keyed by identity.
#[derive(Clone, Default)]
pub(crate) struct RefreshCoordinator {
    inflight: Arc<Mutex<HashMap<Identity, SharedRefresh>>>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("inflight", &self.inflight_count())
            .finish()
    }
}

impl RefreshCoordinator {
    /// Joins the refresh running for `identity`, or starts `refresh` when
    /// none is.
    ///
    /// `refresh` is only invoked by the caller that becomes the leader.
    pub(crate) async fn run<F>(&self, identity: &Identity, refresh: F) -> Result<OAuth2Token>
    where
        F: FnOnce() -> BoxFuture<'static, RefreshOutcome>,
    {
        let (shared, _leader) = {
            let mut inflight = self.lock()?;
            match inflight.get(identity) {
                Some(existing) => {
                    tracing::debug!(identity = %identity, "joining in-flight refresh");
                    (existing.clone(), None)
                }
                None => {
                    let shared = refresh().shared();
                    inflight.insert(identity.clone(), shared.clone());
                    let guard = LeaderGuard {
                        registry: Arc::clone(&self.inflight),
                        key: identity.clone(),
                        shared: shared.clone(),
                    };
                    (shared, Some(guard))
                }
            }
        };

        shared.await.map_err(anyhow::Error::from)
    }

    /// Number of refreshes currently in flight.
    pub(crate) fn inflight_count(&self) -> usize {
        self.inflight.lock().map(|m| m.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Identity, SharedRefresh>>> {
        self.inflight
            .lock()
            .map_err(|_| AuthloomError::Storage("refresh registry lock poisoned".to_string()).into())
    }
}

/// Removes the leader's registry entry on drop.
struct LeaderGuard {
    registry: Arc<Mutex<HashMap<Identity, SharedRefresh>>>,
    key: Identity,
    shared: SharedRefresh,
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        let Ok(mut map) = self.registry.lock() else {
            return;
        };
        // A newer leader may already own the slot.
        if map
            .get(&self.key)
            .is_some_and(|current| current.ptr_eq(&self.shared))
        {
            map.remove(&self.key);
        }
    }
}
