//! Recurring cleanup of expired denylist rows.
//!
//! Expired entries are already inert for authorization, so pruning is pure
//! hygiene: it can run at any time, repeatedly, and concurrently with the
//! revocation flows without affecting correctness.

use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use keyway_db::repositories::DenylistRepo;
use keyway_db::DbPool;

/// How often the scheduler prunes.
const PRUNE_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Background service that deletes expired denylist rows on a 24-hour cycle.
pub struct PruneScheduler {
    pool: DbPool,
    running: Mutex<Option<CancellationToken>>,
}

impl PruneScheduler {
    /// Create a new scheduler with the given database pool.
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            running: Mutex::new(None),
        }
    }

    /// Begin the recurring cycle, pruning immediately on start.
    ///
    /// Calling `start` while already running is a no-op.
    pub fn start(&self) {
        let mut guard = self.running.lock().unwrap_or_else(|p| p.into_inner());
        if guard.as_ref().is_some_and(|token| !token.is_cancelled()) {
            tracing::debug!("Prune scheduler already running");
            return;
        }

        let cancel = CancellationToken::new();
        tokio::spawn(Self::run(self.pool.clone(), cancel.clone()));
        *guard = Some(cancel);
    }

    /// Cancel the recurring cycle. Safe to call when not started.
    pub fn stop(&self) {
        let mut guard = self.running.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(token) = guard.take() {
            token.cancel();
        }
    }

    /// Whether a prune cycle is currently scheduled.
    pub fn is_running(&self) -> bool {
        let guard = self.running.lock().unwrap_or_else(|p| p.into_inner());
        guard.as_ref().is_some_and(|token| !token.is_cancelled())
    }

    /// Delete all expired rows now, propagating store errors to the caller.
    pub async fn prune(&self) -> Result<u64, sqlx::Error> {
        DenylistRepo::prune_expired(&self.pool).await
    }

    /// The scheduler loop. The interval's first tick fires immediately.
    async fn run(pool: DbPool, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Prune scheduler cancelled");
                    break;
                }
                _ = interval.tick() => {
                    match DenylistRepo::prune_expired(&pool).await {
                        Ok(0) => {}
                        Ok(count) => tracing::info!(count, "Pruned expired denylist entries"),
                        Err(e) => tracing::error!(error = %e, "Denylist prune failed"),
                    }
                }
            }
        }
    }
}
