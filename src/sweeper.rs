//! Periodic cleanup of spent token records.
//!
//! Revoked refresh and verification rows are dead weight once rotated or
//! redeemed, and non-revoked verification rows stop being redeemable after
//! token expiry. The sweeper deletes both on a fixed interval with plain
//! conditional deletes, so it never contends with live request traffic.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::{
    config::SweeperConfig,
    db::store::{RefreshTokenStore, VerificationTokenStore},
    errors::Error,
};

/// Row counts removed by a single sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub revoked_refresh_tokens: u64,
    pub revoked_verification_tokens: u64,
    pub stale_verification_tokens: u64,
}

pub struct MaintenanceSweeper {
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    verification_tokens: Arc<dyn VerificationTokenStore>,
    config: SweeperConfig,
}

impl MaintenanceSweeper {
    pub fn new(
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        verification_tokens: Arc<dyn VerificationTokenStore>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            refresh_tokens,
            verification_tokens,
            config,
        }
    }

    /// Run one cleanup pass.
    #[instrument(skip(self), err)]
    pub async fn sweep_once(&self) -> Result<SweepReport, Error> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.verification_max_age).map_err(|e| Error::Internal {
                operation: format!("convert verification_max_age to chrono duration: {e}"),
            })?;

        let report = SweepReport {
            revoked_refresh_tokens: self.refresh_tokens.delete_revoked().await?,
            revoked_verification_tokens: self.verification_tokens.delete_revoked().await?,
            stale_verification_tokens: self.verification_tokens.delete_stale(cutoff).await?,
        };

        debug!(
            revoked_refresh = report.revoked_refresh_tokens,
            revoked_verification = report.revoked_verification_tokens,
            stale_verification = report.stale_verification_tokens,
            "sweep complete"
        );

        Ok(report)
    }

    /// Sweep on the configured interval until `shutdown` fires.
    ///
    /// Sweep failures are logged and retried on the next tick.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // interval's first tick fires immediately; skip it
        ticker.tick().await;

        info!(interval = ?self.config.interval, "maintenance sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("maintenance sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "sweep failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        memory::{MemoryRefreshTokenStore, MemoryVerificationTokenStore},
        models::verification_tokens::VerificationTokenType,
        store::{RefreshTokenStore as _, VerificationTokenStore as _},
    };
    use uuid::Uuid;

    fn sweeper(
        refresh: Arc<MemoryRefreshTokenStore>,
        verification: Arc<MemoryVerificationTokenStore>,
    ) -> MaintenanceSweeper {
        MaintenanceSweeper::new(refresh, verification, SweeperConfig::default())
    }

    #[tokio::test]
    async fn sweep_removes_revoked_and_stale_rows_only() {
        let refresh = Arc::new(MemoryRefreshTokenStore::new());
        let verification = Arc::new(MemoryVerificationTokenStore::new());

        // one live and one consumed refresh record
        refresh.whitelist(Uuid::new_v4(), "digest-a", 1).await.unwrap();
        let consumed = Uuid::new_v4();
        refresh.whitelist(consumed, "digest-b", 1).await.unwrap();
        refresh.consume(consumed).await.unwrap();

        // a redeemed verification record, a fresh pending one, and a pending
        // one from 26 hours ago
        let redeemed = verification.whitelist(1, VerificationTokenType::EmailVerification).await.unwrap();
        verification.consume(redeemed.id).await.unwrap();
        verification.whitelist(1, VerificationTokenType::EmailVerification).await.unwrap();
        let stale = verification.whitelist(2, VerificationTokenType::PasswordReset).await.unwrap();
        verification
            .backdate(stale.id, Utc::now() - chrono::Duration::hours(26))
            .await;

        let report = sweeper(refresh.clone(), verification.clone()).sweep_once().await.unwrap();

        assert_eq!(report.revoked_refresh_tokens, 1);
        assert_eq!(report.revoked_verification_tokens, 1);
        assert_eq!(report.stale_verification_tokens, 1);

        // the live refresh record and the fresh pending record survive
        assert_eq!(refresh.len().await, 1);
        assert_eq!(verification.len().await, 1);
    }

    #[tokio::test]
    async fn pending_row_within_max_age_survives() {
        let refresh = Arc::new(MemoryRefreshTokenStore::new());
        let verification = Arc::new(MemoryVerificationTokenStore::new());

        // 1 hour old, well within the 25h window
        let pending = verification.whitelist(1, VerificationTokenType::EmailVerification).await.unwrap();
        verification
            .backdate(pending.id, Utc::now() - chrono::Duration::hours(1))
            .await;

        let report = sweeper(refresh, verification.clone()).sweep_once().await.unwrap();

        assert_eq!(report.stale_verification_tokens, 0);
        assert_eq!(verification.len().await, 1);
    }

    #[tokio::test]
    async fn sweep_on_empty_stores_is_a_no_op() {
        let refresh = Arc::new(MemoryRefreshTokenStore::new());
        let verification = Arc::new(MemoryVerificationTokenStore::new());

        let report = sweeper(refresh, verification).sweep_once().await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let refresh = Arc::new(MemoryRefreshTokenStore::new());
        let verification = Arc::new(MemoryVerificationTokenStore::new());

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(sweeper(refresh, verification).run(shutdown.clone()));

        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop after cancellation")
            .unwrap();
    }
}
