use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::auth::RateLimitStore;
use crate::database::DatabaseService;
use crate::utils::error::AppError;

/// Counts from one maintenance pass
#[derive(Debug, Default, Clone, Serialize)]
pub struct MaintenanceReport {
    pub expired_requests: u64,
    pub purged_otps: u64,
    pub purged_revocations: u64,
    pub cleared_reset_tokens: u64,
}

/// Periodic housekeeping run from the background task in `main`
pub struct MaintenanceService {
    db: Arc<DatabaseService>,
    // Each limiter with the window it counts in
    limiters: Vec<(Arc<Mutex<RateLimitStore>>, u64)>,
}

impl MaintenanceService {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self {
            db,
            limiters: Vec::new(),
        }
    }

    pub fn with_limiter(mut self, store: Arc<Mutex<RateLimitStore>>, window_seconds: u64) -> Self {
        self.limiters.push((store, window_seconds));
        self
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<MaintenanceReport, AppError> {
        let report = MaintenanceReport {
            expired_requests: self.db.expire_overdue_requests(now.date_naive()).await?,
            purged_otps: self.db.cleanup_otps(now).await?,
            purged_revocations: self.db.cleanup_revoked_tokens(now).await?,
            cleared_reset_tokens: self.db.clear_expired_reset_tokens(now).await?,
        };

        for (store, window_seconds) in &self.limiters {
            store.lock().await.cleanup_at(*window_seconds, now.timestamp());
        }

        Ok(report)
    }
}
