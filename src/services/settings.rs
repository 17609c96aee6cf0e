use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::DatabaseService;
use crate::models::SystemSetting;
use crate::utils::error::AppError;

pub const SITE_NAME: &str = "site_name";
pub const NOTIFICATIONS_ENABLED: &str = "notifications_enabled";
pub const MAX_NOTIFIED_DONORS: &str = "max_notified_donors";
pub const RESET_LINK_BASE: &str = "reset_link_base";

pub const DEFAULT_SITE_NAME: &str = "Campus Blood Bank";
pub const DEFAULT_MAX_NOTIFIED_DONORS: u32 = 50;
pub const DEFAULT_RESET_LINK_BASE: &str = "http://localhost:3000/reset-password";

const MAX_NOTIFIED_DONORS_CEILING: u32 = 500;

/// Reject values the typed readers could not parse back
pub fn validate_setting(key: &str, value: &str) -> Result<(), AppError> {
    let value = value.trim();
    match key {
        SITE_NAME => {
            if value.is_empty() || value.len() > 100 {
                return Err(AppError::bad_request("site_name must be 1-100 characters"));
            }
        }
        NOTIFICATIONS_ENABLED => {
            value
                .parse::<bool>()
                .map_err(|_| AppError::bad_request("notifications_enabled must be true or false"))?;
        }
        MAX_NOTIFIED_DONORS => match value.parse::<u32>() {
            Ok(n) if (1..=MAX_NOTIFIED_DONORS_CEILING).contains(&n) => {}
            _ => {
                return Err(AppError::bad_request(&format!(
                    "max_notified_donors must be between 1 and {}",
                    MAX_NOTIFIED_DONORS_CEILING
                )))
            }
        },
        RESET_LINK_BASE => {
            if !(value.starts_with("http://") || value.starts_with("https://")) {
                return Err(AppError::bad_request("reset_link_base must be an http(s) URL"));
            }
        }
        _ => return Err(AppError::not_found(&format!("Unknown setting '{}'", key))),
    }
    Ok(())
}

struct CachedValue {
    value: Option<String>,
    fetched_at: Instant,
}

/// Read-through cache over `system_settings`
pub struct SettingsService {
    db: Arc<DatabaseService>,
    ttl: Duration,
    cache: RwLock<HashMap<String, CachedValue>>,
}

impl SettingsService {
    pub fn new(db: Arc<DatabaseService>, ttl_seconds: u64) -> Self {
        Self {
            db,
            ttl: Duration::from_secs(ttl_seconds),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(key) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.value.clone());
                }
            }
        }

        let value = self.db.get_setting(key).await?.map(|s| s.value);
        self.cache.write().await.insert(
            key.to_string(),
            CachedValue {
                value: value.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(value)
    }

    /// Setting value, or `default` when unset or unreadable
    pub async fn get_or(&self, key: &str, default: &str) -> String {
        match self.get(key).await {
            Ok(Some(v)) => v,
            Ok(None) => default.to_string(),
            Err(e) => {
                log::warn!("Falling back to default for setting {}: {}", key, e);
                default.to_string()
            }
        }
    }

    pub async fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get_or(key, &default.to_string()).await.trim().parse().unwrap_or(default)
    }

    pub async fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.get_or(key, &default.to_string()).await.trim().parse().unwrap_or(default)
    }

    pub async fn site_name(&self) -> String {
        self.get_or(SITE_NAME, DEFAULT_SITE_NAME).await
    }

    pub async fn list(&self) -> Result<Vec<SystemSetting>, AppError> {
        self.db.list_settings().await
    }

    pub async fn set(&self, key: &str, value: &str, updated_by: Uuid) -> Result<SystemSetting, AppError> {
        validate_setting(key, value)?;

        let setting = self.db.upsert_setting(key, value.trim(), &updated_by).await?;
        self.invalidate(key).await;

        log::info!("Setting {} updated by {}", key, updated_by);
        Ok(setting)
    }

    pub async fn invalidate(&self, key: &str) {
        self.cache.write().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_settings_are_checked() {
        assert!(validate_setting(NOTIFICATIONS_ENABLED, "false").is_ok());
        assert_eq!(validate_setting(NOTIFICATIONS_ENABLED, "yes").unwrap_err().status_code, 400);
        assert!(validate_setting(MAX_NOTIFIED_DONORS, " 20 ").is_ok());
        assert!(validate_setting(MAX_NOTIFIED_DONORS, "0").is_err());
        assert!(validate_setting(MAX_NOTIFIED_DONORS, "501").is_err());
        assert!(validate_setting(RESET_LINK_BASE, "ftp://x").is_err());
        assert!(validate_setting(SITE_NAME, "").is_err());
    }

    #[test]
    fn unknown_keys_are_not_found() {
        assert_eq!(validate_setting("theme", "dark").unwrap_err().status_code, 404);
    }
}
