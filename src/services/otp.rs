use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::{AuthService, RateLimitStore};
use crate::config::OtpConfig;
use crate::database::DatabaseService;
use crate::models::{AuthResponse, OtpPurpose, User};
use crate::notify::{otp_message, Notifier};
use crate::services::settings::SettingsService;
use crate::tokens::{generate_otp_code, hash_secret, otp_ttl};
use crate::utils::error::AppError;
use crate::utils::{normalize_email, normalize_phone, validate_phone};

const INVALID_CODE: &str = "Invalid or expired code";

/// Normalize an email or phone identifier to its stored form
pub fn normalize_identifier(identifier: &str) -> Result<String, AppError> {
    let trimmed = identifier.trim();
    if trimmed.contains('@') {
        return Ok(normalize_email(trimmed));
    }
    validate_phone(trimmed).map_err(|_| AppError::bad_request("Identifier must be an email address or phone number"))?;
    Ok(normalize_phone(trimmed))
}

fn verify_key(identifier: &str, purpose: OtpPurpose) -> String {
    format!("otp-verify:{}:{}", purpose.as_str(), identifier)
}

/// Issue and verify one-time passwords
pub struct OtpService {
    db: Arc<DatabaseService>,
    auth: Arc<AuthService>,
    settings: Arc<SettingsService>,
    notifier: Arc<dyn Notifier>,
    limiter: Arc<Mutex<RateLimitStore>>,
    verify_failures: Arc<Mutex<RateLimitStore>>,
    config: OtpConfig,
}

impl OtpService {
    pub fn new(
        db: Arc<DatabaseService>,
        auth: Arc<AuthService>,
        settings: Arc<SettingsService>,
        notifier: Arc<dyn Notifier>,
        config: OtpConfig,
    ) -> Self {
        Self {
            db,
            auth,
            settings,
            notifier,
            limiter: Arc::new(Mutex::new(RateLimitStore::new())),
            verify_failures: Arc::new(Mutex::new(RateLimitStore::new())),
            config,
        }
    }

    pub fn limiter(&self) -> Arc<Mutex<RateLimitStore>> {
        self.limiter.clone()
    }

    /// Wrong-code counters, keyed `otp-verify:{purpose}:{identifier}`
    pub fn verify_limiter(&self) -> Arc<Mutex<RateLimitStore>> {
        self.verify_failures.clone()
    }

    /// A failure count lives as long as the code it was counted against
    pub fn verify_window_seconds(&self) -> u64 {
        otp_ttl().num_seconds().max(1) as u64
    }

    /// Count a wrong code. Once the limit is reached the live codes for the
    /// identifier are discarded and a new one must be requested.
    async fn record_failed_code(&self, identifier: &str, purpose: OtpPurpose, now: DateTime<Utc>) -> Result<(), AppError> {
        let key = verify_key(identifier, purpose);
        let exhausted = self.verify_failures.lock().await.register_failure(
            &key,
            self.config.max_verify_failures,
            self.verify_window_seconds(),
            now.timestamp(),
        );

        if exhausted {
            let discarded = self.db.discard_otps(identifier, purpose).await?;
            log::warn!(
                "Discarded {} {} code(s) after {} wrong attempts",
                discarded,
                purpose.as_str(),
                self.config.max_verify_failures
            );
        }
        Ok(())
    }

    async fn clear_failed_codes(&self, identifier: &str, purpose: OtpPurpose) {
        self.verify_failures.lock().await.forget(&verify_key(identifier, purpose));
    }

    async fn check_issue_limit(&self, identifier: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        let key = format!("otp:{}", identifier);
        let mut limiter = self.limiter.lock().await;

        let max = self.config.max_issues_per_window;
        let window = self.config.issue_window_seconds;
        if limiter.is_allowed_at(&key, max, window, now.timestamp()) {
            return Ok(());
        }

        let wait = limiter.retry_after(&key, window, now.timestamp()).unwrap_or(window as i64);
        Err(AppError::too_many_requests(&format!(
            "Too many codes requested. Try again in {} seconds",
            wait
        )))
    }

    async fn find_account(&self, identifier: &str) -> Result<Option<User>, AppError> {
        if identifier.contains('@') {
            self.db.get_user_by_email(identifier).await
        } else {
            self.db.get_user_by_phone(identifier).await
        }
    }

    /// Send a code to `identifier`. Unknown or inactive accounts get the same
    /// answer as real ones but no message.
    pub async fn request_code(&self, identifier: &str, purpose: OtpPurpose, now: DateTime<Utc>) -> Result<(), AppError> {
        let identifier = normalize_identifier(identifier)?;
        self.check_issue_limit(&identifier, now).await?;

        match self.find_account(&identifier).await? {
            Some(user) if user.is_active => {}
            _ => {
                log::info!("OTP requested for unknown identifier");
                return Ok(());
            }
        }

        let code = generate_otp_code()?;
        self.db
            .insert_otp(&identifier, purpose, &hash_secret(&code), now + otp_ttl())
            .await?;

        let site_name = self.settings.site_name().await;
        let message = otp_message(&site_name, &identifier, purpose, &code);
        if let Err(e) = self.notifier.send(&message) {
            log::warn!("Failed to deliver {} code: {}", purpose.as_str(), e);
        }

        Ok(())
    }

    /// Passwordless login: consume a login code and issue an access token
    pub async fn verify_login(&self, identifier: &str, code: &str, now: DateTime<Utc>) -> Result<AuthResponse, AppError> {
        let identifier = normalize_identifier(identifier)?;

        if !self
            .db
            .consume_otp(&identifier, OtpPurpose::Login, &hash_secret(code), now)
            .await?
        {
            self.record_failed_code(&identifier, OtpPurpose::Login, now).await?;
            return Err(AppError::unauthorized(INVALID_CODE));
        }
        self.clear_failed_codes(&identifier, OtpPurpose::Login).await;

        let user = self
            .find_account(&identifier)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| AppError::unauthorized(INVALID_CODE))?;

        self.db.record_login_success(&user.id).await?;
        if identifier.contains('@') {
            self.db.mark_contact_verified(&user.id, OtpPurpose::EmailVerification).await?;
        } else {
            self.db.mark_contact_verified(&user.id, OtpPurpose::PhoneVerification).await?;
        }

        self.auth.generate_token(&user)
    }

    /// Confirm the signed-in user's email or phone number
    pub async fn verify_contact(&self, user_id: Uuid, purpose: OtpPurpose, code: &str, now: DateTime<Utc>) -> Result<User, AppError> {
        let user = self
            .db
            .get_user_by_id(&user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))?;

        let identifier = match purpose {
            OtpPurpose::EmailVerification => user.email.clone(),
            OtpPurpose::PhoneVerification => user
                .phone
                .clone()
                .ok_or_else(|| AppError::bad_request("No phone number on this account"))?,
            OtpPurpose::Login => return Err(AppError::bad_request("Login codes cannot verify contact details")),
        };

        if !self
            .db
            .consume_otp(&identifier, purpose, &hash_secret(code), now)
            .await?
        {
            self.record_failed_code(&identifier, purpose, now).await?;
            return Err(AppError::bad_request(INVALID_CODE));
        }
        self.clear_failed_codes(&identifier, purpose).await;

        self.db.mark_contact_verified(&user.id, purpose).await?;
        self.db
            .get_user_by_id(&user.id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))
    }
}
