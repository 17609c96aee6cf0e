use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{AuthService, Claims};
use crate::database::{DatabaseService, NewUser};
use crate::eligibility::check_registration_age;
use crate::models::{AuthResponse, RegisterRequest, User, UserRole};
use crate::notify::{reset_message, Notifier};
use crate::services::settings::{SettingsService, DEFAULT_RESET_LINK_BASE, RESET_LINK_BASE};
use crate::tokens::{generate_reset_token, hash_secret, reset_token_ttl};
use crate::utils::error::AppError;
use crate::utils::{non_empty, normalize_email, normalize_phone};

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const ACCOUNT_LOCKED: &str = "Account is temporarily locked. Try again later";

/// Registration, credential checks and password reset
pub struct UserService {
    pub db: Arc<DatabaseService>,
    pub auth: Arc<AuthService>,
    settings: Arc<SettingsService>,
    notifier: Arc<dyn Notifier>,
}

impl UserService {
    pub fn new(
        db: Arc<DatabaseService>,
        auth: Arc<AuthService>,
        settings: Arc<SettingsService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            auth,
            settings,
            notifier,
        }
    }

    /// Register a donor and sign them in
    pub async fn register(&self, req: RegisterRequest, today: NaiveDate) -> Result<AuthResponse, AppError> {
        check_registration_age(req.date_of_birth, today).map_err(|e| AppError::bad_request(&e.to_string()))?;
        check_last_donation(req.last_donation_date, req.date_of_birth, today)?;

        let email = normalize_email(&req.email);
        let phone = non_empty(req.phone).map(|p| normalize_phone(&p));

        if self.db.get_user_by_email(&email).await?.is_some() {
            return Err(AppError::conflict("User with this email already exists"));
        }
        if let Some(ref phone) = phone {
            if self.db.get_user_by_phone(phone).await?.is_some() {
                return Err(AppError::conflict("User with this phone number already exists"));
            }
        }

        let password_hash = self.auth.hash_password(&req.password)?;
        let user = self
            .db
            .create_user(&NewUser {
                email: &email,
                full_name: req.full_name.trim(),
                phone: phone.as_deref(),
                password_hash: &password_hash,
                role: UserRole::Donor,
                blood_group: req.blood_group,
                gender: req.gender,
                city: req.city.trim(),
                date_of_birth: req.date_of_birth,
                last_donation_date: req.last_donation_date,
            })
            .await?;

        log::info!("Registered donor {} ({})", user.id, user.blood_group);
        self.auth.generate_token(&user)
    }

    /// Password login with lockout after repeated failures
    pub async fn login(&self, email: &str, password: &str, now: DateTime<Utc>) -> Result<AuthResponse, AppError> {
        let user = self
            .db
            .get_user_by_email(&normalize_email(email))
            .await?
            .ok_or_else(|| AppError::unauthorized(INVALID_CREDENTIALS))?;

        if !user.is_active {
            return Err(AppError::forbidden("Account is deactivated"));
        }
        if is_locked(&user, now) {
            return Err(AppError::too_many_requests(ACCOUNT_LOCKED));
        }

        if !self.auth.verify_password(password, &user.password_hash)? {
            let config = self.auth.config();
            let lock_until = now + Duration::minutes(config.lockout_minutes);
            let attempts = self
                .db
                .record_login_failure(&user.id, config.max_login_attempts, lock_until, now)
                .await?;

            if attempts >= config.max_login_attempts {
                log::warn!("Account {} locked after {} failed logins", user.id, attempts);
                return Err(AppError::too_many_requests(ACCOUNT_LOCKED));
            }
            return Err(AppError::unauthorized(INVALID_CREDENTIALS));
        }

        self.db.record_login_success(&user.id).await?;
        self.auth.generate_token(&user)
    }

    /// Revoke the presented access token until it would have expired
    pub async fn logout(&self, claims: &Claims) -> Result<(), AppError> {
        let expires_at = Utc.timestamp_opt(claims.exp, 0).single();
        self.db.revoke_token(&claims.jti, expires_at).await
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<User, AppError> {
        self.db
            .get_user_by_id(&user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    /// Issue a reset token when the account exists. Callers answer the same
    /// way either way, so the result says nothing about the account.
    pub async fn request_password_reset(&self, email: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        let user = match self.db.get_user_by_email(&normalize_email(email)).await? {
            Some(u) if u.is_active => u,
            _ => return Ok(()),
        };

        let token = generate_reset_token()?;
        self.db
            .set_reset_token(&user.id, &hash_secret(&token), now + reset_token_ttl())
            .await?;

        let site_name = self.settings.site_name().await;
        let link_base = self.settings.get_or(RESET_LINK_BASE, DEFAULT_RESET_LINK_BASE).await;
        let message = reset_message(&site_name, &user.email, &link_base, &token);
        if let Err(e) = self.notifier.send(&message) {
            log::warn!("Failed to deliver reset message for {}: {}", user.id, e);
        }

        Ok(())
    }

    /// Set a new password with a live reset token. The token is cleared on
    /// success, so a second use fails.
    pub async fn reset_password(&self, token: &str, new_password: &str, now: DateTime<Utc>) -> Result<Uuid, AppError> {
        let password_hash = self.auth.hash_password(new_password)?;

        let user_id = self
            .db
            .consume_reset_token(&hash_secret(token), &password_hash, now)
            .await?
            .ok_or_else(|| AppError::bad_request("Invalid or expired reset token"))?;

        log::info!("Password reset for {}", user_id);
        Ok(user_id)
    }
}

pub fn is_locked(user: &User, now: DateTime<Utc>) -> bool {
    user.locked_until.map(|until| until > now).unwrap_or(false)
}

/// A reported last donation must fall between birth and today
pub fn check_last_donation(
    last_donation: Option<NaiveDate>,
    date_of_birth: NaiveDate,
    today: NaiveDate,
) -> Result<(), AppError> {
    match last_donation {
        Some(date) if date > today => Err(AppError::bad_request("Last donation date cannot be in the future")),
        Some(date) if date < date_of_birth => {
            Err(AppError::bad_request("Last donation date is before the date of birth"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BloodGroup, Gender};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn user_locked_until(locked_until: Option<DateTime<Utc>>) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "x@y.edu".to_string(),
            full_name: "X".to_string(),
            phone: None,
            password_hash: String::new(),
            role: UserRole::Donor,
            blood_group: BloodGroup::APositive,
            gender: Gender::Female,
            city: "Pune".to_string(),
            date_of_birth: date(2001, 1, 1),
            is_available: true,
            is_active: true,
            is_email_verified: false,
            is_phone_verified: false,
            is_verified: false,
            last_donation_date: None,
            login_attempts: 5,
            locked_until,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        }
    }

    #[test]
    fn lock_expires() {
        let now = Utc::now();
        assert!(is_locked(&user_locked_until(Some(now + Duration::minutes(1))), now));
        assert!(!is_locked(&user_locked_until(Some(now - Duration::seconds(1))), now));
        assert!(!is_locked(&user_locked_until(None), now));
    }

    #[test]
    fn last_donation_must_be_plausible() {
        let dob = date(2000, 6, 1);
        let today = date(2026, 6, 1);
        assert!(check_last_donation(None, dob, today).is_ok());
        assert!(check_last_donation(Some(today), dob, today).is_ok());
        assert!(check_last_donation(Some(date(2026, 6, 2)), dob, today).is_err());
        assert!(check_last_donation(Some(date(1999, 1, 1)), dob, today).is_err());
    }
}
