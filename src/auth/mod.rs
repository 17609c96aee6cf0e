use actix_web::HttpMessage;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::models::{AuthResponse, User, UserResponse, UserRole};
use crate::utils::error::AppError;

const ISSUER: &str = "blood-donor-service";

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // User ID
    pub email: String,
    pub role: UserRole,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    pub jti: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::unauthorized("Invalid token subject"))
    }
}

/// Authentication service
pub struct AuthService {
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Hash a password using bcrypt
    pub fn hash_password(&self, password: &str) -> Result<String, AppError> {
        Ok(bcrypt::hash(password, self.config.bcrypt_cost)?)
    }

    /// Verify a password against its hash
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AppError> {
        Ok(bcrypt::verify(password, hash)?)
    }

    /// Issue an access token for a user and wrap it with the public profile
    pub fn generate_token(&self, user: &User) -> Result<AuthResponse, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            exp: (now + Duration::hours(self.config.jwt_expiration_hours)).timestamp(),
            iat: now.timestamp(),
            iss: ISSUER.to_string(),
            jti: Uuid::new_v4().to_string(),
        };

        let access_token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::internal_server_error(&format!("token encoding failed: {}", e)))?;

        Ok(AuthResponse {
            user: UserResponse::from(user),
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.jwt_expiration_hours * 3600,
        })
    }

    /// Validate and decode an access token
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "sub", "iat", "iss"]);

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(token_data.claims)
    }
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extract token from the Authorization header of a request
pub fn extract_token_from_request(req: &impl HttpMessage) -> Option<String> {
    req.headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(extract_bearer_token)
        .map(|t| t.to_string())
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: i64,
    count: u32,
}

/// Fixed-window request counter keyed by client or identifier.
///
/// Each key gets a window that opens on its first hit and resets once
/// `window_seconds` have elapsed; hits beyond `max_requests` inside an open
/// window are refused.
pub struct RateLimitStore {
    windows: HashMap<String, Window>,
}

impl Default for RateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitStore {
    pub fn new() -> Self {
        Self {
            windows: HashMap::new(),
        }
    }

    pub fn is_allowed_at(&mut self, key: &str, max_requests: u32, window_seconds: u64, now: i64) -> bool {
        let window = self.windows.entry(key.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if now - window.started_at >= window_seconds as i64 {
            window.started_at = now;
            window.count = 0;
        }

        if window.count >= max_requests {
            return false;
        }

        window.count += 1;
        true
    }

    /// Seconds until the current window for `key` closes
    pub fn retry_after(&self, key: &str, window_seconds: u64, now: i64) -> Option<i64> {
        self.windows
            .get(key)
            .map(|w| (w.started_at + window_seconds as i64 - now).max(0))
    }

    /// Count one failure for `key`. Returns true when this failure is the
    /// `max_failures`-th inside the window; the key is then forgotten so the
    /// next run starts from zero.
    pub fn register_failure(&mut self, key: &str, max_failures: u32, window_seconds: u64, now: i64) -> bool {
        if max_failures > 0 && self.is_allowed_at(key, max_failures - 1, window_seconds, now) {
            return false;
        }
        self.windows.remove(key);
        true
    }

    pub fn forget(&mut self, key: &str) {
        self.windows.remove(key);
    }

    /// Drop windows that closed before `now`
    pub fn cleanup_at(&mut self, window_seconds: u64, now: i64) {
        self.windows
            .retain(|_, w| now - w.started_at < window_seconds as i64);
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use crate::models::{BloodGroup, Gender};

    fn test_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test_secret_must_be_32_chars_long!!".to_string(),
            bcrypt_cost: 4,
            ..AuthConfig::default()
        }
    }

    fn sample_user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "donor@college.edu".to_string(),
            full_name: "Test Donor".to_string(),
            phone: None,
            password_hash: String::new(),
            role: UserRole::Moderator,
            blood_group: BloodGroup::OPositive,
            gender: Gender::Male,
            city: "Pune".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(2000, 5, 1).unwrap(),
            is_available: true,
            is_active: true,
            is_email_verified: false,
            is_phone_verified: false,
            is_verified: false,
            last_donation_date: None,
            login_attempts: 0,
            locked_until: None,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        }
    }

    #[test]
    fn token_round_trip_keeps_role() {
        let auth = AuthService::new(test_config());
        let user = sample_user();
        let issued = auth.generate_token(&user).unwrap();
        let claims = auth.validate_access_token(&issued.access_token).unwrap();
        assert_eq!(claims.user_id().unwrap(), user.id);
        assert_eq!(claims.role, UserRole::Moderator);
        assert_eq!(issued.expires_in, 24 * 3600);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let auth = AuthService::new(test_config());
        let other = AuthService::new(AuthConfig {
            jwt_secret: "another_secret_that_is_32_chars_long".to_string(),
            ..test_config()
        });
        let issued = other.generate_token(&sample_user()).unwrap();
        let err = auth.validate_access_token(&issued.access_token).unwrap_err();
        assert_eq!(err.status_code, 401);
    }

    #[test]
    fn password_hash_verifies() {
        let auth = AuthService::new(test_config());
        let hash = auth.hash_password("Donate2024").unwrap();
        assert!(auth.verify_password("Donate2024", &hash).unwrap());
        assert!(!auth.verify_password("donate2024", &hash).unwrap());
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Basic abc"), None);
        assert_eq!(extract_bearer_token("Bearer "), None);
    }

    #[test]
    fn fixed_window_refuses_after_limit_and_resets() {
        let mut store = RateLimitStore::new();
        let t0 = 1_000;
        assert!(store.is_allowed_at("otp:a@x.io", 3, 900, t0));
        assert!(store.is_allowed_at("otp:a@x.io", 3, 900, t0 + 10));
        assert!(store.is_allowed_at("otp:a@x.io", 3, 900, t0 + 20));
        assert!(!store.is_allowed_at("otp:a@x.io", 3, 900, t0 + 899));
        assert_eq!(store.retry_after("otp:a@x.io", 900, t0 + 899), Some(1));

        // Other identifiers are counted separately
        assert!(store.is_allowed_at("otp:b@x.io", 3, 900, t0 + 30));

        // Window is fixed from its first hit, not sliding
        assert!(store.is_allowed_at("otp:a@x.io", 3, 900, t0 + 900));
    }

    #[test]
    fn failures_trip_on_the_last_allowed_attempt() {
        let mut store = RateLimitStore::new();
        let key = "otp-verify:Login:a@x.io";
        for i in 0..4 {
            assert!(!store.register_failure(key, 5, 600, 100 + i), "failure {}", i + 1);
        }
        assert!(store.register_failure(key, 5, 600, 110));
        assert!(store.is_empty());

        // Counting restarts after the trip
        assert!(!store.register_failure(key, 5, 600, 120));
        store.forget(key);
        assert!(store.is_empty());
    }

    #[test]
    fn failure_window_expires() {
        let mut store = RateLimitStore::new();
        for _ in 0..4 {
            store.register_failure("k", 5, 600, 0);
        }
        // A new window opened, so this is failure one again
        assert!(!store.register_failure("k", 5, 600, 600));
    }

    #[test]
    fn cleanup_drops_closed_windows() {
        let mut store = RateLimitStore::new();
        store.is_allowed_at("old", 5, 60, 0);
        store.is_allowed_at("fresh", 5, 60, 100);
        store.cleanup_at(60, 120);
        assert_eq!(store.len(), 1);
        assert_eq!(store.retry_after("fresh", 60, 120), Some(40));
    }
}
