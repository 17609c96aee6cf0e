use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::database::DatabaseService;

/// Pagination parameters
#[derive(Debug, Deserialize)]
pub struct PaginationParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: Some(1),
            limit: Some(20),
        }
    }
}

impl PaginationParams {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    /// Page size, clamped to 1..=100
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(20).clamp(1, 100) as i64
    }

    pub fn offset(&self) -> i64 {
        (self.page() as i64 - 1) * self.limit()
    }
}

/// Paginated response wrapper
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, params: &PaginationParams, total: i64) -> Self {
        let limit = params.limit() as u64;
        let total = total.max(0) as u64;
        Self {
            data,
            pagination: PaginationMeta {
                page: params.page(),
                limit: limit as u32,
                total,
                total_pages: total.div_ceil(limit) as u32,
            },
        }
    }
}

/// Trim input and collapse empty strings to `None`
pub fn non_empty(input: Option<String>) -> Option<String> {
    input
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Normalize a city name for comparison
pub fn normalize_city(city: &str) -> String {
    city.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Normalize an email address for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Mask sensitive values partially (e.g., tokens, emails, phone numbers)
pub fn mask_sensitive(value: &str) -> String {
    if value.is_empty() {
        return "".to_string();
    }

    if let Some(idx) = value.find('@') {
        let (local, domain) = value.split_at(idx);
        let domain = &domain[1..];
        let visible = if local.chars().count() <= 2 { 1 } else { 2 };
        let head: String = local.chars().take(visible).collect();
        return format!("{}***@{}", head, domain);
    }

    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return format!("{}***", chars[0]);
    }

    let start: String = chars[..4].iter().collect();
    let end: String = chars[chars.len() - 4..].iter().collect();
    format!("{}***{}", start, end)
}

/// Truncate string to maximum length (in characters)
pub fn truncate_string(input: &str, max_len: usize) -> String {
    if input.chars().count() <= max_len {
        input.to_string()
    } else {
        let head: String = input.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

/// Validation function for the validator crate
pub fn validate_password(password: &str) -> Result<(), validator::ValidationError> {
    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_lower = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_numeric());

    if password.len() < 8 || password.len() > 128 || !has_upper || !has_lower || !has_digit {
        let mut err = validator::ValidationError::new("password_too_weak");
        err.message = Some(
            "Password must be 8-128 characters with an uppercase letter, a lowercase letter and a digit"
                .into(),
        );
        return Err(err);
    }
    Ok(())
}

/// Phone numbers: optional leading '+', then 10-15 digits; spaces and dashes ignored
pub fn validate_phone(phone: &str) -> Result<(), validator::ValidationError> {
    let trimmed = phone.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits: String = digits.chars().filter(|c| *c != ' ' && *c != '-').collect();

    if digits.len() < 10 || digits.len() > 15 || !digits.chars().all(|c| c.is_ascii_digit()) {
        let mut err = validator::ValidationError::new("invalid_phone");
        err.message = Some("Phone number must contain 10-15 digits".into());
        return Err(err);
    }
    Ok(())
}

/// Strip formatting from a phone number so lookups match what was stored
pub fn normalize_phone(phone: &str) -> String {
    let trimmed = phone.trim();
    let plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if plus {
        format!("+{}", digits)
    } else {
        digits
    }
}

/// ID validation
pub fn validate_uuid(id: &str) -> Result<Uuid, String> {
    Uuid::parse_str(id).map_err(|_| "Invalid UUID format".to_string())
}

/// Logging helpers
pub mod logging {
    use log::{Level, LevelFilter};

    pub fn level_from_string(level: &str) -> LevelFilter {
        match level.to_lowercase().as_str() {
            "error" => LevelFilter::Error,
            "warn" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Info,
        }
    }

    pub fn level_for_status(status: u16) -> Level {
        match status {
            400..=499 => Level::Warn,
            500..=599 => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn log_request(
        method: &str,
        path: &str,
        status: u16,
        duration_ms: u128,
        remote_addr: &str,
    ) {
        log::log!(
            level_for_status(status),
            "{} {} {} {}ms from {}",
            method,
            path,
            status,
            duration_ms,
            remote_addr
        );
    }
}

/// Error handling utilities
pub mod error {
    use std::fmt;

    #[derive(Debug, Clone, PartialEq)]
    pub struct AppError {
        pub message: String,
        pub status_code: u16,
    }

    impl AppError {
        pub fn new(message: &str, status_code: u16) -> Self {
            Self {
                message: message.to_string(),
                status_code,
            }
        }

        pub fn bad_request(message: &str) -> Self {
            Self::new(message, 400)
        }

        pub fn unauthorized(message: &str) -> Self {
            Self::new(message, 401)
        }

        pub fn forbidden(message: &str) -> Self {
            Self::new(message, 403)
        }

        pub fn not_found(message: &str) -> Self {
            Self::new(message, 404)
        }

        pub fn conflict(message: &str) -> Self {
            Self::new(message, 409)
        }

        pub fn too_many_requests(message: &str) -> Self {
            Self::new(message, 429)
        }

        pub fn internal_server_error(message: &str) -> Self {
            Self::new(message, 500)
        }

        pub fn is_internal(&self) -> bool {
            self.status_code >= 500
        }
    }

    impl fmt::Display for AppError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.message)
        }
    }

    impl std::error::Error for AppError {}

    impl From<tokio_postgres::Error> for AppError {
        fn from(err: tokio_postgres::Error) -> Self {
            // Unique violations surface as conflicts; everything else is internal
            if let Some(db_err) = err.as_db_error() {
                if db_err.code() == &tokio_postgres::error::SqlState::UNIQUE_VIOLATION {
                    return Self::conflict("A record with these details already exists");
                }
            }
            Self::internal_server_error(&format!("database error: {}", err))
        }
    }

    impl From<deadpool_postgres::PoolError> for AppError {
        fn from(err: deadpool_postgres::PoolError) -> Self {
            Self::internal_server_error(&format!("database pool error: {}", err))
        }
    }

    impl From<bcrypt::BcryptError> for AppError {
        fn from(err: bcrypt::BcryptError) -> Self {
            Self::internal_server_error(&format!("password hashing error: {}", err))
        }
    }

    impl From<getrandom::Error> for AppError {
        fn from(err: getrandom::Error) -> Self {
            Self::internal_server_error(&format!("OS RNG failure: {}", err))
        }
    }

    impl From<jsonwebtoken::errors::Error> for AppError {
        fn from(err: jsonwebtoken::errors::Error) -> Self {
            Self::unauthorized(&format!("Invalid or expired token: {}", err))
        }
    }
}

/// Response helpers
pub mod response {
    use actix_web::HttpResponse;
    use serde::Serialize;

    pub fn json_response<T: Serialize>(data: T, status: u16) -> HttpResponse {
        match actix_web::http::StatusCode::from_u16(status) {
            Ok(code) => HttpResponse::build(code)
                .content_type("application/json")
                .json(data),
            Err(_) => HttpResponse::build(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)
                .content_type("application/json")
                .json(serde_json::json!({"error": "Invalid status code"})),
        }
    }

    pub fn success_response<T: Serialize>(data: T) -> HttpResponse {
        json_response(data, 200)
    }

    pub fn created_response<T: Serialize>(data: T) -> HttpResponse {
        json_response(data, 201)
    }

    pub fn error_response(message: &str, status: u16) -> HttpResponse {
        json_response(serde_json::json!({"error": message}), status)
    }

    pub fn validation_error_response(errors: Vec<String>) -> HttpResponse {
        json_response(serde_json::json!({"errors": errors}), 400)
    }
}

const SENSITIVE_KEYS: [&str; 8] = [
    "password",
    "token",
    "access_token",
    "authorization",
    "code",
    "otp",
    "email",
    "phone",
];

/// Mask the commonly sensitive keys of a JSON object
pub fn sanitize_details(details: serde_json::Value) -> serde_json::Value {
    match details {
        serde_json::Value::Object(mut map) => {
            for key in SENSITIVE_KEYS.iter() {
                if let Some(v) = map.get_mut(*key) {
                    if let Some(s) = v.as_str() {
                        *v = serde_json::Value::String(mask_sensitive(s));
                    }
                }
            }
            serde_json::Value::Object(map)
        }
        other => {
            let s = other.to_string();
            serde_json::Value::String(truncate_string(&mask_sensitive(&s), 1024))
        }
    }
}

/// Log internal error details to database and to logger, return the inserted error ID.
pub async fn log_internal_error(
    db: Arc<DatabaseService>,
    severity: &str,
    category: &str,
    message: &str,
    details: Option<serde_json::Value>,
    request_id: Option<&str>,
    user_id: Option<Uuid>,
) -> Result<Uuid, error::AppError> {
    let sanitized_details = details.map(sanitize_details);

    log::error!(
        "[{}] {}: {} - details: {:?} request_id: {:?} user_id: {:?}",
        severity,
        category,
        message,
        sanitized_details,
        request_id,
        user_id
    );

    db.insert_error_log(severity, category, message, sanitized_details, request_id, user_id)
        .await
}

/// Append an audit entry without blocking the caller
pub fn spawn_activity_log(
    db: Arc<DatabaseService>,
    user_id: Option<Uuid>,
    action: &'static str,
    details: serde_json::Value,
    ip_address: Option<String>,
) {
    let details = sanitize_details(details);
    tokio::spawn(async move {
        if let Err(e) = db
            .insert_activity(user_id, action, &details, ip_address.as_deref())
            .await
        {
            log::warn!("Failed to record activity '{}': {}", action, e);
        }
    });
}
