use actix_web::{error::JsonPayloadError, web, HttpMessage, HttpRequest, HttpResponse, Result};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::Claims;
use crate::database::DatabaseService;
use crate::models::{ApiResponse, UserRole};
use crate::utils;
use crate::utils::error::AppError;

pub mod admin;
pub mod auth;
pub mod donors;
pub mod requests;

#[cfg(test)]
mod health_test;

/// Health check endpoint
pub async fn health_check() -> Result<HttpResponse> {
    Ok(utils::response::success_response(ApiResponse::success("Server is healthy")))
}

/// Server status endpoint
pub async fn server_status(db: web::Data<Arc<DatabaseService>>) -> Result<HttpResponse> {
    let database = match db.ping().await {
        Ok(()) => "up",
        Err(e) => {
            log::warn!("Status check could not reach the database: {}", e);
            "down"
        }
    };

    let status = serde_json::json!({
        "status": "running",
        "database": database,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    });
    Ok(utils::response::success_response(ApiResponse::success(status)))
}

/// All `/api/v1` routes
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .route("/register", web::post().to(auth::register))
            .route("/login", web::post().to(auth::login))
            .route("/logout", web::post().to(auth::logout))
            .route("/otp/request", web::post().to(auth::request_otp))
            .route("/otp/verify", web::post().to(auth::verify_otp))
            .route("/verify-contact", web::post().to(auth::verify_contact))
            .route("/request-reset", web::post().to(auth::request_password_reset))
            .route("/reset-password", web::post().to(auth::reset_password)),
    )
    .service(
        web::scope("/requests")
            .route("", web::get().to(requests::list_requests))
            .route("/{id}", web::get().to(requests::get_request)),
    )
    .route("/blood-groups/{group}/donors", web::get().to(requests::compatible_groups))
    .service(
        web::scope("/donor")
            .route("/profile", web::get().to(donors::get_profile))
            .route("/profile", web::put().to(donors::update_profile))
            .route("/availability", web::put().to(donors::set_availability))
            .route("/eligibility", web::get().to(donors::get_eligibility))
            .route("/donations", web::get().to(donors::list_donations))
            .route("/donations", web::post().to(donors::record_donation)),
    )
    .service(
        web::scope("/admin")
            .route("/donors/pending", web::get().to(admin::pending_donors))
            .route("/donors/{id}/verify", web::post().to(admin::verify_donor))
            .route("/donations/{id}/verify", web::post().to(admin::verify_donation))
            .route("/users/{id}/deactivate", web::post().to(admin::deactivate_user))
            .route("/users/{id}/role", web::put().to(admin::set_role))
            .route("/requests", web::post().to(admin::create_request))
            .route("/requests/{id}/status", web::put().to(admin::update_request_status))
            .route("/requests/{id}/matches", web::get().to(admin::request_matches))
            .route("/requests/{id}/notify", web::post().to(admin::notify_donors))
            .route("/activity", web::get().to(admin::activity_log))
            .route("/settings", web::get().to(admin::list_settings))
            .route("/settings/{key}", web::put().to(admin::update_setting)),
    );
}

/// JSON extractor config: malformed or unknown-variant bodies answer 400 with a JSON error
pub fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(|err: JsonPayloadError, _req| {
            let message = match &err {
                JsonPayloadError::Deserialize(e) => format!("Invalid request body: {}", e),
                other => other.to_string(),
            };
            let response = utils::response::error_response(&message, 400);
            actix_web::error::InternalError::from_response(err, response).into()
        })
}

pub(crate) fn flatten_validation_errors(err: validator::ValidationErrors) -> Vec<String> {
    let mut msgs = Vec::new();
    for (field, errors) in err.field_errors().iter() {
        for e in errors.iter() {
            let message = if let Some(m) = &e.message {
                m.to_string()
            } else {
                format!("{} {}", field, e.code)
            };
            msgs.push(message);
        }
    }
    msgs.sort();
    msgs
}

/// Turn a service error into a response. Internal errors are persisted in the
/// background and the client only sees a generic message.
pub(crate) fn error_response(
    db: &Arc<DatabaseService>,
    category: &'static str,
    err: AppError,
    user_id: Option<Uuid>,
) -> HttpResponse {
    if !err.is_internal() {
        return utils::response::error_response(&err.message, err.status_code);
    }

    let db_clone = Arc::clone(db);
    let err_str = err.message;
    tokio::spawn(async move {
        if let Err(e) = utils::log_internal_error(
            db_clone,
            "ERROR",
            category,
            "Internal error",
            Some(serde_json::json!({ "error": err_str })),
            None,
            user_id,
        )
        .await
        {
            log::error!("Failed to persist error log for {}: {}", category, e);
        }
    });

    utils::response::error_response("An internal error occurred", 500)
}

pub(crate) fn current_claims(req: &HttpRequest) -> Result<Claims, AppError> {
    req.extensions()
        .get::<Claims>()
        .cloned()
        .ok_or_else(|| AppError::unauthorized("Unauthorized"))
}

pub(crate) fn current_user_id(req: &HttpRequest) -> Result<Uuid, AppError> {
    current_claims(req)?.user_id()
}

pub(crate) fn client_ip(req: &HttpRequest) -> Option<String> {
    req.peer_addr().map(|addr| addr.ip().to_string())
}

pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, AppError> {
    utils::validate_uuid(raw).map_err(|_| AppError::bad_request(&format!("Invalid {} ID", what)))
}

/// Staff gate. The token role is checked first, then the stored account, so
/// demoted or deactivated staff lose access before their token expires.
pub(crate) async fn require_role(
    req: &HttpRequest,
    db: &DatabaseService,
    admin_only: bool,
) -> Result<Uuid, AppError> {
    let claims = current_claims(req)?;
    let permitted = |role: UserRole| {
        if admin_only {
            role == UserRole::Admin
        } else {
            role.is_staff()
        }
    };
    if !permitted(claims.role) {
        return Err(AppError::forbidden("Insufficient permissions"));
    }

    let user_id = claims.user_id()?;
    let user = db
        .get_user_by_id(&user_id)
        .await?
        .ok_or_else(|| AppError::unauthorized("Account not found"))?;
    if !user.is_active || !permitted(user.role) {
        return Err(AppError::forbidden("Insufficient permissions"));
    }

    Ok(user_id)
}
