use actix_web::{web, HttpRequest, HttpResponse, Result};
use chrono::Utc;
use std::sync::Arc;
use validator::Validate;

use crate::database::DatabaseService;
use crate::handlers::{client_ip, current_claims, error_response, flatten_validation_errors};
use crate::models::{
    ApiResponse, ContactVerifyRequest, LoginRequest, OtpRequest, OtpVerifyRequest,
    PasswordResetRequest, RegisterRequest, ResetPasswordRequest, UserResponse,
};
use crate::services::{OtpService, UserService};
use crate::utils;

const RESET_REQUESTED: &str = "If an account with that email exists, a password reset link has been sent";
const OTP_REQUESTED: &str = "If an account with that identifier exists, a code has been sent";

/// Register donor endpoint
pub async fn register(
    http: HttpRequest,
    req: web::Json<RegisterRequest>,
    user_service: web::Data<Arc<UserService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let r = req.into_inner();
    if let Err(e) = r.validate() {
        return Ok(utils::response::validation_error_response(flatten_validation_errors(e)));
    }

    match user_service.register(r, Utc::now().date_naive()).await {
        Ok(response) => {
            utils::spawn_activity_log(
                Arc::clone(db.get_ref()),
                Some(response.user.id),
                "register",
                serde_json::json!({ "blood_group": response.user.blood_group }),
                client_ip(&http),
            );
            Ok(utils::response::created_response(ApiResponse::success(response)))
        }
        Err(err) => Ok(error_response(db.get_ref(), "register", err, None)),
    }
}

/// Login endpoint
pub async fn login(
    http: HttpRequest,
    req: web::Json<LoginRequest>,
    user_service: web::Data<Arc<UserService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let r = req.into_inner();
    if let Err(e) = r.validate() {
        return Ok(utils::response::validation_error_response(flatten_validation_errors(e)));
    }

    match user_service.login(&r.email, &r.password, Utc::now()).await {
        Ok(response) => {
            utils::spawn_activity_log(
                Arc::clone(db.get_ref()),
                Some(response.user.id),
                "login",
                serde_json::json!({ "method": "password" }),
                client_ip(&http),
            );
            Ok(utils::response::success_response(ApiResponse::success(response)))
        }
        Err(err) => {
            if err.status_code == 401 || err.status_code == 429 {
                log::warn!("Failed login for {}", utils::mask_sensitive(&r.email));
            }
            Ok(error_response(db.get_ref(), "login", err, None))
        }
    }
}

/// Logout endpoint
pub async fn logout(
    req: HttpRequest,
    user_service: web::Data<Arc<UserService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let claims = match current_claims(&req) {
        Ok(c) => c,
        Err(err) => return Ok(utils::response::error_response(&err.message, err.status_code)),
    };

    match user_service.logout(&claims).await {
        Ok(()) => Ok(utils::response::success_response(ApiResponse::success("Logged out successfully"))),
        Err(err) => Ok(error_response(db.get_ref(), "logout", err, claims.user_id().ok())),
    }
}

pub async fn request_otp(
    req: web::Json<OtpRequest>,
    otp_service: web::Data<Arc<OtpService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let r = req.into_inner();
    if let Err(e) = r.validate() {
        return Ok(utils::response::validation_error_response(flatten_validation_errors(e)));
    }

    match otp_service.request_code(&r.identifier, r.purpose, Utc::now()).await {
        Ok(()) => Ok(utils::response::success_response(ApiResponse::success(OTP_REQUESTED))),
        Err(err) => Ok(error_response(db.get_ref(), "request_otp", err, None)),
    }
}

/// Passwordless login with a one-time code
pub async fn verify_otp(
    http: HttpRequest,
    req: web::Json<OtpVerifyRequest>,
    otp_service: web::Data<Arc<OtpService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let r = req.into_inner();
    if let Err(e) = r.validate() {
        return Ok(utils::response::validation_error_response(flatten_validation_errors(e)));
    }

    match otp_service.verify_login(&r.identifier, &r.code, Utc::now()).await {
        Ok(response) => {
            utils::spawn_activity_log(
                Arc::clone(db.get_ref()),
                Some(response.user.id),
                "login",
                serde_json::json!({ "method": "otp" }),
                client_ip(&http),
            );
            Ok(utils::response::success_response(ApiResponse::success(response)))
        }
        Err(err) => Ok(error_response(db.get_ref(), "verify_otp", err, None)),
    }
}

pub async fn verify_contact(
    http: HttpRequest,
    req: web::Json<ContactVerifyRequest>,
    otp_service: web::Data<Arc<OtpService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let user_id = match current_claims(&http).and_then(|c| c.user_id()) {
        Ok(id) => id,
        Err(err) => return Ok(utils::response::error_response(&err.message, err.status_code)),
    };
    let r = req.into_inner();
    if let Err(e) = r.validate() {
        return Ok(utils::response::validation_error_response(flatten_validation_errors(e)));
    }

    match otp_service.verify_contact(user_id, r.purpose, &r.code, Utc::now()).await {
        Ok(user) => {
            utils::spawn_activity_log(
                Arc::clone(db.get_ref()),
                Some(user_id),
                "verify_contact",
                serde_json::json!({ "purpose": r.purpose.as_str() }),
                client_ip(&http),
            );
            Ok(utils::response::success_response(ApiResponse::success(UserResponse::from(&user))))
        }
        Err(err) => Ok(error_response(db.get_ref(), "verify_contact", err, Some(user_id))),
    }
}

/// Password reset request endpoint; the answer never reveals whether the account exists
pub async fn request_password_reset(
    req: web::Json<PasswordResetRequest>,
    user_service: web::Data<Arc<UserService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let r = req.into_inner();
    if let Err(e) = r.validate() {
        return Ok(utils::response::validation_error_response(flatten_validation_errors(e)));
    }

    match user_service.request_password_reset(&r.email, Utc::now()).await {
        Ok(()) => Ok(utils::response::success_response(ApiResponse::success(RESET_REQUESTED))),
        Err(err) => Ok(error_response(db.get_ref(), "request_password_reset", err, None)),
    }
}

/// Password reset confirmation endpoint
pub async fn reset_password(
    http: HttpRequest,
    req: web::Json<ResetPasswordRequest>,
    user_service: web::Data<Arc<UserService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let r = req.into_inner();
    if let Err(e) = r.validate() {
        return Ok(utils::response::validation_error_response(flatten_validation_errors(e)));
    }

    match user_service.reset_password(&r.token, &r.new_password, Utc::now()).await {
        Ok(user_id) => {
            utils::spawn_activity_log(
                Arc::clone(db.get_ref()),
                Some(user_id),
                "password_reset",
                serde_json::json!({}),
                client_ip(&http),
            );
            Ok(utils::response::success_response(ApiResponse::success("Password reset successfully")))
        }
        Err(err) => Ok(error_response(db.get_ref(), "reset_password", err, None)),
    }
}
