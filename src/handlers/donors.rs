use actix_web::{web, HttpRequest, HttpResponse, Result};
use chrono::Utc;
use std::sync::Arc;
use validator::Validate;

use crate::database::DatabaseService;
use crate::handlers::{client_ip, current_user_id, error_response, flatten_validation_errors};
use crate::models::{
    ApiResponse, AvailabilityRequest, RecordDonationRequest, UpdateProfileRequest, UserResponse,
};
use crate::services::DonorService;
use crate::utils;

macro_rules! signed_in {
    ($req:expr) => {
        match current_user_id(&$req) {
            Ok(id) => id,
            Err(err) => return Ok(utils::response::error_response(&err.message, err.status_code)),
        }
    };
}

/// Get own profile
pub async fn get_profile(
    req: HttpRequest,
    donor_service: web::Data<Arc<DonorService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let user_id = signed_in!(req);

    match donor_service.profile(user_id).await {
        Ok(user) => Ok(utils::response::success_response(ApiResponse::success(UserResponse::from(&user)))),
        Err(err) => Ok(error_response(db.get_ref(), "get_profile", err, Some(user_id))),
    }
}

/// Update own profile
pub async fn update_profile(
    req: HttpRequest,
    body: web::Json<UpdateProfileRequest>,
    donor_service: web::Data<Arc<DonorService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let user_id = signed_in!(req);
    let update = body.into_inner();
    if let Err(e) = update.validate() {
        return Ok(utils::response::validation_error_response(flatten_validation_errors(e)));
    }

    match donor_service.update_profile(user_id, update).await {
        Ok(user) => {
            utils::spawn_activity_log(
                Arc::clone(db.get_ref()),
                Some(user_id),
                "update_profile",
                serde_json::json!({}),
                client_ip(&req),
            );
            Ok(utils::response::success_response(ApiResponse::success(UserResponse::from(&user))))
        }
        Err(err) => Ok(error_response(db.get_ref(), "update_profile", err, Some(user_id))),
    }
}

pub async fn set_availability(
    req: HttpRequest,
    body: web::Json<AvailabilityRequest>,
    donor_service: web::Data<Arc<DonorService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let user_id = signed_in!(req);
    let is_available = body.is_available;

    match donor_service.set_availability(user_id, is_available).await {
        Ok(user) => {
            utils::spawn_activity_log(
                Arc::clone(db.get_ref()),
                Some(user_id),
                "set_availability",
                serde_json::json!({ "is_available": is_available }),
                client_ip(&req),
            );
            Ok(utils::response::success_response(ApiResponse::success(UserResponse::from(&user))))
        }
        Err(err) => Ok(error_response(db.get_ref(), "set_availability", err, Some(user_id))),
    }
}

/// Whether the signed-in donor may donate today, and from when otherwise
pub async fn get_eligibility(
    req: HttpRequest,
    donor_service: web::Data<Arc<DonorService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let user_id = signed_in!(req);

    match donor_service.eligibility(user_id, Utc::now().date_naive()).await {
        Ok(eligibility) => Ok(utils::response::success_response(ApiResponse::success(eligibility))),
        Err(err) => Ok(error_response(db.get_ref(), "get_eligibility", err, Some(user_id))),
    }
}

pub async fn list_donations(
    req: HttpRequest,
    donor_service: web::Data<Arc<DonorService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let user_id = signed_in!(req);

    match donor_service.donations(user_id).await {
        Ok(records) => Ok(utils::response::success_response(ApiResponse::success(records))),
        Err(err) => Ok(error_response(db.get_ref(), "list_donations", err, Some(user_id))),
    }
}

pub async fn record_donation(
    req: HttpRequest,
    body: web::Json<RecordDonationRequest>,
    donor_service: web::Data<Arc<DonorService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let user_id = signed_in!(req);
    let donation = body.into_inner();
    if let Err(e) = donation.validate() {
        return Ok(utils::response::validation_error_response(flatten_validation_errors(e)));
    }

    match donor_service.record_donation(user_id, donation, Utc::now().date_naive()).await {
        Ok(record) => {
            utils::spawn_activity_log(
                Arc::clone(db.get_ref()),
                Some(user_id),
                "record_donation",
                serde_json::json!({ "donation_id": record.id, "date": record.donation_date }),
                client_ip(&req),
            );
            Ok(utils::response::created_response(ApiResponse::success(record)))
        }
        Err(err) => Ok(error_response(db.get_ref(), "record_donation", err, Some(user_id))),
    }
}
