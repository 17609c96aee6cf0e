use actix_web::{web, HttpRequest, HttpResponse, Result};
use chrono::Utc;
use std::sync::Arc;
use validator::Validate;

use crate::database::DatabaseService;
use crate::handlers::{client_ip, error_response, flatten_validation_errors, parse_id, require_role};
use crate::models::{
    ApiResponse, CreateBloodRequest, UpdateRequestStatus, UpdateRoleRequest, UpdateSettingRequest,
    UserResponse,
};
use crate::services::{AdminService, RequestService, SettingsService};
use crate::utils::{self, PaginationParams};

/// Resolve the acting staff member or answer with 401/403
macro_rules! staff {
    ($req:expr, $db:expr, $admin_only:expr) => {
        match require_role(&$req, $db.get_ref(), $admin_only).await {
            Ok(id) => id,
            Err(err) => return Ok(error_response($db.get_ref(), "authorize", err, None)),
        }
    };
}

macro_rules! path_id {
    ($path:expr, $what:expr) => {
        match parse_id(&$path.into_inner(), $what) {
            Ok(id) => id,
            Err(err) => return Ok(utils::response::error_response(&err.message, err.status_code)),
        }
    };
}

pub async fn pending_donors(
    req: HttpRequest,
    pagination: web::Query<PaginationParams>,
    admin_service: web::Data<Arc<AdminService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let staff_id = staff!(req, db, false);

    match admin_service.pending_donors(&pagination).await {
        Ok(page) => {
            let page = utils::PaginatedResponse {
                data: page.data.iter().map(UserResponse::from).collect::<Vec<_>>(),
                pagination: page.pagination,
            };
            Ok(utils::response::success_response(ApiResponse::success(page)))
        }
        Err(err) => Ok(error_response(db.get_ref(), "pending_donors", err, Some(staff_id))),
    }
}

pub async fn verify_donor(
    req: HttpRequest,
    path: web::Path<String>,
    admin_service: web::Data<Arc<AdminService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let staff_id = staff!(req, db, false);
    let donor_id = path_id!(path, "donor");

    match admin_service.verify_donor(donor_id, staff_id).await {
        Ok(user) => {
            utils::spawn_activity_log(
                Arc::clone(db.get_ref()),
                Some(staff_id),
                "verify_donor",
                serde_json::json!({ "donor_id": donor_id }),
                client_ip(&req),
            );
            Ok(utils::response::success_response(ApiResponse::success(UserResponse::from(&user))))
        }
        Err(err) => Ok(error_response(db.get_ref(), "verify_donor", err, Some(staff_id))),
    }
}

pub async fn verify_donation(
    req: HttpRequest,
    path: web::Path<String>,
    admin_service: web::Data<Arc<AdminService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let staff_id = staff!(req, db, false);
    let donation_id = path_id!(path, "donation");

    match admin_service.verify_donation(donation_id, staff_id).await {
        Ok(record) => {
            utils::spawn_activity_log(
                Arc::clone(db.get_ref()),
                Some(staff_id),
                "verify_donation",
                serde_json::json!({ "donation_id": donation_id, "donor_id": record.donor_id }),
                client_ip(&req),
            );
            Ok(utils::response::success_response(ApiResponse::success(record)))
        }
        Err(err) => Ok(error_response(db.get_ref(), "verify_donation", err, Some(staff_id))),
    }
}

/// Admin endpoint to deactivate a user
pub async fn deactivate_user(
    req: HttpRequest,
    path: web::Path<String>,
    admin_service: web::Data<Arc<AdminService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let staff_id = staff!(req, db, false);
    let user_id = path_id!(path, "user");

    match admin_service.deactivate_user(user_id, staff_id).await {
        Ok(()) => {
            utils::spawn_activity_log(
                Arc::clone(db.get_ref()),
                Some(staff_id),
                "deactivate_user",
                serde_json::json!({ "user_id": user_id }),
                client_ip(&req),
            );
            Ok(utils::response::success_response(ApiResponse::success("Account deactivated successfully")))
        }
        Err(err) => Ok(error_response(db.get_ref(), "deactivate_user", err, Some(staff_id))),
    }
}

pub async fn set_role(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<UpdateRoleRequest>,
    admin_service: web::Data<Arc<AdminService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let admin_id = staff!(req, db, true);
    let user_id = path_id!(path, "user");
    let role = body.role;

    match admin_service.set_role(user_id, role, admin_id).await {
        Ok(user) => {
            utils::spawn_activity_log(
                Arc::clone(db.get_ref()),
                Some(admin_id),
                "set_role",
                serde_json::json!({ "user_id": user_id, "role": role.as_str() }),
                client_ip(&req),
            );
            Ok(utils::response::success_response(ApiResponse::success(UserResponse::from(&user))))
        }
        Err(err) => Ok(error_response(db.get_ref(), "set_role", err, Some(admin_id))),
    }
}

/// Publish a blood request
pub async fn create_request(
    req: HttpRequest,
    body: web::Json<CreateBloodRequest>,
    request_service: web::Data<Arc<RequestService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let staff_id = staff!(req, db, false);
    let create = body.into_inner();
    if let Err(e) = create.validate() {
        return Ok(utils::response::validation_error_response(flatten_validation_errors(e)));
    }

    match request_service.create(create, staff_id, Utc::now().date_naive()).await {
        Ok(request) => {
            utils::spawn_activity_log(
                Arc::clone(db.get_ref()),
                Some(staff_id),
                "create_request",
                serde_json::json!({
                    "request_id": request.id,
                    "blood_group": request.blood_group,
                    "urgency": request.urgency,
                }),
                client_ip(&req),
            );
            Ok(utils::response::created_response(ApiResponse::success(request)))
        }
        Err(err) => Ok(error_response(db.get_ref(), "create_request", err, Some(staff_id))),
    }
}

pub async fn update_request_status(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<UpdateRequestStatus>,
    request_service: web::Data<Arc<RequestService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let staff_id = staff!(req, db, false);
    let request_id = path_id!(path, "request");
    let status = body.status;

    match request_service.update_status(request_id, status).await {
        Ok(request) => {
            utils::spawn_activity_log(
                Arc::clone(db.get_ref()),
                Some(staff_id),
                "update_request_status",
                serde_json::json!({ "request_id": request_id, "status": status.as_str() }),
                client_ip(&req),
            );
            Ok(utils::response::success_response(ApiResponse::success(request)))
        }
        Err(err) => Ok(error_response(db.get_ref(), "update_request_status", err, Some(staff_id))),
    }
}

/// Donors who could answer a request today
pub async fn request_matches(
    req: HttpRequest,
    path: web::Path<String>,
    request_service: web::Data<Arc<RequestService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let staff_id = staff!(req, db, false);
    let request_id = path_id!(path, "request");

    match request_service.matches(request_id, Utc::now().date_naive()).await {
        Ok(donors) => Ok(utils::response::success_response(ApiResponse::success(donors))),
        Err(err) => Ok(error_response(db.get_ref(), "request_matches", err, Some(staff_id))),
    }
}

pub async fn notify_donors(
    req: HttpRequest,
    path: web::Path<String>,
    request_service: web::Data<Arc<RequestService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let staff_id = staff!(req, db, false);
    let request_id = path_id!(path, "request");

    match request_service.notify_matches(request_id, Utc::now().date_naive()).await {
        Ok(summary) => {
            utils::spawn_activity_log(
                Arc::clone(db.get_ref()),
                Some(staff_id),
                "notify_donors",
                serde_json::json!({
                    "request_id": request_id,
                    "matched": summary.matched,
                    "notified": summary.notified,
                }),
                client_ip(&req),
            );
            Ok(utils::response::success_response(ApiResponse::success(summary)))
        }
        Err(err) => Ok(error_response(db.get_ref(), "notify_donors", err, Some(staff_id))),
    }
}

pub async fn activity_log(
    req: HttpRequest,
    pagination: web::Query<PaginationParams>,
    admin_service: web::Data<Arc<AdminService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let staff_id = staff!(req, db, false);

    match admin_service.activity(&pagination).await {
        Ok(page) => Ok(utils::response::success_response(ApiResponse::success(page))),
        Err(err) => Ok(error_response(db.get_ref(), "activity_log", err, Some(staff_id))),
    }
}

pub async fn list_settings(
    req: HttpRequest,
    settings_service: web::Data<Arc<SettingsService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let admin_id = staff!(req, db, true);

    match settings_service.list().await {
        Ok(settings) => Ok(utils::response::success_response(ApiResponse::success(settings))),
        Err(err) => Ok(error_response(db.get_ref(), "list_settings", err, Some(admin_id))),
    }
}

pub async fn update_setting(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<UpdateSettingRequest>,
    settings_service: web::Data<Arc<SettingsService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let admin_id = staff!(req, db, true);
    let key = path.into_inner();
    let update = body.into_inner();
    if let Err(e) = update.validate() {
        return Ok(utils::response::validation_error_response(flatten_validation_errors(e)));
    }

    match settings_service.set(&key, &update.value, admin_id).await {
        Ok(setting) => {
            utils::spawn_activity_log(
                Arc::clone(db.get_ref()),
                Some(admin_id),
                "update_setting",
                serde_json::json!({ "key": key }),
                client_ip(&req),
            );
            Ok(utils::response::success_response(ApiResponse::success(setting)))
        }
        Err(err) => Ok(error_response(db.get_ref(), "update_setting", err, Some(admin_id))),
    }
}
