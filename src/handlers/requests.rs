use actix_web::{web, HttpResponse, Result};
use std::sync::Arc;

use crate::database::DatabaseService;
use crate::handlers::{error_response, parse_id};
use crate::models::{ApiResponse, BloodGroup, RequestFilter};
use crate::services::RequestService;
use crate::utils;

/// Public listing of active blood requests
pub async fn list_requests(
    query: web::Query<RequestFilter>,
    request_service: web::Data<Arc<RequestService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    match request_service.list_active(&query).await {
        Ok(page) => Ok(utils::response::success_response(ApiResponse::success(page))),
        Err(err) => Ok(error_response(db.get_ref(), "list_requests", err, None)),
    }
}

pub async fn get_request(
    path: web::Path<String>,
    request_service: web::Data<Arc<RequestService>>,
    db: web::Data<Arc<DatabaseService>>,
) -> Result<HttpResponse> {
    let id = match parse_id(&path.into_inner(), "request") {
        Ok(id) => id,
        Err(err) => return Ok(utils::response::error_response(&err.message, err.status_code)),
    };

    match request_service.get(id).await {
        Ok(request) => Ok(utils::response::success_response(ApiResponse::success(request))),
        Err(err) => Ok(error_response(db.get_ref(), "get_request", err, None)),
    }
}

/// Which groups a patient of `group` can receive from, and give to
pub async fn compatible_groups(path: web::Path<String>) -> Result<HttpResponse> {
    let group = match path.into_inner().parse::<BloodGroup>() {
        Ok(g) => g,
        Err(e) => return Ok(utils::response::error_response(&e, 400)),
    };

    let can_receive_from = group.compatible_donors();
    let can_donate_to: Vec<BloodGroup> = BloodGroup::ALL
        .iter()
        .copied()
        .filter(|recipient| group.can_donate_to(*recipient))
        .collect();

    let body = serde_json::json!({
        "blood_group": group,
        "can_receive_from": can_receive_from,
        "can_donate_to": can_donate_to,
    });
    Ok(utils::response::success_response(ApiResponse::success(body)))
}
