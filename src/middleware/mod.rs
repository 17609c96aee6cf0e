use actix_web::{
    body::BoxBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{header, Method},
    Error, HttpMessage, HttpResponse,
};

use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::auth::{extract_token_from_request, AuthService, RateLimitStore};
use crate::database::DatabaseService;
use crate::utils::logging::log_request;

/// Routes reachable without a token. Everything else under `/api` needs one.
pub fn is_public(method: &Method, path: &str) -> bool {
    if *method == Method::OPTIONS {
        return true;
    }
    if path == "/health" || path.starts_with("/api/v1/status") {
        return true;
    }
    if let Some(rest) = path.strip_prefix("/api/v1/auth/") {
        return !matches!(rest.trim_end_matches('/'), "logout" | "verify-contact");
    }
    *method == Method::GET
        && (path == "/api/v1/requests"
            || path.starts_with("/api/v1/requests/")
            || path.starts_with("/api/v1/blood-groups/"))
}

/// Socket address of the caller. `X-Forwarded-For` and `Forwarded` are set by
/// the client and are not used for rate-limit keys or logs.
pub fn peer_ip(peer: Option<SocketAddr>) -> String {
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn json_error(status: actix_web::http::StatusCode, message: &str) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({ "error": message }))
}

/// Validates bearer tokens on protected routes and stores the claims in the
/// request extensions
pub struct AuthMiddleware {
    pub auth_service: Arc<AuthService>,
    pub db_service: Arc<DatabaseService>,
}

impl<S> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service: Arc::new(service),
            auth_service: Arc::clone(&self.auth_service),
            db_service: Arc::clone(&self.db_service),
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: Arc<S>,
    auth_service: Arc<AuthService>,
    db_service: Arc<DatabaseService>,
}

impl<S> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Arc::clone(&self.service);
        let auth_service = Arc::clone(&self.auth_service);
        let db_service = Arc::clone(&self.db_service);

        Box::pin(async move {
            if is_public(req.method(), req.path()) {
                return service.call(req).await;
            }

            let token = match extract_token_from_request(&req) {
                Some(token) => token,
                None => {
                    let response = json_error(
                        actix_web::http::StatusCode::UNAUTHORIZED,
                        "Missing authentication token",
                    );
                    return Ok(req.into_response(response));
                }
            };

            let claims = match auth_service.validate_access_token(&token) {
                Ok(claims) => claims,
                Err(_) => {
                    let response = json_error(
                        actix_web::http::StatusCode::UNAUTHORIZED,
                        "Invalid or expired token",
                    );
                    return Ok(req.into_response(response));
                }
            };

            // An unknown revocation state is not treated as valid
            match db_service.is_token_revoked(&claims.jti).await {
                Ok(false) => {}
                Ok(true) => {
                    let response =
                        json_error(actix_web::http::StatusCode::UNAUTHORIZED, "Token revoked");
                    return Ok(req.into_response(response));
                }
                Err(e) => {
                    log::error!("Revocation check failed: {}", e);
                    let response = json_error(
                        actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
                        "Authentication is temporarily unavailable",
                    );
                    return Ok(req.into_response(response));
                }
            }

            req.extensions_mut().insert(claims);
            service.call(req).await
        })
    }
}

/// CORS middleware
pub struct CorsMiddleware {
    pub allowed_origins: Vec<String>,
}

impl<S> Transform<S, ServiceRequest> for CorsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = CorsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(CorsMiddlewareService {
            service: Arc::new(service),
            allowed_origins: self.allowed_origins.clone(),
        }))
    }
}

pub struct CorsMiddlewareService<S> {
    service: Arc<S>,
    allowed_origins: Vec<String>,
}

impl<S> Service<ServiceRequest> for CorsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Arc::clone(&self.service);
        let allowed_origins = self.allowed_origins.clone();

        Box::pin(async move {
            let origin = req.headers().get(header::ORIGIN).cloned();

            // Preflight requests are answered here and never reach a handler
            if *req.method() == Method::OPTIONS {
                let mut response = HttpResponse::NoContent().finish();
                apply_cors_headers(response.headers_mut(), origin, &allowed_origins);
                return Ok(req.into_response(response));
            }

            let mut res = service.call(req).await?;
            apply_cors_headers(res.headers_mut(), origin, &allowed_origins);
            Ok(res)
        })
    }
}

fn apply_cors_headers(
    headers: &mut header::HeaderMap,
    origin: Option<header::HeaderValue>,
    allowed_origins: &[String],
) {
    if let Some(origin) = origin {
        if let Ok(origin_str) = origin.to_str() {
            if allowed_origins.iter().any(|o| o == origin_str || o == "*") {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
                headers.insert(header::VARY, header::HeaderValue::from_static("Origin"));
            }
        }
    }

    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        header::HeaderValue::from_static("GET, POST, PUT, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        header::HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        header::HeaderValue::from_static("3600"),
    );
}

/// Fixed-window rate limiting for the whole API
pub struct RateLimitMiddleware {
    pub store: Arc<Mutex<RateLimitStore>>,
    pub max_requests: u32,
    pub window_seconds: u64,
    pub auth_service: Option<Arc<AuthService>>,
}

impl<S> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddlewareService {
            service: Arc::new(service),
            store: Arc::clone(&self.store),
            max_requests: self.max_requests,
            window_seconds: self.window_seconds,
            auth_service: self.auth_service.clone(),
        }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: Arc<S>,
    store: Arc<Mutex<RateLimitStore>>,
    max_requests: u32,
    window_seconds: u64,
    auth_service: Option<Arc<AuthService>>,
}

impl<S> Service<ServiceRequest> for RateLimitMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Arc::clone(&self.service);
        let store = Arc::clone(&self.store);
        let max_requests = self.max_requests;
        let window_seconds = self.window_seconds;
        let auth_service = self.auth_service.clone();

        Box::pin(async move {
            let ip = peer_ip(req.peer_addr());

            // Signed-in callers are counted per account, everyone else per address
            let key = match (extract_token_from_request(&req), auth_service.as_ref()) {
                (Some(token), Some(auth)) => match auth.validate_access_token(&token) {
                    Ok(claims) => format!("user:{}", claims.sub),
                    Err(_) => format!("ip:{}", ip),
                },
                _ => format!("ip:{}", ip),
            };

            let now = chrono::Utc::now().timestamp();
            {
                let mut store = store.lock().await;
                if !store.is_allowed_at(&key, max_requests, window_seconds, now) {
                    let retry = store
                        .retry_after(&key, window_seconds, now)
                        .unwrap_or(window_seconds as i64);
                    let response = HttpResponse::TooManyRequests()
                        .insert_header((header::RETRY_AFTER, retry.to_string()))
                        .json(serde_json::json!({"error": "Rate limit exceeded. Please try again later."}));
                    return Ok(req.into_response(response));
                }
            }

            service.call(req).await
        })
    }
}

/// Request size limiting middleware
pub struct RequestSizeLimitMiddleware {
    pub max_size: usize,
}

impl<S> Transform<S, ServiceRequest> for RequestSizeLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestSizeLimitMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestSizeLimitMiddlewareService {
            service: Arc::new(service),
            max_size: self.max_size,
        }))
    }
}

pub struct RequestSizeLimitMiddlewareService<S> {
    service: Arc<S>,
    max_size: usize,
}

impl<S> Service<ServiceRequest> for RequestSizeLimitMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Arc::clone(&self.service);
        let max_size = self.max_size;

        Box::pin(async move {
            // Check Content-Length header
            if let Some(content_length) = req.headers().get("content-length") {
                if let Ok(length_str) = content_length.to_str() {
                    if let Ok(length) = length_str.parse::<usize>() {
                        if length > max_size {
                            let response = HttpResponse::PayloadTooLarge()
                                .json(serde_json::json!({"error": format!("Request size {} exceeds maximum allowed size {}", length, max_size)}));
                            return Ok(req.into_response(response));
                        }
                    }
                }
            }

            service.call(req).await
        })
    }
}

/// Security headers middleware
pub struct SecurityHeadersMiddleware;

impl<S> Transform<S, ServiceRequest> for SecurityHeadersMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = SecurityHeadersMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SecurityHeadersMiddlewareService {
            service: Arc::new(service),
        }))
    }
}

pub struct SecurityHeadersMiddlewareService<S> {
    service: Arc<S>,
}

impl<S> Service<ServiceRequest> for SecurityHeadersMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Arc::clone(&self.service);

        Box::pin(async move {
            let mut res = service.call(req).await?;

            let headers = res.headers_mut();

            // Security headers
            headers.insert(
                header::X_CONTENT_TYPE_OPTIONS,
                header::HeaderValue::from_static("nosniff"),
            );

            headers.insert(
                header::X_FRAME_OPTIONS,
                header::HeaderValue::from_static("DENY"),
            );

            headers.insert(
                header::X_XSS_PROTECTION,
                header::HeaderValue::from_static("1; mode=block"),
            );

            headers.insert(
                header::STRICT_TRANSPORT_SECURITY,
                header::HeaderValue::from_static("max-age=31536000; includeSubDomains"),
            );

            headers.insert(
                header::REFERRER_POLICY,
                header::HeaderValue::from_static("strict-origin-when-cross-origin"),
            );

            Ok(res)
        })
    }
}

/// Logging middleware
pub struct LoggingMiddleware;

impl<S> Transform<S, ServiceRequest> for LoggingMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = LoggingMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(LoggingMiddlewareService {
            service: Arc::new(service),
        }))
    }
}

pub struct LoggingMiddlewareService<S> {
    service: Arc<S>,
}

impl<S> Service<ServiceRequest> for LoggingMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Arc::clone(&self.service);
        let start_time = std::time::Instant::now();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let remote_addr = peer_ip(req.peer_addr());

        Box::pin(async move {
            let result = service.call(req).await;
            let duration = start_time.elapsed().as_millis();

            match &result {
                Ok(res) => log_request(&method, &path, res.status().as_u16(), duration, &remote_addr),
                Err(err) => {
                    log::error!(
                        "Request failed: {} {} {} {}ms from {}",
                        method, path, err, duration, remote_addr
                    );
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, web, App};

    #[::core::prelude::v1::test]
    fn public_routes() {
        assert!(is_public(&Method::GET, "/health"));
        assert!(is_public(&Method::GET, "/api/v1/status"));
        assert!(is_public(&Method::POST, "/api/v1/auth/login"));
        assert!(is_public(&Method::POST, "/api/v1/auth/otp/verify"));
        assert!(is_public(&Method::GET, "/api/v1/requests"));
        assert!(is_public(&Method::GET, "/api/v1/requests/0b0f4b1e-6a4c-4c1a-9f5e-3f1c2d7a8b90"));
        assert!(is_public(&Method::GET, "/api/v1/blood-groups/O-/donors"));
        assert!(is_public(&Method::OPTIONS, "/api/v1/admin/requests"));
    }

    #[::core::prelude::v1::test]
    fn protected_routes() {
        assert!(!is_public(&Method::POST, "/api/v1/auth/logout"));
        assert!(!is_public(&Method::POST, "/api/v1/auth/verify-contact"));
        assert!(!is_public(&Method::GET, "/api/v1/donor/profile"));
        assert!(!is_public(&Method::POST, "/api/v1/requests"));
        assert!(!is_public(&Method::GET, "/api/v1/requestsx"));
        assert!(!is_public(&Method::GET, "/api/v1/admin/activity"));
    }

    #[::core::prelude::v1::test]
    fn peer_ip_drops_port() {
        let addr: SocketAddr = "192.168.1.20:51234".parse().unwrap();
        assert_eq!(peer_ip(Some(addr)), "192.168.1.20");
        assert_eq!(peer_ip(None), "unknown");
    }

    #[actix_rt::test]
    async fn rotating_forwarded_headers_still_hits_the_limit() {
        let store = Arc::new(Mutex::new(RateLimitStore::new()));
        let app = test::init_service(
            App::new()
                .wrap(RateLimitMiddleware {
                    store: Arc::clone(&store),
                    max_requests: 2,
                    window_seconds: 60,
                    auth_service: None,
                })
                .route(
                    "/api/v1/auth/otp/verify",
                    web::post().to(|| async { HttpResponse::Ok().finish() }),
                ),
        )
        .await;

        let peer: SocketAddr = "10.0.0.9:40000".parse().unwrap();
        let mut statuses = Vec::new();
        let mut retry_after = None;
        for i in 0..4 {
            let req = test::TestRequest::post()
                .uri("/api/v1/auth/otp/verify")
                .peer_addr(peer)
                .insert_header(("X-Forwarded-For", format!("1.2.3.{}", i)))
                .insert_header((header::FORWARDED, format!("for=1.2.3.{}", i)))
                .to_request();
            let resp = test::call_service(&app, req).await;
            statuses.push(resp.status().as_u16());
            if let Some(value) = resp.headers().get(header::RETRY_AFTER) {
                retry_after = value.to_str().ok().and_then(|v| v.parse::<i64>().ok());
            }
        }

        assert_eq!(statuses, vec![200, 200, 429, 429]);
        let retry = retry_after.expect("429 carries Retry-After");
        assert!((1..=60).contains(&retry), "retry after {}", retry);
        assert_eq!(store.lock().await.len(), 1);

        // A different socket address has its own window
        let req = test::TestRequest::post()
            .uri("/api/v1/auth/otp/verify")
            .peer_addr("10.0.0.10:40000".parse().unwrap())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status().as_u16(), 200);
    }
}
