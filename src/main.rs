use actix_web::{middleware as actix_middleware, web, App, HttpServer};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration};

use blood_donor_service::auth::{AuthService, RateLimitStore};
use blood_donor_service::config::AppConfig;
use blood_donor_service::database::DatabaseService;
use blood_donor_service::handlers::{self, health_check, server_status};
use blood_donor_service::middleware::*;
use blood_donor_service::notify::{LogNotifier, Notifier};
use blood_donor_service::services::{
    AdminService, DonorService, MaintenanceService, OtpService, RequestService, SettingsService,
    UserService,
};
use blood_donor_service::utils;
use dotenvy::dotenv;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment from .env (if present)
    let _ = dotenv();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // File logging under the configured directory, duplicated to stdout; env_logger if that fails
    let logger_handle = flexi_logger::Logger::try_with_str(config.logging.level.clone())
        .and_then(|logger| {
            logger
                .log_to_file(
                    flexi_logger::FileSpec::default()
                        .directory(config.logging.directory.clone())
                        .suppress_timestamp(),
                )
                .duplicate_to_stdout(flexi_logger::Duplicate::Info)
                .start()
        });
    if let Err(e) = &logger_handle {
        env_logger::builder()
            .filter_level(utils::logging::level_from_string(&config.logging.level))
            .format_timestamp_secs()
            .init();
        log::warn!("File logging unavailable ({}), logging to stderr", e);
    }

    log::info!("Starting Blood Donor Service v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Server: {}:{}", config.server.host, config.server.port);
    log::info!("Workers: {}", config.server.workers);

    let db_service = match DatabaseService::new(&config.database).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            log::error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = db_service.init_schema().await {
        log::error!("Failed to initialize DB schema: {}", e);
    } else {
        log::info!("DB schema ensured");
    }

    let auth_service = Arc::new(AuthService::new(config.auth.clone()));
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::new(config.notifications.clone()));
    let settings_service = Arc::new(SettingsService::new(
        Arc::clone(&db_service),
        config.settings.cache_ttl_seconds,
    ));

    let user_service = Arc::new(UserService::new(
        Arc::clone(&db_service),
        Arc::clone(&auth_service),
        Arc::clone(&settings_service),
        Arc::clone(&notifier),
    ));
    let otp_service = Arc::new(OtpService::new(
        Arc::clone(&db_service),
        Arc::clone(&auth_service),
        Arc::clone(&settings_service),
        Arc::clone(&notifier),
        config.otp.clone(),
    ));
    let donor_service = Arc::new(DonorService::new(Arc::clone(&db_service)));
    let request_service = Arc::new(RequestService::new(
        Arc::clone(&db_service),
        Arc::clone(&settings_service),
        Arc::clone(&notifier),
    ));
    let admin_service = Arc::new(AdminService::new(Arc::clone(&db_service)));

    let rate_limit_store = Arc::new(Mutex::new(RateLimitStore::new()));

    let maintenance = MaintenanceService::new(Arc::clone(&db_service))
        .with_limiter(otp_service.limiter(), config.otp.issue_window_seconds)
        .with_limiter(otp_service.verify_limiter(), otp_service.verify_window_seconds())
        .with_limiter(Arc::clone(&rate_limit_store), config.security.rate_limit_window_seconds);
    let db_for_bg = Arc::clone(&db_service);
    let maintenance_every = Duration::from_secs(config.server.maintenance_interval_seconds.max(60));

    tokio::spawn(async move {
        let mut interval = interval(maintenance_every);
        loop {
            interval.tick().await;
            match maintenance.run(chrono::Utc::now()).await {
                Ok(report) => log::info!(
                    "Maintenance: {} requests expired, {} OTPs purged, {} revocations purged, {} reset tokens cleared",
                    report.expired_requests,
                    report.purged_otps,
                    report.purged_revocations,
                    report.cleared_reset_tokens
                ),
                Err(e) => {
                    log::error!("Maintenance pass failed: {}", e);
                    let db_clone = Arc::clone(&db_for_bg);
                    let err_str = e.to_string();
                    tokio::spawn(async move {
                        if let Err(e) = utils::log_internal_error(
                            db_clone,
                            "ERROR",
                            "maintenance",
                            "Maintenance pass failed",
                            Some(serde_json::json!({ "error": err_str })),
                            None,
                            None,
                        )
                        .await
                        {
                            log::error!("Failed to persist error log for maintenance: {}", e);
                        }
                    });
                }
            }
        }
    });

    log::info!("Health check: http://{}:{}/health", config.server.host, config.server.port);

    HttpServer::new(move || {
        App::new()
            .app_data(handlers::json_config(config.security.max_request_size_bytes))
            .app_data(web::Data::new(Arc::clone(&db_service)))
            .app_data(web::Data::new(Arc::clone(&auth_service)))
            .app_data(web::Data::new(Arc::clone(&settings_service)))
            .app_data(web::Data::new(Arc::clone(&user_service)))
            .app_data(web::Data::new(Arc::clone(&otp_service)))
            .app_data(web::Data::new(Arc::clone(&donor_service)))
            .app_data(web::Data::new(Arc::clone(&request_service)))
            .app_data(web::Data::new(Arc::clone(&admin_service)))
            // Innermost first: the last wrap sees the request first
            .wrap(RequestSizeLimitMiddleware {
                max_size: config.security.max_request_size_bytes,
            })
            .wrap(AuthMiddleware {
                auth_service: Arc::clone(&auth_service),
                db_service: Arc::clone(&db_service),
            })
            .wrap(RateLimitMiddleware {
                store: Arc::clone(&rate_limit_store),
                max_requests: config.security.rate_limit_requests,
                window_seconds: config.security.rate_limit_window_seconds,
                auth_service: Some(Arc::clone(&auth_service)),
            })
            .wrap(LoggingMiddleware)
            .wrap(SecurityHeadersMiddleware)
            .wrap(CorsMiddleware {
                allowed_origins: config.security.cors_allowed_origins.clone(),
            })
            .wrap(actix_middleware::Compress::default())
            .route("/health", web::get().to(health_check))
            .service(
                web::scope("/api/v1")
                    .route("/status", web::get().to(server_status))
                    .configure(handlers::routes),
            )
    })
    .bind((config.server.host.clone(), config.server.port))?
    .workers(config.server.workers)
    .keep_alive(std::time::Duration::from_secs(config.server.keep_alive_seconds))
    .client_request_timeout(std::time::Duration::from_secs(config.server.client_timeout_seconds))
    .client_disconnect_timeout(std::time::Duration::from_secs(config.server.client_shutdown_seconds))
    .max_connections(config.server.max_connections)
    .run()
    .await
}
