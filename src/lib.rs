pub mod auth;
pub mod config;
pub mod database;
pub mod eligibility;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod services;
pub mod tokens;
pub mod utils;

// Note: avoid glob re-exports to prevent ambiguous symbol re-exports.
// Consumers reference items through their module paths, e.g.
// `blood_donor_service::eligibility::check_eligibility`.
