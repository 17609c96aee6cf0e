mod admin;
mod donor;
mod maintenance;
mod otp;
mod request;
pub mod settings;
mod user;

pub use admin::AdminService;
pub use donor::DonorService;
pub use maintenance::{MaintenanceReport, MaintenanceService};
pub use otp::{normalize_identifier, OtpService};
pub use request::{ListingFilter, RequestService, MATCH_LIST_LIMIT};
pub use settings::SettingsService;
pub use user::{check_last_donation, is_locked, UserService};
