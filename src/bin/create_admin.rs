//! Bootstraps the first administrator account.
//!
//! Usage: `create_admin <email> <password>`
//!
//! Profile fields come from `ADMIN_NAME`, `ADMIN_BLOOD_GROUP`, `ADMIN_GENDER`,
//! `ADMIN_CITY` and `ADMIN_DOB` (YYYY-MM-DD). An existing account with the
//! same email is promoted instead of duplicated.

use chrono::NaiveDate;
use dotenvy::dotenv;
use std::env;

use blood_donor_service::auth::AuthService;
use blood_donor_service::config::AppConfig;
use blood_donor_service::database::{DatabaseService, NewUser};
use blood_donor_service::models::{BloodGroup, Gender, UserRole};
use blood_donor_service::utils::{normalize_email, validate_password};

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenv();

    let args: Vec<String> = env::args().skip(1).collect();
    let (email, password) = match args.as_slice() {
        [email, password, ..] => (normalize_email(email), password.clone()),
        _ => return Err("usage: create_admin <email> <password>".into()),
    };
    if !email.contains('@') {
        return Err(format!("'{}' is not an email address", email).into());
    }
    validate_password(&password).map_err(|e| {
        e.message
            .map(|m| m.to_string())
            .unwrap_or_else(|| "password too weak".to_string())
    })?;

    let config = AppConfig::from_env()?;
    let db = DatabaseService::new(&config.database).await?;
    db.init_schema().await?;
    let auth = AuthService::new(config.auth.clone());

    if let Some(existing) = db.get_user_by_email(&email).await? {
        db.set_role(&existing.id, UserRole::Admin).await?;
        if !existing.is_verified {
            db.verify_donor(&existing.id, &existing.id).await?;
        }
        println!("Promoted {} ({}) to Admin", email, existing.id);
        return Ok(());
    }

    let full_name = env_or("ADMIN_NAME", "Administrator");
    let blood_group: BloodGroup = env_or("ADMIN_BLOOD_GROUP", "O+").parse()?;
    let gender: Gender = env_or("ADMIN_GENDER", "Male").parse()?;
    let city = env_or("ADMIN_CITY", "Campus");
    let date_of_birth = NaiveDate::parse_from_str(&env_or("ADMIN_DOB", "1990-01-01"), "%Y-%m-%d")?;

    let password_hash = auth.hash_password(&password)?;
    let user = db
        .create_user(&NewUser {
            email: &email,
            full_name: &full_name,
            phone: None,
            password_hash: &password_hash,
            role: UserRole::Admin,
            blood_group,
            gender,
            city: &city,
            date_of_birth,
            last_donation_date: None,
        })
        .await?;
    db.verify_donor(&user.id, &user.id).await?;

    println!("Created admin {} ({})", email, user.id);
    Ok(())
}
