#[cfg(test)]
mod tests {
    use blood_donor_service::auth::AuthService;
    use blood_donor_service::config::{AuthConfig, DatabaseConfig, NotificationConfig, OtpConfig};
    use blood_donor_service::database::{DatabaseService, NewUser};
    use blood_donor_service::models::{BloodGroup, Gender, OtpPurpose, UserRole};
    use blood_donor_service::notify::{LogNotifier, Notifier};
    use blood_donor_service::services::{OtpService, SettingsService};
    use blood_donor_service::tokens::{
        generate_otp_code, generate_reset_token, hash_secret, otp_ttl, reset_token_ttl,
        IssuedToken, TokenError, TokenState,
    };
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use std::sync::Arc;
    use uuid::Uuid;

    #[test]
    fn otp_can_be_used_once() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let mut otp = IssuedToken::issue("482913", now, otp_ttl());

        assert_eq!(otp.consume("482913", now + Duration::minutes(1)), Ok(()));
        assert_eq!(otp.state_at(now + Duration::minutes(2)), TokenState::Consumed);
        assert_eq!(
            otp.consume("482913", now + Duration::minutes(2)),
            Err(TokenError::AlreadyUsed)
        );
    }

    #[test]
    fn wrong_code_does_not_burn_the_otp() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let mut otp = IssuedToken::issue("111111", now, otp_ttl());

        assert_eq!(otp.consume("222222", now), Err(TokenError::Invalid));
        assert_eq!(otp.consume("111111", now), Ok(()));
    }

    #[test]
    fn reset_token_is_rejected_from_expiry_instant() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let token = generate_reset_token().unwrap();
        let issued = IssuedToken::issue(&token, now, reset_token_ttl());

        assert_eq!(issued.state_at(issued.expires_at - Duration::seconds(1)), TokenState::Issued);
        assert_eq!(issued.state_at(issued.expires_at), TokenState::Expired);

        let mut late = issued.clone();
        assert_eq!(late.consume(&token, issued.expires_at), Err(TokenError::Expired));
        assert!(!late.used);
    }

    #[test]
    fn stored_hash_never_equals_secret() {
        let code = generate_otp_code().unwrap();
        let hashed = hash_secret(&code);
        assert_ne!(hashed, code);
        assert_eq!(hashed.len(), 64);
        assert_eq!(hashed, hash_secret(&format!(" {} ", code)));
    }

    // Helper to set up a database (requires running DB)
    async fn setup_db() -> Option<DatabaseService> {
        dotenvy::from_filename(".env").ok();

        let db_url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => return None,
        };
        let db = DatabaseService::new(&DatabaseConfig {
            url: db_url,
            max_connections: 4,
        })
        .await
        .ok()?;
        db.init_schema().await.ok()?;
        Some(db)
    }

    #[tokio::test]
    async fn stored_otp_is_single_use() {
        let db = match setup_db().await {
            Some(db) => db,
            None => {
                println!("Skipping stored_otp_is_single_use: No DB connection or DATABASE_URL not set");
                return;
            }
        };

        let identifier = format!("otp_{}@test.com", Uuid::new_v4().simple());
        let now = Utc::now();
        let code_hash = hash_secret("135790");
        db.insert_otp(&identifier, OtpPurpose::Login, &code_hash, now + otp_ttl())
            .await
            .unwrap();

        assert!(db.consume_otp(&identifier, OtpPurpose::Login, &code_hash, now).await.unwrap());
        assert!(!db.consume_otp(&identifier, OtpPurpose::Login, &code_hash, now).await.unwrap());
    }

    #[tokio::test]
    async fn newer_otp_replaces_older_one() {
        let db = match setup_db().await {
            Some(db) => db,
            None => {
                println!("Skipping newer_otp_replaces_older_one: No DB connection or DATABASE_URL not set");
                return;
            }
        };

        let identifier = format!("otp_{}@test.com", Uuid::new_v4().simple());
        let now = Utc::now();
        let first = hash_secret("100001");
        let second = hash_secret("200002");
        db.insert_otp(&identifier, OtpPurpose::EmailVerification, &first, now + otp_ttl())
            .await
            .unwrap();
        db.insert_otp(&identifier, OtpPurpose::EmailVerification, &second, now + otp_ttl())
            .await
            .unwrap();

        assert!(!db.consume_otp(&identifier, OtpPurpose::EmailVerification, &first, now).await.unwrap());
        assert!(db.consume_otp(&identifier, OtpPurpose::EmailVerification, &second, now).await.unwrap());
    }

    fn otp_service(db: Arc<DatabaseService>) -> OtpService {
        let auth = Arc::new(AuthService::new(AuthConfig {
            jwt_secret: "test_secret_must_be_32_chars_long!!".to_string(),
            bcrypt_cost: 4,
            ..AuthConfig::default()
        }));
        let settings = Arc::new(SettingsService::new(Arc::clone(&db), 60));
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::new(NotificationConfig {
            sender_email: "no-reply@test.local".to_string(),
            sender_sms_id: "TEST".to_string(),
        }));
        OtpService::new(db, auth, settings, notifier, OtpConfig::default())
    }

    #[tokio::test]
    async fn repeated_wrong_codes_discard_the_otp() {
        let db = match setup_db().await {
            Some(db) => Arc::new(db),
            None => {
                println!("Skipping repeated_wrong_codes_discard_the_otp: No DB connection or DATABASE_URL not set");
                return;
            }
        };
        let service = otp_service(Arc::clone(&db));

        let identifier = format!("otp_{}@test.com", Uuid::new_v4().simple());
        let now = Utc::now();
        let code_hash = hash_secret("246810");
        db.insert_otp(&identifier, OtpPurpose::Login, &code_hash, now + otp_ttl())
            .await
            .unwrap();

        let max = OtpConfig::default().max_verify_failures;
        for attempt in 1..=max {
            let err = service.verify_login(&identifier, "000000", now).await.unwrap_err();
            assert_eq!(err.status_code, 401, "attempt {}", attempt);
        }

        // The right code no longer exists
        assert!(!db.consume_otp(&identifier, OtpPurpose::Login, &code_hash, now).await.unwrap());
        assert!(service.verify_limiter().lock().await.is_empty());
    }

    #[tokio::test]
    async fn wrong_codes_below_the_limit_keep_the_otp() {
        let db = match setup_db().await {
            Some(db) => Arc::new(db),
            None => {
                println!("Skipping wrong_codes_below_the_limit_keep_the_otp: No DB connection or DATABASE_URL not set");
                return;
            }
        };
        let service = otp_service(Arc::clone(&db));

        let identifier = format!("otp_{}@test.com", Uuid::new_v4().simple());
        let now = Utc::now();
        let code_hash = hash_secret("975310");
        db.insert_otp(&identifier, OtpPurpose::Login, &code_hash, now + otp_ttl())
            .await
            .unwrap();

        for _ in 1..OtpConfig::default().max_verify_failures {
            let _ = service.verify_login(&identifier, "000000", now).await;
        }
        assert_eq!(service.verify_limiter().lock().await.len(), 1);
        assert!(db.consume_otp(&identifier, OtpPurpose::Login, &code_hash, now).await.unwrap());
    }

    #[tokio::test]
    async fn expired_reset_token_is_rejected() {
        let db = match setup_db().await {
            Some(db) => db,
            None => {
                println!("Skipping expired_reset_token_is_rejected: No DB connection or DATABASE_URL not set");
                return;
            }
        };

        let email = format!("reset_{}@test.com", Uuid::new_v4().simple());
        let user = db
            .create_user(&NewUser {
                email: &email,
                full_name: "Reset Tester",
                phone: None,
                password_hash: "not-a-real-hash",
                role: UserRole::Donor,
                blood_group: BloodGroup::BPositive,
                gender: Gender::Female,
                city: "Pune",
                date_of_birth: NaiveDate::from_ymd_opt(2000, 5, 5).unwrap(),
                last_donation_date: None,
            })
            .await
            .unwrap();

        let now = Utc::now();
        let token_hash = hash_secret(&generate_reset_token().unwrap());
        db.set_reset_token(&user.id, &token_hash, now + reset_token_ttl())
            .await
            .unwrap();

        let after_expiry = now + reset_token_ttl() + Duration::seconds(1);
        assert_eq!(
            db.consume_reset_token(&token_hash, "new-hash", after_expiry).await.unwrap(),
            None
        );

        // Still valid before expiry, then gone
        assert_eq!(
            db.consume_reset_token(&token_hash, "new-hash", now).await.unwrap(),
            Some(user.id)
        );
        assert_eq!(db.consume_reset_token(&token_hash, "other-hash", now).await.unwrap(), None);
    }
}
