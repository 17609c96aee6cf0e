use chrono::{DateTime, NaiveDate, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use std::str::FromStr;
use tokio_postgres::NoTls;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{
    ActivityEntry, BloodGroup, BloodRequest, DonationRecord, OtpPurpose, RequestStatus,
    SystemSetting, Urgency, User, UserRole,
};
use crate::utils::error::AppError;

/// Database connection pool
pub type DbPool = Pool;

const SCHEMA_SQL: &str = include_str!("../../migrations/V1__initial_schema.sql");

const USER_COLUMNS: &str = "id, email, full_name, phone, password_hash, role, blood_group, gender, city, \
     date_of_birth, is_available, is_active, is_email_verified, is_phone_verified, is_verified, \
     last_donation_date, login_attempts, locked_until, created_at, updated_at, last_login_at";

const REQUEST_COLUMNS: &str = "id, requester_name, requester_phone, requester_email, patient_name, hospital, \
     blood_group, urgency, city, units_needed, needed_by, notes, status, created_by, created_at, \
     updated_at, closed_at";

const DONATION_COLUMNS: &str =
    "id, donor_id, donation_date, location, units, blood_bank, is_verified, verified_by, created_at";

// Whitespace-collapsed, lowercased city for comparisons
const CITY_KEY: &str = "lower(regexp_replace(btrim(city), '\\s+', ' ', 'g'))";

/// Fields for a new account
pub struct NewUser<'a> {
    pub email: &'a str,
    pub full_name: &'a str,
    pub phone: Option<&'a str>,
    pub password_hash: &'a str,
    pub role: UserRole,
    pub blood_group: BloodGroup,
    pub gender: crate::models::Gender,
    pub city: &'a str,
    pub date_of_birth: NaiveDate,
    pub last_donation_date: Option<NaiveDate>,
}

/// Fields for a new blood request
pub struct NewBloodRequest<'a> {
    pub requester_name: &'a str,
    pub requester_phone: &'a str,
    pub requester_email: Option<&'a str>,
    pub patient_name: Option<&'a str>,
    pub hospital: &'a str,
    pub blood_group: BloodGroup,
    pub urgency: Urgency,
    pub city: &'a str,
    pub units_needed: i32,
    pub needed_by: Option<NaiveDate>,
    pub notes: Option<&'a str>,
    pub created_by: Uuid,
}

/// Database service
pub struct DatabaseService {
    pool: DbPool,
}

impl DatabaseService {
    /// Create a new database service with connection pool and verify connectivity
    pub async fn new(config: &DatabaseConfig) -> Result<Self, AppError> {
        let service = Self::connect_lazy(config)?;

        let client = service.get_client().await?;
        client.execute("SELECT 1", &[]).await?;

        log::info!("Database connection established");

        Ok(service)
    }

    /// Build the pool without opening a connection
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, AppError> {
        let mut cfg = Config::new();
        cfg.url = Some(config.url.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(config.max_connections));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| AppError::internal_server_error(&format!("pool creation failed: {}", e)))?;

        Ok(Self { pool })
    }

    /// Get a database client from the pool
    pub async fn get_client(&self) -> Result<deadpool_postgres::Client, AppError> {
        Ok(self.pool.get().await?)
    }

    /// Apply the bundled schema; every statement is idempotent
    pub async fn init_schema(&self) -> Result<(), AppError> {
        let client = self.get_client().await?;
        client.batch_execute(SCHEMA_SQL).await?;

        log::info!("Database schema initialized");
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        let client = self.get_client().await?;
        client.execute("SELECT 1", &[]).await?;
        Ok(())
    }

    // ---- token revocation -------------------------------------------------

    /// Revoke a token by JTI and optional expiry time
    pub async fn revoke_token(&self, jti: &str, expires_at: Option<DateTime<Utc>>) -> Result<(), AppError> {
        let client = self.get_client().await?;

        client.execute("\
            INSERT INTO revoked_tokens (jti, expires_at) VALUES ($1, $2) \
            ON CONFLICT (jti) DO UPDATE SET revoked_at = NOW(), expires_at = EXCLUDED.expires_at\
        ", &[&jti, &expires_at]).await?;

        Ok(())
    }

    /// Check if a token JTI is revoked
    pub async fn is_token_revoked(&self, jti: &str) -> Result<bool, AppError> {
        let client = self.get_client().await?;

        let row = client.query_opt("SELECT jti FROM revoked_tokens WHERE jti = $1 LIMIT 1", &[&jti]).await?;
        Ok(row.is_some())
    }

    /// Revocations are only needed until the token would have expired anyway
    pub async fn cleanup_revoked_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let client = self.get_client().await?;
        Ok(client.execute("DELETE FROM revoked_tokens WHERE expires_at < $1", &[&now]).await?)
    }

    // ---- audit ------------------------------------------------------------

    /// Insert an error log record
    pub async fn insert_error_log(&self, severity: &str, category: &str, message: &str, details: Option<serde_json::Value>, request_id: Option<&str>, user_id: Option<Uuid>) -> Result<Uuid, AppError> {
        let client = self.get_client().await?;

        let id = Uuid::new_v4();
        client.execute("\
            INSERT INTO error_logs (id, severity, category, message, details, request_id, user_id) \
            VALUES ($1, $2, $3, $4, $5, $6, $7)\
        ", &[&id, &severity, &category, &message, &details, &request_id, &user_id]).await?;

        Ok(id)
    }

    pub async fn insert_activity(&self, user_id: Option<Uuid>, action: &str, details: &serde_json::Value, ip_address: Option<&str>) -> Result<(), AppError> {
        let client = self.get_client().await?;

        client.execute("\
            INSERT INTO activity_logs (user_id, action, details, ip_address) VALUES ($1, $2, $3, $4)\
        ", &[&user_id, &action, details, &ip_address]).await?;

        Ok(())
    }

    pub async fn list_activity(&self, limit: i64, offset: i64) -> Result<(Vec<ActivityEntry>, i64), AppError> {
        let client = self.get_client().await?;

        let rows = client.query("
            SELECT id, user_id, action, details, ip_address, created_at
            FROM activity_logs ORDER BY created_at DESC LIMIT $1 OFFSET $2
        ", &[&limit, &offset]).await?;
        let total: i64 = client.query_one("SELECT COUNT(*) FROM activity_logs", &[]).await?.get(0);

        let entries = rows
            .iter()
            .map(|row| ActivityEntry {
                id: row.get(0),
                user_id: row.get(1),
                action: row.get(2),
                details: row.get(3),
                ip_address: row.get(4),
                created_at: row.get(5),
            })
            .collect();

        Ok((entries, total))
    }

    // ---- users ------------------------------------------------------------

    /// Create a new user
    pub async fn create_user(&self, new_user: &NewUser<'_>) -> Result<User, AppError> {
        let client = self.get_client().await?;

        let sql = format!("
            INSERT INTO users (email, full_name, phone, password_hash, role, blood_group, gender,
                               city, date_of_birth, last_donation_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
        ", USER_COLUMNS);
        let row = client.query_one(sql.as_str(), &[
            &new_user.email,
            &new_user.full_name,
            &new_user.phone,
            &new_user.password_hash,
            &new_user.role.as_str(),
            &new_user.blood_group.as_str(),
            &new_user.gender.as_str(),
            &new_user.city,
            &new_user.date_of_birth,
            &new_user.last_donation_date,
        ]).await?;

        Self::row_to_user(&row)
    }

    /// Get user by ID
    pub async fn get_user_by_id(&self, id: &Uuid) -> Result<Option<User>, AppError> {
        self.find_user("id = $1", &[id]).await
    }

    /// Get user by email (case-insensitive)
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        self.find_user("lower(email) = lower($1)", &[&email]).await
    }

    pub async fn get_user_by_phone(&self, phone: &str) -> Result<Option<User>, AppError> {
        self.find_user("phone = $1", &[&phone]).await
    }

    async fn find_user(&self, predicate: &str, params: &[&(dyn tokio_postgres::types::ToSql + Sync)]) -> Result<Option<User>, AppError> {
        let client = self.get_client().await?;

        let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, predicate);
        match client.query_opt(sql.as_str(), params).await? {
            Some(row) => Ok(Some(Self::row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    /// Successful login: clear failure counters and stamp the login time
    pub async fn record_login_success(&self, user_id: &Uuid) -> Result<(), AppError> {
        let client = self.get_client().await?;

        client.execute("
            UPDATE users
            SET last_login_at = NOW(), login_attempts = 0, locked_until = NULL, updated_at = NOW()
            WHERE id = $1
        ", &[user_id]).await?;

        Ok(())
    }

    /// Count a failed login and lock the account once `max_attempts` is reached.
    /// A lock that has lapsed by `now` starts a fresh count. Returns the new
    /// attempt count.
    pub async fn record_login_failure(&self, user_id: &Uuid, max_attempts: i32, lock_until: DateTime<Utc>, now: DateTime<Utc>) -> Result<i32, AppError> {
        let client = self.get_client().await?;

        let row = client.query_one("
            UPDATE users
            SET login_attempts = CASE
                    WHEN locked_until IS NOT NULL AND locked_until <= $4 THEN 1
                    ELSE login_attempts + 1
                END,
                locked_until = CASE
                    WHEN (CASE WHEN locked_until IS NOT NULL AND locked_until <= $4 THEN 1
                               ELSE login_attempts + 1 END) >= $2 THEN $3
                    WHEN locked_until IS NOT NULL AND locked_until <= $4 THEN NULL
                    ELSE locked_until
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING login_attempts
        ", &[user_id, &max_attempts, &lock_until, &now]).await?;

        Ok(row.get(0))
    }

    pub async fn update_profile(&self, user_id: &Uuid, full_name: Option<&str>, phone: Option<&str>, city: Option<&str>) -> Result<Option<User>, AppError> {
        let client = self.get_client().await?;

        // A changed phone number has to be verified again
        let sql = format!("
            UPDATE users
            SET full_name = COALESCE($2, full_name),
                is_phone_verified = CASE WHEN $3::varchar IS NOT NULL AND $3 IS DISTINCT FROM phone
                                         THEN false ELSE is_phone_verified END,
                phone = COALESCE($3, phone),
                city = COALESCE($4, city),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
        ", USER_COLUMNS);
        match client.query_opt(sql.as_str(), &[user_id, &full_name, &phone, &city]).await? {
            Some(row) => Ok(Some(Self::row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn set_availability(&self, user_id: &Uuid, is_available: bool) -> Result<bool, AppError> {
        let client = self.get_client().await?;

        let updated = client.execute("
            UPDATE users SET is_available = $2, updated_at = NOW() WHERE id = $1
        ", &[user_id, &is_available]).await?;

        Ok(updated == 1)
    }

    pub async fn mark_contact_verified(&self, user_id: &Uuid, purpose: OtpPurpose) -> Result<(), AppError> {
        let client = self.get_client().await?;

        let sql = match purpose {
            OtpPurpose::EmailVerification => "UPDATE users SET is_email_verified = true, updated_at = NOW() WHERE id = $1",
            OtpPurpose::PhoneVerification => "UPDATE users SET is_phone_verified = true, updated_at = NOW() WHERE id = $1",
            OtpPurpose::Login => return Ok(()),
        };
        client.execute(sql, &[user_id]).await?;

        Ok(())
    }

    /// Admin verification of a donor's identity
    pub async fn verify_donor(&self, user_id: &Uuid, verified_by: &Uuid) -> Result<Option<User>, AppError> {
        let client = self.get_client().await?;

        let sql = format!("
            UPDATE users SET is_verified = true, verified_by = $2, updated_at = NOW()
            WHERE id = $1 AND is_active = true
            RETURNING {}
        ", USER_COLUMNS);
        match client.query_opt(sql.as_str(), &[user_id, verified_by]).await? {
            Some(row) => Ok(Some(Self::row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    /// Deactivate user account
    pub async fn deactivate_user(&self, user_id: &Uuid) -> Result<bool, AppError> {
        let client = self.get_client().await?;

        let updated = client.execute("
            UPDATE users SET is_active = false, is_available = false, updated_at = NOW() WHERE id = $1
        ", &[user_id]).await?;

        Ok(updated == 1)
    }

    pub async fn set_role(&self, user_id: &Uuid, role: UserRole) -> Result<Option<User>, AppError> {
        let client = self.get_client().await?;

        let sql = format!("
            UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING {}
        ", USER_COLUMNS);
        match client.query_opt(sql.as_str(), &[user_id, &role.as_str()]).await? {
            Some(row) => Ok(Some(Self::row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_pending_donors(&self, limit: i64, offset: i64) -> Result<(Vec<User>, i64), AppError> {
        let client = self.get_client().await?;

        let sql = format!("
            SELECT {} FROM users
            WHERE role = 'Donor' AND is_active = true AND is_verified = false
            ORDER BY created_at ASC LIMIT $1 OFFSET $2
        ", USER_COLUMNS);
        let rows = client.query(sql.as_str(), &[&limit, &offset]).await?;
        let total: i64 = client.query_one("
            SELECT COUNT(*) FROM users WHERE role = 'Donor' AND is_active = true AND is_verified = false
        ", &[]).await?.get(0);

        let users = rows.iter().map(Self::row_to_user).collect::<Result<Vec<_>, _>>()?;
        Ok((users, total))
    }

    /// Verified, available donors of the given groups in a city who are past
    /// their donation interval on `today`. Longest-rested donors come first.
    pub async fn find_candidate_donors(&self, groups: &[BloodGroup], city_key: &str, today: NaiveDate, limit: i64) -> Result<Vec<User>, AppError> {
        let client = self.get_client().await?;

        let group_names: Vec<&str> = groups.iter().map(|g| g.as_str()).collect();
        let sql = format!("
            SELECT {} FROM users
            WHERE role = 'Donor' AND is_active = true AND is_verified = true AND is_available = true
              AND blood_group = ANY($1)
              AND {} = $2
              AND (last_donation_date IS NULL
                   OR last_donation_date + make_interval(months => CASE gender WHEN 'Female' THEN 4 ELSE 3 END) <= $3::date)
            ORDER BY last_donation_date ASC NULLS FIRST, created_at ASC
            LIMIT $4
        ", USER_COLUMNS, CITY_KEY);
        let rows = client.query(sql.as_str(), &[&group_names, &city_key, &today, &limit]).await?;

        rows.iter().map(Self::row_to_user).collect()
    }

    /// Keep the most recent donation date
    pub async fn bump_last_donation_date(&self, user_id: &Uuid, donation_date: NaiveDate) -> Result<(), AppError> {
        let client = self.get_client().await?;

        client.execute("
            UPDATE users
            SET last_donation_date = GREATEST(COALESCE(last_donation_date, $2), $2), updated_at = NOW()
            WHERE id = $1
        ", &[user_id, &donation_date]).await?;

        Ok(())
    }

    /// Store a reset token digest, replacing any earlier one
    pub async fn set_reset_token(&self, user_id: &Uuid, token_hash: &str, expires_at: DateTime<Utc>) -> Result<(), AppError> {
        let client = self.get_client().await?;

        client.execute("
            UPDATE users SET reset_token_hash = $2, reset_token_expires_at = $3, updated_at = NOW()
            WHERE id = $1
        ", &[user_id, &token_hash, &expires_at]).await?;

        Ok(())
    }

    /// Swap the password if the token is live; the token is cleared by the
    /// same statement so a second use finds nothing
    pub async fn consume_reset_token(&self, token_hash: &str, new_password_hash: &str, now: DateTime<Utc>) -> Result<Option<Uuid>, AppError> {
        let client = self.get_client().await?;

        let row = client.query_opt("
            UPDATE users
            SET password_hash = $2, reset_token_hash = NULL, reset_token_expires_at = NULL,
                login_attempts = 0, locked_until = NULL, updated_at = NOW()
            WHERE reset_token_hash = $1 AND reset_token_expires_at > $3 AND is_active = true
            RETURNING id
        ", &[&token_hash, &new_password_hash, &now]).await?;

        Ok(row.map(|r| r.get(0)))
    }

    pub async fn clear_expired_reset_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let client = self.get_client().await?;

        Ok(client.execute("
            UPDATE users SET reset_token_hash = NULL, reset_token_expires_at = NULL
            WHERE reset_token_expires_at IS NOT NULL AND reset_token_expires_at <= $1
        ", &[&now]).await?)
    }

    // ---- one-time passwords ----------------------------------------------

    /// Store a new OTP digest and retire unused ones for the same identifier and purpose
    pub async fn insert_otp(&self, identifier: &str, purpose: OtpPurpose, code_hash: &str, expires_at: DateTime<Utc>) -> Result<(), AppError> {
        let mut client = self.get_client().await?;
        let txn = client.transaction().await?;

        txn.execute("
            DELETE FROM otp_verifications WHERE identifier = $1 AND purpose = $2 AND used = false
        ", &[&identifier, &purpose.as_str()]).await?;
        txn.execute("
            INSERT INTO otp_verifications (identifier, code_hash, purpose, expires_at)
            VALUES ($1, $2, $3, $4)
        ", &[&identifier, &code_hash, &purpose.as_str(), &expires_at]).await?;

        txn.commit().await?;
        Ok(())
    }

    /// Mark the matching live OTP used. Returns false when no live OTP matched,
    /// including the second attempt with an already consumed code.
    pub async fn consume_otp(&self, identifier: &str, purpose: OtpPurpose, code_hash: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let client = self.get_client().await?;

        let row = client.query_opt("
            UPDATE otp_verifications SET used = true, used_at = $4
            WHERE id = (
                SELECT id FROM otp_verifications
                WHERE identifier = $1 AND purpose = $2 AND code_hash = $3
                  AND used = false AND expires_at > $4
                ORDER BY created_at DESC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            ) AND used = false
            RETURNING id
        ", &[&identifier, &purpose.as_str(), &code_hash, &now]).await?;

        Ok(row.is_some())
    }

    /// Delete the unused codes for an identifier and purpose
    pub async fn discard_otps(&self, identifier: &str, purpose: OtpPurpose) -> Result<u64, AppError> {
        let client = self.get_client().await?;

        Ok(client.execute("
            DELETE FROM otp_verifications WHERE identifier = $1 AND purpose = $2 AND used = false
        ", &[&identifier, &purpose.as_str()]).await?)
    }

    pub async fn cleanup_otps(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let client = self.get_client().await?;

        Ok(client.execute("
            DELETE FROM otp_verifications WHERE used = true OR expires_at <= $1
        ", &[&now]).await?)
    }

    // ---- donations --------------------------------------------------------

    pub async fn insert_donation(&self, donor_id: &Uuid, donation_date: NaiveDate, location: &str, units: i32, blood_bank: Option<&str>) -> Result<DonationRecord, AppError> {
        let client = self.get_client().await?;

        let sql = format!("
            INSERT INTO donation_records (donor_id, donation_date, location, units, blood_bank)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
        ", DONATION_COLUMNS);
        let row = client.query_one(sql.as_str(), &[donor_id, &donation_date, &location, &units, &blood_bank]).await?;

        Ok(Self::row_to_donation(&row))
    }

    pub async fn list_donations(&self, donor_id: &Uuid) -> Result<Vec<DonationRecord>, AppError> {
        let client = self.get_client().await?;

        let sql = format!("
            SELECT {} FROM donation_records WHERE donor_id = $1 ORDER BY donation_date DESC
        ", DONATION_COLUMNS);
        let rows = client.query(sql.as_str(), &[donor_id]).await?;

        Ok(rows.iter().map(Self::row_to_donation).collect())
    }

    pub async fn verify_donation(&self, donation_id: &Uuid, verified_by: &Uuid) -> Result<Option<DonationRecord>, AppError> {
        let client = self.get_client().await?;

        let sql = format!("
            UPDATE donation_records SET is_verified = true, verified_by = $2
            WHERE id = $1
            RETURNING {}
        ", DONATION_COLUMNS);
        let row = client.query_opt(sql.as_str(), &[donation_id, verified_by]).await?;

        Ok(row.as_ref().map(Self::row_to_donation))
    }

    // ---- blood requests ---------------------------------------------------

    pub async fn create_request(&self, req: &NewBloodRequest<'_>) -> Result<BloodRequest, AppError> {
        let client = self.get_client().await?;

        let sql = format!("
            INSERT INTO blood_requests (requester_name, requester_phone, requester_email, patient_name,
                                        hospital, blood_group, urgency, city, units_needed, needed_by,
                                        notes, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
        ", REQUEST_COLUMNS);
        let row = client.query_one(sql.as_str(), &[
            &req.requester_name,
            &req.requester_phone,
            &req.requester_email,
            &req.patient_name,
            &req.hospital,
            &req.blood_group.as_str(),
            &req.urgency.as_str(),
            &req.city,
            &req.units_needed,
            &req.needed_by,
            &req.notes,
            &req.created_by,
        ]).await?;

        Self::row_to_request(&row)
    }

    pub async fn get_request(&self, id: &Uuid) -> Result<Option<BloodRequest>, AppError> {
        let client = self.get_client().await?;

        let sql = format!("SELECT {} FROM blood_requests WHERE id = $1", REQUEST_COLUMNS);
        match client.query_opt(sql.as_str(), &[id]).await? {
            Some(row) => Ok(Some(Self::row_to_request(&row)?)),
            None => Ok(None),
        }
    }

    /// Active requests, most urgent first, optionally filtered
    pub async fn list_active_requests(&self, blood_group: Option<BloodGroup>, city_key: Option<&str>, urgency: Option<Urgency>, limit: i64, offset: i64) -> Result<(Vec<BloodRequest>, i64), AppError> {
        let client = self.get_client().await?;

        let group = blood_group.map(|g| g.as_str());
        let urgency = urgency.map(|u| u.as_str());
        let filter = format!("
            status = 'Active'
              AND ($1::varchar IS NULL OR blood_group = $1)
              AND ($2::varchar IS NULL OR {} = $2)
              AND ($3::varchar IS NULL OR urgency = $3)
        ", CITY_KEY);

        let sql = format!("
            SELECT {} FROM blood_requests WHERE {}
            ORDER BY CASE urgency WHEN 'Critical' THEN 0 WHEN 'Urgent' THEN 1 ELSE 2 END, created_at DESC
            LIMIT $4 OFFSET $5
        ", REQUEST_COLUMNS, filter);
        let rows = client.query(sql.as_str(), &[&group, &city_key, &urgency, &limit, &offset]).await?;

        let count_sql = format!("SELECT COUNT(*) FROM blood_requests WHERE {}", filter);
        let total: i64 = client.query_one(count_sql.as_str(), &[&group, &city_key, &urgency]).await?.get(0);

        let requests = rows.iter().map(Self::row_to_request).collect::<Result<Vec<_>, _>>()?;
        Ok((requests, total))
    }

    /// Close an active request. Returns `None` if the request does not exist or
    /// is no longer active.
    pub async fn close_request(&self, id: &Uuid, status: RequestStatus) -> Result<Option<BloodRequest>, AppError> {
        let client = self.get_client().await?;

        let sql = format!("
            UPDATE blood_requests SET status = $2, closed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'Active'
            RETURNING {}
        ", REQUEST_COLUMNS);
        match client.query_opt(sql.as_str(), &[id, &status.as_str()]).await? {
            Some(row) => Ok(Some(Self::row_to_request(&row)?)),
            None => Ok(None),
        }
    }

    /// Expire active requests whose needed-by date is before `today`
    pub async fn expire_overdue_requests(&self, today: NaiveDate) -> Result<u64, AppError> {
        let client = self.get_client().await?;

        Ok(client.execute("
            UPDATE blood_requests SET status = 'Expired', closed_at = NOW(), updated_at = NOW()
            WHERE status = 'Active' AND needed_by IS NOT NULL AND needed_by < $1
        ", &[&today]).await?)
    }

    // ---- settings ---------------------------------------------------------

    pub async fn get_setting(&self, key: &str) -> Result<Option<SystemSetting>, AppError> {
        let client = self.get_client().await?;

        let row = client.query_opt("
            SELECT key, value, description, updated_by, updated_at FROM system_settings WHERE key = $1
        ", &[&key]).await?;

        Ok(row.as_ref().map(Self::row_to_setting))
    }

    pub async fn list_settings(&self) -> Result<Vec<SystemSetting>, AppError> {
        let client = self.get_client().await?;

        let rows = client.query("
            SELECT key, value, description, updated_by, updated_at FROM system_settings ORDER BY key
        ", &[]).await?;

        Ok(rows.iter().map(Self::row_to_setting).collect())
    }

    pub async fn upsert_setting(&self, key: &str, value: &str, updated_by: &Uuid) -> Result<SystemSetting, AppError> {
        let client = self.get_client().await?;

        let row = client.query_one("
            INSERT INTO system_settings (key, value, updated_by) VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_by = EXCLUDED.updated_by,
                                            updated_at = NOW()
            RETURNING key, value, description, updated_by, updated_at
        ", &[&key, &value, updated_by]).await?;

        Ok(Self::row_to_setting(&row))
    }

    // ---- row mapping ------------------------------------------------------

    fn parse_column<T: FromStr<Err = String>>(row: &tokio_postgres::Row, idx: usize) -> Result<T, AppError> {
        let raw: &str = row.get(idx);
        raw.parse()
            .map_err(|e: String| AppError::internal_server_error(&format!("corrupt column {}: {}", idx, e)))
    }

    /// Helper to convert database row to User
    fn row_to_user(row: &tokio_postgres::Row) -> Result<User, AppError> {
        Ok(User {
            id: row.get(0),
            email: row.get(1),
            full_name: row.get(2),
            phone: row.get(3),
            password_hash: row.get(4),
            role: Self::parse_column(row, 5)?,
            blood_group: Self::parse_column(row, 6)?,
            gender: Self::parse_column(row, 7)?,
            city: row.get(8),
            date_of_birth: row.get(9),
            is_available: row.get(10),
            is_active: row.get(11),
            is_email_verified: row.get(12),
            is_phone_verified: row.get(13),
            is_verified: row.get(14),
            last_donation_date: row.get(15),
            login_attempts: row.get(16),
            locked_until: row.get(17),
            created_at: row.get(18),
            updated_at: row.get(19),
            last_login_at: row.get(20),
        })
    }

    fn row_to_request(row: &tokio_postgres::Row) -> Result<BloodRequest, AppError> {
        Ok(BloodRequest {
            id: row.get(0),
            requester_name: row.get(1),
            requester_phone: row.get(2),
            requester_email: row.get(3),
            patient_name: row.get(4),
            hospital: row.get(5),
            blood_group: Self::parse_column(row, 6)?,
            urgency: Self::parse_column(row, 7)?,
            city: row.get(8),
            units_needed: row.get(9),
            needed_by: row.get(10),
            notes: row.get(11),
            status: Self::parse_column(row, 12)?,
            created_by: row.get(13),
            created_at: row.get(14),
            updated_at: row.get(15),
            closed_at: row.get(16),
        })
    }

    fn row_to_donation(row: &tokio_postgres::Row) -> DonationRecord {
        DonationRecord {
            id: row.get(0),
            donor_id: row.get(1),
            donation_date: row.get(2),
            location: row.get(3),
            units: row.get(4),
            blood_bank: row.get(5),
            is_verified: row.get(6),
            verified_by: row.get(7),
            created_at: row.get(8),
        }
    }

    fn row_to_setting(row: &tokio_postgres::Row) -> SystemSetting {
        SystemSetting {
            key: row.get(0),
            value: row.get(1),
            description: row.get(2),
            updated_by: row.get(3),
            updated_at: row.get(4),
        }
    }
}
