use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

use crate::database::DatabaseService;
use crate::eligibility::{check_eligibility, Eligibility};
use crate::models::{DonationRecord, RecordDonationRequest, UpdateProfileRequest, User};
use crate::utils::error::AppError;
use crate::utils::{non_empty, normalize_phone};

/// Donor self-service and donation history
pub struct DonorService {
    db: Arc<DatabaseService>,
}

impl DonorService {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self { db }
    }

    async fn load(&self, user_id: Uuid) -> Result<User, AppError> {
        let user = self
            .db
            .get_user_by_id(&user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))?;
        if !user.is_active {
            return Err(AppError::forbidden("Account is deactivated"));
        }
        Ok(user)
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<User, AppError> {
        self.load(user_id).await
    }

    pub async fn update_profile(&self, user_id: Uuid, req: UpdateProfileRequest) -> Result<User, AppError> {
        self.load(user_id).await?;
        let full_name = non_empty(req.full_name);
        let phone = non_empty(req.phone).map(|p| normalize_phone(&p));
        let city = non_empty(req.city);

        if let Some(ref phone) = phone {
            if let Some(other) = self.db.get_user_by_phone(phone).await? {
                if other.id != user_id {
                    return Err(AppError::conflict("Phone number is already registered"));
                }
            }
        }

        self.db
            .update_profile(&user_id, full_name.as_deref(), phone.as_deref(), city.as_deref())
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    pub async fn set_availability(&self, user_id: Uuid, is_available: bool) -> Result<User, AppError> {
        self.load(user_id).await?;
        if !self.db.set_availability(&user_id, is_available).await? {
            return Err(AppError::not_found("User not found"));
        }
        self.load(user_id).await
    }

    pub async fn eligibility(&self, user_id: Uuid, today: NaiveDate) -> Result<Eligibility, AppError> {
        let user = self.load(user_id).await?;
        Ok(check_eligibility(user.last_donation_date, user.gender, today))
    }

    /// Record a past donation and move `last_donation_date` forward when newer
    pub async fn record_donation(&self, user_id: Uuid, req: RecordDonationRequest, today: NaiveDate) -> Result<DonationRecord, AppError> {
        let user = self.load(user_id).await?;
        if req.donation_date > today {
            return Err(AppError::bad_request("Donation date cannot be in the future"));
        }
        if req.donation_date < user.date_of_birth {
            return Err(AppError::bad_request("Donation date is before the date of birth"));
        }

        let blood_bank = non_empty(req.blood_bank);
        let record = self
            .db
            .insert_donation(&user.id, req.donation_date, req.location.trim(), req.units, blood_bank.as_deref())
            .await?;
        self.db.bump_last_donation_date(&user.id, req.donation_date).await?;

        log::info!("Donation recorded for {} on {}", user.id, req.donation_date);
        Ok(record)
    }

    pub async fn donations(&self, user_id: Uuid) -> Result<Vec<DonationRecord>, AppError> {
        self.load(user_id).await?;
        self.db.list_donations(&user_id).await
    }
}
