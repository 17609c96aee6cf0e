use std::sync::Arc;
use uuid::Uuid;

use crate::database::DatabaseService;
use crate::models::{ActivityEntry, DonationRecord, User, UserRole};
use crate::utils::error::AppError;
use crate::utils::{PaginatedResponse, PaginationParams};

/// Staff operations on accounts and donation records
pub struct AdminService {
    db: Arc<DatabaseService>,
}

impl AdminService {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self { db }
    }

    pub async fn pending_donors(&self, params: &PaginationParams) -> Result<PaginatedResponse<User>, AppError> {
        let (users, total) = self.db.list_pending_donors(params.limit(), params.offset()).await?;
        Ok(PaginatedResponse::new(users, params, total))
    }

    pub async fn verify_donor(&self, donor_id: Uuid, staff_id: Uuid) -> Result<User, AppError> {
        let user = self
            .db
            .verify_donor(&donor_id, &staff_id)
            .await?
            .ok_or_else(|| AppError::not_found("Active donor not found"))?;

        log::info!("Donor {} verified by {}", donor_id, staff_id);
        Ok(user)
    }

    pub async fn verify_donation(&self, donation_id: Uuid, staff_id: Uuid) -> Result<DonationRecord, AppError> {
        self.db
            .verify_donation(&donation_id, &staff_id)
            .await?
            .ok_or_else(|| AppError::not_found("Donation record not found"))
    }

    pub async fn deactivate_user(&self, user_id: Uuid, staff_id: Uuid) -> Result<(), AppError> {
        if user_id == staff_id {
            return Err(AppError::bad_request("You cannot deactivate your own account"));
        }
        let target = self
            .db
            .get_user_by_id(&user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))?;
        if target.role == UserRole::Admin {
            return Err(AppError::forbidden("Admin accounts cannot be deactivated here"));
        }

        self.db.deactivate_user(&user_id).await?;
        log::info!("User {} deactivated by {}", user_id, staff_id);
        Ok(())
    }

    pub async fn set_role(&self, user_id: Uuid, role: UserRole, admin_id: Uuid) -> Result<User, AppError> {
        if user_id == admin_id && role != UserRole::Admin {
            return Err(AppError::bad_request("You cannot remove your own admin role"));
        }

        let user = self
            .db
            .set_role(&user_id, role)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))?;

        log::info!("User {} is now {} (set by {})", user_id, role.as_str(), admin_id);
        Ok(user)
    }

    pub async fn activity(&self, params: &PaginationParams) -> Result<PaginatedResponse<ActivityEntry>, AppError> {
        let (entries, total) = self.db.list_activity(params.limit(), params.offset()).await?;
        Ok(PaginatedResponse::new(entries, params, total))
    }
}
