use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

use crate::database::{DatabaseService, NewBloodRequest};
use crate::eligibility::is_match;
use crate::models::{
    BloodGroup, BloodRequest, CreateBloodRequest, DonorMatch, NotificationSummary, RequestFilter,
    RequestStatus, Urgency, User,
};
use crate::notify::{request_alert, Notifier};
use crate::services::settings::{
    SettingsService, DEFAULT_MAX_NOTIFIED_DONORS, MAX_NOTIFIED_DONORS, NOTIFICATIONS_ENABLED,
};
use crate::utils::error::AppError;
use crate::utils::{non_empty, normalize_city, normalize_phone, PaginatedResponse, PaginationParams};

pub const MATCH_LIST_LIMIT: i64 = 200;

/// Parsed form of the public listing query string
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingFilter {
    pub blood_group: Option<BloodGroup>,
    pub city_key: Option<String>,
    pub urgency: Option<Urgency>,
}

impl ListingFilter {
    pub fn parse(filter: &RequestFilter) -> Result<Self, AppError> {
        let blood_group = match filter.blood_group.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => Some(raw.parse::<BloodGroup>().map_err(|e| AppError::bad_request(&e))?),
            None => None,
        };
        let urgency = match filter.urgency.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(raw.parse::<Urgency>().map_err(|e| AppError::bad_request(&e))?),
            None => None,
        };
        let city_key = non_empty(filter.city.clone()).map(|c| normalize_city(&c));

        Ok(Self {
            blood_group,
            city_key,
            urgency,
        })
    }
}

/// Blood requests and donor matching
pub struct RequestService {
    db: Arc<DatabaseService>,
    settings: Arc<SettingsService>,
    notifier: Arc<dyn Notifier>,
}

impl RequestService {
    pub fn new(db: Arc<DatabaseService>, settings: Arc<SettingsService>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            db,
            settings,
            notifier,
        }
    }

    pub async fn create(&self, req: CreateBloodRequest, created_by: Uuid, today: NaiveDate) -> Result<BloodRequest, AppError> {
        if let Some(needed_by) = req.needed_by {
            if needed_by < today {
                return Err(AppError::bad_request("Needed-by date cannot be in the past"));
            }
        }

        let requester_phone = normalize_phone(&req.requester_phone);
        let requester_email = non_empty(req.requester_email);
        let patient_name = non_empty(req.patient_name);
        let notes = non_empty(req.notes);

        let request = self
            .db
            .create_request(&NewBloodRequest {
                requester_name: req.requester_name.trim(),
                requester_phone: &requester_phone,
                requester_email: requester_email.as_deref(),
                patient_name: patient_name.as_deref(),
                hospital: req.hospital.trim(),
                blood_group: req.blood_group,
                urgency: req.urgency,
                city: req.city.trim(),
                units_needed: req.units_needed,
                needed_by: req.needed_by,
                notes: notes.as_deref(),
                created_by,
            })
            .await?;

        log::info!(
            "Blood request {} created: {} {} in {}",
            request.id,
            request.urgency.as_str(),
            request.blood_group,
            request.city
        );
        Ok(request)
    }

    pub async fn get(&self, id: Uuid) -> Result<BloodRequest, AppError> {
        self.db
            .get_request(&id)
            .await?
            .ok_or_else(|| AppError::not_found("Blood request not found"))
    }

    /// Active requests, Critical first, newest first within an urgency tier
    pub async fn list_active(&self, filter: &RequestFilter) -> Result<PaginatedResponse<BloodRequest>, AppError> {
        let parsed = ListingFilter::parse(filter)?;
        let params = PaginationParams {
            page: filter.page,
            limit: filter.limit,
        };

        let (requests, total) = self
            .db
            .list_active_requests(
                parsed.blood_group,
                parsed.city_key.as_deref(),
                parsed.urgency,
                params.limit(),
                params.offset(),
            )
            .await?;

        Ok(PaginatedResponse::new(requests, &params, total))
    }

    pub async fn update_status(&self, id: Uuid, status: RequestStatus) -> Result<BloodRequest, AppError> {
        let current = self.get(id).await?;
        if !current.status.can_transition_to(status) {
            return Err(AppError::conflict(&format!(
                "Cannot change a {} request to {}",
                current.status.as_str(),
                status.as_str()
            )));
        }

        // Another writer may have closed it since the read
        self.db
            .close_request(&id, status)
            .await?
            .ok_or_else(|| AppError::conflict("Request is no longer active"))
    }

    async fn matching_users(&self, request: &BloodRequest, today: NaiveDate, limit: i64) -> Result<Vec<User>, AppError> {
        let candidates = self
            .db
            .find_candidate_donors(
                &request.blood_group.compatible_donors(),
                &normalize_city(&request.city),
                today,
                limit,
            )
            .await?;

        Ok(candidates
            .into_iter()
            .filter(|donor| is_match(donor, request, today))
            .collect())
    }

    pub async fn matches(&self, id: Uuid, today: NaiveDate) -> Result<Vec<DonorMatch>, AppError> {
        let request = self.get(id).await?;
        if request.status != RequestStatus::Active {
            return Ok(Vec::new());
        }

        let donors = self.matching_users(&request, today, MATCH_LIST_LIMIT).await?;
        Ok(donors.iter().map(DonorMatch::from).collect())
    }

    /// Alert matching donors of an active request, at most `max_notified_donors` of them
    pub async fn notify_matches(&self, id: Uuid, today: NaiveDate) -> Result<NotificationSummary, AppError> {
        let request = self.get(id).await?;
        if request.status != RequestStatus::Active {
            return Err(AppError::conflict("Only active requests can be announced"));
        }
        if !self.settings.get_bool(NOTIFICATIONS_ENABLED, true).await {
            return Err(AppError::conflict("Notifications are disabled"));
        }

        let cap = self
            .settings
            .get_u32(MAX_NOTIFIED_DONORS, DEFAULT_MAX_NOTIFIED_DONORS)
            .await;
        let donors = self.matching_users(&request, today, i64::from(cap)).await?;
        let site_name = self.settings.site_name().await;

        let mut summary = NotificationSummary {
            request_id: request.id,
            matched: donors.len(),
            notified: 0,
            failed: 0,
        };
        for donor in &donors {
            let message = request_alert(&site_name, &donor.email, donor.phone.as_deref(), &request);
            match self.notifier.send(&message) {
                Ok(()) => summary.notified += 1,
                Err(e) => {
                    summary.failed += 1;
                    log::warn!("Alert to donor {} failed: {}", donor.id, e);
                }
            }
        }

        log::info!(
            "Request {}: notified {} of {} matching donors",
            request.id,
            summary.notified,
            summary.matched
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_filter_parses_loose_input() {
        let filter = RequestFilter {
            blood_group: Some("ab ".to_string()),
            city: Some("  New   Delhi ".to_string()),
            urgency: Some("Critical".to_string()),
            page: None,
            limit: None,
        };
        let parsed = ListingFilter::parse(&filter).unwrap();
        assert_eq!(parsed.blood_group, Some(BloodGroup::AbPositive));
        assert_eq!(parsed.city_key.as_deref(), Some("new delhi"));
        assert_eq!(parsed.urgency, Some(Urgency::Critical));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let parsed = ListingFilter::parse(&RequestFilter::default()).unwrap();
        assert_eq!(parsed, ListingFilter::default());
    }

    #[test]
    fn bad_filter_values_are_rejected() {
        let filter = RequestFilter {
            blood_group: Some("C+".to_string()),
            ..RequestFilter::default()
        };
        assert_eq!(ListingFilter::parse(&filter).unwrap_err().status_code, 400);

        let filter = RequestFilter {
            urgency: Some("whenever".to_string()),
            ..RequestFilter::default()
        };
        assert!(ListingFilter::parse(&filter).is_err());
    }
}
