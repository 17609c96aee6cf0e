use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::utils::{validate_password, validate_phone};

/// ABO/Rh blood group
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BloodGroup {
    #[serde(rename = "A+")]
    APositive,
    #[serde(rename = "A-")]
    ANegative,
    #[serde(rename = "B+")]
    BPositive,
    #[serde(rename = "B-")]
    BNegative,
    #[serde(rename = "AB+")]
    AbPositive,
    #[serde(rename = "AB-")]
    AbNegative,
    #[serde(rename = "O+")]
    OPositive,
    #[serde(rename = "O-")]
    ONegative,
}

impl BloodGroup {
    pub const ALL: [BloodGroup; 8] = [
        BloodGroup::APositive,
        BloodGroup::ANegative,
        BloodGroup::BPositive,
        BloodGroup::BNegative,
        BloodGroup::AbPositive,
        BloodGroup::AbNegative,
        BloodGroup::OPositive,
        BloodGroup::ONegative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BloodGroup::APositive => "A+",
            BloodGroup::ANegative => "A-",
            BloodGroup::BPositive => "B+",
            BloodGroup::BNegative => "B-",
            BloodGroup::AbPositive => "AB+",
            BloodGroup::AbNegative => "AB-",
            BloodGroup::OPositive => "O+",
            BloodGroup::ONegative => "O-",
        }
    }

    /// (A antigen, B antigen, RhD positive)
    fn antigens(&self) -> (bool, bool, bool) {
        match self {
            BloodGroup::APositive => (true, false, true),
            BloodGroup::ANegative => (true, false, false),
            BloodGroup::BPositive => (false, true, true),
            BloodGroup::BNegative => (false, true, false),
            BloodGroup::AbPositive => (true, true, true),
            BloodGroup::AbNegative => (true, true, false),
            BloodGroup::OPositive => (false, false, true),
            BloodGroup::ONegative => (false, false, false),
        }
    }

    /// Red-cell compatibility: the recipient must carry every antigen the donor carries
    pub fn can_donate_to(&self, recipient: BloodGroup) -> bool {
        let (da, db, drh) = self.antigens();
        let (ra, rb, rrh) = recipient.antigens();
        (!da || ra) && (!db || rb) && (!drh || rrh)
    }

    /// Donor groups whose blood a patient of this group can receive
    pub fn compatible_donors(&self) -> Vec<BloodGroup> {
        BloodGroup::ALL
            .iter()
            .copied()
            .filter(|donor| donor.can_donate_to(*self))
            .collect()
    }
}

impl fmt::Display for BloodGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BloodGroup {
    type Err = String;

    /// Accepts "A+", "ab-", "O pos", "B_NEG", and "A " (a '+' decoded to a space in a query string)
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trailing_space = raw.ends_with(' ') && !raw.trim().is_empty();
        let mut s: String = raw
            .trim()
            .to_uppercase()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .collect();

        for (word, sign) in [("POSITIVE", "+"), ("NEGATIVE", "-"), ("POS", "+"), ("NEG", "-")] {
            if let Some(stripped) = s.strip_suffix(word) {
                s = format!("{}{}", stripped, sign);
                break;
            }
        }
        if trailing_space && !s.ends_with('+') && !s.ends_with('-') {
            s.push('+');
        }

        BloodGroup::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| format!("Unknown blood group '{}'", raw.trim()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
        }
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            other => Err(format!("Unknown gender '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserRole {
    Donor,
    Admin,
    Moderator,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Donor => "Donor",
            UserRole::Admin => "Admin",
            UserRole::Moderator => "Moderator",
        }
    }

    /// Admins and moderators may verify donors and manage requests
    pub fn is_staff(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Moderator)
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Donor" => Ok(UserRole::Donor),
            "Admin" => Ok(UserRole::Admin),
            "Moderator" => Ok(UserRole::Moderator),
            other => Err(format!("Unknown role '{}'", other)),
        }
    }
}

/// Urgency tier of a blood request; declaration order is display priority
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Urgency {
    Critical,
    Urgent,
    Normal,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Critical => "Critical",
            Urgency::Urgent => "Urgent",
            Urgency::Normal => "Normal",
        }
    }
}

impl FromStr for Urgency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(Urgency::Critical),
            "urgent" => Ok(Urgency::Urgent),
            "normal" => Ok(Urgency::Normal),
            other => Err(format!("Unknown urgency '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RequestStatus {
    Active,
    Fulfilled,
    Cancelled,
    Expired,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Active => "Active",
            RequestStatus::Fulfilled => "Fulfilled",
            RequestStatus::Cancelled => "Cancelled",
            RequestStatus::Expired => "Expired",
        }
    }

    /// Only active requests can be closed; closed requests are final
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        *self == RequestStatus::Active && next != RequestStatus::Active
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(RequestStatus::Active),
            "fulfilled" => Ok(RequestStatus::Fulfilled),
            "cancelled" => Ok(RequestStatus::Cancelled),
            "expired" => Ok(RequestStatus::Expired),
            other => Err(format!("Unknown request status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OtpPurpose {
    Login,
    EmailVerification,
    PhoneVerification,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Login => "Login",
            OtpPurpose::EmailVerification => "EmailVerification",
            OtpPurpose::PhoneVerification => "PhoneVerification",
        }
    }
}

/// Registered account: donors, moderators and admins share one table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub role: UserRole,
    pub blood_group: BloodGroup,
    pub gender: Gender,
    pub city: String,
    pub date_of_birth: NaiveDate,
    pub is_available: bool,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub is_phone_verified: bool,
    pub is_verified: bool,
    pub last_donation_date: Option<NaiveDate>,
    pub login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// User data for responses (without credentials or reset state)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: UserRole,
    pub blood_group: BloodGroup,
    pub gender: Gender,
    pub city: String,
    pub date_of_birth: NaiveDate,
    pub is_available: bool,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub is_phone_verified: bool,
    pub is_verified: bool,
    pub last_donation_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            phone: user.phone.clone(),
            role: user.role,
            blood_group: user.blood_group,
            gender: user.gender,
            city: user.city.clone(),
            date_of_birth: user.date_of_birth,
            is_available: user.is_available,
            is_active: user.is_active,
            is_email_verified: user.is_email_verified,
            is_phone_verified: user.is_phone_verified,
            is_verified: user.is_verified,
            last_donation_date: user.last_donation_date,
            created_at: user.created_at,
            last_login_at: user.last_login_at,
        }
    }
}

/// Donor as shown to staff when matching a request; contact details included
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonorMatch {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub blood_group: BloodGroup,
    pub city: String,
    pub last_donation_date: Option<NaiveDate>,
}

impl From<&User> for DonorMatch {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            full_name: user.full_name.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
            blood_group: user.blood_group,
            city: user.city.clone(),
            last_donation_date: user.last_donation_date,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloodRequest {
    pub id: Uuid,
    pub requester_name: String,
    pub requester_phone: String,
    pub requester_email: Option<String>,
    pub patient_name: Option<String>,
    pub hospital: String,
    pub blood_group: BloodGroup,
    pub urgency: Urgency,
    pub city: String,
    pub units_needed: i32,
    pub needed_by: Option<NaiveDate>,
    pub notes: Option<String>,
    pub status: RequestStatus,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// One donation event in a donor's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonationRecord {
    pub id: Uuid,
    pub donor_id: Uuid,
    pub donation_date: NaiveDate,
    pub location: String,
    pub units: i32,
    pub blood_bank: Option<String>,
    pub is_verified: bool,
    pub verified_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSetting {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub updated_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

/// Login request payload
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Donor registration payload
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"), length(max = 254, message = "Email too long"))]
    pub email: String,

    #[validate(length(min = 2, max = 100, message = "Full name must be 2-100 characters"))]
    pub full_name: String,

    #[validate(custom(function = "validate_phone"))]
    pub phone: Option<String>,

    #[validate(custom(function = "validate_password"))]
    pub password: String,

    pub blood_group: BloodGroup,
    pub gender: Gender,

    #[validate(length(min = 2, max = 100, message = "City must be 2-100 characters"))]
    pub city: String,

    pub date_of_birth: NaiveDate,

    pub last_donation_date: Option<NaiveDate>,
}

/// Authentication response
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Ask for a one-time password sent to an email address or phone number
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct OtpRequest {
    #[validate(length(min = 3, max = 254, message = "Email or phone is required"))]
    pub identifier: String,
    pub purpose: OtpPurpose,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct OtpVerifyRequest {
    #[validate(length(min = 3, max = 254, message = "Email or phone is required"))]
    pub identifier: String,

    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub code: String,
}

/// Verify the signed-in user's email or phone
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ContactVerifyRequest {
    pub purpose: OtpPurpose,

    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub code: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PasswordResetRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 16, max = 128, message = "Reset token is required"))]
    pub token: String,

    #[validate(custom(function = "validate_password"))]
    pub new_password: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 2, max = 100, message = "Full name must be 2-100 characters"))]
    pub full_name: Option<String>,

    #[validate(custom(function = "validate_phone"))]
    pub phone: Option<String>,

    #[validate(length(min = 2, max = 100, message = "City must be 2-100 characters"))]
    pub city: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AvailabilityRequest {
    pub is_available: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RecordDonationRequest {
    pub donation_date: NaiveDate,

    #[validate(length(min = 2, max = 200, message = "Location must be 2-200 characters"))]
    pub location: String,

    #[validate(range(min = 1, max = 2, message = "Units must be 1 or 2"))]
    pub units: i32,

    #[validate(length(max = 200, message = "Blood bank name too long"))]
    pub blood_bank: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateBloodRequest {
    #[validate(length(min = 2, max = 100, message = "Requester name must be 2-100 characters"))]
    pub requester_name: String,

    #[validate(custom(function = "validate_phone"))]
    pub requester_phone: String,

    #[validate(email(message = "Invalid requester email"))]
    pub requester_email: Option<String>,

    #[validate(length(max = 100, message = "Patient name too long"))]
    pub patient_name: Option<String>,

    #[validate(length(min = 2, max = 200, message = "Hospital must be 2-200 characters"))]
    pub hospital: String,

    pub blood_group: BloodGroup,
    pub urgency: Urgency,

    #[validate(length(min = 2, max = 100, message = "City must be 2-100 characters"))]
    pub city: String,

    #[validate(range(min = 1, max = 20, message = "Units needed must be between 1 and 20"))]
    pub units_needed: i32,

    pub needed_by: Option<NaiveDate>,

    #[validate(length(max = 1000, message = "Notes too long"))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateRequestStatus {
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateRoleRequest {
    pub role: UserRole,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct UpdateSettingRequest {
    #[validate(length(max = 2000, message = "Setting value too long"))]
    pub value: String,
}

/// Query string filter for the public request listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestFilter {
    pub blood_group: Option<String>,
    pub city: Option<String>,
    pub urgency: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Outcome of a notify-matching-donors run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSummary {
    pub request_id: Uuid,
    pub matched: usize,
    pub notified: usize,
    pub failed: usize,
}

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> ApiResponse<T> {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
            request_id: Uuid::new_v4().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn o_negative_is_universal_donor() {
        for recipient in BloodGroup::ALL {
            assert!(BloodGroup::ONegative.can_donate_to(recipient));
        }
        assert_eq!(BloodGroup::AbPositive.compatible_donors().len(), 8);
    }

    #[test]
    fn negative_patients_only_receive_negative_blood() {
        let donors = BloodGroup::ANegative.compatible_donors();
        assert_eq!(donors, vec![BloodGroup::ANegative, BloodGroup::ONegative]);
        assert!(!BloodGroup::OPositive.can_donate_to(BloodGroup::ONegative));
        assert!(!BloodGroup::BPositive.can_donate_to(BloodGroup::APositive));
    }

    #[test]
    fn parses_blood_group_spellings() {
        assert_eq!("A+".parse::<BloodGroup>(), Ok(BloodGroup::APositive));
        assert_eq!("ab-".parse::<BloodGroup>(), Ok(BloodGroup::AbNegative));
        assert_eq!("O pos".parse::<BloodGroup>(), Ok(BloodGroup::OPositive));
        assert_eq!("B_NEG".parse::<BloodGroup>(), Ok(BloodGroup::BNegative));
        assert_eq!("AB ".parse::<BloodGroup>(), Ok(BloodGroup::AbPositive));
        assert!("C+".parse::<BloodGroup>().is_err());
        assert!("A".parse::<BloodGroup>().is_err());
    }

    #[test]
    fn blood_group_serializes_with_sign() {
        let json = serde_json::to_string(&BloodGroup::AbNegative).unwrap();
        assert_eq!(json, "\"AB-\"");
        let parsed: BloodGroup = serde_json::from_str("\"O+\"").unwrap();
        assert_eq!(parsed, BloodGroup::OPositive);
    }

    #[test]
    fn closed_requests_cannot_change() {
        assert!(RequestStatus::Active.can_transition_to(RequestStatus::Fulfilled));
        assert!(RequestStatus::Active.can_transition_to(RequestStatus::Expired));
        assert!(!RequestStatus::Active.can_transition_to(RequestStatus::Active));
        assert!(!RequestStatus::Fulfilled.can_transition_to(RequestStatus::Cancelled));
        assert!(!RequestStatus::Expired.can_transition_to(RequestStatus::Active));
    }

    #[test]
    fn urgency_orders_critical_first() {
        let mut tiers = vec![Urgency::Normal, Urgency::Critical, Urgency::Urgent];
        tiers.sort();
        assert_eq!(tiers, vec![Urgency::Critical, Urgency::Urgent, Urgency::Normal]);
    }

    #[test]
    fn register_request_validation() {
        let req = RegisterRequest {
            email: "not-an-email".to_string(),
            full_name: "A".to_string(),
            phone: Some("123".to_string()),
            password: "weak".to_string(),
            blood_group: BloodGroup::OPositive,
            gender: Gender::Male,
            city: "Pune".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            last_donation_date: None,
        };
        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("full_name"));
        assert!(fields.contains_key("phone"));
        assert!(fields.contains_key("password"));
        assert!(!fields.contains_key("city"));
    }
}
