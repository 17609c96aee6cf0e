//! Donor eligibility rules.
//!
//! All calculations take the reference date explicitly so callers decide what
//! "today" means (server clock in handlers, fixed dates in tests).

use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;

use crate::models::{BloodRequest, Gender, User};
use crate::utils::normalize_city;

pub const MIN_DONOR_AGE: u32 = 18;
pub const MAX_DONOR_AGE: u32 = 65;

/// Minimum gap between donations, in calendar months
pub fn donation_interval_months(gender: Gender) -> u32 {
    match gender {
        Gender::Male => 3,
        Gender::Female => 4,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Eligibility {
    pub eligible: bool,
    /// `None` for first-time donors
    pub next_eligible_date: Option<NaiveDate>,
    pub days_remaining: i64,
}

/// First date a donor may give blood again.
///
/// Month arithmetic is calendar based and clamps to the end of shorter months,
/// so a donation on 30 November makes the donor eligible on the last day of February.
pub fn next_eligible_date(last_donation: NaiveDate, gender: Gender) -> NaiveDate {
    last_donation
        .checked_add_months(Months::new(donation_interval_months(gender)))
        .unwrap_or(NaiveDate::MAX)
}

pub fn check_eligibility(
    last_donation: Option<NaiveDate>,
    gender: Gender,
    today: NaiveDate,
) -> Eligibility {
    match last_donation {
        None => Eligibility {
            eligible: true,
            next_eligible_date: None,
            days_remaining: 0,
        },
        Some(last) => {
            let next = next_eligible_date(last, gender);
            let days_remaining = (next - today).num_days().max(0);
            Eligibility {
                eligible: today >= next,
                next_eligible_date: Some(next),
                days_remaining,
            }
        }
    }
}

/// Completed years between `date_of_birth` and `today`
pub fn age_on(date_of_birth: NaiveDate, today: NaiveDate) -> Option<u32> {
    if date_of_birth > today {
        return None;
    }
    let mut years = today.year() - date_of_birth.year();
    if (today.month(), today.day()) < (date_of_birth.month(), date_of_birth.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgeError {
    BirthDateInFuture,
    TooYoung(u32),
    TooOld(u32),
}

impl std::fmt::Display for AgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgeError::BirthDateInFuture => write!(f, "Date of birth cannot be in the future"),
            AgeError::TooYoung(age) => write!(
                f,
                "Donors must be at least {} years old (age {})",
                MIN_DONOR_AGE, age
            ),
            AgeError::TooOld(age) => write!(
                f,
                "Donors must be at most {} years old (age {})",
                MAX_DONOR_AGE, age
            ),
        }
    }
}

/// Registration accepts donors aged 18 through 65 inclusive
pub fn check_registration_age(date_of_birth: NaiveDate, today: NaiveDate) -> Result<u32, AgeError> {
    let age = age_on(date_of_birth, today).ok_or(AgeError::BirthDateInFuture)?;
    if age < MIN_DONOR_AGE {
        Err(AgeError::TooYoung(age))
    } else if age > MAX_DONOR_AGE {
        Err(AgeError::TooOld(age))
    } else {
        Ok(age)
    }
}

/// Whether `donor` should be contacted for `request` on `today`
pub fn is_match(donor: &User, request: &BloodRequest, today: NaiveDate) -> bool {
    donor.is_active
        && donor.is_verified
        && donor.is_available
        && donor.blood_group.can_donate_to(request.blood_group)
        && normalize_city(&donor.city) == normalize_city(&request.city)
        && check_eligibility(donor.last_donation_date, donor.gender, today).eligible
}
