//! Outbound donor messages.
//!
//! Delivery goes through the [`Notifier`] trait. The bundled [`LogNotifier`]
//! writes every message to the application log; a mail or SMS gateway plugs in
//! by implementing the same trait.

use serde::Serialize;

use crate::config::NotificationConfig;
use crate::models::{BloodRequest, OtpPurpose};
use crate::tokens::{OTP_TTL_MINUTES, RESET_TOKEN_TTL_MINUTES};
use crate::utils::error::AppError;
use crate::utils::mask_sensitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Channel {
    Email,
    Sms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub channel: Channel,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    /// Body carries a one-time secret and must not reach INFO-level logs
    #[serde(skip)]
    pub contains_secret: bool,
}

pub trait Notifier: Send + Sync {
    fn send(&self, message: &OutboundMessage) -> Result<(), AppError>;
}

/// Writes messages to the log instead of a provider
pub struct LogNotifier {
    config: NotificationConfig,
}

impl LogNotifier {
    pub fn new(config: NotificationConfig) -> Self {
        Self { config }
    }

    fn sender(&self, channel: Channel) -> &str {
        match channel {
            Channel::Email => &self.config.sender_email,
            Channel::Sms => &self.config.sender_sms_id,
        }
    }
}

impl Notifier for LogNotifier {
    fn send(&self, message: &OutboundMessage) -> Result<(), AppError> {
        if message.recipient.trim().is_empty() {
            return Err(AppError::bad_request("Message has no recipient"));
        }

        log::info!(
            "{:?} from {} to {}: {}",
            message.channel,
            self.sender(message.channel),
            mask_sensitive(&message.recipient),
            message.subject
        );
        if message.contains_secret {
            log::debug!("body: {}", message.body);
        } else {
            log::info!("body: {}", message.body);
        }
        Ok(())
    }
}

/// Identifiers containing '@' are email addresses, anything else a phone number
pub fn channel_for(identifier: &str) -> Channel {
    if identifier.contains('@') {
        Channel::Email
    } else {
        Channel::Sms
    }
}

pub fn otp_message(site_name: &str, recipient: &str, purpose: OtpPurpose, code: &str) -> OutboundMessage {
    let action = match purpose {
        OtpPurpose::Login => "sign in",
        OtpPurpose::EmailVerification => "verify your email address",
        OtpPurpose::PhoneVerification => "verify your phone number",
    };

    OutboundMessage {
        channel: channel_for(recipient),
        recipient: recipient.to_string(),
        subject: format!("{} verification code", site_name),
        body: format!(
            "Your code to {} is {}. It expires in {} minutes and can be used once.",
            action, code, OTP_TTL_MINUTES
        ),
        contains_secret: true,
    }
}

pub fn reset_message(site_name: &str, email: &str, link_base: &str, token: &str) -> OutboundMessage {
    let separator = if link_base.contains('?') { '&' } else { '?' };

    OutboundMessage {
        channel: Channel::Email,
        recipient: email.to_string(),
        subject: format!("{} password reset", site_name),
        body: format!(
            "Reset your password at {}{}token={} within {} minutes. If you did not ask for this, ignore this message.",
            link_base, separator, token, RESET_TOKEN_TTL_MINUTES
        ),
        contains_secret: true,
    }
}

/// Alert for a donor matching an active request. Phone wins over email.
pub fn request_alert(site_name: &str, email: &str, phone: Option<&str>, request: &BloodRequest) -> OutboundMessage {
    let (channel, recipient) = match phone {
        Some(p) if !p.trim().is_empty() => (Channel::Sms, p.to_string()),
        _ => (Channel::Email, email.to_string()),
    };

    let needed_by = request
        .needed_by
        .map(|d| format!(" by {}", d.format("%d %b %Y")))
        .unwrap_or_default();

    OutboundMessage {
        channel,
        recipient,
        subject: format!("{} {}: {} needed in {}", site_name, request.urgency.as_str(), request.blood_group, request.city),
        body: format!(
            "{} unit(s) of {} needed at {}, {}{}. Contact {} on {}.",
            request.units_needed,
            request.blood_group,
            request.hospital,
            request.city,
            needed_by,
            request.requester_name,
            request.requester_phone
        ),
        contains_secret: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BloodGroup, RequestStatus, Urgency};
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn request() -> BloodRequest {
        let now = Utc::now();
        BloodRequest {
            id: Uuid::new_v4(),
            requester_name: "Ward 4".to_string(),
            requester_phone: "+911234567890".to_string(),
            requester_email: None,
            patient_name: None,
            hospital: "City Hospital".to_string(),
            blood_group: BloodGroup::BNegative,
            urgency: Urgency::Critical,
            city: "Pune".to_string(),
            units_needed: 2,
            needed_by: NaiveDate::from_ymd_opt(2026, 3, 1),
            notes: None,
            status: RequestStatus::Active,
            created_by: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    #[test]
    fn otp_goes_to_the_identifier_channel() {
        let email = otp_message("Campus Blood Bank", "a@b.edu", OtpPurpose::Login, "123456");
        assert_eq!(email.channel, Channel::Email);
        assert!(email.body.contains("123456"));
        assert!(email.contains_secret);

        let sms = otp_message("Campus Blood Bank", "+919876543210", OtpPurpose::PhoneVerification, "654321");
        assert_eq!(sms.channel, Channel::Sms);
    }

    #[test]
    fn reset_link_appends_token() {
        let msg = reset_message("X", "a@b.edu", "http://localhost/reset", "abc");
        assert!(msg.body.contains("http://localhost/reset?token=abc"));

        let msg = reset_message("X", "a@b.edu", "http://localhost/r?lang=en", "abc");
        assert!(msg.body.contains("lang=en&token=abc"));
    }

    #[test]
    fn alert_prefers_phone() {
        let req = request();
        let alert = request_alert("X", "d@b.edu", Some("+919876543210"), &req);
        assert_eq!(alert.channel, Channel::Sms);
        assert!(alert.subject.contains("B-"));
        assert!(alert.body.contains("01 Mar 2026"));

        let alert = request_alert("X", "d@b.edu", None, &req);
        assert_eq!(alert.channel, Channel::Email);
        assert_eq!(alert.recipient, "d@b.edu");
    }

    #[test]
    fn log_notifier_rejects_blank_recipient() {
        let notifier = LogNotifier::new(NotificationConfig {
            sender_email: "no-reply@x".to_string(),
            sender_sms_id: "X".to_string(),
        });
        let mut msg = otp_message("X", "a@b.edu", OtpPurpose::Login, "000000");
        assert!(notifier.send(&msg).is_ok());
        msg.recipient = " ".to_string();
        assert_eq!(notifier.send(&msg).unwrap_err().status_code, 400);
    }
}
