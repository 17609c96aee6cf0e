//! One-time secrets: login/verification OTPs and password-reset tokens.
//!
//! A secret is ISSUED with an absolute expiry and ends either CONSUMED (first
//! successful use) or EXPIRED. Only the SHA-256 digest is ever stored.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

pub const OTP_DIGITS: usize = 6;
pub const OTP_TTL_MINUTES: i64 = 10;
pub const RESET_TOKEN_BYTES: usize = 32;
pub const RESET_TOKEN_TTL_MINUTES: i64 = 60;

// Largest multiple of 10^6 that fits in a u32; values at or above it are redrawn
const OTP_SAMPLE_CEILING: u32 = 4_294_000_000;

pub fn otp_ttl() -> Duration {
    Duration::minutes(OTP_TTL_MINUTES)
}

pub fn reset_token_ttl() -> Duration {
    Duration::minutes(RESET_TOKEN_TTL_MINUTES)
}

/// Uniformly distributed six-digit code from the OS RNG
pub fn generate_otp_code() -> Result<String, getrandom::Error> {
    loop {
        let mut buf = [0u8; 4];
        getrandom::getrandom(&mut buf)?;
        let sample = u32::from_be_bytes(buf);
        if sample < OTP_SAMPLE_CEILING {
            return Ok(format!("{:0width$}", sample % 1_000_000, width = OTP_DIGITS));
        }
    }
}

/// 32 random bytes, hex encoded
pub fn generate_reset_token() -> Result<String, getrandom::Error> {
    let mut buf = [0u8; RESET_TOKEN_BYTES];
    getrandom::getrandom(&mut buf)?;
    Ok(buf.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Hash a secret for storage (using SHA-256)
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Issued,
    Consumed,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Invalid,
    AlreadyUsed,
    Expired,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Invalid => write!(f, "Invalid code"),
            TokenError::AlreadyUsed => write!(f, "Code has already been used"),
            TokenError::Expired => write!(f, "Code has expired"),
        }
    }
}

impl std::error::Error for TokenError {}

/// In-memory view of a stored secret; the database applies the same transition
/// in a single conditional UPDATE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub secret_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl IssuedToken {
    pub fn issue(secret: &str, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            secret_hash: hash_secret(secret),
            expires_at: now + ttl,
            used: false,
        }
    }

    /// A secret is expired from its expiry instant onwards
    pub fn state_at(&self, now: DateTime<Utc>) -> TokenState {
        if self.used {
            TokenState::Consumed
        } else if now >= self.expires_at {
            TokenState::Expired
        } else {
            TokenState::Issued
        }
    }

    pub fn consume(&mut self, presented: &str, now: DateTime<Utc>) -> Result<(), TokenError> {
        if hash_secret(presented) != self.secret_hash {
            return Err(TokenError::Invalid);
        }
        match self.state_at(now) {
            TokenState::Consumed => Err(TokenError::AlreadyUsed),
            TokenState::Expired => Err(TokenError::Expired),
            TokenState::Issued => {
                self.used = true;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_codes_are_six_digits() {
        for _ in 0..200 {
            let code = generate_otp_code().unwrap();
            assert_eq!(code.len(), OTP_DIGITS);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn reset_tokens_are_unique_hex() {
        let a = generate_reset_token().unwrap();
        let b = generate_reset_token().unwrap();
        assert_eq!(a.len(), RESET_TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_stable_and_ignores_surrounding_whitespace() {
        assert_eq!(hash_secret("123456"), hash_secret(" 123456\n"));
        assert_ne!(hash_secret("123456"), hash_secret("123457"));
        assert_eq!(hash_secret("abc").len(), 64);
    }

    #[test]
    fn otp_consumed_once() {
        let now = Utc::now();
        let mut otp = IssuedToken::issue("482913", now, otp_ttl());
        assert_eq!(otp.state_at(now), TokenState::Issued);
        assert_eq!(otp.consume("482913", now), Ok(()));
        assert_eq!(otp.state_at(now), TokenState::Consumed);
        assert_eq!(otp.consume("482913", now), Err(TokenError::AlreadyUsed));
    }

    #[test]
    fn wrong_code_leaves_token_usable() {
        let now = Utc::now();
        let mut otp = IssuedToken::issue("482913", now, otp_ttl());
        assert_eq!(otp.consume("000000", now), Err(TokenError::Invalid));
        assert_eq!(otp.consume("482913", now), Ok(()));
    }

    #[test]
    fn expiry_is_absolute() {
        let issued = Utc::now();
        let mut token = IssuedToken::issue("reset", issued, reset_token_ttl());
        let just_before = issued + reset_token_ttl() - Duration::seconds(1);
        assert_eq!(token.state_at(just_before), TokenState::Issued);

        let at_expiry = issued + reset_token_ttl();
        assert_eq!(token.state_at(at_expiry), TokenState::Expired);
        assert_eq!(token.consume("reset", at_expiry), Err(TokenError::Expired));
        assert!(!token.used);
    }
}
