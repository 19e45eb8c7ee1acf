use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const OTP_DIGITS: u32 = 1_000_000;

#[derive(Debug, Clone)]
pub struct IssuedOtp {
    pub code: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Derives short numeric codes from (student, session, instant) with a
/// keyed hash. Reproducible for auditing, unguessable without the secret.
#[derive(Clone)]
pub struct OtpIssuer {
    secret: String,
    ttl: Duration,
}

impl OtpIssuer {
    pub fn new(secret: String, ttl_seconds: i64) -> Self {
        Self {
            secret,
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    pub fn derive_code(
        &self,
        student_id: Uuid,
        session_id: Uuid,
        issued_at: DateTime<Utc>,
    ) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(
            format!("{}|{}|{}", student_id, session_id, issued_at.timestamp()).as_bytes(),
        );
        let digest = mac.finalize().into_bytes();
        let n = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) % OTP_DIGITS;
        format!("{:06}", n)
    }

    /// Issuance never fails on its own; upstream checks (session window,
    /// device ledger, proximity) gate whether it is reached at all.
    pub fn issue(&self, student_id: Uuid, session_id: Uuid, now: DateTime<Utc>) -> IssuedOtp {
        IssuedOtp {
            code: self.derive_code(student_id, session_id, now),
            issued_at: now,
            expires_at: now + self.ttl,
        }
    }
}

/// Constant-time comparison of a submitted code against the stored one.
pub fn codes_match(submitted: &str, stored: &str) -> bool {
    submitted.as_bytes().ct_eq(stored.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> OtpIssuer {
        OtpIssuer::new("test-otp-secret".to_string(), 90)
    }

    #[test]
    fn code_is_six_decimal_digits() {
        let code = issuer().derive_code(Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn derivation_is_reproducible() {
        let (s, x, t) = (Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        assert_eq!(issuer().derive_code(s, x, t), issuer().derive_code(s, x, t));
    }

    #[test]
    fn different_instants_give_different_codes() {
        let (s, x, t) = (Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        let a = issuer().derive_code(s, x, t);
        let b = issuer().derive_code(s, x, t + Duration::seconds(1));
        assert_ne!(a, b);
    }

    #[test]
    fn different_students_give_different_codes() {
        let (x, t) = (Uuid::new_v4(), Utc::now());
        let a = issuer().derive_code(Uuid::new_v4(), x, t);
        let b = issuer().derive_code(Uuid::new_v4(), x, t);
        assert_ne!(a, b);
    }

    #[test]
    fn expiry_is_ttl_from_issuance() {
        let now = Utc::now();
        let otp = issuer().issue(Uuid::new_v4(), Uuid::new_v4(), now);
        assert_eq!(otp.issued_at, now);
        assert_eq!(otp.expires_at, now + Duration::seconds(90));
    }

    #[test]
    fn comparison_handles_mismatched_lengths() {
        assert!(codes_match("123456", "123456"));
        assert!(!codes_match("123456", "654321"));
        assert!(!codes_match("12345", "123456"));
        assert!(!codes_match("", "123456"));
    }
}
