//! Invite code model

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::InviteError;

/// 32 symbols; `I`, `O`, `0` and `1` are left out so codes survive being
/// read aloud or copied by hand.
pub const INVITE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of symbols in an invite code.
pub const INVITE_CODE_LEN: usize = 6;

/// Default lifetime of a new invite (7 days).
pub const DEFAULT_INVITE_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Default number of redemptions allowed per code.
pub const DEFAULT_INVITE_MAX_USES: u32 = 5;

/// A shareable code granting membership on a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invite {
    pub code: String,
    pub record_id: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_uses: u32,
    #[serde(default)]
    pub uses: u32,
}

impl Invite {
    /// Create a fresh invite with a random code.
    pub fn generate(
        record_id: impl Into<String>,
        created_by: impl Into<String>,
        ttl: Duration,
        max_uses: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            code: generate_code(&mut rand::thread_rng()),
            record_id: record_id.into(),
            created_by: created_by.into(),
            created_at: now,
            expires_at: now + ttl,
            max_uses,
            uses: 0,
        }
    }

    pub fn remaining_uses(&self) -> u32 {
        self.max_uses.saturating_sub(self.uses)
    }

    /// Expiry is checked before remaining uses.
    pub fn check_redeemable(&self, now: DateTime<Utc>) -> Result<(), InviteError> {
        if now >= self.expires_at {
            return Err(InviteError::Expired);
        }
        if self.remaining_uses() == 0 {
            return Err(InviteError::Exhausted);
        }
        Ok(())
    }
}

/// Generate a code of [`INVITE_CODE_LEN`] symbols from [`INVITE_ALPHABET`].
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..INVITE_CODE_LEN)
        .map(|_| char::from(INVITE_ALPHABET[rng.gen_range(0..INVITE_ALPHABET.len())]))
        .collect()
}

/// Trim and uppercase user input, then validate length and alphabet.
pub fn normalize_code(input: &str) -> Result<String, InviteError> {
    let code = input.trim().to_ascii_uppercase();
    let valid = code.len() == INVITE_CODE_LEN
        && code.bytes().all(|symbol| INVITE_ALPHABET.contains(&symbol));
    if valid {
        Ok(code)
    } else {
        Err(InviteError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_excludes_ambiguous_symbols() {
        for symbol in [b'I', b'O', b'0', b'1'] {
            assert!(!INVITE_ALPHABET.contains(&symbol));
        }
        let mut sorted = INVITE_ALPHABET.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 32);
    }

    #[test]
    fn generated_codes_validate() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let code = generate_code(&mut rng);
            assert_eq!(code.len(), INVITE_CODE_LEN);
            assert_eq!(normalize_code(&code).unwrap(), code);
        }
    }

    #[test]
    fn normalize_code_is_case_insensitive_and_trims() {
        assert_eq!(normalize_code("  abc234 \n").unwrap(), "ABC234");
    }

    #[test]
    fn normalize_code_rejects_bad_input() {
        assert_eq!(normalize_code("ABC23"), Err(InviteError::Malformed));
        assert_eq!(normalize_code("ABC2345"), Err(InviteError::Malformed));
        assert_eq!(normalize_code("ABCI23"), Err(InviteError::Malformed));
        assert_eq!(normalize_code("ABC-23"), Err(InviteError::Malformed));
    }

    #[test]
    fn check_redeemable_reports_expiry_before_exhaustion() {
        let mut invite = Invite::generate("p1", "u1", Duration::days(7), 1);
        let now = Utc::now();
        assert!(invite.check_redeemable(now).is_ok());

        invite.uses = 1;
        assert_eq!(invite.check_redeemable(now), Err(InviteError::Exhausted));

        let later = invite.expires_at + Duration::seconds(1);
        assert_eq!(invite.check_redeemable(later), Err(InviteError::Expired));
    }
}
