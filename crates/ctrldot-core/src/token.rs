//! Execution and resolution tokens.
//!
//! Tokens are stateless HMAC-SHA256 signed strings in the canonical form
//! `agent_id:action_type:exp:hex(mac)` where the MAC covers
//! `agent_id:action_type:exp` and `exp` is a unix-second integer. The gate
//! mints one on every allow-like outcome; the agent presents it to its own
//! executor, not back to the gate.
//!
//! The signing secret is process-wide. Rotation keeps the wire format
//! intact: the keeper signs with its current secret and accepts either the
//! current or the previous secret during validation, so live tokens survive
//! a rotation.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Fallback secret for local single-user setups. Override in production.
const DEFAULT_SECRET: &str = "default-secret-key-change-in-production";

/// Errors raised while minting tokens.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The expiry time overflowed.
    #[error("token expiry out of range")]
    ExpiryOutOfRange,
}

/// Mints and validates execution tokens with rotation-aware secrets.
#[derive(Clone)]
pub struct TokenKeeper {
    current: Vec<u8>,
    previous: Option<Vec<u8>>,
}

impl TokenKeeper {
    /// A keeper signing with `secret`. Empty secrets fall back to the
    /// built-in default, acceptable only for local single-user use.
    #[must_use]
    pub fn from_secret(secret: &str) -> Self {
        let secret = if secret.is_empty() {
            DEFAULT_SECRET
        } else {
            secret
        };
        Self {
            current: secret.as_bytes().to_vec(),
            previous: None,
        }
    }

    /// A keeper that signs with `current` and additionally accepts tokens
    /// signed with `previous` during validation.
    #[must_use]
    pub fn with_rotation(current: &str, previous: &str) -> Self {
        let mut keeper = Self::from_secret(current);
        if !previous.is_empty() {
            keeper.previous = Some(previous.as_bytes().to_vec());
        }
        keeper
    }

    /// Mints a token for `(agent_id, action_type)` expiring `ttl_seconds`
    /// from now.
    ///
    /// # Errors
    ///
    /// Returns an error if the expiry computation overflows.
    pub fn mint(
        &self,
        agent_id: &str,
        action_type: &str,
        ttl_seconds: i64,
    ) -> Result<String, TokenError> {
        let exp = Utc::now()
            .timestamp()
            .checked_add(ttl_seconds)
            .ok_or(TokenError::ExpiryOutOfRange)?;
        let data = format!("{agent_id}:{action_type}:{exp}");
        let mac = sign(&self.current, data.as_bytes());
        Ok(format!("{data}:{}", hex::encode(mac)))
    }

    /// Validates a token against the claimed `(agent_id, action_type)`.
    ///
    /// The token must split into exactly four parts, name the claimed pair,
    /// be unexpired, and carry a MAC matching the current or previous
    /// secret. MAC comparison is constant-time.
    #[must_use]
    pub fn validate(&self, token: &str, agent_id: &str, action_type: &str) -> bool {
        let parts: Vec<&str> = token.split(':').collect();
        if parts.len() != 4 {
            return false;
        }
        let (token_agent, token_action, exp_str, provided_mac) =
            (parts[0], parts[1], parts[2], parts[3]);

        if token_agent != agent_id || token_action != action_type {
            return false;
        }

        let Ok(exp) = exp_str.parse::<i64>() else {
            return false;
        };
        if Utc::now().timestamp() > exp {
            return false;
        }

        let data = format!("{token_agent}:{token_action}:{exp_str}");
        let secrets = std::iter::once(&self.current).chain(self.previous.as_ref());
        for secret in secrets {
            let expected = hex::encode(sign(secret, data.as_bytes()));
            if bool::from(expected.as_bytes().ct_eq(provided_mac.as_bytes())) {
                return true;
            }
        }
        false
    }
}

fn sign(secret: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret).unwrap_or_else(|_| unreachable!());
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
