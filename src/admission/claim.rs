use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Authorization context carried by a job request. Fields are optional here
/// because their absence is an authorization failure, not a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimContext {
    pub job_id: Option<String>,
    pub attempt_id: Option<String>,
    /// Unix seconds.
    pub deadline_ts: Option<i64>,
    pub claim_token: Option<String>,
}

/// A request that passed authorization, with every field present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedClaim {
    pub job_id: String,
    pub attempt_id: String,
    pub deadline_ts: i64,
}

/// Verifies claim tokens: `hex(HMAC-SHA256(key, "job_id:attempt_id:deadline_ts"))`.
///
/// A token stays valid for every retry of its attempt until the deadline.
pub struct ClaimAuthorizer {
    key: Zeroizing<Vec<u8>>,
}

impl ClaimAuthorizer {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: Zeroizing::new(key.into()),
        }
    }

    fn mac(&self, job_id: &str, attempt_id: &str, deadline_ts: i64) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(format!("{job_id}:{attempt_id}:{deadline_ts}").as_bytes());
        mac
    }

    /// Mint a token for an attempt. Used by the orchestrator side.
    pub fn issue(&self, job_id: &str, attempt_id: &str, deadline_ts: i64) -> String {
        hex::encode(self.mac(job_id, attempt_id, deadline_ts).finalize().into_bytes())
    }

    /// Check presence, deadline and token. The token comparison is constant-time.
    pub fn authorize(&self, ctx: &ClaimContext, now: i64) -> Result<AuthorizedClaim, AuthError> {
        let job_id = ctx.job_id.as_deref().ok_or(AuthError::MissingField("job_id"))?;
        let attempt_id = ctx
            .attempt_id
            .as_deref()
            .ok_or(AuthError::MissingField("attempt_id"))?;
        let deadline_ts = ctx.deadline_ts.ok_or(AuthError::MissingField("deadline_ts"))?;
        let token = ctx
            .claim_token
            .as_deref()
            .ok_or(AuthError::MissingField("claim_token"))?;

        if now > deadline_ts {
            return Err(AuthError::ExpiredDeadline { deadline_ts, now });
        }

        let provided = hex::decode(token).map_err(|_| AuthError::InvalidToken)?;
        self.mac(job_id, attempt_id, deadline_ts)
            .verify_slice(&provided)
            .map_err(|_| AuthError::InvalidToken)?;

        Ok(AuthorizedClaim {
            job_id: job_id.to_string(),
            attempt_id: attempt_id.to_string(),
            deadline_ts,
        })
    }

    /// Boolean form of [`authorize`](Self::authorize).
    pub fn verify(&self, ctx: &ClaimContext, now: i64) -> bool {
        self.authorize(ctx, now).is_ok()
    }
}
