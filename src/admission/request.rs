use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::claim::ClaimContext;
use crate::error::RequestError;

/// Current request envelope version.
pub const REQUEST_VERSION: u64 = 1;

/// One job as submitted to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub attempt_id: Option<String>,
    /// Older callers identify an attempt by request uid.
    #[serde(default)]
    pub req_uid: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub claim_token: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub deadline_ts: Option<i64>,
}

impl JobSpec {
    /// Decode a `/run` body: either `{"v":1,"job":{..}}` or the legacy flattened
    /// job object.
    pub fn from_request(body: Value) -> Result<Self, RequestError> {
        let Value::Object(mut map) = body else {
            return Err(RequestError::Malformed("body must be a JSON object".into()));
        };

        let job = match map.remove("v") {
            Some(v) => {
                let version = v
                    .as_u64()
                    .ok_or_else(|| RequestError::Malformed("v must be an integer".into()))?;
                if version != REQUEST_VERSION {
                    return Err(RequestError::UnsupportedVersion(version));
                }
                map.remove("job")
                    .ok_or_else(|| RequestError::Malformed("missing job".into()))?
            }
            None => Value::Object(map),
        };

        serde_json::from_value(job).map_err(|e| RequestError::Malformed(e.to_string()))
    }

    /// Effective attempt id: `attempt_id`, else `req_uid`, else `job_id`.
    pub fn effective_attempt_id(&self) -> Option<&str> {
        self.attempt_id
            .as_deref()
            .or(self.req_uid.as_deref())
            .or(self.job_id.as_deref())
    }

    pub fn claim_context(&self) -> ClaimContext {
        ClaimContext {
            job_id: self.job_id.clone(),
            attempt_id: self.effective_attempt_id().map(str::to_string),
            deadline_ts: self.deadline_ts,
            claim_token: self.claim_token.clone(),
        }
    }

    /// Requested timeout, defaulted and clamped to `[1s, max]`.
    pub fn timeout(&self, default: Duration, max: Duration) -> Duration {
        self.timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(default)
            .clamp(Duration::from_secs(1), max.max(Duration::from_secs(1)))
    }
}
