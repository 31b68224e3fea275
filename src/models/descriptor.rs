use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default time to wait for the per-key lock.
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(15);

/// Default lease on the per-key lock.
pub const DEFAULT_LEASE_TIME: Duration = Duration::from_secs(5);

/// Identifies one logical idempotent operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationKey {
    pub request_id: String,
    pub app_code: String,
}

impl OperationKey {
    pub fn new(request_id: impl Into<String>, app_code: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            app_code: app_code.into(),
        }
    }

    /// Returns true when both halves carry a non-blank value.
    pub fn is_complete(&self) -> bool {
        !self.request_id.trim().is_empty() && !self.app_code.trim().is_empty()
    }

    /// Name used for both the lock and the cache entry.
    pub fn qualified(&self, prefix: Option<&str>) -> String {
        match prefix {
            Some(p) if !p.is_empty() => format!("{}:{}", p, self),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.request_id, self.app_code)
    }
}

/// Describes one call to [`crate::coordinator::Coordinator::execute`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub key: OperationKey,
    pub business_no: Option<String>,
    pub business_type: Option<String>,
    pub request_desc: Option<String>,
    pub business_desc: Option<String>,
    /// JSON rendering of the caller's input, kept for audit.
    pub request_param: Option<String>,
    /// Overrides the coordinator's default lock wait when set.
    pub wait_time: Option<Duration>,
    /// Overrides the coordinator's default lock lease when set.
    pub lease_time: Option<Duration>,
}

impl OperationDescriptor {
    pub fn new(request_id: impl Into<String>, app_code: impl Into<String>) -> Self {
        Self {
            key: OperationKey::new(request_id, app_code),
            business_no: None,
            business_type: None,
            request_desc: None,
            business_desc: None,
            request_param: None,
            wait_time: None,
            lease_time: None,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.key.request_id
    }

    pub fn app_code(&self) -> &str {
        &self.key.app_code
    }

    pub fn with_business_no(mut self, business_no: impl Into<String>) -> Self {
        self.business_no = Some(business_no.into());
        self
    }

    pub fn with_business_type(mut self, business_type: impl Into<String>) -> Self {
        self.business_type = Some(business_type.into());
        self
    }

    pub fn with_request_desc(mut self, request_desc: impl Into<String>) -> Self {
        self.request_desc = Some(request_desc.into());
        self
    }

    pub fn with_business_desc(mut self, business_desc: impl Into<String>) -> Self {
        self.business_desc = Some(business_desc.into());
        self
    }

    /// Records the caller's input as JSON. Inputs that fail to serialize are
    /// logged and left out of the audit trail.
    pub fn with_request_param<P: Serialize>(mut self, param: &P) -> Self {
        match serde_json::to_string(param) {
            Ok(json) => self.request_param = Some(json),
            Err(e) => {
                tracing::warn!(key = %self.key, "Failed to serialize request param: {}", e);
            }
        }
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = Some(wait_time);
        self
    }

    pub fn with_lease_time(mut self, lease_time: Duration) -> Self {
        self.lease_time = Some(lease_time);
        self
    }
}
