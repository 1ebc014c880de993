//! Signed URL access modes and lifetimes.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Capability granted by a signed URL.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Read,
    Write,
}

impl Access {
    pub fn as_str(&self) -> &'static str {
        match self {
            Access::Read => "read",
            Access::Write => "write",
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifetime of the URLs bound into a work item.
pub const JOB_BINDING_URL_TTL: Duration = Duration::from_secs(30 * 60);

/// Lifetime of the URL used for a one-shot download.
pub const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(15 * 60);

/// Longest lifetime a signed URL may be requested for (7 days).
pub const MAX_SIGNED_URL_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub fn validate_ttl(ttl: Duration) -> Result<(), String> {
    if ttl > MAX_SIGNED_URL_TTL {
        Err(format!(
            "ttl {:?} exceeds maximum allowed {:?}",
            ttl, MAX_SIGNED_URL_TTL
        ))
    } else if ttl.is_zero() {
        Err("ttl must be greater than zero".to_string())
    } else {
        Ok(())
    }
}

/// Remote stores take the lifetime in whole minutes; partial minutes round up.
pub(crate) fn ttl_minutes(ttl: Duration) -> u64 {
    ttl.as_secs().div_ceil(60).max(1)
}
