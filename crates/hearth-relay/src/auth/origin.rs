//! Origin allow-list for WebSocket upgrades.
//!
//! Only enforced in production. An origin is accepted when it is listed, or
//! when its host matches the request's `Host` header.

use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("origin rejected: {}", origin.as_deref().unwrap_or("<none>"))]
pub struct OriginRejected {
    pub origin: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OriginPolicy {
    enforce: bool,
    allowed: Vec<String>,
}

fn normalize(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// `scheme://host[:port]` → `host[:port]`.
fn origin_authority(origin: &str) -> Option<&str> {
    origin.split_once("://").map(|(_, rest)| rest)
}

impl OriginPolicy {
    pub fn new(enforce: bool, allowed: &[String]) -> Self {
        Self {
            enforce,
            allowed: allowed.iter().map(|o| normalize(o)).collect(),
        }
    }

    /// A policy that accepts everything (development).
    pub const fn permissive() -> Self {
        Self {
            enforce: false,
            allowed: Vec::new(),
        }
    }

    pub const fn is_enforced(&self) -> bool {
        self.enforce
    }

    pub fn check(&self, origin: Option<&str>, host: Option<&str>) -> Result<(), OriginRejected> {
        if !self.enforce {
            return Ok(());
        }
        let Some(raw) = origin else {
            return Err(OriginRejected { origin: None });
        };
        let origin = normalize(raw);

        if self.allowed.iter().any(|a| *a == origin) {
            return Ok(());
        }

        if let (Some(authority), Some(host)) = (origin_authority(&origin), host) {
            if authority == host.trim().to_ascii_lowercase() {
                return Ok(());
            }
        }

        debug!(origin = %raw, "Origin not in allow-list");
        Err(OriginRejected {
            origin: Some(raw.to_string()),
        })
    }
}
