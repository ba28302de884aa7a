use crate::types::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// A value cell: a tagged value plus an optional absolute expiry instant.
/// Absence of an expiry ("never") means the key is persistent.
#[derive(Debug, Clone)]
pub struct Cell {
    pub value: Value,
    /// Expiry as milliseconds since UNIX epoch. `None` = no expiry.
    pub expires_at: Option<u64>,
}

impl Cell {
    pub fn new(value: Value) -> Self {
        Cell {
            value,
            expires_at: None,
        }
    }

    pub fn with_expiry(value: Value, expires_at: u64) -> Self {
        Cell {
            value,
            expires_at: Some(expires_at),
        }
    }

    /// A key is live iff it is present and either has no expiry or its
    /// expiry is strictly in the future relative to "now".
    pub fn is_live(&self) -> bool {
        match self.expires_at {
            Some(exp) => now_millis() < exp,
            None => true,
        }
    }

    /// Remaining TTL in whole seconds (floored), or `None` if no expiry.
    /// Caller is expected to have already checked liveness.
    pub fn ttl_seconds(&self) -> Option<i64> {
        self.expires_at
            .map(|exp| (exp.saturating_sub(now_millis()) / 1000) as i64)
    }
}

/// Current time in milliseconds since UNIX epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_millis() as u64
}
