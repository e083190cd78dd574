use std::fmt;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

const TOKEN_LEN: usize = 12;
const SECRET_TAIL: usize = 8;

/// Opaque token naming this process as a lease holder. Fixed for the
/// lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceIdentity {
    token: String,
    host: String,
    pid: u32,
    started_at: DateTime<Utc>,
}

impl InstanceIdentity {
    /// Identity of the running process. Only the tail of `secret` enters the hash.
    pub fn current(secret: &str) -> Self {
        Self::from_parts(hostname(), std::process::id(), Utc::now(), secret)
    }

    pub fn from_parts(
        host: impl Into<String>,
        pid: u32,
        started_at: DateTime<Utc>,
        secret: &str,
    ) -> Self {
        let host = host.into();
        let tail_start = secret
            .char_indices()
            .rev()
            .nth(SECRET_TAIL - 1)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let fragment = &secret[tail_start..];

        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}_{}_{}_{}",
            host,
            pid,
            started_at.timestamp_nanos_opt().unwrap_or_default(),
            fragment
        ));
        let mut token = hex::encode(hasher.finalize());
        token.truncate(TOKEN_LEN);

        Self {
            token,
            host,
            pid,
            started_at,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

impl fmt::Display for InstanceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn same_parts_same_token() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let a = InstanceIdentity::from_parts("box", 42, at, "123456:secret-token");
        let b = InstanceIdentity::from_parts("box", 42, at, "other:secret-token");
        assert_eq!(a.token(), b.token());
        assert_eq!(a.token().len(), TOKEN_LEN);
    }

    #[test]
    fn pid_changes_token() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let a = InstanceIdentity::from_parts("box", 42, at, "s");
        let b = InstanceIdentity::from_parts("box", 43, at, "s");
        assert_ne!(a, b);
    }
}
