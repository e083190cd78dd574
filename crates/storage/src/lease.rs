use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::db::open_lease_pool;
use crate::identity::InstanceIdentity;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("lease storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// The shared leadership record as last written by its holder.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseRecord {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub host: String,
    pub pid: i64,
}

impl LeaseRecord {
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Diagnostic view of the lease. Never used to decide leadership.
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseStatus {
    Unheld,
    Held { record: LeaseRecord, is_stale: bool },
    /// The record could not be read or decoded; treat as "don't know", not as free.
    Unknown(String),
}

impl LeaseStatus {
    pub fn holder(&self) -> Option<&str> {
        match self {
            Self::Held { record, .. } => Some(&record.holder),
            _ => None,
        }
    }

    pub fn record(&self) -> Option<&LeaseRecord> {
        match self {
            Self::Held { record, .. } => Some(record),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    /// The record was empty and is now ours.
    Claimed,
    /// We already held it; the expiry was pushed out.
    AlreadyHeld,
    /// The previous holder's lease had expired and was overwritten.
    Reclaimed { previous: String },
    /// A valid lease belongs to someone else.
    Contended { holder: Option<LeaseRecord> },
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        !matches!(self, Self::Contended { .. })
    }
}

/// Backoff plan for the startup acquisition loop.
#[derive(Debug, Clone)]
pub struct AcquireRetry {
    pub attempts: u32,
    pub base_backoff: Duration,
    pub backoff_step: Duration,
}

impl AcquireRetry {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff + self.backoff_step * attempt
    }
}

impl Default for AcquireRetry {
    fn default() -> Self {
        Self {
            attempts: 15,
            base_backoff: Duration::from_secs(2),
            backoff_step: Duration::from_millis(500),
        }
    }
}

const SELECT_LEASE: &str =
    "SELECT holder_id, acquired_at, expires_at, host, pid FROM leader_lease WHERE id = 1";

// Claim when empty, when ours, or when the current holder has expired. All
// SET expressions see the pre-update row.
const CLAIM_LEASE: &str = r#"
    INSERT INTO leader_lease (id, holder_id, acquired_at, expires_at, host, pid)
    VALUES (1, ?1, ?2, ?3, ?4, ?5)
    ON CONFLICT(id) DO UPDATE SET
        acquired_at = CASE WHEN leader_lease.holder_id = excluded.holder_id
                           THEN leader_lease.acquired_at
                           ELSE excluded.acquired_at END,
        holder_id = excluded.holder_id,
        expires_at = excluded.expires_at,
        host = excluded.host,
        pid = excluded.pid
    WHERE leader_lease.holder_id = excluded.holder_id
       OR leader_lease.expires_at < excluded.acquired_at
"#;

/// Cross-process leadership lease kept in one SQLite row.
pub struct LeaseManager {
    pool: SqlitePool,
    identity: InstanceIdentity,
}

impl LeaseManager {
    pub async fn open(path: &Path, identity: InstanceIdentity) -> Result<Self, LeaseError> {
        let pool = open_lease_pool(path).await?;
        info!("Lease manager ready: instance={} store={}", identity, path.display());
        Ok(Self { pool, identity })
    }

    pub fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }

    pub async fn try_acquire(&self, lease: Duration) -> Result<AcquireOutcome, LeaseError> {
        let now = Utc::now();
        let expires_at = now + lease_span(lease);

        // Only used to label the outcome; the claim below decides.
        let before = self.fetch_record().await.ok().flatten();

        let claimed = sqlx::query(CLAIM_LEASE)
            .bind(self.identity.token())
            .bind(now.timestamp_millis())
            .bind(expires_at.timestamp_millis())
            .bind(self.identity.host())
            .bind(i64::from(self.identity.pid()))
            .execute(&self.pool)
            .await?
            .rows_affected()
            == 1;

        if !claimed {
            let holder = self.fetch_record().await.ok().flatten();
            debug!(
                "Lease contended: holder={:?}",
                holder.as_ref().map(|r| r.holder.as_str())
            );
            return Ok(AcquireOutcome::Contended { holder });
        }

        let outcome = match before {
            None => AcquireOutcome::Claimed,
            Some(prev) if prev.holder == self.identity.token() => AcquireOutcome::AlreadyHeld,
            Some(prev) => AcquireOutcome::Reclaimed {
                previous: prev.holder,
            },
        };

        match &outcome {
            AcquireOutcome::Claimed => info!("Acquired lease: instance={}", self.identity),
            AcquireOutcome::Reclaimed { previous } => warn!(
                "Reclaimed stale lease from {}: instance={}",
                previous, self.identity
            ),
            _ => debug!("Lease already held by this instance"),
        }
        Ok(outcome)
    }

    pub async fn acquire(&self, lease: Duration) -> Result<bool, LeaseError> {
        Ok(self.try_acquire(lease).await?.is_acquired())
    }

    /// Attempts acquisition up to `retry.attempts` times, logging the current
    /// holder between attempts. Storage errors count as failed attempts.
    pub async fn acquire_with_retry(&self, lease: Duration, retry: &AcquireRetry) -> bool {
        for attempt in 0..retry.attempts {
            match self.try_acquire(lease).await {
                Ok(outcome) if outcome.is_acquired() => return true,
                Ok(_) => match self.status().await {
                    LeaseStatus::Held { record, .. } => info!(
                        "Lease held by {} on {} (pid {}) until {}",
                        record.holder, record.host, record.pid, record.expires_at
                    ),
                    other => info!("Waiting for lease, status: {:?}", other),
                },
                Err(e) => warn!("Lease attempt {} failed: {}", attempt + 1, e),
            }

            if attempt + 1 < retry.attempts {
                sleep(retry.backoff(attempt)).await;
            }
        }
        false
    }

    /// Pushes the expiry out. Returns `false` (and writes nothing) when this
    /// instance is not the recorded holder.
    pub async fn renew(&self, lease: Duration) -> Result<bool, LeaseError> {
        let expires_at = Utc::now() + lease_span(lease);
        let renewed = sqlx::query(
            "UPDATE leader_lease SET expires_at = ?1 WHERE id = 1 AND holder_id = ?2",
        )
        .bind(expires_at.timestamp_millis())
        .bind(self.identity.token())
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        if renewed {
            debug!("Lease renewed until {}", expires_at);
        }
        Ok(renewed)
    }

    /// Clears the record if this instance holds it.
    pub async fn release(&self) -> Result<bool, LeaseError> {
        let released = sqlx::query("DELETE FROM leader_lease WHERE id = 1 AND holder_id = ?1")
            .bind(self.identity.token())
            .execute(&self.pool)
            .await?
            .rows_affected()
            == 1;

        if released {
            info!("Released lease: instance={}", self.identity);
        }
        Ok(released)
    }

    pub async fn status(&self) -> LeaseStatus {
        match self.fetch_record().await {
            Ok(None) => LeaseStatus::Unheld,
            Ok(Some(record)) => {
                let is_stale = record.is_stale(Utc::now());
                LeaseStatus::Held { record, is_stale }
            }
            Err(reason) => LeaseStatus::Unknown(reason),
        }
    }

    /// True only while this instance holds an unexpired lease.
    pub async fn is_leader(&self) -> bool {
        let result = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM leader_lease WHERE id = 1 AND holder_id = ?1 AND expires_at >= ?2",
        )
        .bind(self.identity.token())
        .bind(Utc::now().timestamp_millis())
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(count) => count == 1,
            Err(e) => {
                warn!("Leadership check failed: {}", e);
                false
            }
        }
    }

    async fn fetch_record(&self) -> Result<Option<LeaseRecord>, String> {
        let row = sqlx::query(SELECT_LEASE)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| e.to_string())?;

        row.as_ref().map(decode_record).transpose()
    }
}

/// Lease manager whose store is opened on first use. A failed open is not
/// cached, so callers can keep retrying while the store is unreachable.
pub struct LeaseConnector {
    path: PathBuf,
    identity: InstanceIdentity,
    manager: OnceCell<LeaseManager>,
}

impl LeaseConnector {
    pub fn new(path: impl Into<PathBuf>, identity: InstanceIdentity) -> Self {
        Self {
            path: path.into(),
            identity,
            manager: OnceCell::new(),
        }
    }

    pub fn identity(&self) -> &InstanceIdentity {
        &self.identity
    }

    /// The open manager, connecting first if needed.
    pub async fn manager(&self) -> Result<&LeaseManager, LeaseError> {
        self.manager
            .get_or_try_init(|| LeaseManager::open(&self.path, self.identity.clone()))
            .await
    }

    /// The manager if a previous call managed to open the store.
    pub fn connected(&self) -> Option<&LeaseManager> {
        self.manager.get()
    }
}

fn decode_record(row: &SqliteRow) -> Result<LeaseRecord, String> {
    let millis = |column: &str| -> Result<DateTime<Utc>, String> {
        let raw: i64 = row.try_get(column).map_err(|e| e.to_string())?;
        Utc.timestamp_millis_opt(raw)
            .single()
            .ok_or_else(|| format!("{} out of range: {}", column, raw))
    };

    Ok(LeaseRecord {
        holder: row.try_get("holder_id").map_err(|e| e.to_string())?,
        acquired_at: millis("acquired_at")?,
        expires_at: millis("expires_at")?,
        host: row.try_get("host").map_err(|e| e.to_string())?,
        pid: row.try_get("pid").map_err(|e| e.to_string())?,
    })
}

fn lease_span(lease: Duration) -> chrono::Duration {
    chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(365))
}
