use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::storage::BlobStore;

/// Blob store key holding the persisted session
pub const SESSION_KEY: &str = "userData";

/// An authenticated identity and the validity window of its token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub email: String,
    pub user_id: String,
    pub token: String,
    pub token_expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Build a record for a token issued at `now` that lives for `lifetime`.
    ///
    /// A negative lifetime counts as zero; an expiry past chrono's range is
    /// pinned to the latest representable instant.
    pub fn issued(
        email: impl Into<String>,
        user_id: impl Into<String>,
        token: impl Into<String>,
        lifetime: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let lifetime = lifetime.max(Duration::zero());
        Self {
            email: email.into(),
            user_id: user_id.into(),
            token: token.into(),
            token_expires_at: ceil_millis(
                now.checked_add_signed(lifetime)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            ),
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty() && self.token_expires_at > now
    }

    /// The bearer token, or None once it has expired
    pub fn valid_token(&self, now: DateTime<Utc>) -> Option<&str> {
        if self.is_valid(now) {
            Some(self.token.as_str())
        } else {
            None
        }
    }

    /// Signed time left on the token; negative once it has lapsed
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.token_expires_at - now
    }
}

/// Round up to the millisecond precision of the persisted timestamp.
fn ceil_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = at.trunc_subsecs(3);
    if truncated < at {
        truncated
            .checked_add_signed(Duration::milliseconds(1))
            .unwrap_or(at)
    } else {
        truncated
    }
}

/// Persisted form of a session. Field names are fixed for compatibility with
/// blobs written by earlier clients.
#[derive(Debug, Serialize, Deserialize)]
struct SessionBlob {
    email: String,
    id: String,
    #[serde(rename = "_token", default)]
    token: Option<String>,
    #[serde(rename = "_tokenExpirationDate")]
    token_expiration_date: String,
}

impl From<&SessionRecord> for SessionBlob {
    fn from(record: &SessionRecord) -> Self {
        Self {
            email: record.email.clone(),
            id: record.user_id.clone(),
            token: Some(record.token.clone()),
            token_expiration_date: record
                .token_expires_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

impl SessionBlob {
    fn into_record(self) -> Result<SessionRecord> {
        let token_expires_at = DateTime::parse_from_rfc3339(&self.token_expiration_date)
            .with_context(|| format!("Invalid expiration date: {}", self.token_expiration_date))?
            .with_timezone(&Utc);

        Ok(SessionRecord {
            email: self.email,
            user_id: self.id,
            token: self.token.unwrap_or_default(),
            token_expires_at,
        })
    }
}

/// Holds the current session and mirrors it to the durable blob store.
///
/// Consumers read the current value through `subscribe()`; only `save`,
/// `restore` and `clear` change it.
pub struct SessionStore {
    blobs: Box<dyn BlobStore>,
    current: watch::Sender<Option<SessionRecord>>,
}

impl SessionStore {
    pub fn new(blobs: impl BlobStore + 'static) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            blobs: Box::new(blobs),
            current,
        }
    }

    /// Persist the record and make it the current session.
    ///
    /// The in-memory value is updated even when the blob write fails.
    pub fn save(&self, record: SessionRecord) -> Result<()> {
        let written = self.write_blob(&record);
        debug!(email = %record.email, expires_at = %record.token_expires_at, "Session saved");
        self.current.send_replace(Some(record));
        written
    }

    /// Make a record loaded from the blob the current session without rewriting it.
    pub fn restore(&self, record: SessionRecord) {
        debug!(email = %record.email, "Session restored");
        self.current.send_replace(Some(record));
    }

    /// Drop the current session and its blob.
    ///
    /// When the blob cannot be removed nothing changes and the error is
    /// returned.
    pub fn clear(&self) -> Result<()> {
        self.blobs
            .remove(SESSION_KEY)
            .context("Failed to remove persisted session")?;
        self.current.send_replace(None);
        debug!("Session cleared");
        Ok(())
    }

    /// Drop the current session, leaving the blob as it is.
    pub fn discard(&self) {
        self.current.send_replace(None);
        debug!("Session discarded");
    }

    /// Read the persisted session. A missing or unreadable blob is no session.
    pub fn load(&self) -> Option<SessionRecord> {
        let contents = match self.blobs.get(SESSION_KEY) {
            Ok(Some(contents)) => contents,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read session blob");
                return None;
            }
        };

        let parsed = serde_json::from_str::<SessionBlob>(&contents)
            .context("Failed to parse session blob")
            .and_then(SessionBlob::into_record);

        match parsed {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Ignoring malformed session blob");
                None
            }
        }
    }

    pub fn current(&self) -> Option<SessionRecord> {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SessionRecord>> {
        self.current.subscribe()
    }

    fn write_blob(&self, record: &SessionRecord) -> Result<()> {
        let contents = serde_json::to_string(&SessionBlob::from(record))?;
        self.blobs.set(SESSION_KEY, &contents)
    }
}
