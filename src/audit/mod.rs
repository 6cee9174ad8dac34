//! Append-only audit trail of QR code generations.
//!
//! Every successful generation appends one [`AuditRecord`]: when it happened,
//! who asked for it, and what was encoded. The log can be replayed from the
//! start to list the history back in append order.
//!
//! # Backends
//!
//! - [`FileAuditLog`]: a single CSV file with the fixed column order
//!   `created_at,caller_id,target`. Appends from concurrent tasks are
//!   serialized behind an async lock so rows never interleave.
//! - [`MemoryAuditLog`]: keeps records in memory, for tests and embedding.
//!
//! The log is never truncated or rotated by this crate; its growth is
//! unbounded and rotation is left to the operator.
//!
//! # Example
//!
//! ```no_run
//! use chrono::Utc;
//! use qrcode_api::audit::{AuditLog, AuditRecord, FileAuditLog};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let log = FileAuditLog::new("qrcreate.log");
//! log.append(&AuditRecord::new(Utc::now(), "123", "https://example.com/")).await?;
//! let records = log.replay(Some(10)).await?;
//! # Ok::<(), qrcode_api::QrApiError>(())
//! # });
//! ```

mod csv;

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    fs,
    io::AsyncWriteExt,
    sync::{Mutex, RwLock},
};

use crate::error::{QrApiError, Result};

/// One generation, as written to the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When the generation was accepted.
    pub created_at: DateTime<Utc>,
    /// Identity of the authenticated caller.
    pub caller_id: String,
    /// The encoded text.
    pub target: String,
}

impl AuditRecord {
    /// Creates a record.
    pub fn new(
        created_at: DateTime<Utc>,
        caller_id: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self { created_at, caller_id: caller_id.into(), target: target.into() }
    }

    /// Serializes the record as one CSV row, newline included.
    ///
    /// Timestamps keep nanosecond precision so a replayed record compares equal
    /// to the appended one.
    pub fn to_row(&self) -> String {
        let created_at = self.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true);
        csv::encode_row(&[&created_at, &self.caller_id, &self.target])
    }

    fn from_row(row: csv::Row) -> Result<Self> {
        let csv::Row { at, mut fields } = row;
        if fields.len() != 3 {
            return Err(malformed(at, format!("expected 3 fields, found {}", fields.len())));
        }
        let target = fields.pop().unwrap_or_default();
        let caller_id = fields.pop().unwrap_or_default();
        let created_at = DateTime::parse_from_rfc3339(&fields[0])
            .map_err(|e| malformed(at, format!("bad created_at: {e}")))?
            .with_timezone(&Utc);
        Ok(Self { created_at, caller_id, target })
    }
}

fn malformed(at: csv::Position, reason: impl Into<String>) -> QrApiError {
    QrApiError::malformed_log(at.row, at.line, reason)
}

fn row_error(err: csv::RowError) -> QrApiError {
    malformed(err.at, err.reason)
}

/// Parses a whole log. Fails on the first malformed row.
pub fn parse_log(text: &str) -> Result<Vec<AuditRecord>> {
    csv::parse_rows(text).map_err(row_error)?.into_iter().map(AuditRecord::from_row).collect()
}

/// Error for a log that stops being valid UTF-8 right after `prefix`.
///
/// Rows completed before the bad bytes are checked first, so the error still
/// names the first malformed row.
fn invalid_utf8(prefix: &str) -> QrApiError {
    let (rows, at) = match csv::parse_prefix(prefix) {
        Ok(parsed) => parsed,
        Err(err) => return row_error(err),
    };
    match rows.into_iter().try_for_each(|row| AuditRecord::from_row(row).map(drop)) {
        Err(err) => err,
        Ok(()) => malformed(at, "invalid UTF-8"),
    }
}

/// Storage for audit records.
///
/// `append` must be safe to call from many tasks at once: records are never
/// lost and never mixed. `replay` returns records in append order, cut to the
/// first `limit` when one is given.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<()>;

    async fn replay(&self, limit: Option<usize>) -> Result<Vec<AuditRecord>>;
}

#[async_trait]
impl<L: AuditLog + ?Sized> AuditLog for std::sync::Arc<L> {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        (**self).append(record).await
    }

    async fn replay(&self, limit: Option<usize>) -> Result<Vec<AuditRecord>> {
        (**self).replay(limit).await
    }
}

/// CSV file backed audit log.
///
/// Appends take the write side of an in-process lock and replays take the
/// read side, so a replay never observes a half-written row. The lock does not
/// extend to other processes: one log file must have a single owning process.
#[derive(Debug)]
pub struct FileAuditLog {
    path: PathBuf,
    sync: bool,
    lock: RwLock<()>,
}

impl FileAuditLog {
    /// Creates a log at `path`. The file and its parent directories are
    /// created on the first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), sync: false, lock: RwLock::new(()) }
    }

    /// Calls `fsync` after every append.
    #[must_use]
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_row(&self, row: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut file =
            fs::OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(row.as_bytes()).await?;
        file.flush().await?;
        if self.sync {
            file.sync_data().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AuditLog for FileAuditLog {
    #[tracing::instrument(skip(self, record), fields(caller_id = %record.caller_id))]
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let row = record.to_row();
        let _guard = self.lock.write().await;
        self.write_row(&row).await.map_err(|e| QrApiError::io(&self.path, e))?;
        tracing::info!(
            audit.created_at = %record.created_at.to_rfc3339(),
            audit.caller_id = %record.caller_id,
            audit.target = %record.target,
            "audit record appended"
        );
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn replay(&self, limit: Option<usize>) -> Result<Vec<AuditRecord>> {
        let bytes = {
            let _guard = self.lock.read().await;
            match fs::read(&self.path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::debug!(path = %self.path.display(), "audit log absent, nothing to replay");
                    return Ok(Vec::new());
                }
                Err(e) => return Err(QrApiError::io(&self.path, e)),
            }
        };

        let text = String::from_utf8(bytes).map_err(|e| {
            let valid = &e.as_bytes()[..e.utf8_error().valid_up_to()];
            invalid_utf8(std::str::from_utf8(valid).unwrap_or_default())
        })?;

        let mut records = parse_log(&text)?;
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        tracing::debug!(count = records.len(), "audit log replayed");
        Ok(records)
    }
}

/// In-memory audit log.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn replay(&self, limit: Option<usize>) -> Result<Vec<AuditRecord>> {
        let records = self.records.lock().await;
        let take = limit.unwrap_or(records.len());
        Ok(records.iter().take(take).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;

    fn record(n: u32, target: &str) -> AuditRecord {
        let at = Utc.with_ymd_and_hms(2024, 5, 10, 15, 4, n).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        AuditRecord::new(at, format!("client-{n}"), target)
    }

    fn log_in(dir: &TempDir) -> FileAuditLog {
        FileAuditLog::new(dir.path().join("qrcreate.log"))
    }

    #[test]
    fn row_layout_is_timestamp_caller_target() {
        let row = record(5, "https://example.com/").to_row();
        assert_eq!(row, "2024-05-10T15:04:05.123456789Z,client-5,https://example.com/\n");
    }

    #[test]
    fn parse_log_checks_field_count() {
        let err = parse_log("2024-05-10T15:04:05Z,a,b\n2024-05-10T15:04:05Z,a\n").unwrap_err();
        assert!(matches!(err, QrApiError::MalformedLog { row: 2, .. }), "{err}");
    }

    #[test]
    fn parse_log_checks_timestamp() {
        let err = parse_log("yesterday,a,b\n").unwrap_err();
        assert!(matches!(err, QrApiError::MalformedLog { row: 1, .. }), "{err}");
    }

    #[test]
    fn malformed_row_is_counted_by_rows_not_lines() {
        let mut text = String::new();
        text.push_str(&record(1, "multi\nline\ntarget").to_row());
        text.push_str(&record(2, "multi\nline\ntarget").to_row());
        text.push_str("broken,row\n");
        let err = parse_log(&text).unwrap_err();
        assert!(matches!(err, QrApiError::MalformedLog { row: 3, line: 7, .. }), "{err}");
        assert_eq!(err.to_string(), "malformed audit log at row 3 (line 7): expected 3 fields, found 2");
    }

    #[tokio::test]
    async fn missing_file_replays_empty() {
        let dir = TempDir::new().unwrap();
        assert!(log_in(&dir).replay(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_file_replays_empty() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        std::fs::write(log.path(), "").unwrap();
        assert!(log.replay(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let log = FileAuditLog::new(dir.path().join("var/log/qrcreate.log")).with_sync(true);
        log.append(&record(1, "a")).await.unwrap();
        assert_eq!(log.replay(None).await.unwrap(), vec![record(1, "a")]);
    }

    #[tokio::test]
    async fn replay_preserves_order_and_fields() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        let appended: Vec<AuditRecord> = (0..20)
            .map(|n| record(n, &format!("https://example.com/{n}?q=\"a,b\"\nnext")))
            .collect();
        for r in &appended {
            log.append(r).await.unwrap();
        }
        assert_eq!(log.replay(None).await.unwrap(), appended);
    }

    #[tokio::test]
    async fn replay_honours_limit() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        for n in 0..5 {
            log.append(&record(n, "t")).await.unwrap();
        }
        let firsts = log.replay(Some(2)).await.unwrap();
        assert_eq!(firsts, vec![record(0, "t"), record(1, "t")]);
        assert_eq!(log.replay(Some(50)).await.unwrap().len(), 5);
        assert!(log.replay(Some(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_row_fails_whole_replay() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        log.append(&record(1, "ok")).await.unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .and_then(|mut f| std::io::Write::write_all(&mut f, b"torn,row\n"))
            .unwrap();
        log.append(&record(2, "ok")).await.unwrap();

        // Even a limit that stops before the bad row does not hide it.
        let err = log.replay(Some(1)).await.unwrap_err();
        assert!(matches!(err, QrApiError::MalformedLog { row: 2, .. }), "{err}");
    }

    #[tokio::test]
    async fn invalid_utf8_is_malformed() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        std::fs::write(log.path(), b"2024-05-10T15:04:05Z,a,b\n\xff\xfe,c,d\n").unwrap();
        let err = log.replay(None).await.unwrap_err();
        assert!(matches!(err, QrApiError::MalformedLog { row: 2, line: 2, .. }), "{err}");

        let mut bytes = record(1, "two\nlines").to_row().into_bytes();
        bytes.extend_from_slice(b"2024-05-10T15:04:05Z,a,b\xff\n");
        std::fs::write(log.path(), bytes).unwrap();
        let err = log.replay(None).await.unwrap_err();
        assert!(matches!(err, QrApiError::MalformedLog { row: 2, line: 3, .. }), "{err}");
    }

    #[tokio::test]
    async fn memory_log_replays_in_order() {
        let log = MemoryAuditLog::new();
        log.append(&record(1, "a")).await.unwrap();
        log.append(&record(2, "b")).await.unwrap();
        assert_eq!(log.replay(Some(1)).await.unwrap(), vec![record(1, "a")]);
        assert_eq!(log.replay(None).await.unwrap().len(), 2);
    }
}
