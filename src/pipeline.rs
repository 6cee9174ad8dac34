//! Generation-and-audit pipeline.
//!
//! [`Pipeline::generate`] runs, in order: validation, QR encoding, PNG
//! rasterization, artifact storage and the audit append, then hands back the
//! PNG. The caller identity is passed in explicitly by whoever authenticated
//! the request; the timestamp comes from the pipeline's [`Clock`].
//!
//! The work after validation runs in its own tokio task. If the caller goes
//! away, or the request deadline expires, the task still finishes storing the
//! artifact and appending the audit record, so the trail matches what was
//! generated. Nothing is rolled back on timeout.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::Instrument;

use crate::{
    artifact::{ArtifactStore, FsArtifactStore},
    audit::{AuditLog, AuditRecord, FileAuditLog},
    clock::{Clock, SystemClock},
    config::{PersistencePolicy, ServiceConfig},
    error::{QrApiError, Result},
    qrcode::{QrCode, QrCodeEcc},
    render::{self, RasterImage},
};

/// Correction level used for every generated code.
pub const ERROR_CORRECTION: QrCodeEcc = QrCodeEcc::High;

/// Identity of the authenticated caller, trusted as given.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerId(String);

impl CallerId {
    /// Wraps an identity supplied by the authentication layer.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity as written to the audit log.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Body of a generation request. `url` is accepted as an alias of `target`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GenerateRequest {
    /// Text to encode. Absent and empty are both rejected.
    #[serde(default, alias = "url")]
    pub target: Option<String>,
}

impl GenerateRequest {
    /// A request for `target`.
    pub fn new(target: impl Into<String>) -> Self {
        Self { target: Some(target.into()) }
    }
}

/// A validated request with its server-assigned fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationRequest {
    /// Non-empty text to encode.
    pub target: String,
    /// Who asked.
    pub caller_id: CallerId,
    /// When the request was accepted.
    pub created_at: DateTime<Utc>,
}

/// Rejects an empty target. Any other text is accepted verbatim.
pub fn validate(target: &str) -> Result<()> {
    if target.is_empty() {
        return Err(QrApiError::missing_field("target"));
    }
    Ok(())
}

/// Encodes `target` at [`ERROR_CORRECTION`].
pub fn encode(target: &str) -> Result<QrCode> {
    QrCode::encode_text(target, ERROR_CORRECTION)
        .map_err(|e| QrApiError::encoding(format!("target does not fit in a QR code: {e}")))
}

/// Orchestrates generation, persistence and listing.
///
/// Cheap to clone; clones share the same stores.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServiceConfig,
    store: Arc<dyn ArtifactStore>,
    log: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("config", &self.inner.config).finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Assembles a pipeline from its collaborators. `config` is used as given.
    pub fn new(
        config: ServiceConfig,
        store: Arc<dyn ArtifactStore>,
        log: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { inner: Arc::new(Inner { config, store, log, clock }) }
    }

    /// Builds a pipeline over the file-backed stores named in `config`.
    pub fn from_config(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let store = FsArtifactStore::new(&config.artifact_dir);
        let log = FileAuditLog::new(&config.audit_log_path).with_sync(config.sync_audit_log);
        Ok(Self::new(config, Arc::new(store), Arc::new(log), Arc::new(SystemClock)))
    }

    /// The configuration this pipeline runs with.
    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// Generates the QR code for `request` on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// - `MissingField` for an empty or absent target, before any side effect.
    /// - `EncodingFailure` when the target exceeds the symbol capacity.
    /// - `IoFailure` when persistence fails under [`PersistencePolicy::Required`].
    /// - `Timeout` when the deadline passes; persistence still completes.
    #[tracing::instrument(skip_all, fields(caller_id = %caller))]
    pub async fn generate(&self, request: GenerateRequest, caller: CallerId) -> Result<RasterImage> {
        let target = request.target.unwrap_or_default();
        validate(&target)?;
        tracing::info!(target = %target, "generation requested");

        let creation = CreationRequest { target, caller_id: caller, created_at: self.inner.clock.now() };
        let inner = Arc::clone(&self.inner);
        let task =
            tokio::spawn(async move { inner.run(creation).await }.instrument(tracing::Span::current()));

        let deadline = self.inner.config.request_timeout();
        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                tracing::error!(error = %join_error, "generation task failed");
                Err(QrApiError::internal(format!("generation task failed: {join_error}")))
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.inner.config.request_timeout_ms,
                    "deadline exceeded, persistence continues in the background"
                );
                Err(QrApiError::Timeout { timeout_ms: self.inner.config.request_timeout_ms })
            }
        }
    }

    /// Replays the audit trail in append order, cut to the first `limit` records.
    #[tracing::instrument(skip(self))]
    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<AuditRecord>> {
        let timeout_ms = self.inner.config.request_timeout_ms;
        tokio::time::timeout(self.inner.config.request_timeout(), self.inner.log.replay(limit))
            .await
            .map_err(|_| QrApiError::Timeout { timeout_ms })?
    }

    /// Renders the configured demo target without storing or auditing anything.
    pub fn render_demo(&self) -> Result<RasterImage> {
        let symbol = encode(&self.inner.config.demo_target)?;
        render::rasterize(&symbol, self.inner.config.render_options())
    }
}

impl Inner {
    async fn run(&self, request: CreationRequest) -> Result<RasterImage> {
        let symbol = encode(&request.target)?;
        let image = render::rasterize(&symbol, self.config.render_options())?;
        tracing::debug!(
            version = symbol.version().value(),
            bytes = image.len(),
            "qr code rendered"
        );

        if let Err(err) = self.store.store(&request.target, image.as_bytes()).await {
            self.persistence_failed("artifact", err)?;
        }

        let record =
            AuditRecord::new(request.created_at, request.caller_id.as_str(), request.target);
        if let Err(err) = self.log.append(&record).await {
            self.persistence_failed("audit record", err)?;
        }

        Ok(image)
    }

    fn persistence_failed(&self, what: &str, err: QrApiError) -> Result<()> {
        match self.config.persistence {
            PersistencePolicy::Required => {
                tracing::error!(error = %err, "failed to persist {what}");
                Err(err)
            }
            PersistencePolicy::BestEffort => {
                tracing::warn!(error = %err, "failed to persist {what}, continuing");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::{artifact::MemoryArtifactStore, audit::MemoryAuditLog, clock::FixedClock};

    #[derive(Default)]
    struct CountingStore {
        calls: AtomicUsize,
        fail: bool,
        delay: Option<Duration>,
        inner: MemoryArtifactStore,
    }

    #[async_trait]
    impl ArtifactStore for CountingStore {
        async fn store(&self, target: &str, image: &[u8]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(QrApiError::io("images", io::Error::other("disk full")));
            }
            self.inner.store(target, image).await
        }
    }

    #[derive(Default)]
    struct CountingLog {
        appends: AtomicUsize,
        fail: bool,
        inner: MemoryAuditLog,
    }

    #[async_trait]
    impl AuditLog for CountingLog {
        async fn append(&self, record: &AuditRecord) -> Result<()> {
            self.appends.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(QrApiError::io("qrcreate.log", io::Error::other("read-only")));
            }
            self.inner.append(record).await
        }

        async fn replay(&self, limit: Option<usize>) -> Result<Vec<AuditRecord>> {
            self.inner.replay(limit).await
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 6, 0, 0).unwrap()
    }

    fn pipeline(
        config: ServiceConfig,
        store: &Arc<CountingStore>,
        log: &Arc<CountingLog>,
    ) -> Pipeline {
        Pipeline::new(config, store.clone(), log.clone(), Arc::new(FixedClock(now())))
    }

    #[tokio::test]
    async fn generate_stores_and_audits() {
        let store = Arc::new(CountingStore::default());
        let log = Arc::new(CountingLog::default());
        let p = pipeline(ServiceConfig::default(), &store, &log);

        let image =
            p.generate(GenerateRequest::new("https://example.com/"), "123".into()).await.unwrap();

        assert_eq!(image.dimensions(), (200, 200));
        assert_eq!(store.inner.get("https://example.com/").await.as_deref(), Some(image.as_bytes()));
        let records = p.list(None).await.unwrap();
        assert_eq!(records, vec![AuditRecord::new(now(), "123", "https://example.com/")]);
    }

    #[tokio::test]
    async fn missing_target_has_no_side_effects() {
        let store = Arc::new(CountingStore::default());
        let log = Arc::new(CountingLog::default());
        let p = pipeline(ServiceConfig::default(), &store, &log);

        for request in [GenerateRequest::default(), GenerateRequest::new("")] {
            let err = p.generate(request, "123".into()).await.unwrap_err();
            assert!(matches!(err, QrApiError::MissingField { field: "target" }), "{err}");
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert_eq!(log.appends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_target_is_a_client_error() {
        let store = Arc::new(CountingStore::default());
        let log = Arc::new(CountingLog::default());
        let p = pipeline(ServiceConfig::default(), &store, &log);

        let err = p.generate(GenerateRequest::new("x".repeat(1274)), "123".into()).await.unwrap_err();
        assert!(matches!(err, QrApiError::EncodingFailure { .. }), "{err}");
        assert_eq!(err.status_code(), 422);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert_eq!(log.appends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn required_persistence_fails_the_request() {
        let store = Arc::new(CountingStore { fail: true, ..Default::default() });
        let log = Arc::new(CountingLog::default());
        let p = pipeline(ServiceConfig::default(), &store, &log);

        let err = p.generate(GenerateRequest::new("t"), "123".into()).await.unwrap_err();
        assert!(matches!(err, QrApiError::IoFailure { .. }), "{err}");
        assert_eq!(log.appends.load(Ordering::SeqCst), 0, "failed generation must not be audited");
    }

    #[tokio::test]
    async fn best_effort_persistence_still_returns_image() {
        let store = Arc::new(CountingStore { fail: true, ..Default::default() });
        let log = Arc::new(CountingLog { fail: true, ..Default::default() });
        let config =
            ServiceConfig { persistence: PersistencePolicy::BestEffort, ..Default::default() };
        let p = pipeline(config, &store, &log);

        let image = p.generate(GenerateRequest::new("t"), "123".into()).await.unwrap();
        assert!(!image.is_empty());
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert_eq!(log.appends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_leaves_persistence_running() {
        let store =
            Arc::new(CountingStore { delay: Some(Duration::from_millis(300)), ..Default::default() });
        let log = Arc::new(CountingLog::default());
        let config = ServiceConfig { request_timeout_ms: 50, ..Default::default() };
        let p = pipeline(config, &store, &log);

        let err = p.generate(GenerateRequest::new("slow"), "123".into()).await.unwrap_err();
        assert!(matches!(err, QrApiError::Timeout { timeout_ms: 50 }), "{err}");
        assert_eq!(err.status_code(), 503);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.inner.len().await, 1);
        assert_eq!(log.appends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_caller_does_not_cancel_persistence() {
        let store =
            Arc::new(CountingStore { delay: Some(Duration::from_millis(100)), ..Default::default() });
        let log = Arc::new(CountingLog::default());
        let p = pipeline(ServiceConfig::default(), &store, &log);

        let request = p.generate(GenerateRequest::new("gone"), "123".into());
        // The caller disconnects while the artifact write is in flight.
        assert!(tokio::time::timeout(Duration::from_millis(20), request).await.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(log.inner.replay(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn demo_render_has_no_side_effects() {
        let store = Arc::new(CountingStore::default());
        let log = Arc::new(CountingLog::default());
        let p = pipeline(ServiceConfig::default(), &store, &log);

        let image = p.render_demo().unwrap();
        assert_eq!(image.dimensions(), (200, 200));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert_eq!(log.appends.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn request_accepts_url_alias() {
        let req: GenerateRequest = serde_json::from_str(r#"{"url":"https://example.com/"}"#).unwrap();
        assert_eq!(req, GenerateRequest::new("https://example.com/"));
        let req: GenerateRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.target, None);
    }

    #[test]
    fn whitespace_target_is_valid() {
        assert!(validate(" ").is_ok());
        assert!(validate("").is_err());
    }
}
