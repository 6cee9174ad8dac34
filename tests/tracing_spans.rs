//! Verifies that pipeline and storage operations open the expected spans.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use qrcode_api::{
    artifact::FsArtifactStore, audit::FileAuditLog, clock::SystemClock, config::ServiceConfig,
    GenerateRequest, Pipeline,
};
use tempfile::TempDir;
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

fn pipeline(dir: &TempDir) -> Pipeline {
    let config = ServiceConfig::default();
    Pipeline::new(
        config,
        Arc::new(FsArtifactStore::new(dir.path().join("images"))),
        Arc::new(FileAuditLog::new(dir.path().join("qrcreate.log"))),
        Arc::new(SystemClock),
    )
}

#[tokio::test]
async fn generate_creates_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let dir = TempDir::new().expect("tempdir");
    pipeline(&dir)
        .generate(GenerateRequest::new("https://example.com/"), "123".into())
        .await
        .expect("generation should succeed");

    let recorded = spans.lock().expect("lock poisoned");
    for name in ["generate", "store", "append"] {
        assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
    }
}

#[tokio::test]
async fn list_creates_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let dir = TempDir::new().expect("tempdir");
    let _ = pipeline(&dir).list(Some(10)).await;

    let recorded = spans.lock().expect("lock poisoned");
    for name in ["list", "replay"] {
        assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
    }
}
