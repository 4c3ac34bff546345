//! Capture adapter: wraps a speech-to-text engine.
//!
//! Every `start` opens a capture with a fresh id; all events the engine emits
//! during that capture carry the id so consumers can tell late events from a
//! previous capture apart from current ones.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{EventHub, MediaError};

/// What happened during a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEventKind {
    Started,
    Ended,
    Error(String),
    /// Final candidate transcriptions, best first.
    Results(Vec<String>),
    /// Interim candidate transcriptions, best first.
    PartialResults(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEvent {
    pub capture: u64,
    pub kind: CaptureEventKind,
}

impl CaptureEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            CaptureEventKind::Ended | CaptureEventKind::Error(_) | CaptureEventKind::Results(_)
        )
    }
}

/// Handle an engine uses to report events for one capture.
#[derive(Clone)]
pub struct CaptureEmitter {
    capture: u64,
    hub: Arc<EventHub<CaptureEvent>>,
}

impl CaptureEmitter {
    pub fn capture_id(&self) -> u64 {
        self.capture
    }

    pub fn emit(&self, kind: CaptureEventKind) {
        let delivered = self.hub.publish(CaptureEvent {
            capture: self.capture,
            kind,
        });
        if delivered == 0 {
            debug!(capture = self.capture, "Capture event had no subscribers");
        }
    }
}

/// A speech-to-text engine.
#[async_trait]
pub trait CaptureEngine: Send + Sync {
    /// Engine identifier (e.g., "console", "groq").
    fn id(&self) -> &str;

    /// Whether the platform can capture speech at all.
    fn is_supported(&self) -> bool {
        true
    }

    /// Begin capturing. Events for this capture go through `emitter`.
    async fn start(&self, locale: &str, emitter: CaptureEmitter) -> anyhow::Result<()>;

    /// Stop capturing. Final results may still be emitted afterwards.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Release all engine resources.
    async fn destroy(&self) -> anyhow::Result<()>;
}

pub struct CaptureAdapter {
    engine: Arc<dyn CaptureEngine>,
    hub: Arc<EventHub<CaptureEvent>>,
    next_capture: AtomicU64,
    active: Mutex<Option<u64>>,
    destroyed: AtomicBool,
}

impl CaptureAdapter {
    pub fn new(engine: Arc<dyn CaptureEngine>) -> Self {
        Self {
            engine,
            hub: Arc::new(EventHub::new()),
            next_capture: AtomicU64::new(1),
            active: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn engine_id(&self) -> &str {
        self.engine.id()
    }

    pub fn is_supported(&self) -> bool {
        self.engine.is_supported()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CaptureEvent> {
        self.hub.subscribe()
    }

    /// Id of the capture started most recently and not yet stopped.
    pub fn active_capture(&self) -> Option<u64> {
        *self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a capture and return its id.
    ///
    /// Returns `Ok(None)` without emitting anything when the engine is
    /// unsupported. An engine that fails to start reports it as an
    /// [`CaptureEventKind::Error`] event for the returned id.
    pub async fn start(&self, locale: &str) -> Result<Option<u64>, MediaError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(MediaError::Destroyed);
        }
        if !self.engine.is_supported() {
            warn!(engine = self.engine.id(), "Speech capture is not supported on this platform");
            return Ok(None);
        }

        let capture = self.next_capture.fetch_add(1, Ordering::SeqCst);
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(capture);

        let emitter = CaptureEmitter {
            capture,
            hub: Arc::clone(&self.hub),
        };
        info!(capture, locale, engine = self.engine.id(), "Starting capture");
        if let Err(e) = self.engine.start(locale, emitter.clone()).await {
            warn!(capture, %e, "Capture engine failed to start");
            emitter.emit(CaptureEventKind::Error(e.to_string()));
        }
        Ok(Some(capture))
    }

    pub async fn stop(&self) -> Result<(), MediaError> {
        let capture = self.active.lock().unwrap_or_else(|e| e.into_inner()).take();
        debug!(?capture, "Stopping capture");
        self.engine.stop().await?;
        Ok(())
    }

    /// Release engine resources. Only the first call reaches the engine.
    pub async fn destroy(&self) -> Result<(), MediaError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.active.lock().unwrap_or_else(|e| e.into_inner()).take();
        info!(engine = self.engine.id(), "Destroying capture engine");
        self.engine.destroy().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct FakeEngine {
        supported: bool,
        fail_start: bool,
        destroyed: AtomicUsize,
        last: Mutex<Option<CaptureEmitter>>,
    }

    #[async_trait]
    impl CaptureEngine for FakeEngine {
        fn id(&self) -> &str {
            "fake"
        }

        fn is_supported(&self) -> bool {
            self.supported
        }

        async fn start(&self, _locale: &str, emitter: CaptureEmitter) -> anyhow::Result<()> {
            if self.fail_start {
                anyhow::bail!("microphone busy");
            }
            emitter.emit(CaptureEventKind::Started);
            *self.last.lock().unwrap() = Some(emitter);
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            if let Some(emitter) = self.last.lock().unwrap().take() {
                emitter.emit(CaptureEventKind::Results(vec!["hello".into()]));
            }
            Ok(())
        }

        async fn destroy(&self) -> anyhow::Result<()> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unsupported_start_is_silent_noop() {
        let adapter = CaptureAdapter::new(Arc::new(FakeEngine::default()));
        let mut rx = adapter.subscribe();

        assert_eq!(adapter.start("en-US").await.unwrap(), None);
        assert!(rx.try_recv().is_err());
        assert!(adapter.active_capture().is_none());
    }

    #[tokio::test]
    async fn test_events_are_tagged_with_capture_id() {
        let adapter = CaptureAdapter::new(Arc::new(FakeEngine {
            supported: true,
            ..Default::default()
        }));
        let mut rx = adapter.subscribe();

        let first = adapter.start("en-US").await.unwrap().unwrap();
        adapter.stop().await.unwrap();
        let second = adapter.start("en-US").await.unwrap().unwrap();
        assert!(second > first);

        assert_eq!(
            rx.recv().await.unwrap(),
            CaptureEvent { capture: first, kind: CaptureEventKind::Started }
        );
        let results = rx.recv().await.unwrap();
        assert_eq!(results.capture, first);
        assert!(results.is_terminal());
        assert_eq!(rx.recv().await.unwrap().capture, second);
    }

    #[tokio::test]
    async fn test_start_failure_becomes_error_event() {
        let adapter = CaptureAdapter::new(Arc::new(FakeEngine {
            supported: true,
            fail_start: true,
            ..Default::default()
        }));
        let mut rx = adapter.subscribe();

        let id = adapter.start("en-US").await.unwrap().unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.capture, id);
        assert_eq!(event.kind, CaptureEventKind::Error("microphone busy".into()));
    }

    #[tokio::test]
    async fn test_destroy_reaches_engine_once() {
        let engine = Arc::new(FakeEngine {
            supported: true,
            ..Default::default()
        });
        let adapter = CaptureAdapter::new(engine.clone());

        adapter.destroy().await.unwrap();
        adapter.destroy().await.unwrap();
        assert_eq!(engine.destroyed.load(Ordering::SeqCst), 1);
        assert!(matches!(adapter.start("en-US").await, Err(MediaError::Destroyed)));
    }
}
