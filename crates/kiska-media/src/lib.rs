//! Media adapters: speech capture (STT) and speech synthesis (TTS).
//!
//! Engines are platform or network services implementing [`CaptureEngine`] or
//! [`SynthesisEngine`]. The adapters wrap an engine, tag its events with a
//! per-session id and fan them out to any number of subscribers.

use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::mpsc;

pub mod capture;
pub mod console;
pub mod push_to_talk;
pub mod speech_stream;
pub mod synthesis;
pub mod transcription;

pub use capture::{CaptureAdapter, CaptureEmitter, CaptureEngine, CaptureEvent, CaptureEventKind};
pub use synthesis::{
    SynthesisAdapter, SynthesisEmitter, SynthesisEngine, SynthesisEvent, SynthesisEventKind,
    Utterance, VoiceInfo,
};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("engine '{0}' is not supported on this platform")]
    Unsupported(String),

    #[error("adapter has been destroyed")]
    Destroyed,

    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}

/// Multi-subscriber fan-out for adapter events. Closed subscribers are pruned on publish.
pub struct EventHub<E> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<E>>>,
}

impl<E> Default for EventHub<E> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Clone> EventHub<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Deliver to every live subscriber, returning how many received it.
    pub fn publish(&self, event: E) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<E>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_fans_out_and_prunes_closed() {
        let hub = EventHub::<u32>::new();
        let mut a = hub.subscribe();
        let b = hub.subscribe();
        drop(b);

        assert_eq!(hub.publish(7), 1);
        assert_eq!(a.try_recv().unwrap(), 7);
        assert_eq!(hub.subscriber_count(), 1);
    }
}
