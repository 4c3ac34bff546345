//! Messages flowing into and out of the coordinator.

use std::fmt;

use serde::{Deserialize, Serialize};

use kiska_core::auth::AuthError;
use kiska_media::{CaptureEvent, SynthesisEvent};
use kiska_providers::ResolveError;

/// Whose turn it is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    #[default]
    Idle,
    Listening,
    Resolving,
    Speaking,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Resolving => "resolving",
            Self::Speaking => "speaking",
        };
        f.write_str(label)
    }
}

/// User actions sent by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    PressTalk,
    ReleaseTalk,
    SubmitText(String),
    Greet,
    ResetSession,
    Shutdown,
}

/// Transient, non-fatal messages for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    CaptureUnsupported,
    CaptureFailed(String),
    CaptureTimedOut,
    SignedOut,
    SignOutFailed(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CaptureUnsupported => f.write_str("Speech recognition is not available on this device."),
            Self::CaptureFailed(msg) => write!(f, "Speech recognition failed: {msg}"),
            Self::CaptureTimedOut => f.write_str("Stopped listening: no speech was recognized in time."),
            Self::SignedOut => f.write_str("You have been signed out."),
            Self::SignOutFailed(msg) => write!(f, "Sign-out failed: {msg}"),
        }
    }
}

/// Timers the coordinator arms while it waits on an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// A capture has been open too long.
    CaptureTimeout,
    /// Capture ended or was released; stop waiting for final results.
    ReleaseGrace,
    /// An utterance has been playing too long.
    SpeechTimeout,
    /// The sign-out acknowledgement grace period is over.
    SignOut,
}

/// Everything the coordinator task reacts to.
#[derive(Debug)]
pub(crate) enum CoordinatorEvent {
    Intent(Intent),
    Capture(CaptureEvent),
    Synthesis(SynthesisEvent),
    ResolutionFinished {
        id: u64,
        result: Result<String, ResolveError>,
    },
    SignOutFinished(Result<(), AuthError>),
    DeadlineElapsed(Deadline),
}
