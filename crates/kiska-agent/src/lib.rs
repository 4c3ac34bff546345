//! Turn-taking coordinator for KISKA.
//!
//! The [`coordinator::Coordinator`] is a single task that owns whose turn it
//! is. Capture, resolution and synthesis all report back to it as messages;
//! the presentation layer drives it through a [`coordinator::CoordinatorHandle`].

pub mod clock;
pub mod coordinator;
pub mod events;
pub mod intents;

pub use clock::{Clock, FixedClock, SystemClock};
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use events::{Intent, Notice, TurnState};
