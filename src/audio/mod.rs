//! # Audio Module
//!
//! Per-guild playback: queue, session lifecycle and the voice driver.
//!
//! ## Architecture
//!
//! ### [`queue`] - Queue Store
//! - One [`queue::GuildPlaybackState`] per guild behind a single mutex
//! - FIFO order, bounded size, truncated snapshots for display
//!
//! ### [`session`] - Playback Session
//! - One task per connected guild, driven by [`session::SessionEvent`]s
//! - Resolves each track through the resolver chain before playing it
//! - Recovers a broken stream once per track, skips exhausted tracks
//!
//! ### [`idle`] - Idle Timer
//! - Armed when the queue drains, cancelled by any enqueue
//! - Disconnects the guild after the grace period
//!
//! ### [`manager`] - Playback Manager
//! - Entry point used by the slash commands
//! - Guarantees a single session per guild; `stop` is idempotent
//!
//! ### [`voice`] / [`driver`] - Voice Layer
//! - Traits the session depends on, and their songbird implementation

pub mod driver;
pub mod idle;
pub mod manager;
pub mod queue;
pub mod session;
pub mod voice;

#[cfg(test)]
pub mod testing;

pub use manager::PlaybackManager;
pub use queue::{QueueError, QueueSnapshot, Track};
pub use session::SessionPhase;
