//! # Audio Module
//!
//! Per-guild playback scheduling.
//!
//! ## Architecture
//!
//! ### [`session`] - Playback Session
//! - Owns one guild's queue, active track and pause/loop flags
//! - Drives the "pop next, start, await completion, advance" cycle
//! - Refreshes an expired stream URL once before giving up on a track
//!
//! ### [`registry`] - Session Registry
//! - At most one session per guild, created on demand
//!
//! ### [`idle`] - Idle Reaper
//! - Periodic sweep that disconnects guilds idle for longer than `IDLE_TIMEOUT_SECS`
//!
//! ### [`shared`] - Guarded containers
//! - Map and list behind a single lock, used from both the command path and
//!   the playback completion path
//!
//! ## Threading
//!
//! Commands run on the tokio runtime. The voice transport reports the end of a
//! transmission from its own context; the session turns that report into a
//! [`session::PlaybackEvent`] and handles it on its event loop task, so queue
//! and active-track mutations always go through the same guarded paths.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let session = registry.get_or_create(guild_id, || {
//!     PlaybackSession::new(guild_id, connection, resolver.clone())
//! });
//!
//! let outcome = session.play("https://youtu.be/dQw4w9WgXcQ", Some(user_id)).await;
//! println!("{}", outcome);
//! ```

pub mod idle;
pub mod outcome;
pub mod registry;
pub mod session;
pub mod shared;
pub mod track;

pub use idle::{IdleNotifier, IdleReaper};
pub use outcome::Outcome;
pub use registry::SessionRegistry;
pub use session::{PlaybackSession, PlaybackState};
pub use track::Track;
