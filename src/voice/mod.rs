//! # Voice Module
//!
//! The voice transport seen from the playback scheduler. A [`VoiceGateway`]
//! joins a voice channel and hands back a [`VoiceConnection`]; the connection
//! transmits one [`Playable`] at a time and reports its end through a
//! [`Completion`].
//!
//! The completion fires on the transport's own execution context (a songbird
//! event task in production), never on the command path. Whatever it does must
//! be safe to run from any thread.

pub mod call;

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;

use crate::audio::track::Playable;

pub use self::call::SongbirdGateway;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("could not join the voice channel: {0}")]
    Join(String),
    #[error("not connected to a voice channel")]
    NotConnected,
    #[error("failed to start playback: {0}")]
    Start(String),
    #[error("playback control failed: {0}")]
    Control(String),
}

/// Callback de fin de transmisión.
///
/// Receives the transport error message, if transmission ended because of one.
pub struct Completion(Box<dyn FnOnce(Option<String>) + Send + 'static>);

impl Completion {
    pub fn new(f: impl FnOnce(Option<String>) + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn fire(self, error: Option<String>) {
        (self.0)(error)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completion")
    }
}

#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>, VoiceError>;
}

/// Una conexión de voz activa en un guild
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    async fn is_connected(&self) -> bool;

    /// True while audio is being transmitted (not paused, not ended).
    async fn is_playing(&self) -> bool;

    async fn is_paused(&self) -> bool;

    /// Starts transmitting `source`. `on_complete` fires exactly once when the
    /// transmission ends, naturally, by `stop`, or by error.
    async fn play(&self, source: Playable, on_complete: Completion) -> Result<(), VoiceError>;

    async fn pause(&self) -> Result<(), VoiceError>;

    async fn resume(&self) -> Result<(), VoiceError>;

    async fn stop(&self) -> Result<(), VoiceError>;

    async fn disconnect(&self) -> Result<(), VoiceError>;

    /// Position inside the current transmission, when known.
    async fn position(&self) -> Option<Duration>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport used by the scheduler tests.

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FakeState {
        current: Option<(Playable, Completion)>,
        paused: bool,
        started: Vec<String>,
        failed_starts: usize,
    }

    /// Streams whose URL starts with `stale://` fail to start with an
    /// HTTP-looking error; `broken://` fails with a non-network error.
    pub struct FakeConnection {
        connected: AtomicBool,
        busy: AtomicBool,
        refuse_stop: AtomicBool,
        start_delay: Mutex<Option<Duration>>,
        disconnects: Mutex<usize>,
        state: Mutex<FakeState>,
    }

    impl FakeConnection {
        pub fn connected() -> Arc<Self> {
            Arc::new(Self {
                connected: AtomicBool::new(true),
                busy: AtomicBool::new(false),
                refuse_stop: AtomicBool::new(false),
                start_delay: Mutex::new(None),
                disconnects: Mutex::new(0),
                state: Mutex::new(FakeState::default()),
            })
        }

        /// Forces `is_playing` to report transmission regardless of state.
        pub fn set_busy(&self, busy: bool) {
            self.busy.store(busy, Ordering::SeqCst);
        }

        /// `play` waits this long before the transmission becomes reachable
        /// by `stop`.
        pub fn set_start_delay(&self, delay: Duration) {
            *self.start_delay.lock() = Some(delay);
        }

        pub fn set_refuse_stop(&self, refuse: bool) {
            self.refuse_stop.store(refuse, Ordering::SeqCst);
        }

        pub fn drop_link(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }

        pub fn started(&self) -> Vec<String> {
            self.state.lock().started.clone()
        }

        pub fn failed_starts(&self) -> usize {
            self.state.lock().failed_starts
        }

        pub fn disconnects(&self) -> usize {
            *self.disconnects.lock()
        }

        pub fn current_title(&self) -> Option<String> {
            self.state
                .lock()
                .current
                .as_ref()
                .map(|(p, _)| p.title().to_string())
        }

        /// Ends the current transmission from another OS thread, the way the
        /// real transport does.
        pub fn finish_current(&self) {
            let completion = {
                let mut state = self.state.lock();
                state.paused = false;
                state.current.take().map(|(_, c)| c)
            };
            if let Some(completion) = completion {
                std::thread::spawn(move || completion.fire(None))
                    .join()
                    .expect("completion thread panicked");
            }
        }
    }

    #[async_trait]
    impl VoiceConnection for FakeConnection {
        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn is_playing(&self) -> bool {
            if self.busy.load(Ordering::SeqCst) {
                return true;
            }
            let state = self.state.lock();
            state.current.is_some() && !state.paused
        }

        async fn is_paused(&self) -> bool {
            let state = self.state.lock();
            state.current.is_some() && state.paused
        }

        async fn play(&self, source: Playable, on_complete: Completion) -> Result<(), VoiceError> {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(VoiceError::NotConnected);
            }
            let delay = *self.start_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let mut state = self.state.lock();
            if source.stream_url().starts_with("stale://") {
                state.failed_starts += 1;
                return Err(VoiceError::Start(
                    "HTTP request failed: 403 Forbidden".to_string(),
                ));
            }
            if source.stream_url().starts_with("broken://") {
                state.failed_starts += 1;
                return Err(VoiceError::Start("unsupported codec".to_string()));
            }
            state.started.push(source.stream_url().to_string());
            state.paused = false;
            state.current = Some((source, on_complete));
            Ok(())
        }

        async fn pause(&self) -> Result<(), VoiceError> {
            self.state.lock().paused = true;
            Ok(())
        }

        async fn resume(&self) -> Result<(), VoiceError> {
            self.state.lock().paused = false;
            Ok(())
        }

        async fn stop(&self) -> Result<(), VoiceError> {
            if self.refuse_stop.load(Ordering::SeqCst) {
                return Err(VoiceError::Control("track handle gone".to_string()));
            }
            self.finish_current();
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), VoiceError> {
            self.finish_current();
            self.connected.store(false, Ordering::SeqCst);
            *self.disconnects.lock() += 1;
            Ok(())
        }

        async fn position(&self) -> Option<Duration> {
            self.state
                .lock()
                .current
                .as_ref()
                .map(|_| Duration::from_secs(42))
        }
    }
}
