use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{HttpRequest, Input},
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use super::{Completion, VoiceConnection, VoiceError, VoiceGateway};
use crate::audio::track::Playable;

/// Gateway de voz respaldado por songbird
pub struct SongbirdGateway {
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>, VoiceError> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| VoiceError::Join(e.to_string()))?;

        info!("🔊 Connected to voice channel {} in guild {}", channel_id, guild_id);

        Ok(Arc::new(SongbirdConnection {
            guild_id,
            manager: self.manager.clone(),
            call,
            http: self.http.clone(),
            current: Mutex::new(None),
        }))
    }
}

pub struct SongbirdConnection {
    guild_id: GuildId,
    manager: Arc<Songbird>,
    call: Arc<tokio::sync::Mutex<Call>>,
    http: reqwest::Client,
    current: Mutex<Option<TrackHandle>>,
}

impl SongbirdConnection {
    fn current(&self) -> Option<TrackHandle> {
        self.current.lock().clone()
    }

    fn holds(&self, handle: &TrackHandle) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|current| current.uuid() == handle.uuid())
    }

    fn forget(&self, handle: &TrackHandle) {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|c| c.uuid() == handle.uuid()) {
            *current = None;
        }
    }

    async fn play_mode(&self) -> Option<PlayMode> {
        let handle = self.current()?;
        handle.get_info().await.ok().map(|state| state.playing)
    }
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn is_connected(&self) -> bool {
        self.call.lock().await.current_connection().is_some()
    }

    async fn is_playing(&self) -> bool {
        matches!(self.play_mode().await, Some(PlayMode::Play))
    }

    async fn is_paused(&self) -> bool {
        matches!(self.play_mode().await, Some(PlayMode::Pause))
    }

    async fn play(&self, source: Playable, on_complete: Completion) -> Result<(), VoiceError> {
        let input: Input = HttpRequest::new(self.http.clone(), source.stream_url().to_string()).into();

        let handle = {
            let mut call = self.call.lock().await;
            if call.current_connection().is_none() {
                return Err(VoiceError::NotConnected);
            }
            call.play_input(input)
        };

        // Alcanzable por stop mientras se obtiene el stream
        *self.current.lock() = Some(handle.clone());

        // Un solo callback compartido entre End y Error: el primero que llegue lo consume
        let completion = Arc::new(Mutex::new(Some(on_complete)));
        let notifier = CompletionNotifier {
            guild_id: self.guild_id,
            completion: completion.clone(),
        };
        handle
            .add_event(Event::Track(TrackEvent::End), notifier.clone())
            .and_then(|_| handle.add_event(Event::Track(TrackEvent::Error), notifier))
            .map_err(|e| {
                self.forget(&handle);
                let _ = handle.stop();
                VoiceError::Control(e.to_string())
            })?;

        let started = handle.make_playable_async().await;

        if !self.holds(&handle) {
            debug!("⏹️ {} stopped while starting in guild {}", source.title(), self.guild_id);
            let completion = completion.lock().take();
            if let Some(completion) = completion {
                completion.fire(None);
            }
            return Ok(());
        }

        if let Err(e) = started {
            self.forget(&handle);
            let _ = handle.stop();
            return Err(VoiceError::Start(e.to_string()));
        }

        debug!("▶️ Transmitting {} in guild {}", source.title(), self.guild_id);
        Ok(())
    }

    async fn pause(&self) -> Result<(), VoiceError> {
        if let Some(handle) = self.current() {
            handle.pause().map_err(|e| VoiceError::Control(e.to_string()))?;
        }
        Ok(())
    }

    async fn resume(&self) -> Result<(), VoiceError> {
        if let Some(handle) = self.current() {
            handle.play().map_err(|e| VoiceError::Control(e.to_string()))?;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), VoiceError> {
        if let Some(handle) = self.current.lock().take() {
            handle.stop().map_err(|e| VoiceError::Control(e.to_string()))?;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), VoiceError> {
        self.stop().await?;
        self.manager
            .remove(self.guild_id)
            .await
            .map_err(|e| VoiceError::Join(e.to_string()))?;
        info!("👋 Left voice channel in guild {}", self.guild_id);
        Ok(())
    }

    async fn position(&self) -> Option<Duration> {
        let handle = self.current()?;
        handle.get_info().await.ok().map(|state| state.position)
    }
}

/// Handler de songbird que dispara la continuación de la sesión
#[derive(Clone)]
struct CompletionNotifier {
    guild_id: GuildId,
    completion: Arc<Mutex<Option<Completion>>>,
}

#[async_trait]
impl VoiceEventHandler for CompletionNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(e.to_string()),
                _ => None,
            }),
            _ => None,
        };

        if let Some(error) = &error {
            warn!("❌ Track error in guild {}: {}", self.guild_id, error);
        }

        let completion = self.completion.lock().take();
        if let Some(completion) = completion {
            completion.fire(error);
        }

        None
    }
}
