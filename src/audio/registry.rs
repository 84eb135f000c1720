use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::info;

use super::{outcome::Outcome, session::PlaybackSession, shared::SharedMap};

/// Registro de sesiones: a lo sumo una por guild
#[derive(Default)]
pub struct SessionRegistry {
    sessions: SharedMap<GuildId, Arc<PlaybackSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the guild's session, building it with `factory` when there is
    /// none. Concurrent callers for the same guild all get the same instance;
    /// the event loop is spawned once, by the caller that created it.
    pub fn get_or_create(
        &self,
        guild_id: GuildId,
        factory: impl FnOnce() -> PlaybackSession,
    ) -> Arc<PlaybackSession> {
        let (session, created) = self
            .sessions
            .get_or_insert_with(guild_id, || Arc::new(factory()));

        if created {
            session.spawn_event_loop();
            info!("🆕 Session created for guild {}", guild_id);
        }
        session
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<PlaybackSession>> {
        self.sessions.get(&guild_id)
    }

    /// Forgets the session and tears it down. `None` when the guild had none.
    pub async fn remove(&self, guild_id: GuildId) -> Option<Outcome> {
        let session = self.sessions.delete(&guild_id)?;
        let outcome = session.disconnect().await;
        info!("🗑️ Session removed for guild {}", guild_id);
        Some(outcome)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
