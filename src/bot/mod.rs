//! # Bot Module
//!
//! Serenity front-end for the playback scheduler.
//!
//! This module contains:
//! - Slash command registration ([`commands`])
//! - Command dispatch to the guild's [`PlaybackSession`](crate::audio::PlaybackSession) ([`handlers`])
//! - The text-channel sink for idle notices ([`notifier`])
//! - Background tasks started on `ready`: the idle reaper and hourly maintenance
//!
//! Every command answers with the session's [`Outcome`](crate::audio::Outcome)
//! rendered as plain text.

use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;
pub mod notifier;

use crate::{
    audio::{IdleReaper, SessionRegistry},
    config::Config,
    sources::TrackResolver,
    voice::VoiceGateway,
};

/// Handler principal del bot
pub struct Jukebox {
    config: Arc<Config>,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) resolver: Arc<TrackResolver>,
    pub(crate) reaper: Arc<IdleReaper>,
    pub(crate) gateway: Arc<dyn VoiceGateway>,
    // `ready` se repite en cada reconexión del gateway
    background_started: AtomicBool,
}

impl Jukebox {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<SessionRegistry>,
        resolver: Arc<TrackResolver>,
        gateway: Arc<dyn VoiceGateway>,
    ) -> Self {
        let reaper = Arc::new(IdleReaper::new(
            registry.clone(),
            config.idle_timeout,
            config.idle_check_interval,
        ));

        Self {
            config,
            registry,
            resolver,
            reaper,
            gateway,
            background_started: AtomicBool::new(false),
        }
    }

    async fn register_commands(&self, ctx: &Context) -> anyhow::Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                commands::register_guild_commands(ctx, guild_id).await?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Voice disconnect notice for the bot itself: drop the guild's state.
    async fn forget_guild(&self, guild_id: GuildId) {
        self.reaper.deinit_idle_state_of_client(guild_id);
        if let Some(outcome) = self.registry.remove(guild_id).await {
            if outcome.is_failure() {
                warn!("⚠️ Guild {}: {}", guild_id, outcome.message);
            }
        }
    }
}

#[async_trait]
impl EventHandler for Jukebox {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        if self.background_started.swap(true, Ordering::SeqCst) {
            return;
        }

        tokio::spawn(self.reaper.clone().run());

        let resolver = self.resolver.clone();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            maintenance_tasks(resolver, registry).await;
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }
        if let Some(guild_id) = new.guild_id {
            info!("🔌 Bot desconectado en guild {}", guild_id);
            self.forget_guild(guild_id).await;
        }
    }
}

/// Tareas periódicas: limpia búsquedas expiradas del cache
async fn maintenance_tasks(resolver: Arc<TrackResolver>, registry: Arc<SessionRegistry>) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(3600)); // Cada hora

    loop {
        interval.tick().await;

        let pruned = resolver.prune_cache();
        info!(
            "🧹 Tareas de mantenimiento completadas ({} búsquedas expiradas, {} sesiones activas)",
            pruned,
            registry.len()
        );
    }
}
