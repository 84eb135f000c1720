use anyhow::Result;
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{info, warn};

use super::{notifier::ChannelNotifier, Jukebox};
use crate::audio::{Outcome, PlaybackSession};

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &Jukebox) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("❌ Commands only work inside a server")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    // Defer la respuesta ya que puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let outcome = match dispatch(ctx, &command, guild_id, bot).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("❌ /{} falló en guild {}: {:?}", command.data.name, guild_id, e);
            Outcome::failed(e.to_string())
        }
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(outcome.to_string()))
        .await?;

    Ok(())
}

async fn dispatch(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &Jukebox,
) -> Result<Outcome> {
    let user = command.user.id;

    let outcome = match command.data.name.as_str() {
        "join" => {
            ensure_session(ctx, command, guild_id, bot).await?;
            Outcome::done("Joined your voice channel.")
        }
        "leave" | "disconnect" => {
            bot.reaper.deinit_idle_state_of_client(guild_id);
            bot.registry
                .remove(guild_id)
                .await
                .unwrap_or_else(|| Outcome::info("Not connected to a voice channel."))
        }
        "play" => {
            let query = string_option(command, "query")
                .ok_or_else(|| anyhow::anyhow!("Missing query"))?;
            let session = ensure_session(ctx, command, guild_id, bot).await?;
            session.play(query, Some(user)).await
        }
        "pick" => {
            let number = integer_option(command, "number")
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| anyhow::anyhow!("Missing result number"))?;
            let session = ensure_session(ctx, command, guild_id, bot).await?;
            session.choose(user, number).await
        }
        other => {
            let Some(session) = bot.registry.get(guild_id) else {
                return Ok(Outcome::info("Not connected to a voice channel."));
            };
            match other {
                "pause" => session.pause().await,
                "resume" => session.resume().await,
                "stop" => session.stop().await,
                "skip" => session.skip(integer_option(command, "count")).await,
                "loop" => session.set_loop(true),
                "unloop" => session.set_loop(false),
                "queue" => session.queue_listing(),
                "status" => session.status().await,
                "clear" => session.clear(),
                _ => Outcome::info("Unknown command."),
            }
        }
    };

    Ok(outcome)
}

/// Obtiene la sesión del guild, conectando al canal de voz del usuario si hace falta
async fn ensure_session(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &Jukebox,
) -> Result<Arc<PlaybackSession>> {
    let channel_id = user_voice_channel(ctx, guild_id, command.user.id)?;

    let existing = bot.registry.get(guild_id);
    let connected = match &existing {
        Some(session) => session.connection().is_connected().await,
        None => false,
    };

    let session = match existing {
        Some(session) if connected => session,
        Some(session) => {
            let connection = bot.gateway.connect(guild_id, channel_id).await?;
            session.replace_connection(connection);
            session
        }
        None => {
            // Si falla la conexión no queda ninguna sesión registrada
            let connection = bot.gateway.connect(guild_id, channel_id).await?;
            bot.registry.get_or_create(guild_id, || {
                PlaybackSession::new(guild_id, connection, bot.resolver.clone())
            })
        }
    };

    bot.reaper.init_idle_state_for_client(
        guild_id,
        session.connection(),
        Arc::new(ChannelNotifier::new(ctx.http.clone(), command.channel_id)),
    );

    Ok(session)
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| anyhow::anyhow!("Guild not found in cache"))?;

    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| anyhow::anyhow!("You must be in a voice channel"))?;

    Ok(channel_id)
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn integer_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}
