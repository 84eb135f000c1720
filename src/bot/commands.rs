use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

fn all_commands() -> Vec<CreateCommand> {
    vec![
        join_command(),
        leave_command(),
        play_command(),
        pick_command(),
        simple("pause", "Pause the current track"),
        simple("resume", "Resume playback"),
        simple("stop", "Stop playback and clear the queue"),
        skip_command(),
        simple("loop", "Requeue every finished track"),
        simple("unloop", "Stop requeueing finished tracks"),
        simple("queue", "Show the queue"),
        simple("status", "Show what is playing"),
        simple("clear", "Clear the queue"),
        simple("disconnect", "Stop and leave the voice channel"),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn simple(name: &str, description: &str) -> CreateCommand {
    CreateCommand::new(name).description(description)
}

fn join_command() -> CreateCommand {
    CreateCommand::new("join").description("Join your voice channel")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Leave the voice channel")
}

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Play a URL or search for a track")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "URL or search terms")
                .required(true),
        )
}

fn pick_command() -> CreateCommand {
    CreateCommand::new("pick")
        .description("Pick one of your search results")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "number", "Result number")
                .required(true)
                .min_int_value(1)
                .max_int_value(25),
        )
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip")
        .description("Skip the current track")
        .add_option(CreateCommandOption::new(
            CommandOptionType::Integer,
            "count",
            "Tracks to skip; negative counts remove from the end of the queue",
        ))
}
