use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

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

fn all_commands() -> Vec<CreateCommand> {
    vec![play_command(), queue_command(), skip_command(), stop_command()]
}

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Play a song or playlist from YouTube")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "YouTube URL, playlist URL or search terms",
            )
            .required(true),
        )
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Show the current music queue")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Skip the current song")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Stop the music, clear the queue and leave the channel")
}
