use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseFollowup,
        CreateInteractionResponseMessage, EditInteractionResponse,
    },
    http::HttpError,
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{notifier::ChannelNotifier, JukeboxBot};
use crate::{
    audio::{QueueError, Track},
    sources::{
        ytdlp::{is_playlist_url, is_youtube_url},
        BackendFailure, ErrorKind, Playlist, SearchProvider, VideoMetadata, YtDlpClient,
    },
    ui::messages,
};

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &JukeboxBot) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        return respond(ctx, &command, messages::GUILD_ONLY).await;
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let result = match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await,
        "queue" => handle_queue(ctx, &command, bot, guild_id).await,
        "skip" => handle_skip(ctx, &command, bot, guild_id).await,
        "stop" => handle_stop(ctx, &command, bot, guild_id).await,
        _ => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content("❌ Unknown command")
                            .ephemeral(true),
                    ),
                )
                .await?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        report_failure(ctx, &command, e).await;
    }
    result
}

/// Qué pidió el usuario con `/play`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayQuery<'a> {
    Playlist(&'a str),
    Video(&'a str),
    Search(&'a str),
}

pub fn classify_query(query: &str) -> PlayQuery<'_> {
    let query = query.trim();
    if is_playlist_url(query) {
        PlayQuery::Playlist(query)
    } else if is_youtube_url(query) || query.starts_with("http") {
        PlayQuery::Video(query)
    } else {
        PlayQuery::Search(query)
    }
}

enum PlayRequest {
    Single(VideoMetadata),
    Playlist(Playlist),
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?
        .to_string();

    // Defer la respuesta ya que puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let reply = match play(ctx, command, bot, guild_id, &query).await {
        Ok(reply) => reply,
        Err(e) => {
            error!("Error en /play ({}): {:?}", query, e);
            format!("❌ {}", user_message(&e))
        }
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(reply))
        .await?;

    Ok(())
}

async fn play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
    query: &str,
) -> Result<String> {
    let request = lookup(&bot.metadata, query).await?;

    let Some(channel_id) = user_voice_channel(ctx, guild_id, command.user.id) else {
        return Ok(messages::NOT_IN_VOICE.to_string());
    };

    let requested_by = command.user.name.as_str();
    let reply = match request {
        PlayRequest::Single(meta) => {
            let title = meta.title.clone();
            bot.playback
                .enqueue(guild_id, Track::from_metadata(meta, requested_by))?;
            messages::track_added(&title)
        }
        PlayRequest::Playlist(playlist) => {
            let added = bot
                .playback
                .enqueue_batch(guild_id, playlist.entries.clone(), requested_by)?;
            messages::playlist_added(&playlist.title, &playlist.entries, added)
        }
    };

    let notifier = Arc::new(ChannelNotifier::new(ctx.http.clone(), command.channel_id));
    bot.playback.start_if_idle(guild_id, channel_id, notifier);

    Ok(reply)
}

async fn lookup(client: &YtDlpClient, query: &str) -> Result<PlayRequest> {
    match classify_query(query) {
        PlayQuery::Playlist(url) => Ok(PlayRequest::Playlist(client.get_playlist(url).await?)),
        PlayQuery::Video(url) => match client.get_metadata(url).await {
            Ok(meta) => Ok(PlayRequest::Single(meta)),
            Err(failure) if failure.kind.is_permanent() => Err(failure.into()),
            Err(failure) => {
                // El resolver todavía puede encontrar una alternativa al reproducir.
                warn!("⚠️ Sin metadata para {} ({}), se encola igual", url, failure);
                Ok(PlayRequest::Single(VideoMetadata {
                    title: url.to_string(),
                    url: url.to_string(),
                    duration: None,
                }))
            }
        },
        PlayQuery::Search(terms) => {
            let first = client
                .search(terms, 3)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| BackendFailure::new("No videos found for your search query"))?;
            Ok(PlayRequest::Single(VideoMetadata {
                title: first.title,
                url: first.url,
                duration: first.duration,
            }))
        }
    }
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let snapshot = bot.playback.snapshot_queue(guild_id);
    respond(ctx, command, messages::queue_listing(&snapshot)).await
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let content = if bot.playback.skip(guild_id).await {
        messages::SKIPPED
    } else {
        messages::NOTHING_PLAYING
    };
    respond(ctx, command, content).await
}

async fn handle_stop(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let content = if bot.playback.stop(guild_id).await {
        messages::STOPPED
    } else {
        messages::NOTHING_PLAYING
    };
    respond(ctx, command, content).await
}

async fn respond(ctx: &Context, command: &CommandInteraction, content: impl Into<String>) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().content(content)),
        )
        .await?;
    Ok(())
}

/// Avisa al usuario de un fallo del comando. Si la interacción ya fue
/// respondida se usa un follow-up efímero.
async fn report_failure(ctx: &Context, command: &CommandInteraction, error: &anyhow::Error) {
    let content = interaction_error_message(error);

    let replied = command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content.clone())
                    .ephemeral(true),
            ),
        )
        .await;

    if replied.is_err() {
        if let Err(e) = command
            .create_followup(
                &ctx.http,
                CreateInteractionResponseFollowup::new()
                    .content(content)
                    .ephemeral(true),
            )
            .await
        {
            error!("No se pudo enviar el error al usuario: {:?}", e);
        }
    }
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

/// Traduce un fallo de `/play` a un mensaje para el usuario.
pub fn user_message(error: &anyhow::Error) -> String {
    if let Some(queue_error) = error.downcast_ref::<QueueError>() {
        return queue_error.to_string();
    }

    if let Some(failure) = error.downcast_ref::<BackendFailure>() {
        match failure.kind {
            ErrorKind::Timeout => {
                return "Network connection error. Please check your internet connection".into()
            }
            ErrorKind::Unavailable
            | ErrorKind::Private
            | ErrorKind::AgeRestricted
            | ErrorKind::RegionRestricted => {
                if failure.message.contains("playlist") {
                    return "This playlist is private or unavailable".into();
                }
                return "This content is unavailable or restricted".into();
            }
            _ => {}
        }
    }

    let text = format!("{:#}", error).to_lowercase();
    let message = if text.contains("enotfound") || text.contains("etimedout") {
        "Network connection error. Please check your internet connection"
    } else if text.contains("invalid url") || text.contains("unsupported url") {
        "Invalid YouTube URL provided"
    } else if text.contains("no videos found") || text.contains("no results found") {
        "No videos found for your search query"
    } else if text.contains("private playlist") || text.contains("empty or private") {
        "This playlist is private or unavailable"
    } else if text.contains("unavailable") {
        "This content is unavailable or restricted"
    } else {
        "An unexpected error occurred"
    };
    message.to_string()
}

/// Mensaje para un comando que falló fuera del flujo normal.
pub fn interaction_error_message(error: &anyhow::Error) -> String {
    let code = error.downcast_ref::<serenity::Error>().and_then(|e| match e {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => Some(response.error.code),
        _ => None,
    });

    let text = format!("{:#}", error);
    let message = match code {
        Some(10062) => "❌ This interaction has expired. Please try the command again.",
        Some(50013) => "❌ I don't have permission to perform this action.",
        Some(50001) => "❌ I don't have access to this channel.",
        _ if text.contains("Missing Permissions") => {
            "❌ I'm missing required permissions. Please check my role settings."
        }
        _ if text.contains("ENOTFOUND") || text.contains("ETIMEDOUT") => {
            "❌ Network error. Please try again in a moment."
        }
        _ if text.to_lowercase().contains("voice") => {
            "❌ Voice connection error. Make sure I can connect to your voice channel."
        }
        _ => "❌ An unexpected error occurred while processing your command.",
    };
    message.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_query() {
        assert_eq!(
            classify_query("https://www.youtube.com/playlist?list=PL123"),
            PlayQuery::Playlist("https://www.youtube.com/playlist?list=PL123")
        );
        assert_eq!(
            classify_query("https://youtu.be/dQw4w9WgXcQ"),
            PlayQuery::Video("https://youtu.be/dQw4w9WgXcQ")
        );
        assert_eq!(
            classify_query("https://www.youtube.com/watch?v=abc&list=PL123"),
            PlayQuery::Video("https://www.youtube.com/watch?v=abc&list=PL123")
        );
        assert_eq!(
            classify_query("  daft punk one more time "),
            PlayQuery::Search("daft punk one more time")
        );
    }

    #[test]
    fn test_user_message_for_queue_errors() {
        let error = anyhow::Error::from(QueueError::Full(1000));
        assert_eq!(user_message(&error), "La cola está llena (máximo 1000 canciones)");
    }

    #[test]
    fn test_user_message_for_backend_failures() {
        let private = anyhow::Error::from(BackendFailure::new("ERROR: Private video"));
        assert_eq!(user_message(&private), "This content is unavailable or restricted");

        let playlist = anyhow::Error::from(BackendFailure::new("This playlist is empty or private."));
        assert_eq!(user_message(&playlist), "This playlist is private or unavailable");

        let empty = anyhow::Error::from(BackendFailure::new("No videos found for your search query"));
        assert_eq!(user_message(&empty), "No videos found for your search query");

        let slow = anyhow::Error::from(BackendFailure::new("Read timed out"));
        assert_eq!(
            user_message(&slow),
            "Network connection error. Please check your internet connection"
        );
    }

    #[test]
    fn test_user_message_fallback() {
        assert_eq!(
            user_message(&anyhow::anyhow!("something odd")),
            "An unexpected error occurred"
        );
    }

    #[test]
    fn test_interaction_error_message_by_text() {
        assert_eq!(
            interaction_error_message(&anyhow::anyhow!("Missing Permissions")),
            "❌ I'm missing required permissions. Please check my role settings."
        );
        assert_eq!(
            interaction_error_message(&anyhow::anyhow!("voice gateway closed")),
            "❌ Voice connection error. Make sure I can connect to your voice channel."
        );
        assert_eq!(
            interaction_error_message(&anyhow::anyhow!("boom")),
            "❌ An unexpected error occurred while processing your command."
        );
    }
}
