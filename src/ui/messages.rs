//! Textos enviados al canal y como respuesta a los comandos.

use std::time::Duration;

use crate::{
    audio::queue::{QueueSnapshot, Track},
    sources::{ErrorKind, VideoMetadata},
};

pub fn now_playing(track: &Track) -> String {
    format!(
        "🎶 Now playing: **{}** (requested by {})",
        track.title, track.requested_by
    )
}

/// `track` already carries the alternative's title.
pub fn now_playing_alternative(track: &Track, original_failure: ErrorKind) -> String {
    format!(
        "🎶 Now playing (alternative): **{}** (requested by {})\n⚠️ Original video: {}",
        track.title,
        track.requested_by,
        original_failure.description().to_lowercase()
    )
}

pub fn skipping(track: &Track, kind: ErrorKind) -> String {
    format!(
        "❌ Could not play **{}**: {}. Skipping to next song...",
        track.title,
        kind.description()
    )
}

pub fn idle_disconnect(grace: Duration) -> String {
    let secs = grace.as_secs();
    let span = if secs >= 60 && secs % 60 == 0 {
        let minutes = secs / 60;
        format!("{} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        humantime::format_duration(Duration::from_secs(secs)).to_string()
    };
    format!("🚪 Disconnected due to {span} of inactivity. Use `/play` to start again!")
}

pub fn connection_failed() -> String {
    "❌ Voice connection error. Make sure I can connect to your voice channel.".to_string()
}

pub fn track_added(title: &str) -> String {
    format!("✅ Added to queue: **{}**", title)
}

pub fn playlist_added(title: &str, entries: &[VideoMetadata], added: usize) -> String {
    let mut message = format!(
        "✅ **Added Playlist**\n🎵 **{}**\n⏱️ **Playlist Length:** {}\n📊 **Tracks:** {}",
        title,
        format_playlist_duration(entries),
        entries.len()
    );
    if added < entries.len() {
        message.push_str(&format!(
            "\n⚠️ Queue is full: only {} track{} were added",
            added,
            if added == 1 { "" } else { "s" }
        ));
    }
    message
}

/// `H:MM:SS` con horas, `M:SS` sin ellas. Entradas sin duración no suman.
pub fn format_playlist_duration(entries: &[VideoMetadata]) -> String {
    let total: Duration = entries.iter().filter_map(|e| e.duration).sum();
    format_duration(total)
}

pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

pub fn queue_listing(snapshot: &QueueSnapshot) -> String {
    let playing = snapshot
        .current
        .as_ref()
        .map(|current| format!("▶️ Now playing: **{}**", current.title));

    if snapshot.is_empty() {
        return match playing {
            Some(playing) => format!("{}\n\n📭 No more songs in the queue.", playing),
            None => "📭 The music queue is empty. Use `/play` to add some songs!".to_string(),
        };
    }

    // <t:..:R> lo renderiza Discord como tiempo relativo
    let list = snapshot
        .entries
        .iter()
        .enumerate()
        .map(|(i, track)| {
            format!(
                "{}. **{}** (requested by {}, added <t:{}:R>)",
                i + 1,
                track.title,
                track.requested_by,
                track.added_at.timestamp()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let plural = if snapshot.total == 1 { "" } else { "s" };
    let mut message = match snapshot.remaining() {
        0 => format!("🎵 **Music Queue** ({} song{}):\n\n{}", snapshot.total, plural, list),
        more => format!(
            "🎵 **Music Queue** ({} songs, showing first {}):\n\n{}\n\n... and {} more songs",
            snapshot.total,
            snapshot.entries.len(),
            list,
            more
        ),
    };

    if let Some(playing) = playing {
        message = format!("{}\n\n{}", playing, message);
    }
    if !snapshot.total_duration.is_zero() {
        message.push_str(&format!("\n⏱️ Total: {}", format_duration(snapshot.total_duration)));
    }
    message
}

pub const NOT_IN_VOICE: &str = "❌ You must be in a voice channel to use this command.";
pub const NOTHING_PLAYING: &str = "❌ There is no music currently playing!";
pub const SKIPPED: &str = "⏭️ Skipped the current song!";
pub const STOPPED: &str = "⏹️ Music stopped and disconnected from voice channel!";
pub const GUILD_ONLY: &str = "❌ This command can only be used in a server.";
