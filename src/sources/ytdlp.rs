use async_process::Command;
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};
use tracing::{debug, info, warn};
use url::Url;

use super::{BackendFailure, ExtractionBackend, ResolvedSource, SearchCandidate, SearchProvider};
use crate::config::ResolverConfig;

const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (Linux; Android 11; SM-A515F) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Mobile Safari/537.36";

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    url: Option<String>,
    webpage_url: Option<String>,
    ext: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    playlist_title: Option<String>,
    formats: Option<Vec<Format>>,
}

#[derive(Debug, Deserialize)]
struct Format {
    format_id: Option<String>,
    url: Option<String>,
    ext: Option<String>,
    acodec: Option<String>,
}

impl Format {
    fn http_url(&self) -> Option<&str> {
        self.url.as_deref().filter(|u| u.starts_with("http"))
    }

    fn has_audio(&self) -> bool {
        self.acodec.as_deref().is_some_and(|c| c != "none")
    }
}

/// Metadata de un video o entrada de playlist
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub title: String,
    pub url: String,
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    pub title: String,
    pub entries: Vec<VideoMetadata>,
}

/// Cliente yt-dlp: extracción primaria, búsqueda y metadata
#[derive(Debug, Clone)]
pub struct YtDlpClient {
    cookies: Option<PathBuf>,
    age_gate_bypass: bool,
}

impl YtDlpClient {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            cookies: config.cookies_file.clone(),
            age_gate_bypass: config.age_gate_bypass,
        }
    }

    /// Verifica que yt-dlp esté disponible
    pub async fn verify_dependencies() -> anyhow::Result<()> {
        let output = Command::new("yt-dlp").arg("--version").output().await?;
        if !output.status.success() {
            anyhow::bail!("yt-dlp no disponible");
        }
        info!(
            "✅ yt-dlp versión: {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }

    fn common_args(&self) -> Vec<String> {
        let mut args = vec!["--no-playlist".to_string(), "--no-warnings".to_string()];

        if let Some(cookies) = &self.cookies {
            args.push("--cookies".into());
            args.push(cookies.display().to_string());
        }

        if self.age_gate_bypass {
            args.push("--extractor-args".into());
            args.push("youtube:player_client=tv_embedded,web".into());
        }

        args
    }

    /// Metadata de una URL de video
    pub async fn get_metadata(&self, url: &str) -> Result<VideoMetadata, BackendFailure> {
        let mut args = self.common_args();
        args.extend(["--dump-single-json".into(), "--skip-download".into(), url.into()]);

        let stdout = run_ytdlp(&args).await?;
        let info: YtDlpInfo = parse_json(&stdout)?;

        Ok(VideoMetadata {
            title: info.title.unwrap_or_else(|| "Unknown Title".into()),
            url: info.webpage_url.unwrap_or_else(|| url.to_string()),
            duration: info.duration.map(Duration::from_secs_f64),
        })
    }

    /// Entradas de una playlist en orden
    pub async fn get_playlist(&self, url: &str) -> Result<Playlist, BackendFailure> {
        let mut args = vec!["--dump-json".to_string(), "--flat-playlist".into(), "--no-warnings".into()];
        if let Some(cookies) = &self.cookies {
            args.push("--cookies".into());
            args.push(cookies.display().to_string());
        }
        args.push(url.into());

        let stdout = run_ytdlp(&args).await?;
        let entries = parse_flat_entries(&stdout);

        if entries.is_empty() {
            return Err(BackendFailure::new("This playlist is empty or private."));
        }

        let title = playlist_title(&stdout).unwrap_or_else(|| "Playlist".into());
        info!("🎵 Playlist {} extraída con {} tracks", title, entries.len());
        Ok(Playlist { title, entries })
    }
}

#[async_trait]
impl ExtractionBackend for YtDlpClient {
    async fn extract(&self, url: &str) -> Result<ResolvedSource, BackendFailure> {
        let mut args = self.common_args();
        args.extend([
            "--dump-single-json".into(),
            "--skip-download".into(),
            "--format".into(),
            "bestaudio[ext=webm]/bestaudio[ext=m4a]/bestaudio/best".into(),
            url.into(),
        ]);

        let stdout = run_ytdlp(&args).await?;
        let info: YtDlpInfo = parse_json(&stdout)?;
        source_from_info(info)
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

#[async_trait]
impl SearchProvider for YtDlpClient {
    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchCandidate>, BackendFailure> {
        info!("🔍 Buscando en YouTube: {}", query);

        let search_query = format!("ytsearch{}:{}", limit, query);
        let args = vec![
            "--dump-json".to_string(),
            "--flat-playlist".into(),
            "--skip-download".into(),
            "--no-warnings".into(),
            search_query,
        ];

        let stdout = run_ytdlp(&args).await?;
        let results: Vec<SearchCandidate> = stdout
            .lines()
            .filter_map(|line| serde_json::from_str::<YtDlpInfo>(line).ok())
            .filter_map(|info| {
                Some(SearchCandidate {
                    url: entry_url(&info)?,
                    title: info.title.unwrap_or_else(|| "Unknown Title".into()),
                    duration: info.duration.map(Duration::from_secs_f64),
                    channel: info.channel.or(info.uploader),
                })
            })
            .take(limit)
            .collect();

        if results.is_empty() {
            return Err(BackendFailure::new(format!("No results found for {}", query)));
        }

        debug!("🔍 Encontrados {} resultados para: {}", results.len(), query);
        Ok(results)
    }
}

/// Extractor secundario con estrategia anti-bot propia: espera aleatoria,
/// user-agent móvil y clientes de reproductor alternativos.
#[derive(Debug, Clone)]
pub struct YtDlpFallback {
    cookies: Option<PathBuf>,
    age_gate_bypass: bool,
    delay_min: Duration,
    delay_max: Duration,
}

impl YtDlpFallback {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            cookies: config.cookies_file.clone(),
            age_gate_bypass: config.age_gate_bypass,
            delay_min: config.secondary_delay_min,
            delay_max: config.secondary_delay_max,
        }
    }

    fn random_delay(&self) -> Duration {
        let min = self.delay_min.as_millis() as u64;
        let max = (self.delay_max.as_millis() as u64).max(min);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    fn args(&self) -> Vec<String> {
        let clients = if self.age_gate_bypass {
            "youtube:player_client=android,ios,tv_embedded"
        } else {
            "youtube:player_client=android,ios"
        };

        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".into(),
            "--user-agent".into(),
            FALLBACK_USER_AGENT.into(),
            "--add-header".into(),
            "Accept-Language:en-US,en;q=0.9".into(),
            "--extractor-args".into(),
            clients.into(),
            "--sleep-requests".into(),
            "1".into(),
        ];

        if let Some(cookies) = &self.cookies {
            args.push("--cookies".into());
            args.push(cookies.display().to_string());
        }

        args
    }

    async fn get_url_only(&self, url: &str) -> Result<ResolvedSource, BackendFailure> {
        info!("🔄 [YTDLP] Intentando método alternativo --get-url...");

        let mut args = self.args();
        args.extend(["--get-url".into(), "--format".into(), "bestaudio".into(), url.into()]);

        let stdout = run_ytdlp(&args).await?;
        let direct = stdout
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with("http"))
            .ok_or_else(|| {
                BackendFailure::new(format!(
                    "yt-dlp returned unexpected output: {}",
                    stdout.chars().take(100).collect::<String>()
                ))
            })?;

        Ok(ResolvedSource {
            stream_url: direct.to_string(),
            mime_type: "application/octet-stream".into(),
            resolved_title: "Audio Stream".into(),
            duration: None,
        })
    }
}

#[async_trait]
impl ExtractionBackend for YtDlpFallback {
    async fn extract(&self, url: &str) -> Result<ResolvedSource, BackendFailure> {
        let delay = self.random_delay();
        info!("⏳ [YTDLP] Esperando {:?} antes de extraer...", delay);
        tokio::time::sleep(delay).await;

        let mut args = self.args();
        args.extend([
            "--dump-single-json".into(),
            "--skip-download".into(),
            "--format".into(),
            "bestaudio/best".into(),
            url.into(),
        ]);

        match run_ytdlp(&args).await.and_then(|stdout| parse_json(&stdout)) {
            Ok(info) => source_from_info(info),
            Err(failure) => {
                warn!("❌ [YTDLP] Extracción JSON falló: {}", failure);
                self.get_url_only(url).await.map_err(|_| failure)
            }
        }
    }

    fn name(&self) -> &'static str {
        "yt-dlp fallback"
    }
}

async fn run_ytdlp(args: &[String]) -> Result<String, BackendFailure> {
    debug!("🔧 yt-dlp {}", args.join(" "));

    let output = Command::new("yt-dlp")
        .args(args)
        .output()
        .await
        .map_err(|e| BackendFailure::new(format!("yt-dlp could not be executed: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BackendFailure::new(stderr.trim().to_string()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn parse_json(stdout: &str) -> Result<YtDlpInfo, BackendFailure> {
    serde_json::from_str(stdout.trim())
        .map_err(|e| BackendFailure::new(format!("Error al parsear respuesta de yt-dlp: {}", e)))
}

fn parse_flat_entries(stdout: &str) -> Vec<VideoMetadata> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<YtDlpInfo>(line).ok())
        .filter_map(|info| {
            let url = entry_url(&info)?;
            Some(VideoMetadata {
                title: info.title.unwrap_or_else(|| "Unknown Title".into()),
                url,
                duration: info.duration.map(Duration::from_secs_f64),
            })
        })
        .collect()
}

fn playlist_title(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<YtDlpInfo>(line).ok())
        .find_map(|info| info.playlist_title)
}

fn entry_url(info: &YtDlpInfo) -> Option<String> {
    info.webpage_url
        .clone()
        .or_else(|| info.url.clone().filter(|u| u.starts_with("http")))
        .or_else(|| {
            info.id
                .as_ref()
                .map(|id| format!("https://www.youtube.com/watch?v={}", id))
        })
}

/// Elige el stream de audio: URL directa primero, luego formatos por preferencia.
fn select_stream(info: &YtDlpInfo) -> Option<(String, Option<String>)> {
    if let Some(direct) = info.url.as_deref().filter(|u| u.starts_with("http")) {
        return Some((direct.to_string(), info.ext.clone()));
    }

    let formats = info.formats.as_deref()?;
    let audio: Vec<&Format> = formats
        .iter()
        .filter(|f| f.has_audio() && f.http_url().is_some())
        .collect();

    let preferred = audio
        .iter()
        .find(|f| {
            f.ext.as_deref() == Some("webm") && f.acodec.as_deref().is_some_and(|c| c.contains("opus"))
        })
        .or_else(|| audio.iter().find(|f| f.ext.as_deref() == Some("m4a")))
        .or_else(|| audio.iter().find(|f| f.ext.as_deref() == Some("webm")))
        .or_else(|| audio.first())
        .copied();

    let chosen = match preferred {
        Some(format) => format,
        None => {
            warn!("⚠️ [YTDLP] Sin formatos de audio, usando cualquier formato con URL");
            formats.iter().find(|f| f.http_url().is_some())?
        }
    };

    debug!(
        "✅ Formato seleccionado: {} ({})",
        chosen.format_id.as_deref().unwrap_or("?"),
        chosen.ext.as_deref().unwrap_or("unknown")
    );
    Some((chosen.http_url()?.to_string(), chosen.ext.clone()))
}

fn source_from_info(info: YtDlpInfo) -> Result<ResolvedSource, BackendFailure> {
    let (stream_url, ext) = select_stream(&info).ok_or_else(|| {
        BackendFailure::new("Could not extract stream URL from yt-dlp response")
    })?;

    Ok(ResolvedSource {
        stream_url,
        mime_type: mime_for_ext(ext.as_deref()).to_string(),
        resolved_title: info
            .title
            .or(info.uploader.or(info.channel).map(|c| format!("Audio by {}", c)))
            .unwrap_or_else(|| "Unknown Title".into()),
        duration: info.duration.map(Duration::from_secs_f64),
    })
}

fn mime_for_ext(ext: Option<&str>) -> &'static str {
    match ext {
        Some("webm") => "audio/webm",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("mp3") => "audio/mpeg",
        Some("ogg") | Some("opus") => "audio/ogg",
        _ => "application/octet-stream",
    }
}

/// Verifica si la URL es de YouTube
pub fn is_youtube_url(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_owned))
        .is_some_and(|host| {
            matches!(
                host.as_str(),
                "www.youtube.com" | "youtube.com" | "youtu.be" | "m.youtube.com" | "music.youtube.com"
            )
        })
}

/// URL de playlist: `/playlist?list=...` o un `list=` sin video concreto.
pub fn is_playlist_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if !is_youtube_url(url) {
        return false;
    }

    let has_list = parsed.query_pairs().any(|(k, _)| k == "list");
    let has_video = parsed.query_pairs().any(|(k, _)| k == "v");
    has_list && (parsed.path() == "/playlist" || !has_video)
}
