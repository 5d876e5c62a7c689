use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{
    Author, CollectionKind, ParentCollection, ResolveError, ResolvedCollection, TrackResolver,
    VideoMeta,
};
use crate::config::Config;

/// Sugerencias pedidas al mix de un video para autoplay
const RELATED_LIMIT: usize = 25;

/// Marcas de yt-dlp para videos que ya no existen dentro de una playlist
const UNAVAILABLE_TITLES: [&str; 2] = ["[Deleted video]", "[Private video]"];

/// Cliente de la plataforma de video sobre `yt-dlp`
pub struct YtDlpClient {
    binary: String,
    cookies: Option<PathBuf>,
    // Limitar procesos concurrentes para evitar rate limiting
    permits: Semaphore,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

/// Información extraída de yt-dlp (video o entrada plana de playlist)
#[derive(Debug, Deserialize)]
struct YtDlpEntry {
    id: String,
    title: Option<String>,
    duration: Option<f64>,
    channel: Option<String>,
    uploader: Option<String>,
    channel_url: Option<String>,
    uploader_url: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
    is_live: Option<bool>,
    live_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YtDlpPlaylist {
    id: String,
    title: Option<String>,
    webpage_url: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    channel_url: Option<String>,
    uploader_url: Option<String>,
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
    #[serde(default)]
    entries: Vec<Option<YtDlpEntry>>,
}

impl YtDlpEntry {
    fn into_video(self) -> Option<VideoMeta> {
        let title = self.title?;
        if UNAVAILABLE_TITLES.contains(&title.as_str()) {
            return None;
        }

        let mut video = VideoMeta::new(self.id, title);
        video.duration = self
            .duration
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64);
        video.channel = self.channel.or(self.uploader).map(|name| {
            let author = Author::new(name);
            match self.channel_url.or(self.uploader_url) {
                Some(url) => author.with_url(url),
                None => author,
            }
        });
        video.thumbnail = self
            .thumbnail
            .or_else(|| self.thumbnails.into_iter().last().map(|thumb| thumb.url));
        video.is_live =
            self.is_live.unwrap_or(false) || self.live_status.as_deref() == Some("is_live");
        Some(video)
    }
}

/// Convierte la salida `--dump-json` (un objeto por línea) en videos
fn parse_lines(stdout: &str) -> Result<Vec<VideoMeta>, ResolveError> {
    let mut videos = Vec::new();
    for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
        let entry: YtDlpEntry = serde_json::from_str(line)?;
        videos.extend(entry.into_video());
    }
    Ok(videos)
}

fn parse_playlist(stdout: &str, url: &str) -> Result<ResolvedCollection, ResolveError> {
    let playlist: YtDlpPlaylist = serde_json::from_str(stdout)?;

    let items: Vec<VideoMeta> = playlist
        .entries
        .into_iter()
        .flatten()
        .filter_map(YtDlpEntry::into_video)
        .collect();

    if items.is_empty() {
        return Err(ResolveError::NotFound(url.to_string()));
    }

    let owner = playlist
        .channel
        .or(playlist.uploader)
        .unwrap_or_else(|| "YouTube".to_string());
    let author = match playlist.channel_url.or(playlist.uploader_url) {
        Some(owner_url) => Author::new(owner).with_url(owner_url),
        None => Author::new(owner),
    };

    let parent = ParentCollection {
        kind: CollectionKind::VideoPlaylist,
        url: playlist
            .webpage_url
            .unwrap_or_else(|| format!("https://www.youtube.com/playlist?list={}", playlist.id)),
        title: playlist.title.unwrap_or_else(|| playlist.id.clone()),
        id: playlist.id,
        image: playlist.thumbnails.into_iter().last().map(|thumb| thumb.url),
        author,
    };

    Ok(ResolvedCollection { parent, items })
}

/// Clasifica un fallo de yt-dlp a partir de su stderr
fn classify_failure(stderr: &str) -> ResolveError {
    let message = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("sin salida")
        .trim()
        .to_string();
    let lower = stderr.to_lowercase();

    if lower.contains("sign in to confirm")
        || lower.contains("not a bot")
        || lower.contains("http error 429")
        || lower.contains("too many requests")
    {
        ResolveError::Blocked(message)
    } else {
        ResolveError::Extractor(message)
    }
}

impl YtDlpClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            cookies: None,
            permits: Semaphore::new(3),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.ytdlp_path.clone()).with_cookies(config.ytdlp_cookies.clone())
    }

    pub fn with_cookies(mut self, cookies: Option<PathBuf>) -> Self {
        self.cookies = cookies;
        self
    }

    async fn run(&self, args: &[&str], target: &str) -> Result<String, ResolveError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ResolveError::Extractor("cliente cerrado".to_string()))?;

        let mut command = Command::new(&self.binary);
        command.arg("--no-warnings");
        if let Some(cookies) = &self.cookies {
            command.arg("--cookies").arg(cookies);
        }
        let output = command.args(args).arg("--").arg(target).output().await?;

        if !output.status.success() {
            let error = classify_failure(&String::from_utf8_lossy(&output.stderr));
            warn!("⚠️ yt-dlp falló para {}: {}", target, error);
            return Err(error);
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// URL directa del mejor stream de audio
    pub async fn stream_url(&self, url: &str) -> Result<String, ResolveError> {
        debug!("🎵 Obteniendo URL de stream para: {}", url);

        let stdout = self
            .run(&["--no-playlist", "-f", "bestaudio/best", "--get-url"], url)
            .await?;

        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ResolveError::Extractor(format!("sin URL de stream para {url}")))
    }

    /// Versión instalada de yt-dlp
    pub async fn version(&self) -> Result<String, ResolveError> {
        let output = Command::new(&self.binary).arg("--version").output().await?;
        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl TrackResolver for YtDlpClient {
    async fn search_one(&self, query: &str) -> Result<Option<VideoMeta>, ResolveError> {
        info!("🔍 Buscando en YouTube: {}", query);

        let stdout = self
            .run(
                &["--flat-playlist", "--dump-json"],
                &format!("ytsearch1:{query}"),
            )
            .await?;

        Ok(parse_lines(&stdout)?.into_iter().next())
    }

    async fn resolve_video(&self, url: &str) -> Result<Option<VideoMeta>, ResolveError> {
        debug!("📊 Obteniendo info de: {}", url);

        let stdout = self.run(&["--dump-json", "--no-playlist"], url).await?;
        Ok(parse_lines(&stdout)?.into_iter().next())
    }

    async fn resolve_playlist(&self, url: &str) -> Result<ResolvedCollection, ResolveError> {
        info!("📋 Obteniendo playlist: {}", url);

        let stdout = self.run(&["-J", "--flat-playlist"], url).await?;
        let collection = parse_playlist(&stdout, url)?;

        debug!(
            "📋 Playlist {} con {} videos",
            collection.parent.title,
            collection.items.len()
        );
        Ok(collection)
    }

    async fn related_to(&self, video_id: &str) -> Result<Vec<VideoMeta>, ResolveError> {
        debug!("♾️ Buscando relacionados de {}", video_id);

        let mix = format!("https://www.youtube.com/watch?v={video_id}&list=RD{video_id}");
        let limit = RELATED_LIMIT.to_string();
        let stdout = self
            .run(&["--flat-playlist", "--dump-json", "--playlist-end", limit.as_str()], &mix)
            .await?;

        Ok(parse_lines(&stdout)?
            .into_iter()
            .filter(|video| video.id != video_id)
            .collect())
    }
}
