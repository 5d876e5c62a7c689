use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Host de consola
    pub guild_id: u64,

    // Catálogo
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    pub catalog_market: String,

    // Audio
    pub default_volume: u8,
    pub max_queue_size: usize,
    pub opus_bitrate: u32,
    pub frame_size: usize,

    // Timers del motor
    pub empty_channel_timeout: Duration,
    pub empty_queue_timeout: Duration,
    pub paused_timeout: Duration,
    pub connect_timeout: Duration,
    pub skip_grace: Duration,

    // Binarios externos
    pub ffmpeg_path: String,
    pub ytdlp_path: String,
    pub ytdlp_cookies: Option<PathBuf>,

    // Rendimiento
    pub worker_threads: usize,
}

fn parse_or<T>(value: Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} inválido: {raw:?}")),
        _ => Ok(default),
    }
}

fn duration_or(value: Option<String>, name: &str, default: Duration) -> Result<Duration> {
    match value {
        Some(raw) if !raw.trim().is_empty() => humantime::parse_duration(raw.trim())
            .with_context(|| format!("{name} inválido: {raw:?}")),
        _ => Ok(default),
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Construye la configuración a partir de una fuente de variables
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            guild_id: parse_or(var("GUILD_ID"), "GUILD_ID", defaults.guild_id)?,

            spotify_client_id: var("SPOTIFY_CLIENT_ID").unwrap_or_default(),
            spotify_client_secret: var("SPOTIFY_CLIENT_SECRET").unwrap_or_default(),
            catalog_market: var("CATALOG_MARKET")
                .filter(|market| !market.trim().is_empty())
                .unwrap_or(defaults.catalog_market),

            default_volume: parse_or(
                var("DEFAULT_VOLUME"),
                "DEFAULT_VOLUME",
                defaults.default_volume,
            )?,
            max_queue_size: parse_or(
                var("MAX_QUEUE_SIZE"),
                "MAX_QUEUE_SIZE",
                defaults.max_queue_size,
            )?,
            opus_bitrate: parse_or(var("OPUS_BITRATE"), "OPUS_BITRATE", defaults.opus_bitrate)?,
            frame_size: parse_or(var("FRAME_SIZE"), "FRAME_SIZE", defaults.frame_size)?,

            empty_channel_timeout: duration_or(
                var("EMPTY_CHANNEL_TIMEOUT"),
                "EMPTY_CHANNEL_TIMEOUT",
                defaults.empty_channel_timeout,
            )?,
            empty_queue_timeout: duration_or(
                var("EMPTY_QUEUE_TIMEOUT"),
                "EMPTY_QUEUE_TIMEOUT",
                defaults.empty_queue_timeout,
            )?,
            paused_timeout: duration_or(
                var("PAUSED_TIMEOUT"),
                "PAUSED_TIMEOUT",
                defaults.paused_timeout,
            )?,
            connect_timeout: duration_or(
                var("CONNECT_TIMEOUT"),
                "CONNECT_TIMEOUT",
                defaults.connect_timeout,
            )?,
            skip_grace: duration_or(var("SKIP_GRACE"), "SKIP_GRACE", defaults.skip_grace)?,

            ffmpeg_path: var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            ytdlp_path: var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            ytdlp_cookies: var("YTDLP_COOKIES")
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),

            worker_threads: parse_or(
                var("WORKER_THREADS"),
                "WORKER_THREADS",
                defaults.worker_threads,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0 and 100
    /// - Opus bitrate between 8kbps and 510kbps
    /// - Frame size must be a valid Opus frame at 48kHz (2.5ms to 60ms)
    /// - Guild id, queue size and worker threads must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.guild_id == 0 {
            anyhow::bail!("Guild id must be greater than 0");
        }

        if self.default_volume > 100 {
            anyhow::bail!(
                "Default volume must be between 0 and 100, got: {}",
                self.default_volume
            );
        }

        if self.opus_bitrate > 510_000 {
            anyhow::bail!("Opus bitrate cannot exceed 510kbps, got: {}", self.opus_bitrate);
        }

        if self.opus_bitrate < 8_000 {
            anyhow::bail!("Opus bitrate too low, minimum 8kbps, got: {}", self.opus_bitrate);
        }

        if !matches!(self.frame_size, 120 | 240 | 480 | 960 | 1920 | 2880) {
            anyhow::bail!("Invalid Opus frame size at 48kHz: {}", self.frame_size);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.worker_threads == 0 {
            anyhow::bail!("Worker threads must be greater than 0");
        }

        if self.connect_timeout.is_zero() {
            anyhow::bail!("Connect timeout must be greater than 0");
        }

        Ok(())
    }

    pub fn has_catalog_credentials(&self) -> bool {
        !self.spotify_client_id.is_empty() && !self.spotify_client_secret.is_empty()
    }

    /// Resumen para logs, sin credenciales
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Guild: {}\n  \
            Catalog: {} (market {})\n  \
            Audio: {}% vol, {}kbps, {}ms frames, {} queue\n  \
            Timers: channel {}, queue {}, paused {}, connect {}, skip {}\n  \
            Binaries: {} / {}{}",
            self.guild_id,
            if self.has_catalog_credentials() {
                "configured"
            } else {
                "disabled"
            },
            self.catalog_market,
            self.default_volume,
            self.opus_bitrate / 1000,
            self.frame_size / 48,
            self.max_queue_size,
            humantime::format_duration(self.empty_channel_timeout),
            humantime::format_duration(self.empty_queue_timeout),
            humantime::format_duration(self.paused_timeout),
            humantime::format_duration(self.connect_timeout),
            humantime::format_duration(self.skip_grace),
            self.ffmpeg_path,
            self.ytdlp_path,
            if self.ytdlp_cookies.is_some() {
                " (cookies)"
            } else {
                ""
            },
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            guild_id: 1,

            spotify_client_id: String::new(),
            spotify_client_secret: String::new(),
            catalog_market: "BR".to_string(),

            default_volume: 100,
            max_queue_size: 1000,
            opus_bitrate: 96000, // 96kbps
            frame_size: 960,     // 20ms at 48kHz

            empty_channel_timeout: Duration::from_secs(5 * 60),
            empty_queue_timeout: Duration::from_secs(10 * 60),
            paused_timeout: Duration::from_secs(20 * 60),
            connect_timeout: Duration::from_secs(10),
            skip_grace: Duration::from_secs(2),

            ffmpeg_path: "ffmpeg".to_string(),
            ytdlp_path: "yt-dlp".to_string(),
            ytdlp_cookies: None,

            worker_threads: num_cpus::get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.default_volume, 100);
        assert_eq!(config.catalog_market, "BR");
        assert_eq!(config.empty_queue_timeout, Duration::from_secs(600));
        assert_eq!(config.skip_grace, Duration::from_secs(2));
        assert_eq!(config.ytdlp_cookies, None);
        assert!(!config.has_catalog_credentials());
    }

    #[test]
    fn durations_use_humantime() {
        let config = load(&[
            ("EMPTY_CHANNEL_TIMEOUT", "90s"),
            ("PAUSED_TIMEOUT", "1h 30m"),
            ("YTDLP_COOKIES", "/tmp/cookies.txt"),
        ])
        .unwrap();

        assert_eq!(config.empty_channel_timeout, Duration::from_secs(90));
        assert_eq!(config.paused_timeout, Duration::from_secs(90 * 60));
        assert_eq!(config.ytdlp_cookies, Some(PathBuf::from("/tmp/cookies.txt")));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(load(&[("DEFAULT_VOLUME", "150")]).is_err());
        assert!(load(&[("DEFAULT_VOLUME", "alto")]).is_err());
        assert!(load(&[("FRAME_SIZE", "1000")]).is_err());
        assert!(load(&[("OPUS_BITRATE", "600000")]).is_err());
        assert!(load(&[("SKIP_GRACE", "pronto")]).is_err());
        assert!(load(&[("MAX_QUEUE_SIZE", "0")]).is_err());
    }

    #[test]
    fn summary_hides_credentials() {
        let config = load(&[
            ("SPOTIFY_CLIENT_ID", "id-secreto"),
            ("SPOTIFY_CLIENT_SECRET", "clave-secreta"),
        ])
        .unwrap();

        let summary = config.summary();
        assert!(summary.contains("configured"));
        assert!(!summary.contains("id-secreto"));
        assert!(!summary.contains("clave-secreta"));
        assert!(summary.contains("10m"));
    }
}
