use serenity::model::id::{GuildId, UserId};
use std::fmt::Write;
use std::time::Duration;

use crate::audio::filters::AudioFilter;
use crate::audio::queue::RepeatMode;
use crate::audio::track::{Track, TrackOrigin};
use crate::sources::{CollectionKind, ParentCollection};

pub const UPCOMING_LIMIT: usize = 10;

/// Datos de un track para el panel de estado
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackView {
    pub title: String,
    pub url: String,
    pub author: Option<String>,
    pub duration: Option<Duration>,
    pub requester: Option<UserId>,
    pub elapsed: Option<Duration>,
    pub collection: Option<String>,
    pub looped: bool,
    pub autoplay: bool,
}

impl From<&Track> for TrackView {
    fn from(track: &Track) -> Self {
        let url = track
            .video()
            .map(|video| video.url.clone())
            .unwrap_or_else(|| track.source.url().to_string());

        Self {
            title: track.title().to_string(),
            url,
            author: track.source.author().map(|author| author.name.clone()),
            duration: track.source.duration(),
            requester: track.requester,
            elapsed: track.elapsed(),
            collection: track.parent.as_ref().map(|parent| parent.title.clone()),
            looped: track.looped,
            autoplay: track.origin == TrackOrigin::Autoplay,
        }
    }
}

/// Instantánea del estado de una guild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueView {
    pub guild_id: GuildId,
    pub connected: bool,
    pub now_playing: Option<TrackView>,
    pub upcoming: Vec<TrackView>,
    pub total_tracks: usize,
    pub total_duration: Duration,
    pub repeat: RepeatMode,
    pub autoplay: bool,
    pub paused: bool,
    pub volume: u8,
    pub effects: Vec<AudioFilter>,
}

impl QueueView {
    /// Vista de una guild sin conexión ni cola
    pub fn idle(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            connected: false,
            now_playing: None,
            upcoming: Vec::new(),
            total_tracks: 0,
            total_duration: Duration::ZERO,
            repeat: RepeatMode::Off,
            autoplay: false,
            paused: false,
            volume: 0,
            effects: Vec::new(),
        }
    }

    pub fn is_idle(&self) -> bool {
        !self.connected && self.now_playing.is_none() && self.total_tracks == 0
    }
}

/// Formatea una duración en formato legible
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Barra visual de volumen
pub fn volume_bar(volume: u8) -> String {
    let segments = 20;
    let filled = (volume.min(100) as usize * segments) / 100;
    let bar = "█".repeat(filled) + &"▒".repeat(segments - filled);
    format!("`[{}]`", bar)
}

fn link(title: &str, url: &str) -> String {
    format!("[{}]({})", title, url)
}

fn track_line(track: &TrackView) -> String {
    let mut line = link(&track.title, &track.url);
    if let Some(author) = &track.author {
        let _ = write!(line, " - {}", author);
    }
    if let Some(duration) = track.duration {
        let _ = write!(line, " `[{}]`", format_duration(duration));
    }
    if track.looped {
        line.push_str(" 🔁");
    }
    if track.autoplay {
        line.push_str(" ♾️");
    }
    line
}

/// Panel de estado en texto (markdown)
pub fn render_status(view: &QueueView) -> String {
    if view.is_idle() {
        return "😴 **Nada reproduciéndose**\n\n💡 Usa `play <canción>` para agregar música"
            .to_string();
    }

    let mut out = String::new();

    match &view.now_playing {
        Some(current) => {
            let status = if view.paused {
                "⏸️"
            } else {
                match view.repeat {
                    RepeatMode::Track => "🔂",
                    RepeatMode::Queue => "🔁",
                    RepeatMode::Off => "▶️",
                }
            };
            let _ = writeln!(out, "{} **Reproduciendo:** {}", status, track_line(current));

            if let Some(elapsed) = current.elapsed {
                let progress = match current.duration {
                    Some(total) => format!("{} / {}", format_duration(elapsed), format_duration(total)),
                    None => format_duration(elapsed),
                };
                let _ = writeln!(out, "⏱️ {}", progress);
            }
            if let Some(requester) = current.requester {
                let _ = writeln!(out, "👤 Solicitado por <@{}>", requester);
            }
            if let Some(collection) = &current.collection {
                let _ = writeln!(out, "📁 {}", collection);
            }
        }
        None => out.push_str("⏹️ **Sin reproducción**\n"),
    }

    if !view.upcoming.is_empty() {
        out.push_str("\n**Próximas canciones**\n");
        for (i, track) in view.upcoming.iter().take(UPCOMING_LIMIT).enumerate() {
            let _ = writeln!(out, "**{}**. {}", i + 1, track_line(track));
        }
        if view.total_tracks > UPCOMING_LIMIT {
            let _ = writeln!(out, "… y {} más", view.total_tracks - UPCOMING_LIMIT);
        }
    }

    let _ = write!(out, "\n**Total:** {} canciones", view.total_tracks);
    if view.total_duration > Duration::ZERO {
        let _ = write!(out, " • **Duración:** {}", format_duration(view.total_duration));
    }
    let _ = write!(
        out,
        "\n🔁 Repetición: {} • ♾️ Autoplay: {} • 🔊 {}%",
        view.repeat.label(),
        if view.autoplay { "activado" } else { "desactivado" },
        view.volume
    );

    if !view.effects.is_empty() {
        let effects: Vec<&str> = view.effects.iter().map(|effect| effect.label()).collect();
        let _ = write!(out, "\n🎛️ Efectos: {}", effects.join(", "));
    }

    out
}

/// Anuncio de un track agregado
pub fn announce_track(track: &Track, next: bool) -> String {
    let mut message = format!("🎵 {}", link(track.title(), track.source.url()));
    if let Some(author) = track.source.author() {
        match &author.url {
            Some(url) => {
                let _ = write!(message, " de {}", link(&author.name, url));
            }
            None => {
                let _ = write!(message, " de **{}**", author.name);
            }
        }
    }
    message.push_str(if next {
        " agregada como próxima!"
    } else {
        " agregada a la cola!"
    });
    message
}

/// Anuncio de una colección agregada
pub fn announce_collection(
    parent: &ParentCollection,
    count: usize,
    total: Duration,
    inverse: bool,
) -> String {
    let kind = match parent.kind {
        CollectionKind::VideoPlaylist | CollectionKind::CatalogPlaylist => "Playlist",
        CollectionKind::CatalogAlbum => "Álbum",
        CollectionKind::CatalogArtist => "Top canciones de",
    };

    let mut message = format!("📁 {} {}", kind, link(&parent.title, &parent.url));
    match &parent.author.url {
        Some(url) => {
            let _ = write!(message, " de {}", link(&parent.author.name, url));
        }
        None => {
            let _ = write!(message, " de **{}**", parent.author.name);
        }
    }
    let _ = write!(
        message,
        ": {} canciones ({}) agregadas",
        count,
        format_duration(total)
    );
    if inverse {
        message.push_str(" en orden inverso");
    }
    message.push('!');
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{Author, TrackSource, VideoMeta};
    use pretty_assertions::assert_eq;

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::from_secs(59)), "0:59");
        assert_eq!(format_duration(Duration::from_secs(3 * 60 + 7)), "3:07");
        assert_eq!(format_duration(Duration::from_secs(3600 + 61)), "1:01:01");
    }

    #[test]
    fn volume_bar_fills_proportionally() {
        assert_eq!(volume_bar(50), format!("`[{}{}]`", "█".repeat(10), "▒".repeat(10)));
        assert_eq!(volume_bar(0), format!("`[{}]`", "▒".repeat(20)));
    }

    #[test]
    fn idle_view_renders_placeholder() {
        let view = QueueView::idle(GuildId::new(1));
        assert!(render_status(&view).contains("Nada reproduciéndose"));
    }

    #[test]
    fn renders_now_playing_and_upcoming() {
        let current = Track::new(
            TrackSource::Video(
                VideoMeta::new("aaaaaaaaaaa", "Primera")
                    .with_duration(Duration::from_secs(200))
                    .with_channel(Author::new("Canal")),
            ),
            Some(UserId::new(42)),
        );
        let next = Track::new(TrackSource::Video(VideoMeta::new("bbbbbbbbbbb", "Segunda")), None);

        let view = QueueView {
            guild_id: GuildId::new(1),
            connected: true,
            now_playing: Some(TrackView::from(&current)),
            upcoming: vec![TrackView::from(&next)],
            total_tracks: 1,
            total_duration: Duration::ZERO,
            repeat: RepeatMode::Queue,
            autoplay: true,
            paused: false,
            volume: 80,
            effects: vec![AudioFilter::Bassboost],
        };

        let rendered = render_status(&view);
        assert!(rendered.contains("🔁 **Reproduciendo:** [Primera](https://www.youtube.com/watch?v=aaaaaaaaaaa) - Canal `[3:20]`"));
        assert!(rendered.contains("<@42>"));
        assert!(rendered.contains("**1**. [Segunda]"));
        assert!(rendered.contains("Repetición: cola"));
        assert!(rendered.contains("Bassboost (Dinámico)"));
    }

    #[test]
    fn announces_inverted_collections() {
        let parent = ParentCollection {
            kind: CollectionKind::CatalogAlbum,
            id: "al".into(),
            title: "Elis & Tom".into(),
            url: "https://open.spotify.com/album/al".into(),
            image: None,
            author: Author::new("Elis Regina"),
        };

        assert_eq!(
            announce_collection(&parent, 3, Duration::from_secs(600), true),
            "📁 Álbum [Elis & Tom](https://open.spotify.com/album/al) de **Elis Regina**: \
             3 canciones (10:00) agregadas en orden inverso!"
        );
    }
}
