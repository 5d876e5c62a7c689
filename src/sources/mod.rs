//! # Sources Module
//!
//! Track metadata providers and the types the engine uses to describe what
//! a queue entry plays.
//!
//! - [`TrackSource`] is the immutable descriptor of a queue entry: either a
//!   video-platform item that can be streamed directly, or a music-catalog
//!   item that still needs a matching video before it can play.
//! - [`TrackResolver`] is the seam towards the video platform (search,
//!   single video, playlist, related videos). [`youtube::YtDlpClient`]
//!   implements it on top of `yt-dlp`.
//! - [`spotify::CatalogClient`] talks to the music-catalog Web API.
//! - [`query`] classifies raw user input into a [`query::QueryMode`].

pub mod query;
pub mod spotify;
pub mod youtube;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use spotify::{CatalogApi, CatalogClient, CatalogError};
pub use youtube::YtDlpClient;

/// Autor de un item (canal, artista o dueño de una playlist)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub url: Option<String>,
    pub icon: Option<String>,
}

impl Author {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
            icon: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_icon(mut self, icon: Option<String>) -> Self {
        self.icon = icon;
        self
    }
}

/// Video reproducible de la plataforma de video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMeta {
    pub id: String,
    pub title: String,
    pub url: String,
    pub duration: Option<Duration>,
    pub channel: Option<Author>,
    pub thumbnail: Option<String>,
    pub is_live: bool,
}

impl VideoMeta {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            url: format!("https://www.youtube.com/watch?v={id}"),
            id,
            title: title.into(),
            duration: None,
            channel: None,
            thumbnail: None,
            is_live: false,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_channel(mut self, channel: Author) -> Self {
        self.channel = Some(channel);
        self
    }
}

/// Álbum de un item del catálogo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumRef {
    pub name: String,
    pub url: String,
    pub image: Option<String>,
}

/// Canción del catálogo musical (todavía sin video asociado)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogMeta {
    pub id: String,
    pub name: String,
    pub url: String,
    pub duration: Duration,
    pub artists: Vec<Author>,
    pub album: Option<AlbumRef>,
}

impl CatalogMeta {
    /// Texto usado para buscar el video equivalente
    pub fn search_query(&self) -> String {
        match self.artists.first() {
            Some(artist) => format!("{} de {}", self.name, artist.name),
            None => self.name.clone(),
        }
    }
}

/// Descriptor inmutable de lo que reproduce una entrada de la cola
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackSource {
    Video(VideoMeta),
    CatalogItem(CatalogMeta),
}

impl TrackSource {
    pub fn title(&self) -> &str {
        match self {
            TrackSource::Video(video) => &video.title,
            TrackSource::CatalogItem(item) => &item.name,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            TrackSource::Video(video) => &video.url,
            TrackSource::CatalogItem(item) => &item.url,
        }
    }

    pub fn author(&self) -> Option<&Author> {
        match self {
            TrackSource::Video(video) => video.channel.as_ref(),
            TrackSource::CatalogItem(item) => item.artists.first(),
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            TrackSource::Video(video) => video.duration,
            TrackSource::CatalogItem(item) => Some(item.duration),
        }
    }

    pub fn thumbnail(&self) -> Option<&str> {
        match self {
            TrackSource::Video(video) => video.thumbnail.as_deref(),
            TrackSource::CatalogItem(item) => {
                item.album.as_ref().and_then(|album| album.image.as_deref())
            }
        }
    }
}

/// Tipo de colección de la que proviene un track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    VideoPlaylist,
    CatalogPlaylist,
    CatalogAlbum,
    CatalogArtist,
}

/// Metadatos de la colección padre (playlist, álbum o artista)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentCollection {
    pub kind: CollectionKind,
    pub id: String,
    pub title: String,
    pub url: String,
    pub image: Option<String>,
    pub author: Author,
}

/// Playlist de video resuelta junto con sus items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCollection {
    pub parent: ParentCollection,
    pub items: Vec<VideoMeta>,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No se encontraron resultados para `{0}`")]
    NotFound(String),
    #[error("Enlace inválido: {0}")]
    InvalidUrl(String),
    #[error("La plataforma de video está limitando las peticiones: {0}")]
    Blocked(String),
    #[error("yt-dlp falló: {0}")]
    Extractor(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("Error al ejecutar el extractor: {0}")]
    Io(#[from] std::io::Error),
    #[error("Respuesta del extractor inválida: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Proveedor de metadatos de la plataforma de video
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Primer resultado de búsqueda para un texto libre
    async fn search_one(&self, query: &str) -> Result<Option<VideoMeta>, ResolveError>;

    /// Metadatos de un video a partir de su URL
    async fn resolve_video(&self, url: &str) -> Result<Option<VideoMeta>, ResolveError>;

    /// Todos los videos de una playlist
    async fn resolve_playlist(&self, url: &str) -> Result<ResolvedCollection, ResolveError>;

    /// Videos relacionados (usado por autoplay)
    async fn related_to(&self, video_id: &str) -> Result<Vec<VideoMeta>, ResolveError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_item_search_query_uses_first_artist() {
        let item = CatalogMeta {
            id: "1".into(),
            name: "Águas de Março".into(),
            url: "https://open.spotify.com/track/1".into(),
            duration: Duration::from_secs(200),
            artists: vec![Author::new("Elis Regina"), Author::new("Tom Jobim")],
            album: None,
        };

        assert_eq!(item.search_query(), "Águas de Março de Elis Regina");
        assert_eq!(
            TrackSource::CatalogItem(item).author().map(|a| a.name.as_str()),
            Some("Elis Regina")
        );
    }

    #[test]
    fn video_url_is_derived_from_id() {
        let video = VideoMeta::new("dQw4w9WgXcQ", "Never Gonna Give You Up");
        assert_eq!(video.url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert!(TrackSource::Video(video).duration().is_none());
    }
}
