use regex::Regex;
use std::sync::LazyLock;

static VIDEO_PLAYLIST_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.|m\.|music\.)?youtube\.com/playlist\?(?:\S*&)?list=[\w-]+")
        .expect("regex de playlist válida")
});

static VIDEO_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.|m\.|music\.)?(?:youtube\.com/(?:watch\?(?:\S*&)?v=|embed/|shorts/|live/|v/)|youtu\.be/)[\w-]{11}",
    )
    .expect("regex de video válida")
});

static CATALOG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://(?:www\.)?open\.spotify\.com/(?:intl-[a-z]{2}(?:-[A-Za-z]{2})?/)?(track|playlist|album|artist)/([0-9A-Za-z]{22})",
    )
    .expect("regex de catálogo válida")
});

const NEXT_FLAGS: [&str; 4] = ["--next", "-n", "--proxima", "-p"];
const INVERSE_FLAGS: [&str; 3] = ["--inverse", "-i", "--inversa"];

/// Clasificación de una consulta del usuario
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Search,
    VideoPlaylist,
    Video,
    CatalogPlaylist,
    CatalogTrack,
    CatalogAlbum,
    CatalogArtist,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Search => "search",
            QueryMode::VideoPlaylist => "video_playlist",
            QueryMode::Video => "video",
            QueryMode::CatalogPlaylist => "catalog_playlist",
            QueryMode::CatalogTrack => "catalog_track",
            QueryMode::CatalogAlbum => "catalog_album",
            QueryMode::CatalogArtist => "catalog_artist",
        }
    }

    /// Indica si la consulta produce varios tracks
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            QueryMode::VideoPlaylist
                | QueryMode::CatalogPlaylist
                | QueryMode::CatalogAlbum
                | QueryMode::CatalogArtist
        )
    }
}

/// Consulta ya clasificada, sin flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub mode: QueryMode,
    pub text: String,
    pub next: bool,
    pub inverse: bool,
}

impl ParsedQuery {
    pub fn parse(raw: &str) -> Self {
        let next = find_flags(raw, &NEXT_FLAGS);
        let inverse = find_flags(raw, &INVERSE_FLAGS);
        let text = clear_query(raw);
        let mode = find_query_mode(&text);

        Self {
            mode,
            text,
            next,
            inverse,
        }
    }
}

/// Determina el tipo de consulta a partir del texto limpio
pub fn find_query_mode(query: &str) -> QueryMode {
    if VIDEO_PLAYLIST_REGEX.is_match(query) {
        return QueryMode::VideoPlaylist;
    }

    if VIDEO_REGEX.is_match(query) {
        return QueryMode::Video;
    }

    if let Some(captures) = CATALOG_REGEX.captures(query) {
        return match &captures[1] {
            "playlist" => QueryMode::CatalogPlaylist,
            "track" => QueryMode::CatalogTrack,
            "album" => QueryMode::CatalogAlbum,
            _ => QueryMode::CatalogArtist,
        };
    }

    QueryMode::Search
}

/// Extrae el id de 22 caracteres de un enlace del catálogo
pub fn catalog_id(url: &str) -> Option<&str> {
    CATALOG_REGEX
        .captures(url)
        .and_then(|captures| captures.get(2))
        .map(|id| id.as_str())
}

/// Busca flags como tokens completos (`--next`, `-n`, ...)
pub fn find_flags(query: &str, flags: &[&str]) -> bool {
    query
        .split_whitespace()
        .any(|token| flags.iter().any(|flag| token.eq_ignore_ascii_case(flag)))
}

/// Elimina los flags conocidos y normaliza espacios
pub fn clear_query(query: &str) -> String {
    query
        .split_whitespace()
        .filter(|token| {
            !NEXT_FLAGS
                .iter()
                .chain(INVERSE_FLAGS.iter())
                .any(|flag| token.eq_ignore_ascii_case(flag))
        })
        .collect::<Vec<_>>()
        .join(" ")
}
