//! # Catalog Client
//!
//! Cliente de la Web API del catálogo musical (Spotify).
//!
//! - Token bearer con expiración; se renueva con el refresh token si existe,
//!   si no con un `client_credentials` completo.
//! - Una única ventana de espera ante un 429: mientras dura, toda llamada
//!   falla de inmediato con [`CatalogError::RateLimited`] sin tocar la red.
//! - Un 401 invalida el token y reintenta la petición una sola vez.
//! - Las colecciones se paginan hasta obtener el total declarado.

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::query::catalog_id;
use super::{AlbumRef, Author, CatalogMeta, CollectionKind, ParentCollection};
use crate::config::Config;

pub const API_BASE: &str = "https://api.spotify.com/v1";
pub const ACCOUNTS_BASE: &str = "https://accounts.spotify.com";

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);
const TOKEN_MARGIN: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(
        "Estamos siendo limitados por la API del catálogo, intenta de nuevo en {}",
        humantime::format_duration(*retry_after)
    )]
    RateLimited { retry_after: Duration },
    #[error("La API del catálogo respondió {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Enlace inválido, no pude extraer el id de {0}")]
    InvalidUrl(&'static str),
    #[error("No encontré ninguna canción con el término `{0}`")]
    NotFound(String),
    #[error("Faltan las credenciales del catálogo (SPOTIFY_CLIENT_ID / SPOTIFY_CLIENT_SECRET)")]
    MissingCredentials,
    #[error("La API del catálogo devolvió una página vacía en el offset {offset} de {total}")]
    EmptyPage { offset: usize, total: usize },
    #[error("Error de red con la API del catálogo: {0}")]
    Http(#[from] reqwest::Error),
}

/// Colección del catálogo con sus canciones
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogCollection {
    pub parent: ParentCollection,
    pub items: Vec<CatalogMeta>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn get_track(&self, url: &str) -> Result<CatalogMeta, CatalogError>;

    async fn get_playlist(&self, url: &str) -> Result<CatalogCollection, CatalogError>;

    async fn get_album(&self, url: &str) -> Result<CatalogCollection, CatalogError>;

    async fn get_artist_top_tracks(&self, url: &str) -> Result<CatalogCollection, CatalogError>;

    async fn search_track(&self, query: &str) -> Result<CatalogMeta, CatalogError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Image {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ApiArtist {
    id: Option<String>,
    name: String,
    #[serde(default)]
    external_urls: ExternalUrls,
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct ApiAlbum {
    id: Option<String>,
    name: String,
    #[serde(default)]
    external_urls: ExternalUrls,
    #[serde(default)]
    images: Vec<Image>,
    #[serde(default)]
    artists: Vec<ApiArtist>,
    tracks: Option<Paging<ApiTrack>>,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    id: Option<String>,
    name: String,
    duration_ms: u64,
    #[serde(default)]
    external_urls: ExternalUrls,
    #[serde(default)]
    artists: Vec<ApiArtist>,
    album: Option<ApiAlbum>,
}

#[derive(Debug, Deserialize)]
struct Paging<T> {
    items: Vec<T>,
    total: usize,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    display_name: Option<String>,
    #[serde(default)]
    external_urls: ExternalUrls,
}

#[derive(Debug, Deserialize)]
struct ApiPlaylist {
    id: String,
    name: String,
    #[serde(default)]
    external_urls: ExternalUrls,
    #[serde(default)]
    images: Vec<Image>,
    owner: ApiUser,
    tracks: Paging<PlaylistItem>,
}

#[derive(Debug, Deserialize)]
struct TopTracks {
    tracks: Vec<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: Paging<ApiTrack>,
}

fn open_url(kind: &str, id: &str, urls: &ExternalUrls) -> String {
    urls.spotify
        .clone()
        .unwrap_or_else(|| format!("https://open.spotify.com/{kind}/{id}"))
}

fn artist_author(artist: &ApiArtist) -> Author {
    let id = artist.id.as_deref().unwrap_or_default();
    Author::new(artist.name.clone())
        .with_url(open_url("artist", id, &artist.external_urls))
        .with_icon(artist.images.first().map(|image| image.url.clone()))
}

fn album_ref(album: &ApiAlbum) -> AlbumRef {
    let id = album.id.as_deref().unwrap_or_default();
    AlbumRef {
        name: album.name.clone(),
        url: open_url("album", id, &album.external_urls),
        image: album.images.first().map(|image| image.url.clone()),
    }
}

impl ApiTrack {
    fn into_meta(self, album: Option<&AlbumRef>) -> CatalogMeta {
        let id = self.id.unwrap_or_default();
        CatalogMeta {
            url: open_url("track", &id, &self.external_urls),
            id,
            name: self.name,
            duration: Duration::from_millis(self.duration_ms),
            artists: self.artists.iter().map(artist_author).collect(),
            album: self
                .album
                .as_ref()
                .map(album_ref)
                .or_else(|| album.cloned()),
        }
    }
}

/// Ventana de espera tras un 429
#[derive(Debug, Default)]
struct Cooldown {
    until: Option<Instant>,
}

impl Cooldown {
    fn check_at(&mut self, now: Instant) -> Result<(), CatalogError> {
        if let Some(until) = self.until {
            if now < until {
                let remaining = until - now;
                let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
                return Err(CatalogError::RateLimited {
                    retry_after: Duration::from_secs(secs),
                });
            }
            self.until = None;
        }
        Ok(())
    }

    fn arm_at(&mut self, now: Instant, retry_after: Duration) {
        self.until = Some(now + retry_after);
    }
}

#[derive(Debug, Default)]
struct TokenState {
    access: Option<String>,
    expires_at: Option<Instant>,
    refresh: Option<String>,
}

impl TokenState {
    fn valid(&self, now: Instant) -> Option<&str> {
        match (&self.access, self.expires_at) {
            (Some(token), Some(expires_at)) if now < expires_at => Some(token),
            _ => None,
        }
    }
}

pub struct CatalogClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    market: String,
    api_base: String,
    accounts_base: String,
    token: tokio::sync::Mutex<TokenState>,
    cooldown: Mutex<Cooldown>,
}

impl CatalogClient {
    pub fn new(
        http: reqwest::Client,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        market: impl Into<String>,
    ) -> Self {
        Self {
            http,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            market: market.into(),
            api_base: API_BASE.to_string(),
            accounts_base: ACCOUNTS_BASE.to_string(),
            token: tokio::sync::Mutex::new(TokenState::default()),
            cooldown: Mutex::new(Cooldown::default()),
        }
    }

    pub fn from_config(http: reqwest::Client, config: &Config) -> Self {
        Self::new(
            http,
            config.spotify_client_id.clone(),
            config.spotify_client_secret.clone(),
            config.catalog_market.clone(),
        )
    }

    /// Cambia los endpoints base (API y cuentas)
    pub fn with_endpoints(mut self, api_base: impl Into<String>, accounts_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.accounts_base = accounts_base.into();
        self
    }

    pub fn is_rate_limited(&self) -> bool {
        self.cooldown.lock().check_at(Instant::now()).is_err()
    }

    fn check_cooldown(&self) -> Result<(), CatalogError> {
        self.cooldown.lock().check_at(Instant::now())
    }

    fn back_off(&self, response: &reqwest::Response) -> CatalogError {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_AFTER);

        warn!("⏳ API del catálogo limitando peticiones por {:?}", retry_after);
        self.cooldown.lock().arm_at(Instant::now(), retry_after);
        CatalogError::RateLimited { retry_after }
    }

    async fn status_error(response: reqwest::Response) -> CatalogError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        CatalogError::Status { status, body }
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, CatalogError> {
        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.client_id, self.client_secret));

        let response = self
            .http
            .post(format!("{}/api/token", self.accounts_base))
            .header("Authorization", format!("Basic {credentials}"))
            .form(form)
            .send()
            .await?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => Err(self.back_off(&response)),
            status if status.is_success() => Ok(response.json().await?),
            _ => Err(Self::status_error(response).await),
        }
    }

    async fn access_token(&self) -> Result<String, CatalogError> {
        let mut state = self.token.lock().await;
        if let Some(token) = state.valid(Instant::now()) {
            return Ok(token.to_string());
        }

        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(CatalogError::MissingCredentials);
        }

        let mut granted = None;
        if let Some(refresh) = state.refresh.clone() {
            match self
                .request_token(&[("grant_type", "refresh_token"), ("refresh_token", &refresh)])
                .await
            {
                Ok(token) => granted = Some(token),
                Err(CatalogError::Status { status, .. }) => {
                    debug!("🔑 Refresh token rechazado ({}), pidiendo uno nuevo", status);
                    state.refresh = None;
                }
                Err(other) => return Err(other),
            }
        }

        let token = match granted {
            Some(token) => token,
            None => {
                self.request_token(&[("grant_type", "client_credentials")])
                    .await?
            }
        };

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_MARGIN);
        state.access = Some(token.access_token.clone());
        state.expires_at = Some(Instant::now() + lifetime);
        if let Some(refresh) = token.refresh_token {
            state.refresh = Some(refresh);
        }

        info!("🔑 Token del catálogo renovado (expira en {}s)", token.expires_in);
        Ok(token.access_token)
    }

    async fn invalidate_token(&self) {
        let mut state = self.token.lock().await;
        state.access = None;
        state.expires_at = None;
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, CatalogError> {
        let mut retried = false;

        loop {
            self.check_cooldown()?;
            let token = self.access_token().await?;

            let response = self
                .http
                .get(format!("{}{}", self.api_base, path))
                .bearer_auth(&token)
                .query(query)
                .send()
                .await?;

            match response.status() {
                StatusCode::TOO_MANY_REQUESTS => return Err(self.back_off(&response)),
                StatusCode::UNAUTHORIZED if !retried => {
                    debug!("🔑 Token rechazado por el catálogo, reintentando");
                    self.invalidate_token().await;
                    retried = true;
                }
                status if status.is_success() => return Ok(response.json().await?),
                _ => return Err(Self::status_error(response).await),
            }
        }
    }

    /// Pide páginas hasta completar `total` items
    async fn paginate<T: DeserializeOwned>(
        &self,
        path: &str,
        mut items: Vec<T>,
        total: usize,
    ) -> Result<Vec<T>, CatalogError> {
        while items.len() < total {
            let offset = items.len();
            let page: Paging<T> = self
                .get_json(path, &[("offset", offset.to_string()), ("limit", "50".to_string())])
                .await?;

            if page.items.is_empty() {
                return Err(CatalogError::EmptyPage { offset, total });
            }

            debug!("📄 {} items desde el offset {}", page.items.len(), offset);
            items.extend(page.items);
        }

        Ok(items)
    }
}

#[async_trait]
impl CatalogApi for CatalogClient {
    async fn get_track(&self, url: &str) -> Result<CatalogMeta, CatalogError> {
        self.check_cooldown()?;
        let id = catalog_id(url).ok_or(CatalogError::InvalidUrl("la canción"))?;

        let track: ApiTrack = self.get_json(&format!("/tracks/{id}"), &[]).await?;
        Ok(track.into_meta(None))
    }

    async fn get_playlist(&self, url: &str) -> Result<CatalogCollection, CatalogError> {
        self.check_cooldown()?;
        let id = catalog_id(url).ok_or(CatalogError::InvalidUrl("la playlist"))?;

        let playlist: ApiPlaylist = self.get_json(&format!("/playlists/{id}"), &[]).await?;
        let items = self
            .paginate(
                &format!("/playlists/{id}/tracks"),
                playlist.tracks.items,
                playlist.tracks.total,
            )
            .await?;

        let owner_name = playlist
            .owner
            .display_name
            .clone()
            .unwrap_or_else(|| playlist.owner.id.clone());
        let owner = Author::new(owner_name).with_url(open_url(
            "user",
            &playlist.owner.id,
            &playlist.owner.external_urls,
        ));

        let parent = ParentCollection {
            kind: CollectionKind::CatalogPlaylist,
            url: open_url("playlist", &playlist.id, &playlist.external_urls),
            id: playlist.id,
            title: playlist.name,
            image: playlist.images.first().map(|image| image.url.clone()),
            author: owner,
        };

        let items = items
            .into_iter()
            .filter_map(|item| item.track)
            .map(|track| track.into_meta(None))
            .collect();

        Ok(CatalogCollection { parent, items })
    }

    async fn get_album(&self, url: &str) -> Result<CatalogCollection, CatalogError> {
        self.check_cooldown()?;
        let id = catalog_id(url).ok_or(CatalogError::InvalidUrl("el álbum"))?;

        let mut album: ApiAlbum = self.get_json(&format!("/albums/{id}"), &[]).await?;
        let reference = album_ref(&album);
        let (first_page, total) = match album.tracks.take() {
            Some(tracks) => (tracks.items, tracks.total),
            None => (Vec::new(), 0),
        };

        let tracks = self
            .paginate(&format!("/albums/{id}/tracks"), first_page, total)
            .await?;

        let author = album
            .artists
            .first()
            .map(artist_author)
            .unwrap_or_else(|| Author::new("Varios artistas"));

        let parent = ParentCollection {
            kind: CollectionKind::CatalogAlbum,
            id: id.to_string(),
            title: reference.name.clone(),
            url: reference.url.clone(),
            image: reference.image.clone(),
            author,
        };

        let items = tracks
            .into_iter()
            .map(|track| track.into_meta(Some(&reference)))
            .collect();

        Ok(CatalogCollection { parent, items })
    }

    async fn get_artist_top_tracks(&self, url: &str) -> Result<CatalogCollection, CatalogError> {
        self.check_cooldown()?;
        let id = catalog_id(url).ok_or(CatalogError::InvalidUrl("el artista"))?;

        let artist: ApiArtist = self.get_json(&format!("/artists/{id}"), &[]).await?;
        let top: TopTracks = self
            .get_json(
                &format!("/artists/{id}/top-tracks"),
                &[("market", self.market.clone())],
            )
            .await?;

        let author = artist_author(&artist);
        let parent = ParentCollection {
            kind: CollectionKind::CatalogArtist,
            id: id.to_string(),
            title: artist.name.clone(),
            url: author.url.clone().unwrap_or_default(),
            image: author.icon.clone(),
            author,
        };

        let items = top
            .tracks
            .into_iter()
            .map(|track| track.into_meta(None))
            .collect();

        Ok(CatalogCollection { parent, items })
    }

    async fn search_track(&self, query: &str) -> Result<CatalogMeta, CatalogError> {
        self.check_cooldown()?;

        let response: SearchResponse = self
            .get_json(
                "/search",
                &[
                    ("q", query.to_string()),
                    ("type", "track".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        response
            .tracks
            .items
            .into_iter()
            .next()
            .map(|track| track.into_meta(None))
            .ok_or_else(|| CatalogError::NotFound(query.to_string()))
    }
}
