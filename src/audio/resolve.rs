//! Conversión de una consulta ya clasificada en tracks listos para la cola.

use serenity::model::id::UserId;
use std::sync::Arc;
use tracing::{debug, info};

use crate::audio::track::Track;
use crate::sources::query::{ParsedQuery, QueryMode};
use crate::sources::spotify::CatalogCollection;
use crate::sources::{CatalogApi, ParentCollection, ResolveError, TrackResolver, TrackSource};

/// Lo que una consulta agrega a la cola
#[derive(Debug)]
pub enum Addition {
    Single(Track),
    Collection {
        parent: Arc<ParentCollection>,
        tracks: Vec<Track>,
    },
}

impl Addition {
    pub fn len(&self) -> usize {
        match self {
            Addition::Single(_) => 1,
            Addition::Collection { tracks, .. } => tracks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct Resolved {
    pub addition: Addition,
    pub next: bool,
    pub inverse: bool,
}

fn collection(
    parent: ParentCollection,
    sources: impl Iterator<Item = TrackSource>,
    requester: Option<UserId>,
    inverse: bool,
) -> Result<Addition, ResolveError> {
    let parent = Arc::new(parent);
    let mut tracks: Vec<Track> = sources
        .map(|source| Track::new(source, requester).with_parent(parent.clone()))
        .collect();

    if tracks.is_empty() {
        return Err(ResolveError::NotFound(parent.title.clone()));
    }
    if inverse {
        tracks.reverse();
    }

    Ok(Addition::Collection { parent, tracks })
}

fn catalog_collection(
    fetched: CatalogCollection,
    requester: Option<UserId>,
    inverse: bool,
) -> Result<Addition, ResolveError> {
    let CatalogCollection { parent, items } = fetched;
    collection(
        parent,
        items.into_iter().map(TrackSource::CatalogItem),
        requester,
        inverse,
    )
}

/// Resuelve una consulta según su modo
pub async fn resolve_query(
    query: &ParsedQuery,
    requester: Option<UserId>,
    resolver: &dyn TrackResolver,
    catalog: &dyn CatalogApi,
) -> Result<Resolved, ResolveError> {
    debug!("🔎 Resolviendo consulta {} `{}`", query.mode.as_str(), query.text);
    let text = query.text.as_str();

    let addition = match query.mode {
        QueryMode::Search => {
            let video = resolver
                .search_one(text)
                .await?
                .ok_or_else(|| ResolveError::NotFound(text.to_string()))?;
            Addition::Single(Track::new(TrackSource::Video(video), requester))
        }
        QueryMode::Video => {
            let video = resolver
                .resolve_video(text)
                .await?
                .ok_or_else(|| ResolveError::NotFound(text.to_string()))?;
            Addition::Single(Track::new(TrackSource::Video(video), requester))
        }
        QueryMode::VideoPlaylist => {
            let playlist = resolver.resolve_playlist(text).await?;
            collection(
                playlist.parent,
                playlist.items.into_iter().map(TrackSource::Video),
                requester,
                query.inverse,
            )?
        }
        QueryMode::CatalogTrack => {
            let item = catalog.get_track(text).await?;
            Addition::Single(Track::new(TrackSource::CatalogItem(item), requester))
        }
        QueryMode::CatalogPlaylist => {
            catalog_collection(catalog.get_playlist(text).await?, requester, query.inverse)?
        }
        QueryMode::CatalogAlbum => {
            catalog_collection(catalog.get_album(text).await?, requester, query.inverse)?
        }
        QueryMode::CatalogArtist => catalog_collection(
            catalog.get_artist_top_tracks(text).await?,
            requester,
            query.inverse,
        )?,
    };

    info!(
        "✅ Consulta `{}` resuelta: {} canciones",
        query.text,
        addition.len()
    );

    Ok(Resolved {
        addition,
        next: query.next,
        inverse: query.inverse,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::spotify::MockCatalogApi;
    use crate::sources::{
        Author, CatalogError, CatalogMeta, CollectionKind, MockTrackResolver, ResolvedCollection,
        VideoMeta,
    };
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn item(name: &str) -> CatalogMeta {
        CatalogMeta {
            id: name.to_lowercase(),
            name: name.to_string(),
            url: format!("https://open.spotify.com/track/{name}"),
            duration: Duration::from_secs(180),
            artists: vec![Author::new("Artista")],
            album: None,
        }
    }

    fn parent(kind: CollectionKind) -> ParentCollection {
        ParentCollection {
            kind,
            id: "col".into(),
            title: "Colección".into(),
            url: "https://example.com/col".into(),
            image: None,
            author: Author::new("Ana"),
        }
    }

    fn titles(addition: &Addition) -> Vec<String> {
        match addition {
            Addition::Single(track) => vec![track.title().to_string()],
            Addition::Collection { tracks, .. } => {
                tracks.iter().map(|track| track.title().to_string()).collect()
            }
        }
    }

    #[tokio::test]
    async fn free_text_uses_the_first_search_result() {
        let mut resolver = MockTrackResolver::new();
        resolver
            .expect_search_one()
            .with(eq("bossa nova"))
            .times(1)
            .returning(|_| Ok(Some(VideoMeta::new("vvvvvvvvvvv", "Bossa Nova Mix"))));
        let catalog = MockCatalogApi::new();

        let query = ParsedQuery::parse("bossa nova -n");
        let resolved = resolve_query(&query, Some(UserId::new(7)), &resolver, &catalog)
            .await
            .unwrap();

        assert!(resolved.next);
        assert_eq!(titles(&resolved.addition), vec!["Bossa Nova Mix"]);
        match resolved.addition {
            Addition::Single(track) => assert_eq!(track.requester, Some(UserId::new(7))),
            other => panic!("se esperaba un track, llegó {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_search_result_is_not_found() {
        let mut resolver = MockTrackResolver::new();
        resolver.expect_search_one().returning(|_| Ok(None));

        let error = resolve_query(
            &ParsedQuery::parse("nada"),
            None,
            &resolver,
            &MockCatalogApi::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(error, ResolveError::NotFound(text) if text == "nada"));
    }

    #[tokio::test]
    async fn inverse_catalog_playlist_is_reversed() {
        let mut catalog = MockCatalogApi::new();
        catalog.expect_get_playlist().times(1).returning(|_| {
            Ok(CatalogCollection {
                parent: parent(CollectionKind::CatalogPlaylist),
                items: vec![item("P1"), item("P2"), item("P3")],
            })
        });

        let query =
            ParsedQuery::parse("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M --inverse");
        let resolved = resolve_query(&query, None, &MockTrackResolver::new(), &catalog)
            .await
            .unwrap();

        assert!(resolved.inverse);
        assert_eq!(titles(&resolved.addition), vec!["P3", "P2", "P1"]);
        match &resolved.addition {
            Addition::Collection { parent, tracks } => {
                assert!(tracks.iter().all(|track| track.parent.as_ref() == Some(parent)));
                assert!(tracks.iter().all(|track| track.needs_resolution()));
            }
            other => panic!("se esperaba una colección, llegó {other:?}"),
        }
    }

    #[tokio::test]
    async fn video_playlists_keep_their_parent() {
        let mut resolver = MockTrackResolver::new();
        resolver.expect_resolve_playlist().returning(|_| {
            Ok(ResolvedCollection {
                parent: parent(CollectionKind::VideoPlaylist),
                items: vec![
                    VideoMeta::new("aaaaaaaaaaa", "Uno"),
                    VideoMeta::new("bbbbbbbbbbb", "Dos"),
                ],
            })
        });

        let query = ParsedQuery::parse("https://www.youtube.com/playlist?list=PLabc123");
        let resolved = resolve_query(&query, None, &resolver, &MockCatalogApi::new())
            .await
            .unwrap();

        assert_eq!(titles(&resolved.addition), vec!["Uno", "Dos"]);
    }

    #[tokio::test]
    async fn empty_collections_are_rejected() {
        let mut catalog = MockCatalogApi::new();
        catalog.expect_get_album().returning(|_| {
            Ok(CatalogCollection {
                parent: parent(CollectionKind::CatalogAlbum),
                items: Vec::new(),
            })
        });

        let query = ParsedQuery::parse("https://open.spotify.com/album/37i9dQZF1DXcBWIGoYBM5M");
        let error = resolve_query(&query, None, &MockTrackResolver::new(), &catalog)
            .await
            .unwrap_err();

        assert!(matches!(error, ResolveError::NotFound(_)));
    }

    #[tokio::test]
    async fn catalog_errors_propagate() {
        let mut catalog = MockCatalogApi::new();
        catalog.expect_get_track().returning(|_| {
            Err(CatalogError::RateLimited {
                retry_after: Duration::from_secs(5),
            })
        });

        let query = ParsedQuery::parse("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC");
        let error = resolve_query(&query, None, &MockTrackResolver::new(), &catalog)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            ResolveError::Catalog(CatalogError::RateLimited { .. })
        ));
        assert!(error.to_string().contains("5s"));
    }
}
