use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::audio::filters::AudioFilterSet;
use crate::audio::pipeline::{MediaPipeline, PipelineError, PipelineFactory};
use crate::sources::{ParentCollection, ResolveError, TrackResolver, TrackSource, VideoMeta};
use crate::voice::{PlaybackResource, PlayerEvent, ResourceId, VolumeHandle};

/// Identidad estable de una entrada de la cola
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackKey(u64);

impl TrackKey {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOrigin {
    Requested,
    Autoplay,
}

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("No se encontró un video para \"{0}\"")]
    Unresolved(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl TrackError {
    pub fn is_blocked(&self) -> bool {
        match self {
            TrackError::Resolve(ResolveError::Blocked(_)) => true,
            TrackError::Pipeline(error) => error.is_blocked(),
            _ => false,
        }
    }
}

/// Entrada de la cola: descriptor inmutable + estado de reproducción
pub struct Track {
    key: TrackKey,
    pub source: TrackSource,
    pub origin: TrackOrigin,
    pub parent: Option<Arc<ParentCollection>>,
    pub requester: Option<UserId>,
    pub looped: bool,
    resolved: Option<VideoMeta>,
    pipeline: Option<Box<dyn MediaPipeline>>,
    started_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("key", &self.key)
            .field("title", &self.source.title())
            .field("origin", &self.origin)
            .field("looped", &self.looped)
            .field("resource", &self.resource_id())
            .finish()
    }
}

impl Track {
    pub fn new(source: TrackSource, requester: Option<UserId>) -> Self {
        Self {
            key: TrackKey::next(),
            source,
            origin: TrackOrigin::Requested,
            parent: None,
            requester,
            looped: false,
            resolved: None,
            pipeline: None,
            started_at: None,
        }
    }

    pub fn autoplay(video: VideoMeta) -> Self {
        let mut track = Self::new(TrackSource::Video(video), None);
        track.origin = TrackOrigin::Autoplay;
        track
    }

    pub fn with_parent(mut self, parent: Arc<ParentCollection>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn key(&self) -> TrackKey {
        self.key
    }

    pub fn title(&self) -> &str {
        self.source.title()
    }

    /// Video que se reproduce, si ya se conoce
    pub fn video(&self) -> Option<&VideoMeta> {
        match &self.source {
            TrackSource::Video(video) => Some(video),
            TrackSource::CatalogItem(_) => self.resolved.as_ref(),
        }
    }

    pub fn video_id(&self) -> Option<&str> {
        self.video().map(|video| video.id.as_str())
    }

    pub fn needs_resolution(&self) -> bool {
        self.video().is_none()
    }

    pub fn set_resolved(&mut self, video: VideoMeta) {
        if self.needs_resolution() {
            self.resolved = Some(video);
        }
    }

    pub fn resource_id(&self) -> Option<ResourceId> {
        self.pipeline.as_ref().map(|pipeline| pipeline.resource_id())
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at
            .and_then(|started| (Utc::now() - started).to_std().ok())
    }

    /// Prepara un recurso nuevo para este track.
    ///
    /// Resuelve el video si hace falta, desmonta el pipeline anterior y
    /// arranca uno nuevo con los filtros actuales. Los comandos dinámicos
    /// pendientes se descartan porque el graph nuevo ya los incluye.
    pub async fn get_resource(
        &mut self,
        resolver: &dyn TrackResolver,
        factory: &dyn PipelineFactory,
        filters: &mut AudioFilterSet,
        volume: VolumeHandle,
        events: mpsc::UnboundedSender<PlayerEvent>,
    ) -> Result<PlaybackResource, TrackError> {
        if let TrackSource::CatalogItem(item) = &self.source {
            if self.resolved.is_none() {
                let query = item.search_query();
                debug!("🔎 Resolviendo '{}'", query);
                let video = resolver
                    .search_one(&query)
                    .await?
                    .ok_or_else(|| TrackError::Unresolved(query.clone()))?;
                self.resolved = Some(video);
            }
        }

        let video = self
            .video()
            .cloned()
            .ok_or_else(|| TrackError::Unresolved(self.title().to_string()))?;

        self.teardown();
        filters.dynamic_control_messages();

        let (pipeline, resource) = factory.start(&video, filters, volume, events).await?;
        self.pipeline = Some(pipeline);

        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }

        info!("▶️ Recurso {} listo para '{}'", resource.id, video.title);
        Ok(resource)
    }

    /// Aplica en caliente los cambios de filtros dinámicos
    pub fn change_filter(&self, filters: &mut AudioFilterSet) {
        let commands = filters.dynamic_control_messages();
        match &self.pipeline {
            Some(pipeline) => pipeline.send_controls(commands),
            None => debug!("🎛️ Sin pipeline activo, {} comandos descartados", commands.len()),
        }
    }

    /// Libera el pipeline de este track, si existe
    pub fn teardown(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.destroy();
        }
    }
}

impl Drop for Track {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::filters::AudioFilter;
    use crate::audio::testing::FakePipelineFactory;
    use crate::sources::{Author, CatalogMeta, MockTrackResolver};
    use mockall::predicate::eq;

    fn catalog_track() -> Track {
        Track::new(
            TrackSource::CatalogItem(CatalogMeta {
                id: "c1".into(),
                name: "Garota de Ipanema".into(),
                url: "https://open.spotify.com/track/c1".into(),
                duration: Duration::from_secs(300),
                artists: vec![Author::new("Tom Jobim")],
                album: None,
            }),
            None,
        )
    }

    #[tokio::test]
    async fn catalog_items_are_resolved_by_title_and_artist() {
        let mut resolver = MockTrackResolver::new();
        resolver
            .expect_search_one()
            .with(eq("Garota de Ipanema de Tom Jobim"))
            .times(1)
            .returning(|_| Ok(Some(VideoMeta::new("vid00000001", "Garota de Ipanema"))));

        let factory = FakePipelineFactory::default();
        let mut filters = AudioFilterSet::new();
        let (events, _rx) = mpsc::unbounded_channel();
        let mut track = catalog_track();

        track
            .get_resource(&resolver, &factory, &mut filters, VolumeHandle::new(100), events.clone())
            .await
            .unwrap();
        let first_start = track.started_at();
        assert_eq!(track.video_id(), Some("vid00000001"));

        // Segunda reproducción: sin nueva búsqueda, sin nuevo timestamp
        track
            .get_resource(&resolver, &factory, &mut filters, VolumeHandle::new(100), events)
            .await
            .unwrap();
        assert_eq!(track.started_at(), first_start);
        assert_eq!(factory.started(), 2);
        assert_eq!(factory.live(), 1);
    }

    #[tokio::test]
    async fn unresolved_catalog_item_is_an_error() {
        let mut resolver = MockTrackResolver::new();
        resolver.expect_search_one().returning(|_| Ok(None));

        let factory = FakePipelineFactory::default();
        let (events, _rx) = mpsc::unbounded_channel();
        let mut track = catalog_track();

        let error = track
            .get_resource(
                &resolver,
                &factory,
                &mut AudioFilterSet::new(),
                VolumeHandle::new(100),
                events,
            )
            .await
            .unwrap_err();

        assert!(matches!(error, TrackError::Unresolved(_)));
        assert_eq!(factory.started(), 0);
    }

    #[tokio::test]
    async fn fresh_resource_discards_stale_controls() {
        let resolver = MockTrackResolver::new();
        let factory = FakePipelineFactory::default();
        let (events, _rx) = mpsc::unbounded_channel();
        let mut filters = AudioFilterSet::new();
        filters.add_filter(AudioFilter::Bassboost);

        let mut track = Track::new(TrackSource::Video(VideoMeta::new("vid00000002", "x")), None);
        track
            .get_resource(&resolver, &factory, &mut filters, VolumeHandle::new(100), events)
            .await
            .unwrap();

        assert!(filters.dynamic_control_messages().is_empty());

        filters.add_filter(AudioFilter::Treble);
        track.change_filter(&mut filters);
        assert_eq!(factory.controls(), vec!["treble@treble g 5"]);
    }

    #[tokio::test]
    async fn dropping_a_track_tears_down_its_pipeline() {
        let resolver = MockTrackResolver::new();
        let factory = FakePipelineFactory::default();
        let (events, _rx) = mpsc::unbounded_channel();

        let mut track = Track::new(TrackSource::Video(VideoMeta::new("vid00000003", "y")), None);
        track
            .get_resource(
                &resolver,
                &factory,
                &mut AudioFilterSet::new(),
                VolumeHandle::new(100),
                events,
            )
            .await
            .unwrap();
        assert_eq!(factory.live(), 1);

        drop(track);
        assert_eq!(factory.live(), 0);
    }
}
