//! Dobles de prueba para el motor: pipeline, transporte de voz y notificador.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::audio::filters::AudioFilterSet;
use crate::audio::pipeline::{MediaPipeline, PipelineError, PipelineFactory};
use crate::notify::{Notifier, Severity};
use crate::sources::VideoMeta;
use crate::ui::QueueView;
use crate::voice::{
    ConnectionEvent, PlaybackResource, PlayerEvent, ResourceId, VoiceChannelRef,
    VoiceConnection, VoiceError, VoicePlayer, VoiceSink, VolumeHandle,
};

#[derive(Default)]
struct FactoryState {
    started: usize,
    live: usize,
    videos: Vec<String>,
    graphs: Vec<Option<String>>,
    controls: Vec<String>,
    failures: VecDeque<PipelineError>,
    events: Option<mpsc::UnboundedSender<PlayerEvent>>,
}

/// Fábrica de pipelines en memoria; los recursos nunca producen frames
#[derive(Clone, Default)]
pub struct FakePipelineFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl FakePipelineFactory {
    pub fn started(&self) -> usize {
        self.state.lock().started
    }

    pub fn live(&self) -> usize {
        self.state.lock().live
    }

    pub fn controls(&self) -> Vec<String> {
        self.state.lock().controls.clone()
    }

    /// Ids de los videos arrancados, en orden
    pub fn videos(&self) -> Vec<String> {
        self.state.lock().videos.clone()
    }

    /// Argumentos estáticos con los que arrancó cada pipeline
    pub fn static_args(&self) -> Vec<Option<String>> {
        self.state.lock().graphs.clone()
    }

    /// El próximo `start` falla con `error`
    pub fn fail_next(&self, error: PipelineError) {
        self.state.lock().failures.push_back(error);
    }

    /// Reporta un error de pipeline como lo haría el supervisor
    pub fn emit_error(&self, resource: ResourceId, error: PipelineError) {
        if let Some(events) = &self.state.lock().events {
            let _ = events.send(PlayerEvent::Error { resource, error });
        }
    }
}

struct FakePipeline {
    id: ResourceId,
    state: Arc<Mutex<FactoryState>>,
    destroyed: bool,
    _frames: flume::Sender<Bytes>,
}

impl MediaPipeline for FakePipeline {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn send_controls(&self, commands: Vec<String>) {
        self.state.lock().controls.extend(commands);
    }

    fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.state.lock().live -= 1;
        }
    }
}

impl Drop for FakePipeline {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[async_trait]
impl PipelineFactory for FakePipelineFactory {
    async fn start(
        &self,
        video: &VideoMeta,
        filters: &AudioFilterSet,
        volume: VolumeHandle,
        events: mpsc::UnboundedSender<PlayerEvent>,
    ) -> Result<(Box<dyn MediaPipeline>, PlaybackResource), PipelineError> {
        let mut state = self.state.lock();
        state.events = Some(events);
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }

        state.started += 1;
        state.live += 1;
        state.videos.push(video.id.clone());
        state.graphs.push(filters.static_args());

        let id = ResourceId::next();
        let (frames_tx, frames) = flume::bounded(1);
        let pipeline = FakePipeline {
            id,
            state: self.state.clone(),
            destroyed: false,
            _frames: frames_tx,
        };

        Ok((Box::new(pipeline), PlaybackResource { id, frames, volume }))
    }
}

#[derive(Default)]
struct SinkState {
    played: Vec<ResourceId>,
    player_events: Option<mpsc::UnboundedSender<PlayerEvent>>,
    connection_events: Option<mpsc::UnboundedSender<ConnectionEvent>>,
    paused: bool,
    stops: usize,
    connections: usize,
    destroyed: usize,
}

/// Transporte de voz controlado desde el test
#[derive(Clone)]
pub struct FakeVoiceSink {
    state: Arc<Mutex<SinkState>>,
    members: Arc<AtomicUsize>,
    ready: Arc<AtomicBool>,
    joinable: Arc<AtomicBool>,
}

impl Default for FakeVoiceSink {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            members: Arc::new(AtomicUsize::new(2)),
            ready: Arc::new(AtomicBool::new(true)),
            joinable: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl FakeVoiceSink {
    /// Las conexiones nuevas nunca llegan a `Ready`
    pub fn never_ready(&self) {
        self.ready.store(false, Ordering::Relaxed);
    }

    pub fn set_joinable(&self, joinable: bool) {
        self.joinable.store(joinable, Ordering::Relaxed);
    }

    pub fn set_members(&self, members: usize) {
        self.members.store(members, Ordering::Relaxed);
    }

    pub fn played(&self) -> Vec<ResourceId> {
        self.state.lock().played.clone()
    }

    pub fn current(&self) -> Option<ResourceId> {
        self.state.lock().played.last().copied()
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn stops(&self) -> usize {
        self.state.lock().stops
    }

    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    pub fn destroyed(&self) -> usize {
        self.state.lock().destroyed
    }

    /// Simula el fin natural de un recurso
    pub fn finish(&self, resource: ResourceId) {
        if let Some(events) = &self.state.lock().player_events {
            let _ = events.send(PlayerEvent::Idle { resource });
        }
    }

    pub fn emit_connection(&self, event: ConnectionEvent) {
        if let Some(events) = &self.state.lock().connection_events {
            let _ = events.send(event);
        }
    }
}

struct FakeConnection {
    state: Arc<Mutex<SinkState>>,
    events: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
    destroyed: bool,
}

impl VoiceConnection for FakeConnection {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>> {
        self.events.take()
    }

    fn subscribe(&mut self, player: &dyn VoicePlayer) {
        let (output, _) = flume::unbounded();
        player.attach(output);
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.state.lock().destroyed += 1;
        }
    }
}

struct FakePlayer {
    state: Arc<Mutex<SinkState>>,
    events: Option<mpsc::UnboundedReceiver<PlayerEvent>>,
    current: Option<PlaybackResource>,
}

impl VoicePlayer for FakePlayer {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<PlayerEvent>> {
        self.events.take()
    }

    fn attach(&self, _output: flume::Sender<Bytes>) {}

    fn play(&mut self, resource: PlaybackResource) {
        let mut state = self.state.lock();
        state.played.push(resource.id);
        state.paused = false;
        self.current = Some(resource);
    }

    fn pause(&mut self) -> bool {
        let mut state = self.state.lock();
        let changed = self.current.is_some() && !state.paused;
        state.paused = true;
        changed
    }

    fn unpause(&mut self) -> bool {
        let mut state = self.state.lock();
        let changed = self.current.is_some() && state.paused;
        state.paused = false;
        changed
    }

    fn stop(&mut self) {
        self.current = None;
        self.state.lock().stops += 1;
    }
}

#[async_trait]
impl VoiceSink for FakeVoiceSink {
    fn is_joinable(&self, _channel: &VoiceChannelRef) -> bool {
        self.joinable.load(Ordering::Relaxed)
    }

    fn member_count(&self, _channel: &VoiceChannelRef) -> usize {
        self.members.load(Ordering::Relaxed)
    }

    async fn connect(
        &self,
        _channel: &VoiceChannelRef,
    ) -> Result<Box<dyn VoiceConnection>, VoiceError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        if self.ready.load(Ordering::Relaxed) {
            let _ = events_tx.send(ConnectionEvent::Ready);
        }

        let mut state = self.state.lock();
        state.connections += 1;
        state.connection_events = Some(events_tx);

        Ok(Box::new(FakeConnection {
            state: self.state.clone(),
            events: Some(events_rx),
            destroyed: false,
        }))
    }

    fn create_player(&self) -> Box<dyn VoicePlayer> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.state.lock().player_events = Some(events_tx);

        Box::new(FakePlayer {
            state: self.state.clone(),
            events: Some(events_rx),
            current: None,
        })
    }
}

/// Notificador que guarda todo lo que recibe
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(Severity, String)>>,
    errors: Mutex<Vec<String>>,
    views: Mutex<Vec<QueueView>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(Severity, String)> {
        self.messages.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub fn last_view(&self) -> Option<QueueView> {
        self.views.lock().last().cloned()
    }

    pub fn refreshes(&self) -> usize {
        self.views.lock().len()
    }

    pub fn mentions(&self, text: &str) -> bool {
        self.messages
            .lock()
            .iter()
            .any(|(_, message)| message.contains(text))
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, _guild_id: GuildId, message: &str, severity: Severity) {
        self.messages.lock().push((severity, message.to_string()));
    }

    fn notify_error(&self, error: &dyn std::error::Error, _guild_id: Option<GuildId>) {
        self.errors.lock().push(error.to_string());
    }

    fn refresh_display(&self, _guild_id: GuildId, view: &QueueView) {
        self.views.lock().push(view.clone());
    }
}
