//! # Queue Engine
//!
//! Un actor por guild. Todo cambio de estado pasa por su buzón: comandos del
//! usuario, eventos del reproductor y de la conexión, errores de pipeline,
//! vencimientos de timers y resultados de las búsquedas lanzadas en
//! segundo plano. Como el actor procesa un mensaje a la vez, `check_queue`
//! nunca corre dos veces en paralelo y cada transición se aplica completa
//! antes de atender el siguiente evento.
//!
//! La adquisición de recursos (resolver + arrancar pipeline) se espera
//! dentro del actor; las búsquedas de consultas, autoplay y pre-resolución
//! corren como tareas aparte y devuelven su resultado como mensaje.

use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::filters::{AudioFilter, AudioFilterSet};
use crate::audio::pipeline::{PipelineError, PipelineFactory};
use crate::audio::queue::{QueueError, RepeatMode, TrackQueue};
use crate::audio::registry::EngineRegistry;
use crate::audio::resolve::{resolve_query, Addition, Resolved};
use crate::audio::timers::{ScopedTimers, TimerKind};
use crate::audio::track::{Track, TrackError, TrackKey};
use crate::config::Config;
use crate::notify::{Notifier, Severity};
use crate::sources::query::ParsedQuery;
use crate::sources::{CatalogApi, ResolveError, TrackResolver, TrackSource, VideoMeta};
use crate::ui::status::{announce_collection, announce_track, UPCOMING_LIMIT};
use crate::ui::{QueueView, TrackView};
use crate::voice::{
    ConnectionEvent, PlaybackResource, PlayerEvent, ResourceId, VoiceChannelRef,
    VoiceConnection, VoiceError, VoicePlayer, VoiceSink, VolumeHandle,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("El reproductor de esta guild ya no existe")]
    Gone,
    #[error("No estoy conectado a un canal de voz")]
    NotConnected,
    #[error("Debes indicar qué quieres escuchar")]
    EmptyQuery,
    #[error("No hay nada reproduciéndose")]
    NothingPlaying,
    #[error("La cola está vacía")]
    EmptyQueue,
    #[error("El volumen debe estar entre 0 y 100 (recibido {0})")]
    InvalidVolume(u32),
    #[error("La reproducción ya está pausada")]
    AlreadyPaused,
    #[error("La reproducción no está pausada")]
    NotPaused,
    #[error("El efecto {} ya está activo", .0.label())]
    EffectActive(AudioFilter),
    #[error("El efecto {} no está activo", .0.label())]
    EffectInactive(AudioFilter),
    #[error(transparent)]
    Voice(#[from] VoiceError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Dependencias compartidas por todos los motores
#[derive(Clone)]
pub struct EngineContext {
    pub config: Arc<Config>,
    pub resolver: Arc<dyn TrackResolver>,
    pub catalog: Arc<dyn CatalogApi>,
    pub notifier: Arc<dyn Notifier>,
    pub voice: Arc<dyn VoiceSink>,
    pub pipelines: Arc<dyn PipelineFactory>,
    pub registry: EngineRegistry,
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

enum Command {
    Connect(Reply<String>),
    Query {
        text: String,
        requester: Option<UserId>,
        reply: Reply<String>,
    },
    Skip(Reply<String>),
    Pause(Reply<String>),
    Resume(Reply<String>),
    Shuffle(Reply<String>),
    Reverse(Reply<String>),
    ToggleAutoplay(Reply<String>),
    CycleLoop(Reply<String>),
    SetVolume {
        percent: u32,
        reply: Reply<String>,
    },
    Clear(Reply<String>),
    Leave(Reply<String>),
    AddEffect {
        filter: AudioFilter,
        reply: Reply<String>,
    },
    RemoveEffect {
        filter: AudioFilter,
        reply: Reply<String>,
    },
    SetEffects {
        filters: Vec<AudioFilter>,
        reply: Reply<String>,
    },
    ResetEffects(Reply<String>),
    Snapshot(oneshot::Sender<QueueView>),
}

enum Message {
    Command(Command),
    ChannelMoved(ChannelId),
    MembersChanged,
    Player(PlayerEvent),
    Connection(ConnectionEvent),
    TimerFired {
        kind: TimerKind,
        seq: u64,
    },
    Resolved {
        result: Result<Resolved, ResolveError>,
        reply: Reply<String>,
    },
    AutoplayResolved(Result<Vec<VideoMeta>, ResolveError>),
    Preresolved {
        key: TrackKey,
        video: VideoMeta,
    },
}

/// Handle clonable hacia el motor de una guild
#[derive(Clone)]
pub struct EngineHandle {
    guild_id: GuildId,
    tx: mpsc::UnboundedSender<Message>,
}

impl EngineHandle {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// `true` cuando el motor ya terminó
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Message::Command(build(reply)))
            .map_err(|_| EngineError::Gone)?;
        response.await.map_err(|_| EngineError::Gone)?
    }

    pub async fn connect(&self) -> Result<String, EngineError> {
        self.request(Command::Connect).await
    }

    pub async fn query(
        &self,
        text: impl Into<String>,
        requester: Option<UserId>,
    ) -> Result<String, EngineError> {
        let text = text.into();
        self.request(|reply| Command::Query {
            text,
            requester,
            reply,
        })
        .await
    }

    pub async fn skip(&self) -> Result<String, EngineError> {
        self.request(Command::Skip).await
    }

    pub async fn pause(&self) -> Result<String, EngineError> {
        self.request(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<String, EngineError> {
        self.request(Command::Resume).await
    }

    pub async fn shuffle(&self) -> Result<String, EngineError> {
        self.request(Command::Shuffle).await
    }

    pub async fn reverse(&self) -> Result<String, EngineError> {
        self.request(Command::Reverse).await
    }

    pub async fn toggle_autoplay(&self) -> Result<String, EngineError> {
        self.request(Command::ToggleAutoplay).await
    }

    pub async fn cycle_loop(&self) -> Result<String, EngineError> {
        self.request(Command::CycleLoop).await
    }

    pub async fn set_volume(&self, percent: u32) -> Result<String, EngineError> {
        self.request(|reply| Command::SetVolume { percent, reply })
            .await
    }

    pub async fn clear(&self) -> Result<String, EngineError> {
        self.request(Command::Clear).await
    }

    pub async fn leave(&self) -> Result<String, EngineError> {
        self.request(Command::Leave).await
    }

    pub async fn add_effect(&self, filter: AudioFilter) -> Result<String, EngineError> {
        self.request(|reply| Command::AddEffect { filter, reply })
            .await
    }

    pub async fn remove_effect(&self, filter: AudioFilter) -> Result<String, EngineError> {
        self.request(|reply| Command::RemoveEffect { filter, reply })
            .await
    }

    /// Reemplaza el conjunto de efectos activos
    pub async fn set_effects(&self, filters: Vec<AudioFilter>) -> Result<String, EngineError> {
        self.request(|reply| Command::SetEffects { filters, reply })
            .await
    }

    pub async fn reset_effects(&self) -> Result<String, EngineError> {
        self.request(Command::ResetEffects).await
    }

    pub async fn snapshot(&self) -> Result<QueueView, EngineError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Message::Command(Command::Snapshot(reply)))
            .map_err(|_| EngineError::Gone)?;
        response.await.map_err(|_| EngineError::Gone)
    }

    /// El bot fue movido a otro canal de voz
    pub fn channel_moved(&self, channel_id: ChannelId) {
        let _ = self.tx.send(Message::ChannelMoved(channel_id));
    }

    /// Alguien entró o salió del canal de voz
    pub fn members_changed(&self) {
        let _ = self.tx.send(Message::MembersChanged);
    }
}

fn forward<T: Send + 'static>(
    mut events: mpsc::UnboundedReceiver<T>,
    mailbox: mpsc::UnboundedSender<Message>,
    wrap: fn(T) -> Message,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if mailbox.send(wrap(event)).is_err() {
                break;
            }
        }
    })
}

pub struct QueueEngine {
    ctx: EngineContext,
    guild_id: GuildId,
    instance: u64,
    channel: VoiceChannelRef,
    mailbox: mpsc::UnboundedReceiver<Message>,
    sender: mpsc::UnboundedSender<Message>,
    pipeline_events: mpsc::UnboundedSender<PlayerEvent>,
    forwarders: Vec<JoinHandle<()>>,
    connection: Option<Box<dyn VoiceConnection>>,
    player: Option<Box<dyn VoicePlayer>>,
    queue: TrackQueue,
    now_playing: Option<Track>,
    filters: AudioFilterSet,
    volume: VolumeHandle,
    timers: ScopedTimers,
    paused: bool,
    skipping: bool,
    autoplay_pending: bool,
    destroyed: bool,
}

impl QueueEngine {
    /// Crea el motor y lo deja corriendo en su propia tarea
    pub(crate) fn spawn(ctx: EngineContext, channel: VoiceChannelRef) -> (u64, EngineHandle) {
        static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);
        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);

        let (sender, mailbox) = mpsc::unbounded_channel();
        let (pipeline_events, pipeline_rx) = mpsc::unbounded_channel();
        let forwarders = vec![forward(pipeline_rx, sender.clone(), Message::Player)];

        let engine = QueueEngine {
            guild_id: channel.guild_id,
            instance,
            channel,
            queue: TrackQueue::new(ctx.config.max_queue_size),
            volume: VolumeHandle::new(ctx.config.default_volume),
            ctx,
            mailbox,
            sender: sender.clone(),
            pipeline_events,
            forwarders,
            connection: None,
            player: None,
            now_playing: None,
            filters: AudioFilterSet::new(),
            timers: ScopedTimers::new(),
            paused: false,
            skipping: false,
            autoplay_pending: false,
            destroyed: false,
        };

        let handle = EngineHandle {
            guild_id: channel.guild_id,
            tx: sender,
        };

        tokio::spawn(engine.run());
        (instance, handle)
    }

    async fn run(mut self) {
        debug!("🎛️ Motor #{} de {} iniciado", self.instance, self.guild_id);

        while let Some(message) = self.mailbox.recv().await {
            self.handle(message).await;
            if self.destroyed {
                break;
            }
        }

        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }
        debug!("🎛️ Motor #{} de {} terminado", self.instance, self.guild_id);
    }

    async fn handle(&mut self, message: Message) {
        match message {
            Message::Command(command) => self.handle_command(command).await,
            Message::ChannelMoved(channel_id) => self.on_channel_moved(channel_id).await,
            Message::MembersChanged => self.on_members_changed().await,
            Message::Player(PlayerEvent::Idle { resource }) => self.on_idle(resource).await,
            Message::Player(PlayerEvent::Error { resource, error }) => {
                self.on_player_error(resource, error).await
            }
            Message::Connection(event) => self.on_connection(event),
            Message::TimerFired { kind, seq } => self.on_timer(kind, seq),
            Message::Resolved { result, reply } => {
                let result = match result {
                    Ok(resolved) => self.enqueue(resolved).await,
                    Err(error) => Err(error.into()),
                };
                self.respond(reply, result);
            }
            Message::AutoplayResolved(result) => self.finish_autoplay(result).await,
            Message::Preresolved { key, video } => {
                if let Some(track) = self.queue.get_mut(key) {
                    debug!("🔮 Pre-resuelto '{}' → {}", track.title(), video.id);
                    track.set_resolved(video);
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => {
                let result = self.connect().await;
                self.respond(reply, result);
            }
            Command::Query {
                text,
                requester,
                reply,
            } => self.start_query(text, requester, reply),
            Command::Skip(reply) => {
                let result = self.skip().await;
                self.respond(reply, result);
            }
            Command::Pause(reply) => {
                let result = self.pause();
                self.respond(reply, result);
            }
            Command::Resume(reply) => {
                let result = self.resume();
                self.respond(reply, result);
            }
            Command::Shuffle(reply) => {
                let result = self.shuffle();
                self.respond(reply, result);
            }
            Command::Reverse(reply) => {
                let result = self.reverse();
                self.respond(reply, result);
            }
            Command::ToggleAutoplay(reply) => {
                let result = self.toggle_autoplay();
                self.respond(reply, result);
            }
            Command::CycleLoop(reply) => {
                let result = self.cycle_loop();
                self.respond(reply, result);
            }
            Command::SetVolume { percent, reply } => {
                let result = self.set_volume(percent);
                self.respond(reply, result);
            }
            Command::Clear(reply) => {
                let result = self.clear();
                self.respond(reply, result);
            }
            Command::Leave(reply) => {
                let result = self.leave();
                self.respond(reply, result);
            }
            Command::AddEffect { filter, reply } => {
                let result = self.add_effect(filter);
                self.respond(reply, result);
            }
            Command::RemoveEffect { filter, reply } => {
                let result = self.remove_effect(filter);
                self.respond(reply, result);
            }
            Command::SetEffects { filters, reply } => {
                let result = self.set_effects(filters);
                self.respond(reply, result);
            }
            Command::ResetEffects(reply) => {
                let result = self.reset_effects();
                self.respond(reply, result);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.view());
            }
        }
    }

    /// Reporta los errores antes de contestar
    fn respond(&self, reply: Reply<String>, result: Result<String, EngineError>) {
        if let Err(error) = &result {
            self.ctx.notifier.notify_error(error, Some(self.guild_id));
        }
        let _ = reply.send(result);
    }

    fn notify(&self, message: &str, severity: Severity) {
        self.ctx.notifier.notify(self.guild_id, message, severity);
    }

    fn view(&self) -> QueueView {
        QueueView {
            guild_id: self.guild_id,
            connected: self.connection.is_some(),
            now_playing: self.now_playing.as_ref().map(TrackView::from),
            upcoming: self
                .queue
                .iter()
                .take(UPCOMING_LIMIT)
                .map(TrackView::from)
                .collect(),
            total_tracks: self.queue.len(),
            total_duration: self.queue.total_duration(),
            repeat: self.queue.repeat(),
            autoplay: self.queue.autoplay(),
            paused: self.paused,
            volume: self.volume.percent(),
            effects: self.filters.enabled().collect(),
        }
    }

    fn refresh(&self) {
        if !self.destroyed {
            self.ctx.notifier.refresh_display(self.guild_id, &self.view());
        }
    }

    fn arm(&mut self, kind: TimerKind, after: Duration) {
        self.timers
            .arm(kind, after, self.sender.clone(), |kind, seq| Message::TimerFired {
                kind,
                seq,
            });
    }

    fn current_resource(&self) -> Option<ResourceId> {
        self.now_playing.as_ref().and_then(Track::resource_id)
    }

    async fn connect(&mut self) -> Result<String, EngineError> {
        if self.connection.is_some() {
            return Ok("🔊 Ya estoy conectado".to_string());
        }

        match self.open_connection().await {
            Ok(()) => {
                info!("🔊 {} conectado a {}", self.guild_id, self.channel.channel_id);
                self.check_queue().await;
                self.refresh();
                Ok(format!("🔊 Conectado a <#{}>", self.channel.channel_id))
            }
            Err(error) => {
                warn!("❌ No se pudo conectar en {}: {}", self.guild_id, error);
                self.destroy();
                Err(error.into())
            }
        }
    }

    async fn open_connection(&mut self) -> Result<(), VoiceError> {
        let voice = self.ctx.voice.clone();
        if !voice.is_joinable(&self.channel) {
            return Err(VoiceError::NotJoinable);
        }

        let mut connection = voice.connect(&self.channel).await?;
        let Some(mut events) = connection.take_events() else {
            connection.destroy();
            return Err(VoiceError::ConnectFailed("la conexión no expone eventos".into()));
        };

        let ready = tokio::time::timeout(self.ctx.config.connect_timeout, async {
            while let Some(event) = events.recv().await {
                if event == ConnectionEvent::Ready {
                    return true;
                }
                debug!("🔌 Evento previo a Ready: {:?}", event);
            }
            false
        })
        .await
        .unwrap_or(false);

        if !ready {
            connection.destroy();
            return Err(VoiceError::ReadyTimeout);
        }

        let mut player = voice.create_player();
        connection.subscribe(player.as_ref());

        self.forwarders
            .push(forward(events, self.sender.clone(), Message::Connection));
        if let Some(player_events) = player.take_events() {
            self.forwarders
                .push(forward(player_events, self.sender.clone(), Message::Player));
        }

        self.connection = Some(connection);
        self.player = Some(player);
        Ok(())
    }

    fn start_query(&mut self, text: String, requester: Option<UserId>, reply: Reply<String>) {
        if self.connection.is_none() {
            self.respond(reply, Err(EngineError::NotConnected));
            return;
        }

        let query = ParsedQuery::parse(&text);
        if query.text.is_empty() {
            self.respond(reply, Err(EngineError::EmptyQuery));
            return;
        }

        let resolver = self.ctx.resolver.clone();
        let catalog = self.ctx.catalog.clone();
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let result = resolve_query(&query, requester, resolver.as_ref(), catalog.as_ref()).await;
            let _ = sender.send(Message::Resolved { result, reply });
        });
    }

    async fn enqueue(&mut self, resolved: Resolved) -> Result<String, EngineError> {
        let Resolved {
            addition,
            next,
            inverse,
        } = resolved;

        let announcement = match addition {
            Addition::Single(track) => {
                let announcement = announce_track(&track, next);
                self.queue.add(track, next)?;
                announcement
            }
            Addition::Collection { parent, tracks } => {
                let requested = tracks.len();
                let total: Duration = tracks
                    .iter()
                    .filter_map(|track| track.source.duration())
                    .sum();
                let added = self.queue.extend(tracks, next)?;
                if added < requested {
                    self.notify(
                        &format!(
                            "⚠️ La cola está llena: solo se agregaron {added} de {requested} canciones"
                        ),
                        Severity::Warning,
                    );
                }
                announce_collection(&parent, added, total, inverse)
            }
        };

        self.notify(&announcement, Severity::Success);
        self.check_queue().await;
        self.refresh();
        Ok(announcement)
    }

    async fn acquire(&mut self, track: &mut Track) -> Result<PlaybackResource, TrackError> {
        track
            .get_resource(
                self.ctx.resolver.as_ref(),
                self.ctx.pipelines.as_ref(),
                &mut self.filters,
                self.volume.clone(),
                self.pipeline_events.clone(),
            )
            .await
    }

    fn play(&mut self, resource: PlaybackResource) {
        if let Some(player) = self.player.as_mut() {
            player.play(resource);
        }
        self.paused = false;
        self.timers.cancel(TimerKind::Paused);
    }

    /// Avanza la cola si no hay nada sonando
    async fn check_queue(&mut self) {
        if self.destroyed || self.now_playing.is_some() || self.player.is_none() {
            return;
        }

        loop {
            if self.queue.is_empty() {
                if !self.timers.is_armed(TimerKind::EmptyQueue) {
                    self.arm(TimerKind::EmptyQueue, self.ctx.config.empty_queue_timeout);
                }
                self.refresh();
                return;
            }

            if self.ctx.voice.member_count(&self.channel) <= 1 {
                if !self.timers.is_armed(TimerKind::EmptyChannel) {
                    self.arm(TimerKind::EmptyChannel, self.ctx.config.empty_channel_timeout);
                }
                return;
            }

            self.timers.cancel(TimerKind::EmptyChannel);
            self.timers.cancel(TimerKind::EmptyQueue);

            let Some(mut track) = self.queue.pop_front() else {
                continue;
            };

            match self.acquire(&mut track).await {
                Ok(resource) => {
                    if let Some(video_id) = track.video_id() {
                        self.queue.mark_seen(video_id);
                    }
                    self.play(resource);
                    self.notify(
                        &format!("🎶 Reproduciendo **{}**", track.title()),
                        Severity::Info,
                    );
                    self.now_playing = Some(track);
                    self.refresh();

                    self.preresolve_next();
                    if self.queue.is_empty() && self.queue.autoplay() {
                        self.start_autoplay();
                    }
                    return;
                }
                Err(error) => {
                    warn!("⚠️ No se pudo reproducir '{}': {}", track.title(), error);
                    if error.is_blocked() {
                        self.abort_blocked(&error);
                        return;
                    }
                    self.ctx.notifier.notify_error(&error, Some(self.guild_id));
                }
            }
        }
    }

    /// La fuente nos está bloqueando: se vacía todo y el motor se destruye
    fn abort_blocked(&mut self, error: &dyn std::error::Error) {
        self.ctx.notifier.notify_error(error, Some(self.guild_id));
        self.notify(
            "🚫 La plataforma de video está bloqueando las descargas. Vacié la cola y me desconecté.",
            Severity::Error,
        );
        self.destroy();
    }

    fn preresolve_next(&self) {
        let Some(next) = self.queue.front() else {
            return;
        };
        let TrackSource::CatalogItem(item) = &next.source else {
            return;
        };
        if !next.needs_resolution() {
            return;
        }

        let key = next.key();
        let query = item.search_query();
        let resolver = self.ctx.resolver.clone();
        let sender = self.sender.clone();
        tokio::spawn(async move {
            match resolver.search_one(&query).await {
                Ok(Some(video)) => {
                    let _ = sender.send(Message::Preresolved { key, video });
                }
                Ok(None) => debug!("🔮 Sin resultado para pre-resolver '{}'", query),
                Err(error) => debug!("🔮 Pre-resolución de '{}' falló: {}", query, error),
            }
        });
    }

    fn start_autoplay(&mut self) {
        if self.autoplay_pending {
            return;
        }
        let Some(video_id) = self
            .now_playing
            .as_ref()
            .and_then(Track::video_id)
            .map(str::to_string)
        else {
            return;
        };

        self.autoplay_pending = true;
        let resolver = self.ctx.resolver.clone();
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let result = resolver.related_to(&video_id).await;
            let _ = sender.send(Message::AutoplayResolved(result));
        });
    }

    async fn finish_autoplay(&mut self, result: Result<Vec<VideoMeta>, ResolveError>) {
        self.autoplay_pending = false;
        if !self.queue.autoplay() {
            return;
        }

        let videos = match result {
            Ok(videos) => videos,
            Err(error) => {
                self.ctx.notifier.notify_error(&error, Some(self.guild_id));
                return;
            }
        };

        let queue = &self.queue;
        let pick = videos.into_iter().find(|video| {
            !queue.has_seen(&video.id)
                && !queue
                    .iter()
                    .any(|track| track.video_id() == Some(video.id.as_str()))
        });

        let Some(video) = pick else {
            self.notify("♾️ No encontré sugerencias nuevas para autoplay", Severity::Warning);
            return;
        };

        info!("♾️ Autoplay agregó '{}'", video.title);
        if let Err(error) = self.queue.add(Track::autoplay(video), false) {
            self.ctx.notifier.notify_error(&error, Some(self.guild_id));
            return;
        }

        self.check_queue().await;
        self.refresh();
    }

    async fn on_idle(&mut self, resource: ResourceId) {
        if self.current_resource() != Some(resource) {
            debug!("⏹️ Idle de un recurso viejo ({}), ignorado", resource);
            return;
        }

        match self.queue.repeat() {
            RepeatMode::Track => {
                let Some(mut track) = self.now_playing.take() else {
                    return;
                };
                match self.acquire(&mut track).await {
                    Ok(resource) => {
                        self.play(resource);
                        self.now_playing = Some(track);
                        self.refresh();
                    }
                    Err(error) => {
                        if error.is_blocked() {
                            self.abort_blocked(&error);
                            return;
                        }
                        self.ctx.notifier.notify_error(&error, Some(self.guild_id));
                        drop(track);
                        self.check_queue().await;
                    }
                }
            }
            RepeatMode::Queue => {
                if let Some(mut track) = self.now_playing.take() {
                    track.teardown();
                    track.looped = true;
                    self.queue.requeue(track);
                }
                self.check_queue().await;
            }
            RepeatMode::Off => {
                self.now_playing = None;
                self.check_queue().await;
            }
        }
    }

    async fn on_player_error(&mut self, resource: ResourceId, error: PipelineError) {
        if self.skipping && error.is_stream_abort() {
            debug!("⏭️ Corte de stream por skip en {}, ignorado", resource);
            return;
        }
        if self.current_resource() != Some(resource) {
            debug!("⚠️ Error de un recurso viejo ({}): {}", resource, error);
            return;
        }

        if error.is_blocked() {
            self.abort_blocked(&error);
            return;
        }

        warn!("⚠️ Error de reproducción en {}: {}", self.guild_id, error);
        self.ctx.notifier.notify_error(&error, Some(self.guild_id));
        self.now_playing = None;
        self.check_queue().await;
    }

    fn on_connection(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Ready => debug!("🔌 Conexión lista en {}", self.guild_id),
            ConnectionEvent::Disconnected => {
                self.notify("🔌 Me desconectaron del canal de voz", Severity::Warning);
                self.destroy();
            }
            ConnectionEvent::Destroyed => self.destroy(),
            ConnectionEvent::Error(message) => self.notify(
                &format!("⚠️ Error en la conexión de voz: {message}"),
                Severity::Error,
            ),
        }
    }

    fn on_timer(&mut self, kind: TimerKind, seq: u64) {
        if !self.timers.take_fired(kind, seq) {
            return;
        }

        let message = match kind {
            TimerKind::SkipGrace => {
                self.skipping = false;
                return;
            }
            TimerKind::EmptyChannel => "👋 Me desconecté porque me quedé solo en el canal",
            TimerKind::EmptyQueue => "💤 Me desconecté por inactividad: la cola quedó vacía",
            TimerKind::Paused => {
                "⏸️ Me desconecté porque la reproducción estuvo pausada demasiado tiempo"
            }
        };

        info!("⏲️ Timer {:?} vencido en {}", kind, self.guild_id);
        self.notify(message, Severity::Info);
        self.destroy();
    }

    async fn on_channel_moved(&mut self, channel_id: ChannelId) {
        if channel_id == self.channel.channel_id {
            return;
        }

        info!(
            "🔀 {} movido de {} a {}",
            self.guild_id, self.channel.channel_id, channel_id
        );
        self.channel.channel_id = channel_id;
        self.on_members_changed().await;
    }

    async fn on_members_changed(&mut self) {
        if self.connection.is_none() {
            return;
        }

        if self.ctx.voice.member_count(&self.channel) <= 1 {
            if !self.timers.is_armed(TimerKind::EmptyChannel) {
                self.arm(TimerKind::EmptyChannel, self.ctx.config.empty_channel_timeout);
            }
            return;
        }

        self.timers.cancel(TimerKind::EmptyChannel);
        self.check_queue().await;
    }

    async fn skip(&mut self) -> Result<String, EngineError> {
        let Some(track) = self.now_playing.take() else {
            return Err(EngineError::NothingPlaying);
        };

        self.skipping = true;
        self.arm(TimerKind::SkipGrace, self.ctx.config.skip_grace);

        let title = track.title().to_string();
        drop(track);
        if let Some(player) = self.player.as_mut() {
            player.stop();
        }
        self.paused = false;
        self.timers.cancel(TimerKind::Paused);

        self.check_queue().await;
        self.refresh();
        Ok(format!("⏭️ Saltada: **{title}**"))
    }

    fn pause(&mut self) -> Result<String, EngineError> {
        if self.now_playing.is_none() {
            return Err(EngineError::NothingPlaying);
        }
        if self.paused {
            return Err(EngineError::AlreadyPaused);
        }

        if let Some(player) = self.player.as_mut() {
            player.pause();
        }
        self.paused = true;
        self.arm(TimerKind::Paused, self.ctx.config.paused_timeout);
        self.refresh();
        Ok("⏸️ Reproducción pausada".to_string())
    }

    fn resume(&mut self) -> Result<String, EngineError> {
        if self.now_playing.is_none() {
            return Err(EngineError::NothingPlaying);
        }
        if !self.paused {
            return Err(EngineError::NotPaused);
        }

        if let Some(player) = self.player.as_mut() {
            player.unpause();
        }
        self.paused = false;
        self.timers.cancel(TimerKind::Paused);
        self.refresh();
        Ok("▶️ Reproducción reanudada".to_string())
    }

    fn shuffle(&mut self) -> Result<String, EngineError> {
        if !self.queue.shuffle() {
            return Err(EngineError::EmptyQueue);
        }
        self.refresh();
        Ok("🔀 Cola mezclada".to_string())
    }

    fn reverse(&mut self) -> Result<String, EngineError> {
        if !self.queue.reverse() {
            return Err(EngineError::EmptyQueue);
        }
        self.refresh();
        Ok("🔃 Cola invertida".to_string())
    }

    fn toggle_autoplay(&mut self) -> Result<String, EngineError> {
        let enabled = self.queue.toggle_autoplay();
        if enabled && self.queue.is_empty() && self.now_playing.is_some() {
            self.start_autoplay();
        }
        self.refresh();
        Ok(if enabled {
            "♾️ Autoplay activado".to_string()
        } else {
            "⏹️ Autoplay desactivado".to_string()
        })
    }

    fn cycle_loop(&mut self) -> Result<String, EngineError> {
        let mode = self.queue.cycle_repeat();
        if mode == RepeatMode::Off {
            if let Some(track) = self.now_playing.as_mut() {
                track.looped = false;
            }
        }
        self.refresh();
        Ok(format!("🔁 Repetición: {}", mode.label()))
    }

    fn set_volume(&mut self, percent: u32) -> Result<String, EngineError> {
        let volume = u8::try_from(percent)
            .ok()
            .filter(|volume| *volume <= 100)
            .ok_or(EngineError::InvalidVolume(percent))?;

        self.volume.set(volume);
        self.refresh();
        Ok(format!("🔊 Volumen: {volume}%"))
    }

    fn clear(&mut self) -> Result<String, EngineError> {
        if self.queue.is_empty() {
            return Err(EngineError::EmptyQueue);
        }

        let removed = self.queue.clear();
        if self.now_playing.is_none() && self.player.is_some() {
            self.arm(TimerKind::EmptyQueue, self.ctx.config.empty_queue_timeout);
        }
        self.refresh();
        Ok(format!("🗑️ Cola limpiada ({removed} canciones)"))
    }

    fn leave(&mut self) -> Result<String, EngineError> {
        let connected = self.connection.is_some();
        self.destroy();
        if connected {
            Ok("👋 Me desconecté del canal de voz".to_string())
        } else {
            Err(EngineError::NotConnected)
        }
    }

    /// Envía los cambios dinámicos al pipeline en curso
    fn apply_filters(&mut self) {
        if let Some(track) = &self.now_playing {
            track.change_filter(&mut self.filters);
        }
        self.refresh();
    }

    fn effect_note(&self, filter: AudioFilter) -> &'static str {
        if !filter.is_dynamic() && self.now_playing.is_some() {
            " (se aplicará desde la próxima canción)"
        } else {
            ""
        }
    }

    fn add_effect(&mut self, filter: AudioFilter) -> Result<String, EngineError> {
        if !self.filters.add_filter(filter) {
            return Err(EngineError::EffectActive(filter));
        }
        self.apply_filters();
        Ok(format!(
            "🎛️ Efecto {} activado{}",
            filter.label(),
            self.effect_note(filter)
        ))
    }

    fn remove_effect(&mut self, filter: AudioFilter) -> Result<String, EngineError> {
        if !self.filters.remove_filter(filter) {
            return Err(EngineError::EffectInactive(filter));
        }
        self.apply_filters();
        Ok(format!(
            "🎛️ Efecto {} desactivado{}",
            filter.label(),
            self.effect_note(filter)
        ))
    }

    fn set_effects(&mut self, filters: Vec<AudioFilter>) -> Result<String, EngineError> {
        self.filters.reset();
        for filter in &filters {
            self.filters.add_filter(*filter);
        }
        self.apply_filters();

        if self.filters.is_empty() {
            return Ok("🎛️ Efectos desactivados".to_string());
        }
        let labels: Vec<&str> = self.filters.enabled().map(|filter| filter.label()).collect();
        Ok(format!("🎛️ Efectos activos: {}", labels.join(", ")))
    }

    fn reset_effects(&mut self) -> Result<String, EngineError> {
        self.filters.reset();
        self.apply_filters();
        Ok("🎛️ Efectos desactivados".to_string())
    }

    /// Libera todo. Idempotente.
    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        self.timers.cancel_all();
        if let Some(mut connection) = self.connection.take() {
            if !connection.is_destroyed() {
                connection.destroy();
            }
        }
        if let Some(mut track) = self.now_playing.take() {
            track.teardown();
        }
        if let Some(mut player) = self.player.take() {
            player.stop();
        }
        self.queue.clear();

        self.ctx.registry.remove(self.guild_id, self.instance);
        self.ctx
            .notifier
            .refresh_display(self.guild_id, &QueueView::idle(self.guild_id));
        info!("💥 Motor de {} destruido", self.guild_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{FakePipelineFactory, FakeVoiceSink, RecordingNotifier};
    use crate::sources::spotify::{CatalogCollection, MockCatalogApi};
    use crate::sources::{Author, CatalogMeta, CollectionKind, MockTrackResolver, ParentCollection};
    use pretty_assertions::assert_eq;

    struct Harness {
        ctx: EngineContext,
        sink: FakeVoiceSink,
        factory: FakePipelineFactory,
        notifier: Arc<RecordingNotifier>,
        channel: VoiceChannelRef,
    }

    impl Harness {
        fn new(resolver: MockTrackResolver, catalog: MockCatalogApi) -> Self {
            let sink = FakeVoiceSink::default();
            let factory = FakePipelineFactory::default();
            let notifier = Arc::new(RecordingNotifier::default());

            let ctx = EngineContext {
                config: Arc::new(Config::default()),
                resolver: Arc::new(resolver),
                catalog: Arc::new(catalog),
                notifier: notifier.clone(),
                voice: Arc::new(sink.clone()),
                pipelines: Arc::new(factory.clone()),
                registry: EngineRegistry::new(),
            };

            Self {
                ctx,
                sink,
                factory,
                notifier,
                channel: VoiceChannelRef::new(GuildId::new(10), ChannelId::new(20)),
            }
        }

        fn engine(&self) -> EngineHandle {
            self.ctx.registry.get_or_spawn(&self.ctx, self.channel)
        }

        async fn connected(&self) -> EngineHandle {
            let handle = self.engine();
            handle.connect().await.unwrap();
            handle
        }

        fn alive(&self) -> bool {
            self.ctx.registry.get(self.channel.guild_id).is_some()
        }
    }

    /// Cada búsqueda devuelve un video cuyo id es el texto buscado
    fn echo_resolver() -> MockTrackResolver {
        let mut resolver = MockTrackResolver::new();
        resolver
            .expect_search_one()
            .returning(|query| Ok(Some(VideoMeta::new(query, query.to_uppercase()))));
        resolver.expect_related_to().returning(|_| Ok(Vec::new()));
        resolver
    }

    fn harness() -> Harness {
        Harness::new(echo_resolver(), MockCatalogApi::new())
    }

    /// Deja correr al motor y a los reenviadores hasta que no haya trabajo
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn now_playing(view: &QueueView) -> Option<String> {
        view.now_playing.as_ref().map(|track| track.title.clone())
    }

    fn upcoming(view: &QueueView) -> Vec<String> {
        view.upcoming.iter().map(|track| track.title.clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn check_queue_starts_a_single_track() {
        let h = harness();
        let engine = h.connected().await;

        engine.query("a", None).await.unwrap();
        engine.query("b", None).await.unwrap();
        engine.members_changed();
        engine.members_changed();
        engine.members_changed();
        settle().await;

        let view = engine.snapshot().await.unwrap();
        assert_eq!(now_playing(&view), Some("A".to_string()));
        assert_eq!(upcoming(&view), vec!["B"]);
        assert_eq!(h.sink.played().len(), 1);
        assert_eq!(h.factory.started(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_need_a_connection_and_text() {
        let h = harness();
        let engine = h.engine();

        assert!(matches!(
            engine.query("a", None).await,
            Err(EngineError::NotConnected)
        ));

        engine.connect().await.unwrap();
        assert!(matches!(
            engine.query("  --next  ", None).await,
            Err(EngineError::EmptyQuery)
        ));
        assert!(matches!(engine.skip().await, Err(EngineError::NothingPlaying)));
        assert!(matches!(engine.shuffle().await, Err(EngineError::EmptyQueue)));
        assert_eq!(h.notifier.errors().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_timer_destroys_the_engine() {
        let h = harness();
        let engine = h.connected().await;

        tokio::time::sleep(Duration::from_secs(10 * 60 + 1)).await;
        settle().await;

        assert!(!h.alive());
        assert!(matches!(engine.snapshot().await, Err(EngineError::Gone)));
        assert!(h.notifier.mentions("inactividad"));
        assert_eq!(h.sink.destroyed(), 1);
        assert!(h.notifier.last_view().unwrap().is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn query_before_expiry_disarms_the_empty_queue_timer() {
        let h = harness();
        let engine = h.connected().await;

        tokio::time::sleep(Duration::from_secs(9 * 60)).await;
        engine.query("a", None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        settle().await;

        assert!(h.alive());
        let view = engine.snapshot().await.unwrap();
        assert_eq!(now_playing(&view), Some("A".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn skip_grace_swallows_stream_aborts_only_inside_the_window() {
        let h = harness();
        let engine = h.connected().await;
        for query in ["a", "b", "c"] {
            engine.query(query, None).await.unwrap();
        }

        engine.skip().await.unwrap();
        let b = h.sink.current().unwrap();
        assert_eq!(h.sink.played().len(), 2);

        h.factory.emit_error(b, PipelineError::StreamAborted);
        settle().await;
        let view = engine.snapshot().await.unwrap();
        assert_eq!(now_playing(&view), Some("B".to_string()));
        assert_eq!(h.factory.started(), 2);
        assert!(h.notifier.errors().is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        h.factory.emit_error(b, PipelineError::StreamAborted);
        settle().await;

        let view = engine.snapshot().await.unwrap();
        assert_eq!(now_playing(&view), Some("C".to_string()));
        assert_eq!(h.factory.started(), 3);
        assert_eq!(
            h.notifier.errors(),
            vec![PipelineError::StreamAborted.to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_acquisition_moves_on_to_the_next_track() {
        let h = harness();
        let engine = h.connected().await;
        for query in ["a", "b", "c"] {
            engine.query(query, None).await.unwrap();
        }

        h.factory.fail_next(PipelineError::Transcode("exit status 1".into()));
        engine.skip().await.unwrap();

        let view = engine.snapshot().await.unwrap();
        assert_eq!(now_playing(&view), Some("C".to_string()));
        assert_eq!(h.factory.videos(), vec!["a", "c"]);
        assert_eq!(h.notifier.errors().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_queue_requeues_the_finished_track() {
        let h = harness();
        let engine = h.connected().await;
        for query in ["a", "b", "c"] {
            engine.query(query, None).await.unwrap();
        }
        engine.cycle_loop().await.unwrap();
        assert_eq!(engine.cycle_loop().await.unwrap(), "🔁 Repetición: cola");

        h.sink.finish(h.sink.current().unwrap());
        settle().await;

        let view = engine.snapshot().await.unwrap();
        assert_eq!(now_playing(&view), Some("B".to_string()));
        assert_eq!(upcoming(&view), vec!["C", "A"]);
        assert!(view.upcoming[1].looped);
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_track_replays_with_a_fresh_resource() {
        let h = harness();
        let engine = h.connected().await;
        engine.query("a", None).await.unwrap();
        engine.query("b", None).await.unwrap();
        engine.cycle_loop().await.unwrap();

        let first = h.sink.current().unwrap();
        h.sink.finish(first);
        settle().await;

        let view = engine.snapshot().await.unwrap();
        assert_eq!(now_playing(&view), Some("A".to_string()));
        assert_eq!(upcoming(&view), vec!["B"]);
        assert_ne!(h.sink.current(), Some(first));
        assert_eq!(h.factory.live(), 1);

        // Un Idle tardío del recurso anterior no avanza la cola
        h.sink.finish(first);
        settle().await;
        assert_eq!(h.sink.played().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn inverse_catalog_playlist_plays_from_the_end() {
        let mut catalog = MockCatalogApi::new();
        catalog.expect_get_playlist().returning(|_| {
            let items = ["P1", "P2", "P3"]
                .into_iter()
                .map(|name| CatalogMeta {
                    id: name.to_lowercase(),
                    name: name.to_string(),
                    url: format!("https://open.spotify.com/track/{name}"),
                    duration: Duration::from_secs(200),
                    artists: vec![Author::new("Artista")],
                    album: None,
                })
                .collect();
            Ok(CatalogCollection {
                parent: ParentCollection {
                    kind: CollectionKind::CatalogPlaylist,
                    id: "XYZ".into(),
                    title: "Mix".into(),
                    url: "https://open.spotify.com/playlist/XYZ".into(),
                    image: None,
                    author: Author::new("Ana"),
                },
                items,
            })
        });

        let h = Harness::new(echo_resolver(), catalog);
        let engine = h.connected().await;
        engine
            .query(
                "https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M --inverse",
                None,
            )
            .await
            .unwrap();

        let view = engine.snapshot().await.unwrap();
        assert_eq!(now_playing(&view), Some("P3".to_string()));
        assert_eq!(upcoming(&view), vec!["P2", "P1"]);
        assert_eq!(h.factory.videos(), vec!["P3 de Artista"]);
        assert!(h.notifier.mentions("en orden inverso"));
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_volume_is_rejected() {
        let h = harness();
        let engine = h.connected().await;
        engine.query("a", None).await.unwrap();

        assert!(matches!(
            engine.set_volume(150).await,
            Err(EngineError::InvalidVolume(150))
        ));
        let view = engine.snapshot().await.unwrap();
        assert_eq!(view.volume, 100);
        assert_eq!(now_playing(&view), Some("A".to_string()));
        assert_eq!(h.sink.played().len(), 1);

        engine.set_volume(40).await.unwrap();
        assert_eq!(engine.snapshot().await.unwrap().volume, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_source_flushes_and_destroys() {
        let h = harness();
        let engine = h.connected().await;
        engine.query("a", None).await.unwrap();
        engine.query("b", None).await.unwrap();

        h.factory
            .emit_error(h.sink.current().unwrap(), PipelineError::HttpStatus(403));
        settle().await;

        assert!(!h.alive());
        assert_eq!(h.factory.live(), 0);
        assert_eq!(h.factory.started(), 1);
        assert!(h.notifier.mentions("bloqueando"));
        assert!(matches!(engine.skip().await, Err(EngineError::Gone)));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_times_out_without_ready() {
        let h = harness();
        h.sink.never_ready();
        let engine = h.engine();

        let error = engine.connect().await.unwrap_err();
        assert!(matches!(error, EngineError::Voice(VoiceError::ReadyTimeout)));
        assert_eq!(h.sink.destroyed(), 1);

        settle().await;
        assert!(!h.alive());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_connection_destroys_the_engine() {
        let h = harness();
        let _engine = h.connected().await;

        h.sink.emit_connection(ConnectionEvent::Disconnected);
        settle().await;

        assert!(!h.alive());
        assert!(h.notifier.mentions("desconectaron"));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_timer_disconnects() {
        let h = harness();
        let engine = h.connected().await;
        engine.query("a", None).await.unwrap();

        engine.pause().await.unwrap();
        assert!(h.sink.is_paused());
        assert!(matches!(engine.pause().await, Err(EngineError::AlreadyPaused)));

        tokio::time::sleep(Duration::from_secs(20 * 60 + 1)).await;
        settle().await;

        assert!(!h.alive());
        assert!(h.notifier.mentions("pausada"));
    }

    #[tokio::test(start_paused = true)]
    async fn lonely_bot_waits_for_listeners() {
        let h = harness();
        let engine = h.connected().await;
        h.sink.set_members(1);
        engine.query("a", None).await.unwrap();
        assert!(h.sink.played().is_empty());

        h.sink.set_members(3);
        engine.members_changed();
        settle().await;

        let view = engine.snapshot().await.unwrap();
        assert_eq!(now_playing(&view), Some("A".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn autoplay_picks_an_unseen_suggestion() {
        let mut resolver = MockTrackResolver::new();
        resolver
            .expect_search_one()
            .returning(|query| Ok(Some(VideoMeta::new(query, query.to_uppercase()))));
        resolver.expect_related_to().returning(|_| {
            Ok(vec![
                VideoMeta::new("a", "A"),
                VideoMeta::new("x", "Sugerida"),
            ])
        });

        let h = Harness::new(resolver, MockCatalogApi::new());
        let engine = h.connected().await;
        engine.toggle_autoplay().await.unwrap();
        engine.query("a", None).await.unwrap();
        settle().await;

        let view = engine.snapshot().await.unwrap();
        assert_eq!(upcoming(&view), vec!["Sugerida"]);
        assert!(view.upcoming[0].autoplay);

        engine.toggle_autoplay().await.unwrap();
        assert!(engine.snapshot().await.unwrap().upcoming.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn effects_reach_the_live_pipeline() {
        let h = harness();
        let engine = h.connected().await;
        engine.query("a", None).await.unwrap();
        engine.query("b", None).await.unwrap();

        engine.add_effect(AudioFilter::Bassboost).await.unwrap();
        let note = engine.add_effect(AudioFilter::Mono).await.unwrap();
        assert!(note.contains("próxima canción"));
        assert!(matches!(
            engine.add_effect(AudioFilter::Mono).await,
            Err(EngineError::EffectActive(AudioFilter::Mono))
        ));
        assert_eq!(h.factory.controls(), vec!["bass@bassboost g 15"]);

        engine.skip().await.unwrap();
        let static_args = h.factory.static_args();
        assert_eq!(static_args[0], None);
        assert!(static_args[1].is_some());

        engine.reset_effects().await.unwrap();
        assert_eq!(
            h.factory.controls(),
            vec!["bass@bassboost g 15", "bass@bassboost g 0"]
        );
        assert!(engine.snapshot().await.unwrap().effects.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn leave_is_idempotent_and_frees_the_guild() {
        let h = harness();
        let engine = h.connected().await;
        engine.query("a", None).await.unwrap();

        engine.leave().await.unwrap();
        assert!(matches!(engine.leave().await, Err(EngineError::Gone)));
        assert!(!h.alive());
        assert_eq!(h.factory.live(), 0);
        assert_eq!(h.sink.destroyed(), 1);

        let fresh = h.connected().await;
        assert!(fresh.snapshot().await.unwrap().connected);
        assert_eq!(h.sink.connections(), 2);
    }
}
