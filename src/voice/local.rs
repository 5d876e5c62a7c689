use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    ConnectionEvent, PlaybackResource, PlayerEvent, ResourceId, VoiceChannelRef,
    VoiceConnection, VoiceError, VoicePlayer, VoiceSink,
};

const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Transporte de voz sin red: consume los paquetes al ritmo real (20 ms por
/// frame) y los descarta. Sirve para el host de consola y para probar el
/// pipeline completo sin un gateway.
#[derive(Debug, Clone)]
pub struct LocalVoiceSink {
    members: Arc<AtomicUsize>,
    frames_sent: Arc<AtomicU64>,
}

impl Default for LocalVoiceSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalVoiceSink {
    pub fn new() -> Self {
        Self {
            members: Arc::new(AtomicUsize::new(2)),
            frames_sent: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_members(&self, members: usize) {
        self.members.store(members, Ordering::Relaxed);
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl VoiceSink for LocalVoiceSink {
    fn is_joinable(&self, _channel: &VoiceChannelRef) -> bool {
        true
    }

    fn member_count(&self, _channel: &VoiceChannelRef) -> usize {
        self.members.load(Ordering::Relaxed)
    }

    async fn connect(
        &self,
        channel: &VoiceChannelRef,
    ) -> Result<Box<dyn VoiceConnection>, VoiceError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = flume::bounded::<Bytes>(64);
        let cancel = CancellationToken::new();

        let frames_sent = self.frames_sent.clone();
        let drain_cancel = cancel.clone();
        let drain = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = drain_cancel.cancelled() => break,
                    packet = output_rx.recv_async() => match packet {
                        Ok(_) => {
                            frames_sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => break,
                    },
                }
            }
        });

        let _ = events_tx.send(ConnectionEvent::Ready);
        info!("🔊 Conectado al canal local {}", channel.channel_id);

        Ok(Box::new(LocalConnection {
            events_tx,
            events_rx: Some(events_rx),
            output: output_tx,
            cancel,
            drain,
            destroyed: false,
        }))
    }

    fn create_player(&self) -> Box<dyn VoicePlayer> {
        Box::new(LocalPlayer::new())
    }
}

struct LocalConnection {
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
    output: flume::Sender<Bytes>,
    cancel: CancellationToken,
    drain: JoinHandle<()>,
    destroyed: bool,
}

impl VoiceConnection for LocalConnection {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>> {
        self.events_rx.take()
    }

    fn subscribe(&mut self, player: &dyn VoicePlayer) {
        player.attach(self.output.clone());
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }

        self.destroyed = true;
        self.cancel.cancel();
        self.drain.abort();
        let _ = self.events_tx.send(ConnectionEvent::Destroyed);
        debug!("🔇 Conexión local destruida");
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.drain.abort();
    }
}

struct Playback {
    resource: ResourceId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct LocalPlayer {
    events_tx: mpsc::UnboundedSender<PlayerEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<PlayerEvent>>,
    output: Arc<Mutex<Option<flume::Sender<Bytes>>>>,
    paused: Arc<AtomicBool>,
    current: Option<Playback>,
}

impl LocalPlayer {
    fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            events_tx,
            events_rx: Some(events_rx),
            output: Arc::new(Mutex::new(None)),
            paused: Arc::new(AtomicBool::new(false)),
            current: None,
        }
    }

    fn halt(&mut self) -> Option<ResourceId> {
        self.current.take().map(|playback| {
            playback.cancel.cancel();
            playback.task.abort();
            playback.resource
        })
    }
}

impl VoicePlayer for LocalPlayer {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<PlayerEvent>> {
        self.events_rx.take()
    }

    fn attach(&self, output: flume::Sender<Bytes>) {
        *self.output.lock() = Some(output);
    }

    fn play(&mut self, resource: PlaybackResource) {
        self.halt();
        self.paused.store(false, Ordering::Relaxed);

        let PlaybackResource { id, frames, .. } = resource;
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let output = self.output.clone();
        let paused = self.paused.clone();
        let events = self.events_tx.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FRAME_DURATION);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                if paused.load(Ordering::Relaxed) {
                    continue;
                }

                let packet = tokio::select! {
                    _ = task_cancel.cancelled() => return,
                    packet = frames.recv_async() => packet,
                };

                match packet {
                    Ok(packet) => {
                        let sink = output.lock().clone();
                        if let Some(sink) = sink {
                            let _ = sink.try_send(packet);
                        }
                    }
                    Err(_) => break,
                }
            }

            let _ = events.send(PlayerEvent::Idle { resource: id });
        });

        self.current = Some(Playback {
            resource: id,
            cancel,
            task,
        });
    }

    fn pause(&mut self) -> bool {
        self.current.is_some() && !self.paused.swap(true, Ordering::Relaxed)
    }

    fn unpause(&mut self) -> bool {
        self.current.is_some() && self.paused.swap(false, Ordering::Relaxed)
    }

    fn stop(&mut self) {
        if let Some(resource) = self.halt() {
            let _ = self.events_tx.send(PlayerEvent::Idle { resource });
        }
    }
}

impl Drop for LocalPlayer {
    fn drop(&mut self) {
        self.halt();
    }
}
