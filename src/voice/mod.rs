//! # Voice Module
//!
//! Contratos del transporte de voz. El motor de cola solo conoce estos
//! traits: abrir una conexión a un canal, crear un reproductor, suscribirlo
//! a la conexión y alimentarlo con [`PlaybackResource`]s. Ambos handles
//! emiten eventos de ciclo de vida por canales que el motor consume.
//!
//! [`local::LocalVoiceSink`] es la implementación sin red que usa el host de
//! consola.

pub mod local;

use async_trait::async_trait;
use bytes::Bytes;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::pipeline::PipelineError;

pub use local::LocalVoiceSink;

/// Canal de voz destino
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceChannelRef {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

impl VoiceChannelRef {
    pub fn new(guild_id: GuildId, channel_id: ChannelId) -> Self {
        Self {
            guild_id,
            channel_id,
        }
    }
}

/// Identificador único de un recurso de reproducción
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Volumen compartido entre el motor y la etapa de codificación (0-100)
#[derive(Debug, Clone)]
pub struct VolumeHandle(Arc<AtomicU8>);

impl VolumeHandle {
    pub fn new(percent: u8) -> Self {
        Self(Arc::new(AtomicU8::new(percent.min(100))))
    }

    pub fn set(&self, percent: u8) {
        self.0.store(percent.min(100), Ordering::Relaxed);
    }

    pub fn percent(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn gain(&self) -> f32 {
        self.percent() as f32 / 100.0
    }
}

/// Recurso listo para reproducir: paquetes Opus en orden
#[derive(Debug)]
pub struct PlaybackResource {
    pub id: ResourceId,
    pub frames: flume::Receiver<Bytes>,
    pub volume: VolumeHandle,
}

#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// El recurso terminó (fin del stream o `stop`)
    Idle { resource: ResourceId },
    Error {
        resource: ResourceId,
        error: PipelineError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Ready,
    Disconnected,
    Destroyed,
    Error(String),
}

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("No tengo permisos para unirme a ese canal de voz")]
    NotJoinable,
    #[error("No se pudo conectar al canal de voz: {0}")]
    ConnectFailed(String),
    #[error("La conexión de voz no estuvo lista a tiempo")]
    ReadyTimeout,
}

/// Reproductor de audio. `play` reemplaza al recurso actual sin emitir
/// `Idle` por el recurso reemplazado.
pub trait VoicePlayer: Send {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<PlayerEvent>>;

    /// Destino de los paquetes, establecido al suscribirse a una conexión
    fn attach(&self, output: flume::Sender<Bytes>);

    fn play(&mut self, resource: PlaybackResource);

    fn pause(&mut self) -> bool;

    fn unpause(&mut self) -> bool;

    fn stop(&mut self);
}

pub trait VoiceConnection: Send {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>>;

    fn subscribe(&mut self, player: &dyn VoicePlayer);

    fn is_destroyed(&self) -> bool;

    fn destroy(&mut self);
}

#[async_trait]
pub trait VoiceSink: Send + Sync {
    fn is_joinable(&self, channel: &VoiceChannelRef) -> bool;

    /// Miembros presentes en el canal, incluido el bot
    fn member_count(&self, channel: &VoiceChannelRef) -> usize;

    async fn connect(
        &self,
        channel: &VoiceChannelRef,
    ) -> Result<Box<dyn VoiceConnection>, VoiceError>;

    fn create_player(&self) -> Box<dyn VoicePlayer>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_ids_are_unique() {
        let a = ResourceId::next();
        let b = ResourceId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn volume_is_clamped_to_one_hundred() {
        let volume = VolumeHandle::new(250);
        assert_eq!(volume.percent(), 100);

        let shared = volume.clone();
        shared.set(40);
        assert_eq!(volume.percent(), 40);
        assert!((volume.gain() - 0.4).abs() < f32::EPSILON);
    }
}
