use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::{debug, info};

use crate::audio::player::{EngineContext, EngineHandle, QueueEngine};
use crate::voice::VoiceChannelRef;

struct Registered {
    instance: u64,
    handle: EngineHandle,
}

/// Tabla guild → motor de cola. La posee el contexto de la aplicación.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: Arc<DashMap<GuildId, Registered>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Motor vivo de la guild, si existe
    pub fn get(&self, guild_id: GuildId) -> Option<EngineHandle> {
        self.engines
            .get(&guild_id)
            .map(|entry| entry.handle.clone())
            .filter(|handle| !handle.is_closed())
    }

    /// Devuelve el motor de la guild o crea uno nuevo para `channel`
    pub fn get_or_spawn(&self, ctx: &EngineContext, channel: VoiceChannelRef) -> EngineHandle {
        match self.engines.entry(channel.guild_id) {
            Entry::Occupied(entry) if !entry.get().handle.is_closed() => entry.get().handle.clone(),
            Entry::Occupied(mut entry) => {
                debug!("♻️ Reemplazando motor cerrado de {}", channel.guild_id);
                let (instance, handle) = QueueEngine::spawn(ctx.clone(), channel);
                entry.insert(Registered {
                    instance,
                    handle: handle.clone(),
                });
                handle
            }
            Entry::Vacant(entry) => {
                let (instance, handle) = QueueEngine::spawn(ctx.clone(), channel);
                entry.insert(Registered {
                    instance,
                    handle: handle.clone(),
                });
                info!("🆕 Motor de cola creado para {}", channel.guild_id);
                handle
            }
        }
    }

    /// Quita el motor solo si sigue siendo la misma instancia
    pub(crate) fn remove(&self, guild_id: GuildId, instance: u64) -> bool {
        self.engines
            .remove_if(&guild_id, |_, registered| registered.instance == instance)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
