//! Host de consola: cada línea de stdin es un comando para el motor de la
//! guild configurada.

use serenity::model::id::{ChannelId, UserId};
use thiserror::Error;
use tracing::info;

use crate::audio::filters::{AudioFilter, UnknownFilter};
use crate::audio::player::{EngineContext, EngineError, EngineHandle};
use crate::ui::status::render_status;
use crate::voice::VoiceChannelRef;

pub const HELP: &str = "\
🎵 Comandos disponibles:
  join [canal]              conectar al canal de voz
  play <texto|url> [-n] [-i] agregar a la cola (--next, --inverse)
  skip | pause | resume     control de reproducción
  shuffle | reverse | clear operaciones sobre la cola
  loop                      off → canción → cola
  autoplay                  activar/desactivar autoplay
  volume <0-100>            volumen
  effects                   listar efectos
  effect add|remove <name>  activar/desactivar un efecto
  effect set <a> <b> ...    reemplazar los efectos activos
  effect reset              quitar todos los efectos
  move <canal>              simular que movieron al bot
  queue                     estado de la guild
  leave                     desconectar
  quit                      salir";

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("Comando no reconocido: {0} (usa `help`)")]
    Unknown(String),
    #[error("Falta el argumento <{0}>")]
    MissingArgument(&'static str),
    #[error("Número inválido: {0}")]
    InvalidNumber(String),
    #[error(transparent)]
    Filter(#[from] UnknownFilter),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectAction {
    List,
    Add(AudioFilter),
    Remove(AudioFilter),
    Set(Vec<AudioFilter>),
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Join(Option<ChannelId>),
    Play(String),
    Skip,
    Pause,
    Resume,
    Shuffle,
    Reverse,
    Loop,
    Autoplay,
    Volume(u32),
    Effects(EffectAction),
    Clear,
    Move(ChannelId),
    Queue,
    Leave,
    Quit,
}

fn channel_id(raw: &str) -> Result<ChannelId, ConsoleError> {
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id > 0)
        .map(ChannelId::new)
        .ok_or_else(|| ConsoleError::InvalidNumber(raw.to_string()))
}

fn filters<'a>(names: impl Iterator<Item = &'a str>) -> Result<Vec<AudioFilter>, ConsoleError> {
    names
        .map(|name| name.parse::<AudioFilter>().map_err(ConsoleError::from))
        .collect()
}

impl ConsoleCommand {
    /// Interpreta una línea. `Ok(None)` para líneas vacías.
    pub fn parse(line: &str) -> Result<Option<Self>, ConsoleError> {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };

        let command = match name.to_lowercase().as_str() {
            "" => return Ok(None),
            "help" | "ayuda" => Self::Help,
            "join" | "entrar" => Self::Join(if rest.is_empty() {
                None
            } else {
                Some(channel_id(rest)?)
            }),
            "play" | "p" => {
                if rest.is_empty() {
                    return Err(ConsoleError::MissingArgument("texto|url"));
                }
                Self::Play(rest.to_string())
            }
            "skip" | "s" => Self::Skip,
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "shuffle" => Self::Shuffle,
            "reverse" => Self::Reverse,
            "loop" => Self::Loop,
            "autoplay" => Self::Autoplay,
            "volume" | "vol" => {
                if rest.is_empty() {
                    return Err(ConsoleError::MissingArgument("0-100"));
                }
                let percent = rest
                    .parse()
                    .map_err(|_| ConsoleError::InvalidNumber(rest.to_string()))?;
                Self::Volume(percent)
            }
            "effects" => Self::Effects(EffectAction::List),
            "effect" => {
                let mut args = rest.split_whitespace();
                let action = match args.next() {
                    Some("add") => EffectAction::Add(
                        args.next()
                            .ok_or(ConsoleError::MissingArgument("name"))?
                            .parse::<AudioFilter>()?,
                    ),
                    Some("remove") => EffectAction::Remove(
                        args.next()
                            .ok_or(ConsoleError::MissingArgument("name"))?
                            .parse::<AudioFilter>()?,
                    ),
                    Some("set") => EffectAction::Set(filters(args)?),
                    Some("reset") => EffectAction::Reset,
                    Some(other) => return Err(ConsoleError::Unknown(format!("effect {other}"))),
                    None => EffectAction::List,
                };
                Self::Effects(action)
            }
            "clear" => Self::Clear,
            "move" => {
                if rest.is_empty() {
                    return Err(ConsoleError::MissingArgument("canal"));
                }
                Self::Move(channel_id(rest)?)
            }
            "queue" | "q" | "np" => Self::Queue,
            "leave" | "stop" => Self::Leave,
            "quit" | "exit" => Self::Quit,
            other => return Err(ConsoleError::Unknown(other.to_string())),
        };

        Ok(Some(command))
    }
}

/// Conecta los comandos de consola con el registro de motores
pub struct ConsoleHost {
    ctx: EngineContext,
    channel: VoiceChannelRef,
    requester: Option<UserId>,
}

impl ConsoleHost {
    pub fn new(ctx: EngineContext, channel: VoiceChannelRef) -> Self {
        Self {
            ctx,
            channel,
            requester: None,
        }
    }

    pub fn with_requester(mut self, requester: UserId) -> Self {
        self.requester = Some(requester);
        self
    }

    fn engine(&self) -> Result<EngineHandle, ConsoleError> {
        self.ctx
            .registry
            .get(self.channel.guild_id)
            .ok_or(ConsoleError::Engine(EngineError::NotConnected))
    }

    /// Motor conectado, uniéndose al canal si hace falta
    async fn joined(&self) -> Result<EngineHandle, ConsoleError> {
        let engine = self.ctx.registry.get_or_spawn(&self.ctx, self.channel);
        if !engine.snapshot().await?.connected {
            engine.connect().await?;
        }
        Ok(engine)
    }

    pub async fn handle_command(&mut self, command: ConsoleCommand) -> Result<String, ConsoleError> {
        info!("📝 Comando {:?} en guild {}", command, self.channel.guild_id);

        let reply = match command {
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Join(channel_id) => {
                if let Some(channel_id) = channel_id {
                    self.channel.channel_id = channel_id;
                }
                let engine = self.ctx.registry.get_or_spawn(&self.ctx, self.channel);
                engine.connect().await?
            }
            ConsoleCommand::Play(text) => self.joined().await?.query(text, self.requester).await?,
            ConsoleCommand::Skip => self.engine()?.skip().await?,
            ConsoleCommand::Pause => self.engine()?.pause().await?,
            ConsoleCommand::Resume => self.engine()?.resume().await?,
            ConsoleCommand::Shuffle => self.engine()?.shuffle().await?,
            ConsoleCommand::Reverse => self.engine()?.reverse().await?,
            ConsoleCommand::Loop => self.engine()?.cycle_loop().await?,
            ConsoleCommand::Autoplay => self.engine()?.toggle_autoplay().await?,
            ConsoleCommand::Volume(percent) => self.engine()?.set_volume(percent).await?,
            ConsoleCommand::Effects(EffectAction::List) => {
                let active = match self.ctx.registry.get(self.channel.guild_id) {
                    Some(engine) => engine.snapshot().await?.effects,
                    None => Vec::new(),
                };
                AudioFilter::ALL
                    .iter()
                    .map(|filter| {
                        let mark = if active.contains(filter) { "✅" } else { "▫️" };
                        format!("{mark} {} ({})", filter.name(), filter.label())
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            ConsoleCommand::Effects(EffectAction::Add(filter)) => {
                self.engine()?.add_effect(filter).await?
            }
            ConsoleCommand::Effects(EffectAction::Remove(filter)) => {
                self.engine()?.remove_effect(filter).await?
            }
            ConsoleCommand::Effects(EffectAction::Set(filters)) => {
                self.engine()?.set_effects(filters).await?
            }
            ConsoleCommand::Effects(EffectAction::Reset) => self.engine()?.reset_effects().await?,
            ConsoleCommand::Clear => self.engine()?.clear().await?,
            ConsoleCommand::Move(channel_id) => {
                self.channel.channel_id = channel_id;
                self.engine()?.channel_moved(channel_id);
                format!("🔀 Movido a <#{channel_id}>")
            }
            ConsoleCommand::Queue => {
                let view = self.engine()?.snapshot().await?;
                render_status(&view)
            }
            ConsoleCommand::Leave => self.engine()?.leave().await?,
            ConsoleCommand::Quit => {
                if let Some(engine) = self.ctx.registry.get(self.channel.guild_id) {
                    let _ = engine.leave().await;
                }
                "👋 Hasta luego".to_string()
            }
        };

        Ok(reply)
    }
}
