//! # Audio Module
//!
//! Reproducción por guild: cola, filtros, pipeline de transcodificación y el
//! motor que los coordina.
//!
//! ### [`player`] - Queue Engine
//! - Un actor por guild que serializa comandos y eventos
//! - Políticas de desconexión por inactividad, canal vacío y pausa
//! - Autoplay y pre-resolución del siguiente track
//!
//! ### [`pipeline`] - Transcodificación
//! - `ffmpeg` como subproceso, PCM s16le 48 kHz estéreo
//! - Opus vía [`encoder`], filtros en caliente vía [`control`]
//!
//! ### [`queue`] / [`track`]
//! - Cola ordenada con repetición, inserción al frente y memoria de vistos
//! - Cada track posee como máximo un pipeline vivo
//!
//! ## Audio Quality
//!
//! - **Sample Rate**: 48kHz
//! - **Channels**: Stereo (2 channels)
//! - **Encoding**: Opus (bitrate configurable)

pub mod control;
pub mod encoder;
pub mod filters;
pub mod pipeline;
pub mod player;
pub mod queue;
pub mod registry;
pub mod resolve;
pub mod timers;
pub mod track;

#[cfg(test)]
pub(crate) mod testing;

pub use player::{EngineContext, EngineError, EngineHandle};
pub use registry::EngineRegistry;
