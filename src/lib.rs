//! # Guild Music
//!
//! Motor de música por guild: cola de reproducción, resolución de consultas
//! contra la plataforma de video y el catálogo musical, transcodificación
//! con `ffmpeg` a Opus y efectos de audio en caliente.
//!
//! El punto de entrada es [`audio::EngineRegistry`]: cada guild tiene como
//! máximo un [`audio::EngineHandle`] vivo, creado con un
//! [`audio::EngineContext`] que reúne las dependencias externas (voz,
//! resolvedores, fábrica de pipelines y notificador).

pub mod audio;
pub mod config;
pub mod console;
pub mod notify;
pub mod sources;
pub mod ui;
pub mod voice;

pub use config::Config;
