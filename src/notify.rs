//! Salida hacia el usuario: mensajes, errores y el panel de estado.
//!
//! El motor nunca espera una confirmación de la interfaz para decidir algo;
//! todas las llamadas son fire-and-forget.

use serenity::model::id::GuildId;
use tracing::{error, info, warn};

use crate::ui::status::{render_status, QueueView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Info => "ℹ️",
            Severity::Success => "✅",
            Severity::Warning => "⚠️",
            Severity::Error => "❌",
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, guild_id: GuildId, message: &str, severity: Severity);

    fn notify_error(&self, error: &dyn std::error::Error, guild_id: Option<GuildId>);

    /// Reemplaza el panel de estado de la guild
    fn refresh_display(&self, guild_id: GuildId, view: &QueueView);
}

/// Notificador que escribe todo en el log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier {
    /// Si está activo, el panel se imprime completo en cada refresco
    pub verbose_display: bool,
}

impl LogNotifier {
    pub fn new(verbose_display: bool) -> Self {
        Self { verbose_display }
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, guild_id: GuildId, message: &str, severity: Severity) {
        match severity {
            Severity::Info | Severity::Success => {
                info!("{} [{}] {}", severity.emoji(), guild_id, message)
            }
            Severity::Warning => warn!("{} [{}] {}", severity.emoji(), guild_id, message),
            Severity::Error => error!("{} [{}] {}", severity.emoji(), guild_id, message),
        }
    }

    fn notify_error(&self, err: &dyn std::error::Error, guild_id: Option<GuildId>) {
        match guild_id {
            Some(guild_id) => error!("❌ [{}] {}", guild_id, err),
            None => error!("❌ {}", err),
        }
    }

    fn refresh_display(&self, guild_id: GuildId, view: &QueueView) {
        if self.verbose_display {
            info!("📺 [{}]\n{}", guild_id, render_status(view));
        } else {
            info!(
                "📺 [{}] {} • {} en cola",
                guild_id,
                view.now_playing
                    .as_ref()
                    .map(|track| track.title.as_str())
                    .unwrap_or("sin reproducción"),
                view.total_tracks
            );
        }
    }
}
