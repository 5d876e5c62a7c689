use rand::seq::SliceRandom;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::audio::track::{Track, TrackKey, TrackOrigin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl RepeatMode {
    /// Off → Track → Queue → Off
    pub fn next(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::Track,
            RepeatMode::Track => RepeatMode::Queue,
            RepeatMode::Queue => RepeatMode::Off,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RepeatMode::Off => "desactivada",
            RepeatMode::Track => "canción",
            RepeatMode::Queue => "cola",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("La cola está llena (máximo {0} canciones)")]
    Full(usize),
}

/// Lista ordenada de tracks pendientes y estado de repetición
#[derive(Debug)]
pub struct TrackQueue {
    tracks: VecDeque<Track>,
    repeat: RepeatMode,
    autoplay: bool,
    seen: HashSet<String>,
    max_size: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            tracks: VecDeque::new(),
            repeat: RepeatMode::Off,
            autoplay: false,
            seen: HashSet::new(),
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    pub fn autoplay(&self) -> bool {
        self.autoplay
    }

    /// Agrega un track al final, o al frente si `next`
    pub fn add(&mut self, track: Track, next: bool) -> Result<(), QueueError> {
        if self.tracks.len() >= self.max_size {
            return Err(QueueError::Full(self.max_size));
        }

        debug!("➕ Agregado a la cola: {}", track.title());
        if next {
            self.tracks.push_front(track);
        } else {
            self.tracks.push_back(track);
        }

        Ok(())
    }

    /// Agrega una colección (al final, o al frente si `next`) hasta llenar
    /// la cola. El orden de la colección se conserva en ambos casos.
    pub fn extend(&mut self, tracks: Vec<Track>, next: bool) -> Result<usize, QueueError> {
        let available = self.max_size.saturating_sub(self.tracks.len());
        if available == 0 && !tracks.is_empty() {
            return Err(QueueError::Full(self.max_size));
        }

        let to_add = tracks.len().min(available);
        if next {
            for track in tracks.into_iter().take(to_add).rev() {
                self.tracks.push_front(track);
            }
        } else {
            self.tracks.extend(tracks.into_iter().take(to_add));
        }

        info!("➕ Agregadas {} canciones a la cola", to_add);
        Ok(to_add)
    }

    /// Devuelve un track a la cola sin pasar por el límite de tamaño
    pub fn requeue(&mut self, track: Track) {
        self.tracks.push_back(track);
    }

    pub fn pop_front(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    pub fn front(&self) -> Option<&Track> {
        self.tracks.front()
    }

    pub fn get_mut(&mut self, key: TrackKey) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|track| track.key() == key)
    }

    /// Mezcla la cola. Devuelve `false` si está vacía.
    pub fn shuffle(&mut self) -> bool {
        if self.tracks.is_empty() {
            return false;
        }

        let mut rng = rand::thread_rng();
        self.tracks.make_contiguous().shuffle(&mut rng);
        info!("🔀 Cola mezclada");
        true
    }

    /// Invierte el orden de la cola. Devuelve `false` si está vacía.
    pub fn reverse(&mut self) -> bool {
        if self.tracks.is_empty() {
            return false;
        }

        self.tracks.make_contiguous().reverse();
        info!("🔃 Cola invertida");
        true
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.tracks.len();
        self.tracks.clear();
        info!("🗑️ Cola limpiada ({} canciones)", removed);
        removed
    }

    /// Cambia de modo de repetición; al volver a Off se quitan los repetidos
    pub fn cycle_repeat(&mut self) -> RepeatMode {
        self.repeat = self.repeat.next();
        match self.repeat {
            RepeatMode::Off => {
                let removed = self.remove_looped();
                info!("➡️ Repetición desactivada ({} repetidas quitadas)", removed);
            }
            RepeatMode::Track => info!("🔂 Repetir canción activado"),
            RepeatMode::Queue => info!("🔁 Repetir cola activado"),
        }
        self.repeat
    }

    /// Activa/desactiva autoplay; al desactivarlo se quitan sus sugerencias
    pub fn toggle_autoplay(&mut self) -> bool {
        self.autoplay = !self.autoplay;
        if !self.autoplay {
            let removed = self.remove_autoplay();
            info!("⏹️ Autoplay desactivado ({} sugerencias quitadas)", removed);
        } else {
            info!("♾️ Autoplay activado");
        }
        self.autoplay
    }

    pub fn remove_autoplay(&mut self) -> usize {
        let before = self.tracks.len();
        self.tracks
            .retain(|track| track.origin != TrackOrigin::Autoplay);
        before - self.tracks.len()
    }

    pub fn remove_looped(&mut self) -> usize {
        let before = self.tracks.len();
        self.tracks.retain(|track| !track.looped);
        before - self.tracks.len()
    }

    pub fn mark_seen(&mut self, video_id: &str) {
        self.seen.insert(video_id.to_string());
    }

    pub fn has_seen(&self, video_id: &str) -> bool {
        self.seen.contains(video_id)
    }

    pub fn total_duration(&self) -> Duration {
        self.tracks
            .iter()
            .filter_map(|track| track.source.duration())
            .sum()
    }
}
