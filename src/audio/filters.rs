//! # Audio Filters
//!
//! Efectos de audio aplicados por ffmpeg. Hay dos clases:
//!
//! - **Estáticos**: forman parte del filter graph con el que arranca el
//!   proceso de transcodificación. Cambiarlos requiere un recurso nuevo.
//! - **Dinámicos**: siempre están presentes en el graph como instancias con
//!   nombre (`bass@bassboost`) en su valor neutro, y se ajustan en caliente
//!   enviando comandos al filtro `azmq` del proceso en ejecución.
//!
//! El orden de los estáticos dentro del graph es determinista: se aplican
//! ordenados por nombre de filtro.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Efectos disponibles, declarados en orden alfabético por nombre
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AudioFilter {
    EightD,
    Bassboost,
    Chorus,
    Chorus3d,
    Earrape,
    Expander,
    Flanger,
    Karaoke,
    Mcompand,
    Mono,
    Normalizer,
    Phaser,
    Pulsator,
    Surrounding,
    Treble,
    Tremolo,
    Vibrato,
}

/// Parámetro ajustable en caliente de un filtro dinámico
#[derive(Debug, Clone, Copy)]
struct DynamicParam {
    target: &'static str,
    param: &'static str,
    on: &'static str,
    off: &'static str,
    rest: &'static str,
}

impl DynamicParam {
    fn graph_entry(&self, enabled: bool) -> String {
        let value = if enabled { self.on } else { self.off };
        format!("{}={}={}{}", self.target, self.param, value, self.rest)
    }

    fn command(&self, enabled: bool) -> String {
        let value = if enabled { self.on } else { self.off };
        format!("{} {} {}", self.target, self.param, value)
    }
}

impl AudioFilter {
    pub const ALL: [AudioFilter; 17] = [
        AudioFilter::EightD,
        AudioFilter::Bassboost,
        AudioFilter::Chorus,
        AudioFilter::Chorus3d,
        AudioFilter::Earrape,
        AudioFilter::Expander,
        AudioFilter::Flanger,
        AudioFilter::Karaoke,
        AudioFilter::Mcompand,
        AudioFilter::Mono,
        AudioFilter::Normalizer,
        AudioFilter::Phaser,
        AudioFilter::Pulsator,
        AudioFilter::Surrounding,
        AudioFilter::Treble,
        AudioFilter::Tremolo,
        AudioFilter::Vibrato,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AudioFilter::EightD => "8d",
            AudioFilter::Bassboost => "bassboost",
            AudioFilter::Chorus => "chorus",
            AudioFilter::Chorus3d => "chorus3d",
            AudioFilter::Earrape => "earrape",
            AudioFilter::Expander => "expander",
            AudioFilter::Flanger => "flanger",
            AudioFilter::Karaoke => "karaoke",
            AudioFilter::Mcompand => "mcompand",
            AudioFilter::Mono => "mono",
            AudioFilter::Normalizer => "normalizer",
            AudioFilter::Phaser => "phaser",
            AudioFilter::Pulsator => "pulsator",
            AudioFilter::Surrounding => "surrounding",
            AudioFilter::Treble => "treble",
            AudioFilter::Tremolo => "tremolo",
            AudioFilter::Vibrato => "vibrato",
        }
    }

    /// Nombre legible para mostrar al usuario
    pub fn label(&self) -> &'static str {
        match self {
            AudioFilter::EightD => "8D",
            AudioFilter::Bassboost => "Bassboost (Dinámico)",
            AudioFilter::Chorus => "Coro",
            AudioFilter::Chorus3d => "Coro 3D",
            AudioFilter::Earrape => "EarRape",
            AudioFilter::Expander => "Expansor",
            AudioFilter::Flanger => "Flanger",
            AudioFilter::Karaoke => "Karaoke (Dinámico)",
            AudioFilter::Mcompand => "MCompand",
            AudioFilter::Mono => "Audio Mono",
            AudioFilter::Normalizer => "Normalizador",
            AudioFilter::Phaser => "Fase",
            AudioFilter::Pulsator => "Pulsador",
            AudioFilter::Surrounding => "Surround",
            AudioFilter::Treble => "Agudos (Dinámico)",
            AudioFilter::Tremolo => "Trémolo",
            AudioFilter::Vibrato => "Vibrato",
        }
    }

    /// Argumentos ffmpeg de un filtro estático
    fn static_args(&self) -> &'static str {
        match self {
            AudioFilter::EightD => "apulsator=hz=0.09",
            AudioFilter::Bassboost => "bass=g=0:f=110:w=0.3",
            AudioFilter::Chorus => "chorus=0.7:0.9:55:0.4:0.25:2",
            AudioFilter::Chorus3d => {
                "chorus=0.5:0.9:50|60|40:0.4|0.32|0.3:0.25|0.4|0.3:2|2.3|1.3"
            }
            AudioFilter::Earrape => "channelsplit;sidechaingate=level_in=64",
            AudioFilter::Expander => {
                "compand=attacks=0:points=-80/-169|-54/-80|-49.5/-64.6|-41.1/-41.1|-25.8/-15|-10.8/-4.5|0/0|20/8.3"
            }
            AudioFilter::Flanger => "flanger",
            AudioFilter::Karaoke => "stereotools=mlev=1",
            AudioFilter::Mcompand => "mcompand",
            AudioFilter::Mono => "pan=mono|c0=.5*c0+.5*c1",
            AudioFilter::Normalizer => "dynaudnorm=g=301:m=1",
            AudioFilter::Phaser => "aphaser=in_gain=0.4",
            AudioFilter::Pulsator => "apulsator=hz=1",
            AudioFilter::Surrounding => "surround",
            AudioFilter::Treble => "treble=g=0",
            AudioFilter::Tremolo => "tremolo",
            AudioFilter::Vibrato => "vibrato=f=6.5",
        }
    }

    fn dynamic_param(&self) -> Option<DynamicParam> {
        match self {
            AudioFilter::Bassboost => Some(DynamicParam {
                target: "bass@bassboost",
                param: "g",
                on: "15",
                off: "0",
                rest: ":f=110:w=0.3",
            }),
            AudioFilter::Karaoke => Some(DynamicParam {
                target: "stereotools@karaoke",
                param: "mlev",
                on: "0.03",
                off: "1",
                rest: "",
            }),
            AudioFilter::Treble => Some(DynamicParam {
                target: "treble@treble",
                param: "g",
                on: "5",
                off: "0",
                rest: "",
            }),
            _ => None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic_param().is_some()
    }
}

impl fmt::Display for AudioFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Efecto desconocido: {0}")]
pub struct UnknownFilter(pub String);

impl FromStr for AudioFilter {
    type Err = UnknownFilter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        AudioFilter::ALL
            .into_iter()
            .find(|filter| filter.name().eq_ignore_ascii_case(needle))
            .ok_or_else(|| UnknownFilter(needle.to_string()))
    }
}

/// Conjunto mutable de efectos activos de una guild
///
/// Un filtro solo está en `enabled` mientras está activo. Los cambios de
/// filtros dinámicos quedan pendientes hasta que el pipeline en ejecución
/// los consume con [`AudioFilterSet::dynamic_control_messages`]; varios
/// cambios del mismo filtro antes de un flush se reducen al último.
#[derive(Debug, Clone, Default)]
pub struct AudioFilterSet {
    enabled: BTreeMap<AudioFilter, String>,
    pending: BTreeMap<AudioFilter, bool>,
}

impl AudioFilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activa un filtro. Devuelve `false` si ya estaba activo.
    pub fn add_filter(&mut self, filter: AudioFilter) -> bool {
        if self.enabled.contains_key(&filter) {
            return false;
        }

        let value = match filter.dynamic_param() {
            Some(param) => {
                self.pending.insert(filter, true);
                param.command(true)
            }
            None => filter.static_args().to_string(),
        };

        self.enabled.insert(filter, value);
        true
    }

    /// Desactiva un filtro. Devuelve `false` si no estaba activo.
    pub fn remove_filter(&mut self, filter: AudioFilter) -> bool {
        if self.enabled.remove(&filter).is_none() {
            return false;
        }

        if filter.is_dynamic() {
            self.pending.insert(filter, false);
        }

        true
    }

    /// Desactiva todo, encolando el apagado de los dinámicos activos
    pub fn reset(&mut self) {
        for filter in std::mem::take(&mut self.enabled).into_keys() {
            if filter.is_dynamic() {
                self.pending.insert(filter, false);
            }
        }
    }

    pub fn is_enabled(&self, filter: AudioFilter) -> bool {
        self.enabled.contains_key(&filter)
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }

    pub fn enabled(&self) -> impl Iterator<Item = AudioFilter> + '_ {
        self.enabled.keys().copied()
    }

    /// Filtros estáticos activos, en orden por nombre
    pub fn static_args(&self) -> Option<String> {
        let args: Vec<&str> = self
            .enabled
            .keys()
            .filter(|filter| !filter.is_dynamic())
            .map(|filter| filter.static_args())
            .collect();

        if args.is_empty() {
            None
        } else {
            Some(args.join(","))
        }
    }

    /// Devuelve y limpia los comandos pendientes para el canal de control
    pub fn dynamic_control_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .filter_map(|(filter, enabled)| {
                filter.dynamic_param().map(|param| param.command(enabled))
            })
            .collect()
    }

    /// Filter graph completo para un proceso nuevo: dinámicos con su estado
    /// actual, el receptor de control y los estáticos activos.
    pub fn filter_graph(&self, control_port: u16) -> String {
        let mut parts: Vec<String> = AudioFilter::ALL
            .iter()
            .filter_map(|filter| {
                filter
                    .dynamic_param()
                    .map(|param| param.graph_entry(self.is_enabled(*filter)))
            })
            .collect();

        // ffmpeg quita un nivel de escape al separar el graph y otro al
        // leer las opciones del filtro
        parts.push(format!(
            "azmq=bind_address=tcp\\\\://127.0.0.1\\\\:{control_port}"
        ));

        if let Some(static_args) = self.static_args() {
            parts.push(static_args);
        }

        parts.join(",")
    }
}
