use audiopus::{coder::Encoder, Application, Bitrate, Channels, SampleRate};
use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::audio::pipeline::PipelineError;
use crate::voice::VolumeHandle;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: usize = 2;

/// Tamaño máximo recomendado de un paquete Opus
const MAX_PACKET: usize = 4000;

/// Bytes de PCM s16le estéreo que ocupa un frame
pub fn pcm_frame_len(frame_size: usize) -> usize {
    frame_size * CHANNELS * std::mem::size_of::<i16>()
}

/// Aplica el volumen en línea sobre las muestras
pub fn apply_gain(samples: &mut [i16], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }

    for sample in samples.iter_mut() {
        let scaled = (*sample as f32 * gain).round();
        *sample = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}

fn decode_le(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Codificador Opus de frames fijos (48 kHz, estéreo)
pub struct OpusFramer {
    encoder: Encoder,
    frame_size: usize,
    packet: Vec<u8>,
}

impl OpusFramer {
    pub fn new(bitrate: u32, frame_size: usize) -> Result<Self, PipelineError> {
        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)
            .map_err(|e| PipelineError::Encode(e.to_string()))?;
        encoder
            .set_bitrate(Bitrate::BitsPerSecond(bitrate as i32))
            .map_err(|e| PipelineError::Encode(e.to_string()))?;

        Ok(Self {
            encoder,
            frame_size,
            packet: vec![0u8; MAX_PACKET],
        })
    }

    /// Codifica un frame completo de PCM s16le. Un frame incompleto (fin del
    /// stream) se rellena con silencio.
    pub fn encode(&mut self, pcm: &[u8], gain: f32) -> Result<Bytes, PipelineError> {
        let mut samples = decode_le(pcm);
        samples.resize(self.frame_size * CHANNELS, 0);
        apply_gain(&mut samples, gain);

        let len = self
            .encoder
            .encode(&samples, &mut self.packet)
            .map_err(|e| PipelineError::Encode(e.to_string()))?;

        Ok(Bytes::copy_from_slice(&self.packet[..len]))
    }
}

/// Etapa de codificación.
///
/// Corre en un hilo bloqueante: recibe frames PCM, aplica el volumen actual
/// y entrega paquetes Opus al canal de salida (acotado, así que un
/// consumidor lento frena al resto del pipeline).
pub fn spawn_encoder(
    pcm: flume::Receiver<Vec<u8>>,
    output: flume::Sender<Bytes>,
    volume: VolumeHandle,
    bitrate: u32,
    frame_size: usize,
    cancel: CancellationToken,
) -> JoinHandle<Result<(), PipelineError>> {
    tokio::task::spawn_blocking(move || {
        let mut framer = OpusFramer::new(bitrate, frame_size)?;
        let mut frames = 0u64;

        while let Ok(frame) = pcm.recv() {
            if cancel.is_cancelled() {
                break;
            }

            let packet = framer.encode(&frame, volume.gain())?;
            if output.send(packet).is_err() {
                // El reproductor soltó el recurso
                break;
            }
            frames += 1;
        }

        debug!("🎚️ Codificador terminado tras {} frames", frames);
        Ok(())
    })
}
