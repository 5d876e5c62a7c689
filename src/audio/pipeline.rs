//! # Transcode Pipeline
//!
//! Cadena de una reproducción: descarga del audio remoto → ffmpeg (filter
//! graph + resampleo a PCM s16le 48 kHz estéreo) → lector de frames PCM →
//! codificador Opus → canal acotado que consume el reproductor de voz.
//!
//! Cada pipeline es dueño exclusivo de su proceso ffmpeg, de su puerto de
//! control y de sus tareas. Un fallo en cualquier etapa derriba todo el
//! pipeline y se reporta una única vez como [`PlayerEvent::Error`]; al
//! destruirlo se cancelan todas las etapas y se mata el proceso.

use async_process::{ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use async_trait::async_trait;
use bytes::Bytes;
use futures::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::control::{spawn_control_task, ControlPort};
use crate::audio::encoder::{pcm_frame_len, spawn_encoder, SAMPLE_RATE};
use crate::audio::filters::AudioFilterSet;
use crate::config::Config;
use crate::sources::{ResolveError, VideoMeta, YtDlpClient};
use crate::voice::{PlaybackResource, PlayerEvent, ResourceId, VolumeHandle};

/// Paquetes Opus en buffer entre el codificador y el reproductor (~1 s)
const OUTPUT_BUFFER: usize = 50;
const PCM_BUFFER: usize = 16;

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("No se pudo obtener el stream de audio: {0}")]
    StreamUrl(String),
    #[error("La plataforma de video bloqueó la reproducción: {0}")]
    Blocked(String),
    #[error("El servidor de audio respondió con estado {0}")]
    HttpStatus(u16),
    #[error("Error descargando el audio: {0}")]
    Fetch(String),
    #[error("No se pudo iniciar ffmpeg: {0}")]
    Spawn(String),
    #[error("ffmpeg terminó con error: {0}")]
    Transcode(String),
    #[error("Error del codificador Opus: {0}")]
    Encode(String),
    #[error("El stream se cerró antes de tiempo")]
    StreamAborted,
}

impl PipelineError {
    /// Cierre prematuro del stream, típico al saltar una canción
    pub fn is_stream_abort(&self) -> bool {
        matches!(self, PipelineError::StreamAborted)
    }

    /// La fuente está bloqueando o limitando las descargas
    pub fn is_blocked(&self) -> bool {
        match self {
            PipelineError::Blocked(_) => true,
            PipelineError::HttpStatus(status) => matches!(status, 403 | 410 | 429),
            _ => false,
        }
    }
}

impl From<ResolveError> for PipelineError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::Blocked(message) => PipelineError::Blocked(message),
            other => PipelineError::StreamUrl(other.to_string()),
        }
    }
}

/// Reproducción en curso de un track
pub trait MediaPipeline: Send {
    fn resource_id(&self) -> ResourceId;

    /// Reenvía comandos de filtros dinámicos al proceso en ejecución
    fn send_controls(&self, commands: Vec<String>);

    fn destroy(&mut self);
}

#[async_trait]
pub trait PipelineFactory: Send + Sync {
    async fn start(
        &self,
        video: &VideoMeta,
        filters: &AudioFilterSet,
        volume: VolumeHandle,
        events: mpsc::UnboundedSender<PlayerEvent>,
    ) -> Result<(Box<dyn MediaPipeline>, PlaybackResource), PipelineError>;
}

#[derive(Debug, Clone)]
pub struct TranscodeSettings {
    pub ffmpeg_path: String,
    pub bitrate: u32,
    pub frame_size: usize,
}

impl TranscodeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            bitrate: config.opus_bitrate,
            frame_size: config.frame_size,
        }
    }
}

pub fn ffmpeg_args(graph: &str) -> Vec<String> {
    let sample_rate = SAMPLE_RATE.to_string();
    [
        "-analyzeduration",
        "0",
        "-loglevel",
        "16",
        "-i",
        "pipe:0",
        "-af",
        graph,
        "-f",
        "s16le",
        "-ar",
        sample_rate.as_str(),
        "-ac",
        "2",
        "pipe:1",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

pub type InputStream = BoxStream<'static, Result<Bytes, PipelineError>>;

pub struct TranscodePipeline {
    id: ResourceId,
    cancel: CancellationToken,
    control: mpsc::UnboundedSender<Vec<String>>,
    supervisor: JoinHandle<()>,
    _control_port: ControlPort,
}

impl TranscodePipeline {
    /// Arranca todas las etapas y devuelve el recurso para el reproductor
    pub fn spawn(
        input: InputStream,
        graph: &str,
        control_port: ControlPort,
        settings: &TranscodeSettings,
        volume: VolumeHandle,
        events: mpsc::UnboundedSender<PlayerEvent>,
    ) -> Result<(Self, PlaybackResource), PipelineError> {
        let id = ResourceId::next();
        let cancel = CancellationToken::new();

        let mut child = Command::new(&settings.ffmpeg_path)
            .args(ffmpeg_args(graph))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::Spawn(e.to_string()))?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(PipelineError::Spawn("pipes de ffmpeg no disponibles".into()));
        };

        let (failure_tx, mut failure_rx) = mpsc::unbounded_channel::<PipelineError>();
        let (pcm_tx, pcm_rx) = flume::bounded::<Vec<u8>>(PCM_BUFFER);
        let (output_tx, output_rx) = flume::bounded::<Bytes>(OUTPUT_BUFFER);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let last_stderr = Arc::new(Mutex::new(None::<String>));

        spawn_fetch(input, stdin, failure_tx.clone(), cancel.clone());
        spawn_stderr_log(stderr, last_stderr.clone(), id);
        spawn_pcm_reader(
            stdout,
            pcm_frame_len(settings.frame_size),
            pcm_tx,
            failure_tx.clone(),
            cancel.clone(),
        );

        let encoder = spawn_encoder(
            pcm_rx,
            output_tx,
            volume.clone(),
            settings.bitrate,
            settings.frame_size,
            cancel.clone(),
        );
        tokio::spawn(async move {
            match encoder.await {
                Ok(Err(error)) => {
                    let _ = failure_tx.send(error);
                }
                Err(join) if join.is_panic() => {
                    let _ = failure_tx.send(PipelineError::Encode(join.to_string()));
                }
                _ => {}
            }
        });

        spawn_control_task(control_port.endpoint(), control_rx, cancel.clone());

        let supervisor_cancel = cancel.clone();
        let supervisor = tokio::spawn(async move {
            let failure = tokio::select! {
                _ = supervisor_cancel.cancelled() => None,
                Some(error) = failure_rx.recv() => Some(error),
                status = child.status() => match status {
                    Ok(status) if status.success() => {
                        // Fin natural: esperar a que el resto de etapas drene
                        failure_rx.recv().await
                    }
                    Ok(status) => {
                        let detail = last_stderr.lock().clone().unwrap_or_default();
                        Some(PipelineError::Transcode(format!("{status} {detail}").trim().to_string()))
                    }
                    Err(e) => Some(PipelineError::Transcode(e.to_string())),
                },
            };

            if supervisor_cancel.is_cancelled() {
                let _ = child.kill();
                debug!("🧹 Pipeline {} desmontado", id);
                return;
            }

            if let Some(error) = failure {
                warn!("❌ Pipeline {} falló: {}", id, error);
                supervisor_cancel.cancel();
                let _ = child.kill();
                let _ = events.send(PlayerEvent::Error {
                    resource: id,
                    error,
                });
            }
        });

        info!("🎼 Pipeline {} iniciado", id);

        let pipeline = Self {
            id,
            cancel,
            control: control_tx,
            supervisor,
            _control_port: control_port,
        };
        let resource = PlaybackResource {
            id,
            frames: output_rx,
            volume,
        };

        Ok((pipeline, resource))
    }
}

impl MediaPipeline for TranscodePipeline {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn send_controls(&self, commands: Vec<String>) {
        if commands.is_empty() {
            return;
        }
        if self.control.send(commands).is_err() {
            debug!("🎛️ Pipeline {} ya no acepta comandos", self.id);
        }
    }

    fn destroy(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for TranscodePipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
        if self.supervisor.is_finished() {
            debug!("🧹 Pipeline {} liberado", self.id);
        }
    }
}

fn spawn_fetch(
    mut input: InputStream,
    mut stdin: ChildStdin,
    failures: mpsc::UnboundedSender<PipelineError>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return,
                chunk = input.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    if let Err(e) = stdin.write_all(&bytes).await {
                        if !cancel.is_cancelled() {
                            debug!("📥 ffmpeg cerró stdin: {}", e);
                            let _ = failures.send(PipelineError::StreamAborted);
                        }
                        return;
                    }
                }
                Some(Err(error)) => {
                    let _ = failures.send(error);
                    return;
                }
                None => break,
            }
        }

        // EOF para ffmpeg
        let _ = stdin.close().await;
    });
}

fn spawn_stderr_log(stderr: ChildStderr, last: Arc<Mutex<Option<String>>>, id: ResourceId) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Some(Ok(line)) = lines.next().await {
            debug!("ffmpeg {}: {}", id, line);
            *last.lock() = Some(line);
        }
    });
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let read = reader.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

fn spawn_pcm_reader(
    mut stdout: ChildStdout,
    frame_len: usize,
    pcm: flume::Sender<Vec<u8>>,
    failures: mpsc::UnboundedSender<PipelineError>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut buffer = vec![0u8; frame_len];

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => return,
                read = read_frame(&mut stdout, &mut buffer) => read,
            };

            match read {
                Ok(0) => return,
                Ok(filled) => {
                    if pcm.send_async(buffer[..filled].to_vec()).await.is_err() {
                        return;
                    }
                    if filled < frame_len {
                        return;
                    }
                }
                Err(e) => {
                    if !cancel.is_cancelled() {
                        let _ = failures.send(PipelineError::Transcode(e.to_string()));
                    }
                    return;
                }
            }
        }
    });
}

/// Pipeline real: URL directa vía yt-dlp, descarga HTTP y ffmpeg
pub struct FfmpegPipelineFactory {
    http: reqwest::Client,
    extractor: Arc<YtDlpClient>,
    settings: TranscodeSettings,
}

impl FfmpegPipelineFactory {
    pub fn new(http: reqwest::Client, extractor: Arc<YtDlpClient>, settings: TranscodeSettings) -> Self {
        Self {
            http,
            extractor,
            settings,
        }
    }
}

#[async_trait]
impl PipelineFactory for FfmpegPipelineFactory {
    async fn start(
        &self,
        video: &VideoMeta,
        filters: &AudioFilterSet,
        volume: VolumeHandle,
        events: mpsc::UnboundedSender<PlayerEvent>,
    ) -> Result<(Box<dyn MediaPipeline>, PlaybackResource), PipelineError> {
        let stream_url = self.extractor.stream_url(&video.url).await?;

        let response = self
            .http
            .get(&stream_url)
            .send()
            .await
            .map_err(|e| PipelineError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::HttpStatus(status.as_u16()));
        }

        let input: InputStream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| PipelineError::Fetch(e.to_string())))
            .boxed();

        let port = ControlPort::reserve().map_err(|e| PipelineError::Spawn(e.to_string()))?;
        let graph = filters.filter_graph(port.port());
        debug!("🎛️ Filter graph para {}: {}", video.id, graph);

        let (pipeline, resource) =
            TranscodePipeline::spawn(input, &graph, port, &self.settings, volume, events)?;

        Ok((Box::new(pipeline), resource))
    }
}
