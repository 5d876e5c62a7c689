//! Canal de control hacia el filtro `azmq` de ffmpeg.
//!
//! Un socket REQ de ZeroMQ por pipeline. Cada comando espera su respuesta
//! antes de enviar el siguiente, y los que no se pudieron entregar quedan
//! pendientes hasta que el proceso acepte la conexión.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend, ZmqError, ZmqMessage};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Error de ZeroMQ en el canal de control: {0}")]
    Zmq(#[from] ZmqError),
    #[error("El filtro no respondió a '{0}'")]
    Timeout(String),
}

const CONNECT_ATTEMPTS: u32 = 20;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const REDELIVERY_DELAY: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
const RESERVE_ATTEMPTS: usize = 16;

/// Puertos de control asignados a pipelines vivos de este proceso
static RESERVED_PORTS: LazyLock<Mutex<HashSet<u16>>> = LazyLock::new(Default::default);

/// Puerto local reservado para el `azmq` de un pipeline.
///
/// El puerto se libera en el sistema antes de que ffmpeg lo tome, así que
/// otro proceso todavía puede ganarlo en ese intervalo. Dentro de este
/// proceso no se repite mientras la reserva siga viva.
#[derive(Debug)]
pub struct ControlPort {
    port: u16,
}

impl ControlPort {
    pub fn reserve() -> io::Result<Self> {
        for _ in 0..RESERVE_ATTEMPTS {
            let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
            let port = listener.local_addr()?.port();
            drop(listener);

            if RESERVED_PORTS.lock().insert(port) {
                return Ok(Self { port });
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            "sin puertos libres para el canal de control",
        ))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn endpoint(&self) -> String {
        format!("tcp://127.0.0.1:{}", self.port)
    }
}

impl Drop for ControlPort {
    fn drop(&mut self) {
        RESERVED_PORTS.lock().remove(&self.port);
    }
}

/// Conexión REQ hacia un `azmq`
pub struct ControlClient {
    socket: ReqSocket,
}

impl ControlClient {
    pub async fn connect(endpoint: &str) -> Result<Self, ControlError> {
        let mut socket = ReqSocket::new();
        socket.connect(endpoint).await?;
        Ok(Self { socket })
    }

    /// Envía un comando y devuelve la respuesta del filtro (`0 Success`, ...)
    pub async fn request(&mut self, command: &str) -> Result<String, ControlError> {
        self.socket.send(ZmqMessage::from(command)).await?;

        let reply = tokio::time::timeout(REQUEST_TIMEOUT, self.socket.recv())
            .await
            .map_err(|_| ControlError::Timeout(command.to_string()))??;

        Ok(reply
            .into_vec()
            .iter()
            .map(|frame| String::from_utf8_lossy(frame))
            .collect())
    }
}

async fn connect_with_retry(endpoint: &str, cancel: &CancellationToken) -> Option<ControlClient> {
    for attempt in 1..=CONNECT_ATTEMPTS {
        let connected = tokio::select! {
            _ = cancel.cancelled() => return None,
            connected = tokio::time::timeout(CONNECT_TIMEOUT, ControlClient::connect(endpoint)) => connected,
        };

        match connected {
            Ok(Ok(client)) => return Some(client),
            Ok(Err(e)) => {
                debug!("🔌 Control {} no disponible (intento {}): {}", endpoint, attempt, e);
            }
            Err(_) => {
                debug!("🔌 Control {} sin respuesta (intento {})", endpoint, attempt);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(CONNECT_BACKOFF) => {}
        }
    }

    warn!("⚠️ No se pudo conectar al canal de control en {}", endpoint);
    None
}

/// Filtro y parámetro que ajusta un comando (`bass@bassboost g`)
fn command_target(command: &str) -> &str {
    command
        .rsplit_once(' ')
        .map(|(target, _)| target)
        .unwrap_or(command)
}

/// Agrega un lote a los pendientes; un comando nuevo reemplaza al anterior
/// del mismo parámetro
fn enqueue(pending: &mut VecDeque<String>, batch: Vec<String>) {
    for command in batch {
        pending.retain(|queued| command_target(queued) != command_target(&command));
        pending.push_back(command);
    }
}

/// Entrega los pendientes en orden; el que falla queda al frente
async fn deliver(
    client: &mut ControlClient,
    pending: &mut VecDeque<String>,
) -> Result<(), ControlError> {
    while let Some(command) = pending.front() {
        let reply = client.request(command).await?;
        debug!("🎛️ {} -> {}", command, reply);
        pending.pop_front();
    }
    Ok(())
}

/// Tarea que entrega lotes de comandos al proceso en ejecución.
///
/// Conecta de forma perezosa con el primer lote y reconecta si la conexión
/// se rompe. Lo que no se entregó se reintenta antes del siguiente lote.
/// Termina al cancelarse el token o al cerrarse el canal.
pub fn spawn_control_task(
    endpoint: String,
    mut commands: mpsc::UnboundedReceiver<Vec<String>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut client: Option<ControlClient> = None;
        let mut pending = VecDeque::new();

        loop {
            if pending.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    batch = commands.recv() => match batch {
                        Some(batch) => enqueue(&mut pending, batch),
                        None => break,
                    },
                }
            }

            while let Ok(batch) = commands.try_recv() {
                enqueue(&mut pending, batch);
            }

            if client.is_none() {
                client = connect_with_retry(&endpoint, &cancel).await;
            }

            if let Some(active) = client.as_mut() {
                if let Err(e) = deliver(active, &mut pending).await {
                    warn!("⚠️ Error enviando comandos al filtro: {}", e);
                    client = None;
                }
                continue;
            }

            debug!("🎛️ {} comandos esperando al canal {}", pending.len(), endpoint);
            tokio::select! {
                _ = cancel.cancelled() => break,
                batch = commands.recv() => match batch {
                    Some(batch) => enqueue(&mut pending, batch),
                    None => break,
                },
                _ = tokio::time::sleep(REDELIVERY_DELAY) => {}
            }
        }

        debug!("🔌 Canal de control {} cerrado", endpoint);
    })
}
